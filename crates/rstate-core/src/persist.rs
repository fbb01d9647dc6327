#![forbid(unsafe_code)]

//! Write-through from the aggregate change stream to the backend.
//!
//! The store is synchronous and the backend is not, so the subscription
//! only records the latest snapshot. Nothing reaches the backend until the
//! owner calls [`WriteThrough::flush`].
//!
//! # Invariants
//!
//! 1. At most one snapshot is pending. Backends store whole states, so a
//!    newer snapshot supersedes an unflushed older one.
//! 2. Because the subscription is batched, one `update` records exactly one
//!    snapshot and one flush after it performs exactly one write.
//!
//! # Failure Modes
//!
//! - **Handle dropped**: the subscription goes with it and later changes are
//!   not persisted. Keep the handle for as long as the store should persist.
//! - **Backend write fails**: the snapshot is dropped and the error returned.
//!   The next change records a fresh snapshot.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::bus::Subscription;
use crate::error::Result;
use crate::storage::StateStorage;
use crate::store::Store;

/// Disposer returned by [`Store::init`].
///
/// Call [`flush`](Self::flush) after changes to persist them.
#[must_use = "dropping the WriteThrough detaches persistence"]
pub struct WriteThrough {
    store_id: String,
    storage: Rc<dyn StateStorage>,
    pending: Rc<RefCell<Option<Value>>>,
    /// Snapshots recorded and later replaced before a flush.
    superseded: Rc<Cell<usize>>,
    subscription: Option<Subscription>,
    written: usize,
}

impl fmt::Debug for WriteThrough {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteThrough")
            .field("store", &self.store_id)
            .field("pending", &self.has_pending())
            .field("superseded", &self.superseded.get())
            .field("written", &self.written)
            .field("active", &self.subscription.is_some())
            .finish()
    }
}

impl WriteThrough {
    pub(crate) fn attach(store: &Store, storage: Rc<dyn StateStorage>) -> Self {
        let pending = Rc::new(RefCell::new(None));
        let superseded = Rc::new(Cell::new(0));
        let slot = Rc::clone(&pending);
        let replaced = Rc::clone(&superseded);
        let subscription = store.subscribe_root(
            move |state| {
                if slot.borrow_mut().replace(state.clone()).is_some() {
                    replaced.set(replaced.get() + 1);
                }
            },
            false,
        );
        Self {
            store_id: store.id().to_string(),
            storage,
            pending,
            superseded,
            subscription: Some(subscription),
            written: 0,
        }
    }

    /// Whether a snapshot is waiting for [`flush`](Self::flush).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Snapshots replaced by a newer one before they were flushed.
    #[must_use]
    pub fn superseded(&self) -> usize {
        self.superseded.get()
    }

    /// Snapshots successfully written over this handle's lifetime.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }

    /// Whether the change stream is still attached.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Write the pending snapshot, if any. Returns the number written.
    ///
    /// A backend failure drops the snapshot without retrying it.
    pub async fn flush(&mut self) -> Result<usize> {
        let next = self.pending.borrow_mut().take();
        let Some(snapshot) = next else {
            return Ok(0);
        };
        if let Err(err) = self.storage.write(&snapshot).await {
            tracing::warn!(
                message = "store.write_through.failed",
                store = %self.store_id,
                error = %err
            );
            return Err(err.into());
        }
        self.written += 1;
        tracing::debug!(
            message = "store.write_through",
            store = %self.store_id,
            written = self.written,
            superseded = self.superseded.get()
        );
        Ok(1)
    }

    /// Detach from the change stream. A pending snapshot is discarded.
    pub fn dispose(mut self) {
        self.detach_stream();
    }

    /// Flush what is pending, then detach.
    pub async fn close(mut self) -> Result<usize> {
        let written = self.flush().await?;
        self.detach_stream();
        Ok(written)
    }

    fn detach_stream(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose();
        }
        self.pending.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn store() -> Result<(Store, Rc<MemoryStorage>)> {
        let storage = Rc::new(MemoryStorage::with_state(json!({"volume": 80})));
        let store = Store::new(
            StoreConfig::new("settings", json!({"volume": 50, "muted": false})),
            Rc::clone(&storage),
        )?;
        Ok((store, storage))
    }

    #[tokio::test]
    async fn init_records_nothing() -> Result<()> {
        let (store, storage) = store()?;
        let mut wt = store.init().await?;
        assert!(!wt.has_pending());
        assert_eq!(wt.flush().await?, 0);
        assert_eq!(storage.write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn one_update_one_write() -> Result<()> {
        let (store, storage) = store()?;
        let mut wt = store.init().await?;

        store.update(json!({"volume": 10, "muted": true}))?;
        assert!(wt.has_pending());
        assert_eq!(wt.flush().await?, 1);

        assert_eq!(
            storage.writes(),
            vec![json!({"volume": 10, "muted": true})]
        );
        assert_eq!(wt.written(), 1);
        assert_eq!(wt.superseded(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unflushed_snapshots_coalesce_to_latest() -> Result<()> {
        let (store, storage) = store()?;
        let mut wt = store.init().await?;

        for volume in 1..=100 {
            store.update(json!({ "volume": volume }))?;
        }
        assert_eq!(wt.superseded(), 99);
        assert_eq!(wt.flush().await?, 1);
        assert_eq!(wt.flush().await?, 0);

        assert_eq!(storage.writes(), vec![json!({"volume": 100, "muted": false})]);
        Ok(())
    }

    #[tokio::test]
    async fn failed_write_surfaces_without_retry() -> Result<()> {
        let (store, storage) = store()?;
        let mut wt = store.init().await?;

        store.update(json!({"volume": 1}))?;
        storage.fail_next_write("disk full");

        let err = wt.flush().await.unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));
        assert!(!wt.has_pending());
        assert_eq!(wt.flush().await?, 0);

        store.update(json!({"volume": 2}))?;
        assert_eq!(wt.flush().await?, 1);
        assert_eq!(storage.writes(), vec![json!({"volume": 2, "muted": false})]);
        Ok(())
    }

    #[tokio::test]
    async fn dispose_stops_recording() -> Result<()> {
        let (store, storage) = store()?;
        let wt = store.init().await?;
        assert!(wt.is_active());
        wt.dispose();

        store.update(json!({"volume": 3}))?;
        assert_eq!(storage.write_count(), 0);
        assert_eq!(store.bus().batched_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_handle_stops_persistence() -> Result<()> {
        let (store, storage) = store()?;
        drop(store.init().await?);
        assert_eq!(store.bus().batched_count(), 0);

        store.update(json!({"volume": 10}))?;
        assert_eq!(storage.write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn kept_handle_persists_across_updates() -> Result<()> {
        let (store, storage) = store()?;
        let mut wt = store.init().await?;
        assert_eq!(store.bus().batched_count(), 1);

        store.update(json!({"volume": 10}))?;
        wt.flush().await?;
        store.update(json!({"muted": true}))?;
        wt.flush().await?;

        assert_eq!(storage.write_count(), 2);
        assert_eq!(storage.current(), Some(json!({"volume": 10, "muted": true})));
        Ok(())
    }

    #[tokio::test]
    async fn close_flushes_then_detaches() -> Result<()> {
        let (store, storage) = store()?;
        let wt = store.init().await?;
        store.update(json!({"volume": 3}))?;

        assert_eq!(wt.close().await?, 1);
        store.update(json!({"volume": 4}))?;
        assert_eq!(storage.write_count(), 1);
        Ok(())
    }
}
