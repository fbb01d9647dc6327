#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rstate_core::{MemoryStorage, StatePath, Store, StoreConfig};
use serde_json::{Map, Value, json};

const KEYS: &[&str] = &["a", "b", "c", "theme", "mode"];

#[derive(Arbitrary, Debug)]
enum Leaf {
    Null,
    Bool(bool),
    Int(i32),
    Object(Vec<(u8, bool)>),
}

impl Leaf {
    fn to_value(&self) -> Value {
        match self {
            Leaf::Null => Value::Null,
            Leaf::Bool(b) => json!(b),
            Leaf::Int(n) => json!(n),
            Leaf::Object(entries) => {
                let map: Map<String, Value> = entries
                    .iter()
                    .take(4)
                    .map(|(k, v)| (key(*k).to_string(), json!(v)))
                    .collect();
                Value::Object(map)
            }
        }
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    Update(Vec<(u8, Leaf)>),
    SetPath(Vec<u8>, Leaf),
    Subscribe(Vec<u8>),
}

fn key(k: u8) -> &'static str {
    KEYS[k as usize % KEYS.len()]
}

fn path(segments: &[u8]) -> StatePath {
    StatePath::new(segments.iter().take(4).map(|k| key(*k)))
}

fuzz_target!(|input: (bool, Vec<Op>)| {
    let (recursive, ops) = input;
    let Ok(store) = Store::new(
        StoreConfig::new("fuzz", json!({"theme": {"mode": "dark"}})).with_recursive(recursive),
        MemoryStorage::new(),
    ) else {
        return;
    };
    let mut subs = Vec::new();

    for op in ops.into_iter().take(64) {
        match op {
            Op::Update(entries) => {
                let map: Map<String, Value> = entries
                    .iter()
                    .take(8)
                    .map(|(k, v)| (key(*k).to_string(), v.to_value()))
                    .collect();
                let _ = store.update(Value::Object(map));
            }
            Op::SetPath(segments, leaf) => {
                let _ = store.set_path(&path(&segments), leaf.to_value());
            }
            Op::Subscribe(segments) => {
                if let Ok(sub) = store.on_did_change_at(&path(&segments), |_| {}) {
                    subs.push(sub);
                }
            }
        }
        assert!(store.state().is_object());
        assert!(!store.bus().in_transaction());
    }
});
