#![no_main]

use libfuzzer_sys::fuzz_target;
use rstate_core::reconciled;
use serde_json::Value;

// Input: two JSON documents separated by a NUL byte, loaded then defaults.
fuzz_target!(|data: &[u8]| {
    let mut parts = data.splitn(2, |b| *b == 0);
    let (Some(loaded), Some(defaults)) = (parts.next(), parts.next()) else {
        return;
    };
    let Ok(loaded) = serde_json::from_slice::<Value>(loaded) else {
        return;
    };
    let Ok(defaults) = serde_json::from_slice::<Value>(defaults) else {
        return;
    };
    if !defaults.is_object() {
        return;
    }

    let once = reconciled(loaded, &defaults);
    assert!(once.is_object());
    let twice = reconciled(once.clone(), &defaults);
    assert_eq!(once, twice);
});
