//! Fuzz target for values read back from the wakealarm register.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pm_core::alarm::{parse_stored_value, AlarmCandidates};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Some(stored) = parse_stored_value(text) {
            let _ = AlarmCandidates::compute(stored, 0, 60).accepts(stored);
        }
    }
});
