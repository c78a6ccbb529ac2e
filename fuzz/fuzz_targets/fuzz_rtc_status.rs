//! Fuzz target for the /proc/driver/rtc status table.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pm_core::alarm::{parse_rtc_status, verify_rtc_status};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let status = parse_rtc_status(text);
        let _ = verify_rtc_status(&status);
    }
});
