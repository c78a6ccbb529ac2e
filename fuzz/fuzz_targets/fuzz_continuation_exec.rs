//! Fuzz target for the autostart Exec= value.
//!
//! Whatever decodes must survive an encode/decode round trip unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pm_core::continuation::{decode_exec, encode_exec};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(args) = decode_exec(text) {
        if let Ok(value) = encode_exec(&args) {
            assert_eq!(decode_exec(&value).ok(), Some(args));
        }
    }
});
