#![no_main]

use libfuzzer_sys::fuzz_target;
use rlncd_core::frame::split_length_prefix;

fuzz_target!(|data: &[u8]| {
    let _ = split_length_prefix(data);
});
