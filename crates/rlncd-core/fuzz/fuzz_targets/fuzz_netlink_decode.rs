#![no_main]

use libfuzzer_sys::fuzz_target;
use rlncd_core::netlink::decode_frame;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let _ = decode_frame(data[0], &data[1..]);
});
