#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rlncd_core::coder::GenerationDecoder;

#[derive(Debug, Arbitrary)]
struct Input {
    symbols: u8,
    symbol_size: u8,
    rows: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let symbols = 1 + (input.symbols as usize % 32);
    let symbol_size = 1 + (input.symbol_size as usize % 256);
    let mut decoder = GenerationDecoder::new(symbols, symbol_size);

    for row in input.rows.iter().take(64) {
        // `decode` rejects anything not exactly `payload_size()` bytes, so
        // arbitrary-length rows exercise that guard rather than being
        // truncated/padded to fit.
        let _ = decoder.decode(row);
    }
});
