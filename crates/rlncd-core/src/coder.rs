//! Fixed-generation GF(256) Random Linear Network Coding.
//!
//! This is the narrow §6.3 "RLNC coder contract" external collaborator: the
//! only place in the crate where Galois-field arithmetic happens. Everything
//! above this module treats symbols as opaque byte buffers.
//!
//! A generation holds up to `G` symbols of fixed size `S`. Every coded
//! payload carries a `G`-byte coefficient vector followed by `S` bytes of
//! combined data; a coefficient vector with exactly one nonzero entry equal
//! to `1` is, by definition (§ Glossary), a systematic symbol — the original
//! plain symbol recovered at zero decoding cost. Encoders send absorbed
//! symbols systematically first, then fall back to random linear
//! combinations once every absorbed symbol has gone out systematically
//! once, matching the original `kodo` stack's `systematic_encoder` layer.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng};

use crate::error::FrameError;

/// GF(2^8) with primitive polynomial x^8 + x^4 + x^3 + x^2 + 1 (0x11D).
/// Log/antilog tables give O(1) multiply/divide/inverse.
mod gf256 {
    pub fn mul(a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let log_a = LOG_TABLE[a as usize] as u16;
        let log_b = LOG_TABLE[b as usize] as u16;
        EXP_TABLE[((log_a + log_b) % 255) as usize]
    }

    pub fn inv(a: u8) -> u8 {
        assert_ne!(a, 0, "inverse of zero in GF(256)");
        let log_a = LOG_TABLE[a as usize] as u16;
        EXP_TABLE[(255 - log_a) as usize]
    }

    const fn gen_tables() -> ([u8; 256], [u8; 512]) {
        let mut log = [0u8; 256];
        let mut exp = [0u8; 512];
        let mut x: u16 = 1;
        let mut i = 0usize;
        while i < 255 {
            exp[i] = x as u8;
            exp[i + 255] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11D;
            }
            i += 1;
        }
        log[0] = 0;
        (log, exp)
    }

    const TABLES: ([u8; 256], [u8; 512]) = gen_tables();
    const LOG_TABLE: [u8; 256] = TABLES.0;
    const EXP_TABLE: [u8; 512] = TABLES.1;
}

/// Draw a uniformly random nonzero byte (GF(256) coefficients are never 0,
/// which would drop that symbol from the combination entirely).
fn nonzero_byte(rng: &mut StdRng) -> u8 {
    loop {
        let b: u8 = rng.random();
        if b != 0 {
            return b;
        }
    }
}

/// Per-generation encoder: absorbs up to `symbols` symbols of `symbol_size`
/// bytes each, then emits coded payloads on demand.
pub struct GenerationEncoder {
    symbols: usize,
    symbol_size: usize,
    storage: Vec<u8>,
    rank: usize,
    next_systematic: usize,
    rng: StdRng,
}

impl GenerationEncoder {
    pub fn new(symbols: usize, symbol_size: usize, seed: u64) -> GenerationEncoder {
        GenerationEncoder {
            symbols,
            symbol_size,
            storage: vec![0u8; symbols * symbol_size],
            rank: 0,
            next_systematic: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    pub fn symbol_size(&self) -> usize {
        self.symbol_size
    }

    /// Coefficient vector (`symbols` bytes) followed by the combined data
    /// (`symbol_size` bytes).
    pub fn payload_size(&self) -> usize {
        self.symbols + self.symbol_size
    }

    pub fn block_size(&self) -> usize {
        self.symbols * self.symbol_size
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    fn symbol_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * self.symbol_size;
        &mut self.storage[start..start + self.symbol_size]
    }

    fn symbol(&self, index: usize) -> &[u8] {
        let start = index * self.symbol_size;
        &self.storage[start..start + self.symbol_size]
    }

    /// Register `buffer` (exactly `symbol_size` bytes) as symbol `index`.
    /// Rank only advances when registering the next sequential index,
    /// matching the caller's contract (§4.E always calls with `index ==
    /// rank()`).
    pub fn set_symbol(&mut self, index: usize, buffer: &[u8]) -> Result<(), FrameError> {
        if index >= self.symbols || buffer.len() != self.symbol_size {
            return Err(FrameError::StorageExhausted);
        }
        self.symbol_mut(index).copy_from_slice(buffer);
        if index == self.rank {
            self.rank += 1;
        }
        Ok(())
    }

    /// Encode one payload into `out_buf` (must be exactly `payload_size()`
    /// bytes). Systematic symbols are emitted first, one per absorbed
    /// index; once every absorbed symbol has gone out systematically once,
    /// subsequent calls emit random linear combinations over `0..rank`.
    pub fn encode(&mut self, out_buf: &mut [u8]) -> Result<usize, FrameError> {
        if self.rank == 0 || out_buf.len() != self.payload_size() {
            return Err(FrameError::StorageExhausted);
        }

        let (coeffs, data) = out_buf.split_at_mut(self.symbols);
        for c in coeffs.iter_mut() {
            *c = 0;
        }

        if self.next_systematic < self.rank {
            let idx = self.next_systematic;
            self.next_systematic += 1;
            coeffs[idx] = 1;
            data.copy_from_slice(self.symbol(idx));
        } else {
            for i in 0..self.rank {
                coeffs[i] = nonzero_byte(&mut self.rng);
            }
            for b in data.iter_mut() {
                *b = 0;
            }
            for i in 0..self.rank {
                let c = coeffs[i];
                for (j, &byte) in self.symbol(i).iter().enumerate() {
                    data[j] ^= gf256::mul(c, byte);
                }
            }
        }

        Ok(self.payload_size())
    }
}

/// A row of the decoder's augmented coefficient matrix: `symbols`
/// coefficients plus `symbol_size` bytes of combined data.
#[derive(Clone)]
struct Row {
    coeffs: Vec<u8>,
    data: Vec<u8>,
}

/// Per-generation decoder: accumulates coded rows and runs Gaussian
/// elimination, exposing both full completion and partial-decode progress
/// (a usable prefix recovered without full rank).
pub struct GenerationDecoder {
    symbols: usize,
    symbol_size: usize,
    rows: Vec<Row>,
    recovered: Vec<bool>,
    recovered_data: Vec<u8>,
    rank: usize,
    last_systematic: bool,
    last_index: usize,
}

impl GenerationDecoder {
    pub fn new(symbols: usize, symbol_size: usize) -> GenerationDecoder {
        GenerationDecoder {
            symbols,
            symbol_size,
            rows: Vec::new(),
            recovered: vec![false; symbols],
            recovered_data: vec![0u8; symbols * symbol_size],
            rank: 0,
            last_systematic: false,
            last_index: 0,
        }
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    pub fn payload_size(&self) -> usize {
        self.symbols + self.symbol_size
    }

    /// Matrix rank: number of linearly independent coded rows seen so far,
    /// capped at `symbols`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn last_symbol_is_systematic(&self) -> bool {
        self.last_systematic
    }

    pub fn last_symbol_index(&self) -> usize {
        self.last_index
    }

    pub fn is_complete(&self) -> bool {
        self.recovered.iter().all(|&r| r)
    }

    pub fn is_partial_complete(&self) -> bool {
        self.recovered.iter().any(|&r| r) && !self.is_complete()
    }

    pub fn symbol(&self, index: usize) -> &[u8] {
        let start = index * self.symbol_size;
        &self.recovered_data[start..start + self.symbol_size]
    }

    fn set_recovered(&mut self, index: usize, data: &[u8]) {
        let start = index * self.symbol_size;
        self.recovered_data[start..start + self.symbol_size].copy_from_slice(data);
        if !self.recovered[index] {
            self.recovered[index] = true;
        }
    }

    /// Feed one coded payload (`payload_size()` bytes: coefficients then
    /// data). Reduces the new row against already-recovered symbols, checks
    /// whether it was systematic, appends it if independent, and
    /// re-triangulates to pull out any newly fully-determined symbols.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if bytes.len() != self.payload_size() {
            return Err(FrameError::Malformed("coded payload size mismatch"));
        }

        let (coeffs_in, data_in) = bytes.split_at(self.symbols);
        let mut coeffs = coeffs_in.to_vec();
        let mut data = data_in.to_vec();

        self.reduce_against_recovered(&mut coeffs, &mut data);

        let nonzero: Vec<usize> = coeffs
            .iter()
            .enumerate()
            .filter(|(_, &c)| c != 0)
            .map(|(i, _)| i)
            .collect();

        self.last_systematic = nonzero.len() == 1 && coeffs[nonzero[0]] == 1;
        self.last_index = nonzero.first().copied().unwrap_or(0);

        if nonzero.is_empty() {
            // Fully reduced to the zero vector: either non-innovative, or
            // it resolved a symbol outright (data already holds the answer
            // if it came in with exactly one unknown before reduction).
            return Ok(());
        }

        self.rows.push(Row { coeffs, data });
        self.triangulate();
        Ok(())
    }

    fn reduce_against_recovered(&self, coeffs: &mut [u8], data: &mut [u8]) {
        for (i, c) in coeffs.iter_mut().enumerate() {
            if *c == 0 || !self.recovered[i] {
                continue;
            }
            let coeff = *c;
            let known = self.symbol(i);
            for (j, &byte) in known.iter().enumerate() {
                data[j] ^= gf256::mul(coeff, byte);
            }
            *c = 0;
        }
    }

    /// Re-reduce every stored row against the current recovered set, then
    /// run forward elimination + back substitution to find any column with
    /// a unique, fully-reduced pivot row — i.e. a symbol now solvable
    /// outright, whether or not the whole generation has full rank yet.
    fn triangulate(&mut self) {
        for i in 0..self.rows.len() {
            let mut coeffs = std::mem::take(&mut self.rows[i].coeffs);
            let mut data = std::mem::take(&mut self.rows[i].data);
            self.reduce_against_recovered(&mut coeffs, &mut data);
            self.rows[i].coeffs = coeffs;
            self.rows[i].data = data;
        }
        self.rows.retain(|r| r.coeffs.iter().any(|&c| c != 0));

        let n = self.symbols;
        let mut pivot_row_for_col: Vec<Option<usize>> = vec![None; n];
        let mut pivot_row = 0usize;

        for col in 0..n {
            if self.recovered[col] {
                continue;
            }
            let Some(found) = (pivot_row..self.rows.len()).find(|&r| self.rows[r].coeffs[col] != 0)
            else {
                continue;
            };
            self.rows.swap(pivot_row, found);

            let pivot_val = self.rows[pivot_row].coeffs[col];
            let inv = gf256::inv(pivot_val);
            for c in self.rows[pivot_row].coeffs.iter_mut() {
                *c = gf256::mul(*c, inv);
            }
            for d in self.rows[pivot_row].data.iter_mut() {
                *d = gf256::mul(*d, inv);
            }

            for other in 0..self.rows.len() {
                if other == pivot_row {
                    continue;
                }
                let factor = self.rows[other].coeffs[col];
                if factor == 0 {
                    continue;
                }
                let (pivot_coeffs, pivot_data) =
                    (self.rows[pivot_row].coeffs.clone(), self.rows[pivot_row].data.clone());
                for (j, &pc) in pivot_coeffs.iter().enumerate() {
                    self.rows[other].coeffs[j] ^= gf256::mul(factor, pc);
                }
                for (j, &pd) in pivot_data.iter().enumerate() {
                    self.rows[other].data[j] ^= gf256::mul(factor, pd);
                }
            }

            pivot_row_for_col[col] = Some(pivot_row);
            pivot_row += 1;
        }

        for (col, prow) in pivot_row_for_col.into_iter().enumerate() {
            let Some(prow) = prow else { continue };
            let is_unit = self.rows[prow]
                .coeffs
                .iter()
                .enumerate()
                .all(|(j, &c)| if j == col { c == 1 } else { c == 0 });
            if is_unit {
                let data = self.rows[prow].data.clone();
                self.set_recovered(col, &data);
            }
        }

        self.rank = pivot_row.max(self.recovered.iter().filter(|&&r| r).count());
        self.rows.retain(|r| r.coeffs.iter().any(|&c| c != 0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_symbol(size: usize, byte: u8) -> Vec<u8> {
        vec![byte; size]
    }

    #[test]
    fn encoder_rank_tracks_absorbed_symbols() {
        let mut enc = GenerationEncoder::new(4, 16, 1);
        assert_eq!(enc.rank(), 0);
        enc.set_symbol(0, &padded_symbol(16, 1)).unwrap();
        assert_eq!(enc.rank(), 1);
        enc.set_symbol(1, &padded_symbol(16, 2)).unwrap();
        assert_eq!(enc.rank(), 2);
    }

    #[test]
    fn encoder_rejects_wrong_size_buffer() {
        let mut enc = GenerationEncoder::new(4, 16, 1);
        assert!(enc.set_symbol(0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn first_encodes_are_systematic_one_per_absorbed_symbol() {
        let mut enc = GenerationEncoder::new(3, 8, 42);
        for i in 0..3u8 {
            enc.set_symbol(i as usize, &padded_symbol(8, i + 1)).unwrap();
        }
        let mut out = vec![0u8; enc.payload_size()];
        for expected_idx in 0..3 {
            enc.encode(&mut out).unwrap();
            let coeffs = &out[..3];
            let nonzero: Vec<usize> = coeffs
                .iter()
                .enumerate()
                .filter(|(_, &c)| c != 0)
                .map(|(i, _)| i)
                .collect();
            assert_eq!(nonzero, vec![expected_idx]);
            assert_eq!(coeffs[expected_idx], 1);
        }
    }

    #[test]
    fn after_systematic_phase_encoder_emits_coded_combinations() {
        let mut enc = GenerationEncoder::new(2, 8, 7);
        enc.set_symbol(0, &padded_symbol(8, 9)).unwrap();
        enc.set_symbol(1, &padded_symbol(8, 10)).unwrap();
        let mut out = vec![0u8; enc.payload_size()];
        enc.encode(&mut out).unwrap(); // systematic 0
        enc.encode(&mut out).unwrap(); // systematic 1
        enc.encode(&mut out).unwrap(); // now coded
        let coeffs = &out[..2];
        assert!(coeffs.iter().filter(|&&c| c != 0).count() >= 1);
    }

    #[test]
    fn round_trip_full_generation_byte_identical() {
        let g = 4;
        let s = 16;
        let payloads: Vec<Vec<u8>> = (0..g as u8).map(|i| padded_symbol(s, i + 1)).collect();

        let mut enc = GenerationEncoder::new(g, s, 1234);
        for (i, p) in payloads.iter().enumerate() {
            enc.set_symbol(i, p).unwrap();
        }

        let mut dec = GenerationDecoder::new(g, s);
        let mut buf = vec![0u8; enc.payload_size()];
        // systematic phase alone is enough to decode fully.
        for _ in 0..g {
            enc.encode(&mut buf).unwrap();
            dec.decode(&buf).unwrap();
        }

        assert!(dec.is_complete());
        for (i, p) in payloads.iter().enumerate() {
            assert_eq!(dec.symbol(i), p.as_slice());
        }
    }

    #[test]
    fn coded_symbols_can_recover_a_missing_systematic_one() {
        let g = 3;
        let s = 8;
        let payloads: Vec<Vec<u8>> = (0..g as u8).map(|i| padded_symbol(s, i + 5)).collect();

        let mut enc = GenerationEncoder::new(g, s, 99);
        for (i, p) in payloads.iter().enumerate() {
            enc.set_symbol(i, p).unwrap();
        }

        let mut dec = GenerationDecoder::new(g, s);
        let mut buf = vec![0u8; enc.payload_size()];

        enc.encode(&mut buf).unwrap(); // systematic 0
        dec.decode(&buf).unwrap();
        // skip systematic 1 (simulate loss)
        enc.encode(&mut buf).unwrap();
        enc.encode(&mut buf).unwrap(); // systematic 2
        dec.decode(&buf).unwrap();

        assert!(!dec.is_complete());
        // one more coded combination should supply the missing rank.
        enc.encode(&mut buf).unwrap();
        dec.decode(&buf).unwrap();
        assert!(dec.is_complete());
        assert_eq!(dec.symbol(1), payloads[1].as_slice());
    }

    #[test]
    fn partial_complete_when_some_but_not_all_symbols_recovered() {
        let g = 4;
        let s = 8;
        let payloads: Vec<Vec<u8>> = (0..g as u8).map(|i| padded_symbol(s, i + 1)).collect();

        let mut enc = GenerationEncoder::new(g, s, 5);
        for (i, p) in payloads.iter().enumerate() {
            enc.set_symbol(i, p).unwrap();
        }

        let mut dec = GenerationDecoder::new(g, s);
        let mut buf = vec![0u8; enc.payload_size()];
        enc.encode(&mut buf).unwrap();
        dec.decode(&buf).unwrap();
        enc.encode(&mut buf).unwrap();
        dec.decode(&buf).unwrap();

        assert!(dec.is_partial_complete());
        assert!(!dec.is_complete());
    }

    #[test]
    fn decode_rejects_wrong_payload_size() {
        let mut dec = GenerationDecoder::new(4, 16);
        assert!(dec.decode(&[0u8; 3]).is_err());
    }
}
