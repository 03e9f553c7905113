//! Grow-on-demand decoder pool.
//!
//! A vector of decoder slots indexed by slot id, grown the first time a new
//! id is observed on the wire. Grounded in `decoder_map.cpp`'s
//! `get_decoder`/`add_enc`.

use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::counters::{CounterGroup, Counters};
use crate::decoder::Decoder;
use crate::frame::{decode_uid, Frame};
use crate::pqueue::BlockingPriorityQueue;
use crate::rtt::ControlTracker;

pub struct DecoderPool {
    config: Arc<Config>,
    outbound: Arc<BlockingPriorityQueue<Frame>>,
    ctrl: Arc<ControlTracker>,
    counters: Arc<Counters>,
    ifindex: u32,
    slots: Mutex<Vec<Option<Decoder>>>,
}

impl DecoderPool {
    pub fn new(
        config: Arc<Config>,
        outbound: Arc<BlockingPriorityQueue<Frame>>,
        ctrl: Arc<ControlTracker>,
        counters: Arc<Counters>,
        ifindex: u32,
    ) -> DecoderPool {
        DecoderPool {
            config,
            outbound,
            ctrl,
            counters,
            ifindex,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Route an `ENC` frame by its UID's `(slot_id, block_counter)`,
    /// growing the slot vector, creating, replacing, or feeding an existing
    /// decoder as appropriate.
    pub fn add_enc(&self, frame: Frame) {
        let Some(uid) = frame.uid() else { return };
        let (slot_id, block_counter) = decode_uid(uid);
        let idx = slot_id as usize;

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.len() <= idx {
            slots.resize_with(idx + 1, || None);
        }

        let needs_fresh = match &slots[idx] {
            None => true,
            Some(dec) => {
                let existing = dec.block();
                if existing == block_counter {
                    false
                } else if existing > block_counter && block_counter != 0 {
                    // stale frame for an already-superseded generation
                    self.counters.increment("stale enc dropped");
                    return;
                } else {
                    true
                }
            }
        };

        if needs_fresh {
            slots[idx] = Some(Decoder::spawn(
                self.config.clone(),
                self.outbound.clone(),
                self.ctrl.clone(),
                CounterGroup::new(self.counters.clone(), format!("decoder slot {idx}")),
                self.ifindex,
                slot_id,
                block_counter,
            ));
        }

        slots[idx].as_ref().expect("just ensured present").add_enc(frame);
    }

    #[cfg(test)]
    fn block_at(&self, idx: usize) -> Option<u8> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())[idx].as_ref().map(|d| d.block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossModel;
    use crate::frame::{encode_uid, Attr, Command, FrameType};

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            symbols: 4,
            symbol_size: 16,
            loss: LossModel::from_percent(0, 0, 0),
            ..Config::default()
        })
    }

    fn empty_frame() -> Frame {
        Frame::new(Command::Frame, Vec::new())
    }

    fn enc_frame(uid: u16) -> Frame {
        Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Enc),
                Attr::Block(uid),
                Attr::Src([1, 2, 3, 4, 5, 6]),
                Attr::Dst([6, 5, 4, 3, 2, 1]),
                Attr::Frame(Arc::new(vec![0u8; 20])),
            ],
        )
    }

    fn pool() -> DecoderPool {
        let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
        let ctrl = Arc::new(ControlTracker::new(50.0));
        DecoderPool::new(test_config(), outbound, ctrl, Arc::new(Counters::new()), 7)
    }

    #[test]
    fn first_enc_for_a_slot_creates_a_decoder() {
        let p = pool();
        p.add_enc(enc_frame(encode_uid(0, 3)));
        assert_eq!(p.block_at(0), Some(3));
    }

    #[test]
    fn matching_block_counter_reuses_the_existing_decoder() {
        let p = pool();
        p.add_enc(enc_frame(encode_uid(0, 3)));
        p.add_enc(enc_frame(encode_uid(0, 3)));
        assert_eq!(p.block_at(0), Some(3));
    }

    #[test]
    fn newer_block_counter_replaces_the_slot() {
        let p = pool();
        p.add_enc(enc_frame(encode_uid(0, 3)));
        p.add_enc(enc_frame(encode_uid(0, 4)));
        assert_eq!(p.block_at(0), Some(4));
    }

    #[test]
    fn stale_block_counter_is_dropped() {
        let p = pool();
        p.add_enc(enc_frame(encode_uid(0, 10)));
        p.add_enc(enc_frame(encode_uid(0, 3)));
        assert_eq!(p.block_at(0), Some(10), "stale frame must not replace the slot");
    }

    #[test]
    fn wraparound_to_zero_is_treated_as_newer() {
        let p = pool();
        p.add_enc(enc_frame(encode_uid(0, 255)));
        p.add_enc(enc_frame(encode_uid(0, 0)));
        assert_eq!(p.block_at(0), Some(0), "255 -> 0 is the legal wraparound case");
    }
}
