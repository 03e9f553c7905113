//! Fixed-slot encoder pool with flow control.
//!
//! `N` slots, a FIFO of free slot indices, a single current slot absorbing
//! `PLAIN` frames, and a `blocked` flag raised when every slot is occupied.
//! Grounded in `encoder_map.cpp`'s `create_encoder`/`do_housekeeping`, with
//! the fixed-array slot model mandated over the original's unbounded
//! block-id-keyed map.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::counters::{CounterGroup, Counters};
use crate::encoder::Encoder;
use crate::frame::{decode_uid, Attr, Command, Frame, FrameType};
use crate::pqueue::BlockingPriorityQueue;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

struct Inner {
    slots: Vec<Option<Encoder>>,
    free: VecDeque<usize>,
    current: Option<usize>,
    next_block: u8,
    blocked: bool,
}

/// Fixed-capacity pool of live encoders, one per slot. `PLAIN` traffic
/// always targets whichever slot is "current"; `REQ`/`ACK` traffic is routed
/// by the UID's slot component to whichever encoder (if any) actually
/// occupies that slot.
pub struct EncoderPool {
    config: Arc<Config>,
    outbound: Arc<BlockingPriorityQueue<Frame>>,
    counters: Arc<Counters>,
    ifindex: u32,
    inner: Mutex<Inner>,
    running: AtomicBool,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
}

impl EncoderPool {
    pub fn new(
        config: Arc<Config>,
        outbound: Arc<BlockingPriorityQueue<Frame>>,
        counters: Arc<Counters>,
        ifindex: u32,
    ) -> Arc<EncoderPool> {
        let n = config.encoders.max(1);
        let inner = Inner {
            slots: (0..n).map(|_| None).collect(),
            free: (1..n).collect(),
            current: Some(0),
            next_block: 1,
            blocked: false,
        };

        let pool = Arc::new(EncoderPool {
            config,
            outbound,
            counters,
            ifindex,
            inner: Mutex::new(inner),
            running: AtomicBool::new(true),
            housekeeping: Mutex::new(None),
        });

        let hk_pool = pool.clone();
        let handle = std::thread::spawn(move || hk_pool.housekeeping_loop());
        *pool.housekeeping.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        pool
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route a `PLAIN` frame to the current slot, lazily spawning its
    /// encoder on first use, then advance past it if it just filled up.
    pub fn add_plain(&self, frame: Frame) {
        let mut inner = self.lock();
        if inner.blocked {
            return;
        }
        let Some(idx) = inner.current else { return };

        if inner.slots[idx].is_none() {
            let bc = inner.next_block;
            inner.next_block = inner.next_block.wrapping_add(1);
            inner.slots[idx] = Some(Encoder::spawn(
                self.config.clone(),
                self.outbound.clone(),
                self.slot_counters(idx),
                self.ifindex,
                idx as u8,
                bc,
            ));
        }

        let just_filled = {
            let enc = inner.slots[idx].as_ref().expect("just ensured present");
            enc.add_plain(frame);
            enc.full()
        };

        if just_filled {
            self.advance_locked(&mut inner);
        }
    }

    /// Retire the current slot and open the next one, or raise `blocked`
    /// if no slot is free.
    fn advance_locked(&self, inner: &mut Inner) {
        match inner.free.pop_front() {
            Some(idx) => {
                let bc = inner.next_block;
                inner.next_block = inner.next_block.wrapping_add(1);
                inner.slots[idx] = Some(Encoder::spawn(
                    self.config.clone(),
                    self.outbound.clone(),
                    self.slot_counters(idx),
                    self.ifindex,
                    idx as u8,
                    bc,
                ));
                inner.current = Some(idx);
            }
            None => {
                inner.blocked = true;
                self.counters.increment("encoder pool blocked");
                self.send_control(Command::Block);
            }
        }
    }

    fn slot_counters(&self, idx: usize) -> CounterGroup {
        CounterGroup::new(self.counters.clone(), format!("encoder slot {idx}"))
    }

    /// Parse the UID out of an `ACK` frame and retire the matching slot, if
    /// any. A UID addressing an empty slot or a mismatched live encoder is a
    /// stale ACK for an already-recycled slot: silently ignored.
    pub fn add_ack(&self, frame: Frame) {
        let Some(uid) = frame.uid() else { return };
        let (slot_id, _) = decode_uid(uid);
        let idx = slot_id as usize;

        let mut inner = self.lock();
        if idx >= inner.slots.len() {
            return;
        }
        let matches = inner.slots[idx].as_ref().map(|e| e.uid()) == Some(uid);
        if !matches {
            return;
        }
        self.free_locked(&mut inner, idx);
    }

    /// Forward a `REQ` frame to the slot's live encoder iff the UID matches
    /// exactly; otherwise drop silently.
    pub fn add_req(&self, frame: Frame) {
        let Some(uid) = frame.uid() else { return };
        let (slot_id, _) = decode_uid(uid);
        let idx = slot_id as usize;

        let inner = self.lock();
        if idx >= inner.slots.len() {
            return;
        }
        if let Some(enc) = &inner.slots[idx] {
            if enc.uid() == uid {
                enc.add_req(frame);
            }
        }
    }

    fn free_locked(&self, inner: &mut Inner, idx: usize) {
        if inner.slots[idx].take().is_none() {
            return;
        }
        inner.free.push_back(idx);

        if inner.blocked {
            inner.blocked = false;
            self.counters.increment("encoder pool unblocked");
            self.send_control(Command::Unblock);
            self.advance_locked(inner);
        }
    }

    fn send_control(&self, command: Command) {
        let band = self.outbound.band_count().saturating_sub(1);
        let frame = Frame::new(command, vec![Attr::IfIndex(self.ifindex)]);
        self.outbound.push(band, frame);
    }

    fn housekeeping_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            std::thread::sleep(HOUSEKEEPING_INTERVAL);
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            self.do_housekeeping();
        }
    }

    fn do_housekeeping(&self) {
        let mut inner = self.lock();

        if let Some(idx) = inner.current {
            let dead = inner.slots[idx].as_ref().is_some_and(|e| !e.is_running());
            if dead {
                inner.slots[idx] = None;
                inner.free.push_back(idx);
                inner.current = None;
            }
        }

        let dead_slots: Vec<usize> = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(idx, e)| Some(*idx) != inner.current && e.as_ref().is_some_and(|e| !e.is_running()))
            .map(|(idx, _)| idx)
            .collect();
        for idx in dead_slots {
            inner.slots[idx] = None;
            inner.free.push_back(idx);
        }

        if inner.current.is_none() && !inner.blocked {
            self.advance_locked(&mut inner);
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.housekeeping.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
        let mut inner = self.lock();
        inner.slots.clear();
    }

    #[cfg(test)]
    fn current_slot(&self) -> Option<usize> {
        self.lock().current
    }

    #[cfg(test)]
    fn is_blocked(&self) -> bool {
        self.lock().blocked
    }
}

impl Drop for EncoderPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(h) = self.housekeeping.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LossModel;
    use std::time::Instant;

    fn test_config(encoders: usize, symbols: usize) -> Arc<Config> {
        Arc::new(Config {
            encoders,
            symbols,
            symbol_size: 32,
            loss: LossModel::from_percent(0, 0, 0),
            encoder_timeout_secs: 5.0,
            ..Config::default()
        })
    }

    fn empty_frame() -> Frame {
        Frame::new(Command::Frame, Vec::new())
    }

    fn test_counters() -> Arc<Counters> {
        Arc::new(Counters::new())
    }

    fn plain_frame(payload: &[u8]) -> Frame {
        Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Plain),
                Attr::Src([1, 2, 3, 4, 5, 6]),
                Attr::Dst([6, 5, 4, 3, 2, 1]),
                Attr::Frame(Arc::new(payload.to_vec())),
            ],
        )
    }

    #[test]
    fn single_slot_pool_blocks_once_its_only_slot_fills() {
        let config = test_config(1, 2);
        let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
        let pool = EncoderPool::new(config, outbound.clone(), test_counters(), 7);

        pool.add_plain(plain_frame(b"a"));
        pool.add_plain(plain_frame(b"b"));

        // filling the only slot (symbols=2) should trigger advance(), which
        // finds no free slot and raises `blocked`.
        let deadline = Instant::now() + Duration::from_secs(1);
        while !pool.is_blocked() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.is_blocked());

        let mut saw_block_control = false;
        while let Some(frame) = outbound.try_pop() {
            if frame.command() == Command::Block {
                saw_block_control = true;
            }
        }
        assert!(saw_block_control);
    }

    #[test]
    fn acking_the_blocked_slot_unblocks_and_opens_a_new_current() {
        let config = test_config(1, 1);
        let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
        let pool = EncoderPool::new(config, outbound.clone(), test_counters(), 7);

        pool.add_plain(plain_frame(b"a"));

        let deadline = Instant::now() + Duration::from_secs(1);
        while !pool.is_blocked() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.is_blocked());

        let uid = crate::frame::encode_uid(0, 1);
        let ack = Frame::new(
            Command::Frame,
            vec![Attr::Type(FrameType::Ack), Attr::Block(uid)],
        );
        pool.add_ack(ack);

        assert!(!pool.is_blocked());
        assert_eq!(pool.current_slot(), Some(0));
    }

    #[test]
    fn req_with_mismatched_uid_is_dropped_silently() {
        let config = test_config(2, 4);
        let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
        let pool = EncoderPool::new(config, outbound, test_counters(), 7);

        pool.add_plain(plain_frame(b"a"));

        let req = Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Req),
                Attr::Block(crate::frame::encode_uid(0, 99)),
                Attr::Rank(0),
                Attr::Seq(1),
            ],
        );
        // must not panic even though the UID's block counter is wrong.
        pool.add_req(req);
    }
}
