//! Per-generation decoder worker.
//!
//! One of these owns exactly one live generation: it accumulates `ENC`
//! frames into a [`GenerationDecoder`], emits `DEC` frames for every symbol
//! it can recover (systematically or via full/partial Gaussian elimination),
//! and drives the `REQ`/`ACK` retransmission timers. Grounded in
//! `decoder.cpp`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use quanta::Instant;

use crate::budgets::source_budget;
use crate::coder::GenerationDecoder;
use crate::config::Config;
use crate::counters::CounterGroup;
use crate::frame::{encode_uid, split_length_prefix, Attr, Command, Frame, FrameType, Mac, MAX_PAYLOAD_LEN};
use crate::pqueue::BlockingPriorityQueue;
use crate::rtt::{ControlKind, ControlTracker};

const TICK: Duration = Duration::from_millis(50);

fn empty_frame() -> Frame {
    Frame::new(Command::Frame, Vec::new())
}

/// A live generation's decoder. `add_enc` enqueues for the worker thread;
/// `uid`/`block`/`rank` read lock-free snapshots the worker keeps current.
pub struct Decoder {
    inbound: Arc<BlockingPriorityQueue<Frame>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    uid: u16,
    block_counter: u8,
    rank: Arc<AtomicUsize>,
    idle: Arc<AtomicBool>,
}

impl Decoder {
    pub fn spawn(
        config: Arc<Config>,
        outbound: Arc<BlockingPriorityQueue<Frame>>,
        ctrl: Arc<ControlTracker>,
        counters: CounterGroup,
        ifindex: u32,
        slot_id: u8,
        block_counter: u8,
    ) -> Decoder {
        let uid = encode_uid(slot_id, block_counter);
        let inbound = Arc::new(BlockingPriorityQueue::new(2, empty_frame()));
        let running = Arc::new(AtomicBool::new(true));
        let rank = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(AtomicBool::new(false));

        // A fresh decoder replacing a retired one re-arms the ACK kind,
        // matching `decoder.cpp::initialize`'s `ack_done()` call.
        ctrl.done(ControlKind::Ack);

        let worker = Worker {
            config: config.clone(),
            outbound,
            inbound: inbound.clone(),
            running: running.clone(),
            rank: rank.clone(),
            idle: idle.clone(),
            ctrl,
            counters,
            ifindex,
            uid,
            req_seq: 1,
            coder: GenerationDecoder::new(config.symbols, config.symbol_size),
            sent: vec![false; config.symbols],
            decoded_latch: false,
            src: [0; 6],
            dst: [0; 6],
            last_activity: Instant::now(),
            idle_budget: config.decoder_timeout_secs,
        };

        let handle = std::thread::spawn(move || worker.run());

        Decoder {
            inbound,
            running,
            handle: Mutex::new(Some(handle)),
            uid,
            block_counter,
            rank,
            idle,
        }
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn block(&self) -> u8 {
        self.block_counter
    }

    pub fn rank(&self) -> usize {
        self.rank.load(Ordering::Acquire)
    }

    pub fn add_enc(&self, frame: Frame) {
        self.inbound.push(0, frame);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Whether the worker has hit its idle deadline and stopped processing.
    /// A pool uses this (not `is_running`, which stays true until shutdown)
    /// to decide whether a slot can be silently replaced.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.inbound.notify_all();
        if let Some(h) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    config: Arc<Config>,
    outbound: Arc<BlockingPriorityQueue<Frame>>,
    inbound: Arc<BlockingPriorityQueue<Frame>>,
    running: Arc<AtomicBool>,
    rank: Arc<AtomicUsize>,
    idle: Arc<AtomicBool>,
    ctrl: Arc<ControlTracker>,
    counters: CounterGroup,
    ifindex: u32,
    uid: u16,
    req_seq: u16,
    coder: GenerationDecoder,
    sent: Vec<bool>,
    decoded_latch: bool,
    src: Mac,
    dst: Mac,
    last_activity: Instant,
    /// Remaining idle allowance, decremented (not reset) by each REQ/ACK
    /// timeout tick; reaching zero marks the decoder idle.
    idle_budget: f64,
}

impl Worker {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            if self.idle.load(Ordering::Acquire) {
                // Idle decoders wait only to be torn down by their pool;
                // still consume the tick so shutdown remains responsive.
                std::thread::sleep(TICK);
                continue;
            }

            if let Some(frame) = self.inbound.pop_timeout(TICK) {
                self.handle_frame(frame);
            }
            self.drain_backlog();
            self.process_decoder();
            self.process_timer();
        }
        for frame in self.inbound.drain() {
            drop(frame);
        }
    }

    fn drain_backlog(&mut self) {
        while let Some(frame) = self.inbound.try_pop() {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame.frame_type() {
            Some(FrameType::Enc) => self.process_enc(&frame),
            _ => tracing::warn!(uid = self.uid, "decoder received unexpected frame type"),
        }
    }

    fn process_enc(&mut self, frame: &Frame) {
        if self.coder.is_complete() {
            return;
        }

        if self.coder.rank() == 0 {
            if let (Some(src), Some(dst)) = (frame.src(), frame.dst()) {
                self.src = src;
                self.dst = dst;
            }
        }

        let Some(payload) = frame.payload() else {
            tracing::warn!(uid = self.uid, "enc frame missing FRAME attribute");
            return;
        };
        if payload.len() != self.coder.payload_size() {
            tracing::warn!(
                uid = self.uid,
                len = payload.len(),
                expected = self.coder.payload_size(),
                "malformed enc payload length, dropping"
            );
            return;
        }

        self.counters.increment("enc rx");
        let before = self.coder.rank();
        if self.coder.decode(payload).is_err() {
            tracing::warn!(uid = self.uid, "malformed enc payload, dropping");
            self.counters.increment("enc malformed");
            return;
        }
        let after = self.coder.rank();
        self.rank.store(after, Ordering::Release);

        if after == before {
            tracing::trace!(uid = self.uid, rank = after, "non-innovative enc symbol");
            self.counters.increment("enc non-innovative");
        }

        if self.coder.last_symbol_is_systematic() {
            self.send_dec(self.coder.last_symbol_index());
        }

        self.decoded_latch = false;
        self.ctrl.done(ControlKind::Req);
        self.last_activity = Instant::now();
    }

    fn process_decoder(&mut self) {
        let loss = self.config.loss;
        let budget = source_budget(1, 255, 255, loss.e3, 1.0);

        if self.coder.is_complete() && !self.decoded_latch {
            self.decoded_latch = true;
            self.ctrl.wait(ControlKind::Ack);

            let mut remaining = budget;
            while remaining >= 1.0 {
                self.send_ack();
                remaining -= 1.0;
            }

            for i in 0..self.coder.symbols() {
                self.send_dec(i);
            }
            return;
        }

        if self.coder.is_partial_complete() && !self.decoded_latch {
            for i in 0..self.coder.rank() {
                self.send_dec(i);
            }
            self.decoded_latch = true;
        }
    }

    fn process_timer(&mut self) {
        let loss = self.config.loss;
        let budget = source_budget(1, 255, 255, loss.e3, 1.0);
        let elapsed_ms = self.last_activity.elapsed().as_secs_f64() * 1000.0;
        let req_timeout_ms = self.config.req_timeout_secs * 1000.0;
        let ack_timeout_ms = self.config.ack_timeout_secs * 1000.0;

        if elapsed_ms >= req_timeout_ms && !self.coder.is_partial_complete() {
            let mut remaining = budget;
            while remaining >= 1.0 {
                self.send_req();
                remaining -= 1.0;
            }
            self.ctrl.wait(ControlKind::Req);
            self.req_seq = self.req_seq.wrapping_add(1);
            self.last_activity = Instant::now();
            self.idle_budget -= self.config.req_timeout_secs;
            return;
        }

        if elapsed_ms >= ack_timeout_ms && self.coder.is_partial_complete() {
            let mut remaining = budget;
            while remaining >= 1.0 {
                self.send_ack();
                remaining -= 1.0;
            }
            self.last_activity = Instant::now();
            self.idle_budget -= self.config.ack_timeout_secs;
            return;
        }

        if self.idle_budget <= 0.0 {
            self.ctrl.done(ControlKind::Ack);
            self.counters.increment("idle timeout");
            self.idle.store(true, Ordering::Release);
        }
    }

    /// Emit a recovered symbol as a `DEC` frame, deduped per index.
    fn send_dec(&mut self, index: usize) {
        if self.sent[index] {
            return;
        }

        let buf = self.coder.symbol(index);
        let Some((len, rest)) = split_length_prefix(buf) else {
            tracing::error!(uid = self.uid, index, "recovered symbol missing length prefix");
            self.running.store(false, Ordering::Release);
            return;
        };
        if len as usize > MAX_PAYLOAD_LEN {
            tracing::error!(
                uid = self.uid,
                index,
                len,
                "decoded length exceeds maximum, tearing down generation"
            );
            self.running.store(false, Ordering::Release);
            return;
        }

        let frame = Frame::new(
            Command::Frame,
            vec![
                Attr::IfIndex(self.ifindex),
                Attr::Type(FrameType::Dec),
                Attr::Frame(Arc::new(rest.to_vec())),
            ],
        );
        self.outbound.push(FrameType::Dec.outbound_priority(), frame);
        self.sent[index] = true;
        self.counters.increment("dec tx");
    }

    fn send_ack(&mut self) {
        let frame = Frame::new(
            Command::Frame,
            vec![
                Attr::IfIndex(self.ifindex),
                Attr::Src(self.src),
                Attr::Dst(self.dst),
                Attr::Block(self.uid),
                Attr::Type(FrameType::Ack),
                Attr::Int(0),
            ],
        );
        self.outbound.push(FrameType::Ack.outbound_priority(), frame);
        self.counters.increment("ack tx");
    }

    fn send_req(&mut self) {
        let frame = Frame::new(
            Command::Frame,
            vec![
                Attr::IfIndex(self.ifindex),
                Attr::Type(FrameType::Req),
                Attr::Src(self.src),
                Attr::Dst(self.dst),
                Attr::Block(self.uid),
                Attr::Rank(self.coder.rank() as u16),
                Attr::Seq(self.req_seq),
            ],
        );
        self.outbound.push(FrameType::Req.outbound_priority(), frame);
        self.counters.increment("req tx");
    }
}
