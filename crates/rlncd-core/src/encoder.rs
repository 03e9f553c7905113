//! Per-generation encoder worker.
//!
//! One of these owns exactly one live generation: it absorbs `PLAIN` frames
//! into a [`GenerationEncoder`], reacts to `REQ` retransmit requests, and
//! paces its own `ENC` output against a credit balance and a one-shot budget.
//! Grounded in `encoder.cpp`'s `thread_func`/`process_queue`/
//! `process_encoder`/`process_timer`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use quanta::Instant;

use crate::budgets::{source_budget, source_credit};
use crate::coder::GenerationEncoder;
use crate::config::Config;
use crate::counters::CounterGroup;
use crate::frame::{encode_uid, length_prefixed, Attr, Command, Frame, FrameType, Mac};
use crate::pqueue::BlockingPriorityQueue;

const TICK: Duration = Duration::from_millis(50);

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A process-wide-unique seed for a fresh generation's coefficient RNG.
/// Coding coefficients only need to vary across independently generated
/// coded symbols, not resist prediction, so wall-clock entropy mixed with a
/// monotonic counter is sufficient.
fn next_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let counter = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos ^ counter.wrapping_mul(0x9e3779b97f4a7c15)
}

fn empty_frame() -> Frame {
    Frame::new(Command::Frame, Vec::new())
}

/// A live generation's encoder. `add_plain`/`add_req` enqueue for the
/// worker thread; `full`/`enc_packets`/`uid` read lock-free snapshots the
/// worker keeps up to date as it processes.
pub struct Encoder {
    inbound: Arc<BlockingPriorityQueue<Frame>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    uid: u16,
    symbols: usize,
    plain_count: Arc<AtomicUsize>,
    enc_count: Arc<AtomicUsize>,
}

impl Encoder {
    /// Spawn a fresh encoder bound to `(slot_id, block_counter)` and start
    /// its worker thread.
    pub fn spawn(
        config: Arc<Config>,
        outbound: Arc<BlockingPriorityQueue<Frame>>,
        counters: CounterGroup,
        ifindex: u32,
        slot_id: u8,
        block_counter: u8,
    ) -> Encoder {
        let uid = encode_uid(slot_id, block_counter);
        let inbound = Arc::new(BlockingPriorityQueue::new(3, empty_frame()));
        let running = Arc::new(AtomicBool::new(true));
        let plain_count = Arc::new(AtomicUsize::new(0));
        let enc_count = Arc::new(AtomicUsize::new(0));

        let loss = config.loss;
        let budget = source_budget(config.symbols, loss.e1, loss.e2, loss.e3, config.fixed_overshoot);

        let worker = Worker {
            config: config.clone(),
            outbound,
            inbound: inbound.clone(),
            running: running.clone(),
            plain_count: plain_count.clone(),
            enc_count: enc_count.clone(),
            counters,
            ifindex,
            uid,
            block_counter,
            coder: GenerationEncoder::new(config.symbols, config.symbol_size, next_seed()),
            budget,
            credits: 0.0,
            last_req_seq: 0,
            src: [0; 6],
            dst: [0; 6],
            last_activity: Instant::now(),
        };

        let handle = std::thread::spawn(move || worker.run());

        Encoder {
            inbound,
            running,
            handle: Mutex::new(Some(handle)),
            uid,
            symbols: config.symbols,
            plain_count,
            enc_count,
        }
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn add_plain(&self, frame: Frame) {
        self.inbound.push(0, frame);
    }

    pub fn add_req(&self, frame: Frame) {
        self.inbound.push(2, frame);
    }

    /// Whether every symbol slot has absorbed a `PLAIN` frame.
    pub fn full(&self) -> bool {
        self.plain_count.load(Ordering::Acquire) == self.symbols
    }

    pub fn enc_packets(&self) -> usize {
        self.enc_count.load(Ordering::Acquire)
    }

    /// Whether the worker thread is still alive; `false` once it has
    /// self-retired (fatal error or idle timeout).
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal the worker to stop and join its thread. Idempotent.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.inbound.notify_all();
        if let Some(h) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    config: Arc<Config>,
    outbound: Arc<BlockingPriorityQueue<Frame>>,
    inbound: Arc<BlockingPriorityQueue<Frame>>,
    running: Arc<AtomicBool>,
    plain_count: Arc<AtomicUsize>,
    enc_count: Arc<AtomicUsize>,
    counters: CounterGroup,
    ifindex: u32,
    uid: u16,
    block_counter: u8,
    coder: GenerationEncoder,
    /// One-shot tail budget, `source_budget(G, e1, e2, e3, overshoot)`,
    /// evaluated once at construction and never recomputed.
    budget: f64,
    credits: f64,
    last_req_seq: u16,
    src: Mac,
    dst: Mac,
    last_activity: Instant,
}

impl Worker {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            if let Some(frame) = self.inbound.pop_timeout(TICK) {
                self.handle_frame(frame);
            }
            self.drain_backlog();
            self.process_encoder();
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
            Some(FrameType::Plain) => self.process_plain(&frame),
            Some(FrameType::Req) => self.process_req(&frame),
            _ => tracing::warn!(uid = self.uid, "encoder received unexpected frame type"),
        }
        self.last_activity = Instant::now();
    }

    fn process_plain(&mut self, frame: &Frame) {
        let rank = self.coder.rank();
        if rank == 0 {
            if let (Some(src), Some(dst)) = (frame.src(), frame.dst()) {
                self.src = src;
                self.dst = dst;
            }
        }

        let Some(payload) = frame.payload() else {
            tracing::warn!(uid = self.uid, "plain frame missing FRAME attribute");
            return;
        };

        let mut buf = length_prefixed(payload);
        let symbol_size = self.coder.symbol_size();
        if buf.len() > symbol_size {
            tracing::error!(
                uid = self.uid,
                len = payload.len(),
                "plain payload too large for symbol size, tearing down generation"
            );
            self.running.store(false, Ordering::Release);
            return;
        }
        buf.resize(symbol_size, 0);

        if self.coder.set_symbol(rank, &buf).is_err() {
            tracing::error!(uid = self.uid, "coder storage exhausted");
            self.running.store(false, Ordering::Release);
            return;
        }

        self.plain_count.fetch_add(1, Ordering::AcqRel);
        self.counters.increment("plain rx");
        let loss = self.config.loss;
        self.credits += source_credit(loss.e1, loss.e2, loss.e3);
    }

    fn process_req(&mut self, frame: &Frame) {
        let Some(rank) = frame.rank() else { return };
        let Some(seq) = frame.seq() else { return };
        let own_rank = self.coder.rank();

        if rank as usize == own_rank || seq == self.last_req_seq {
            self.counters.increment("req dup dropped");
            return;
        }

        self.counters.increment("req rx");
        let loss = self.config.loss;
        let gap = own_rank.saturating_sub(rank as usize);
        self.credits += source_budget(gap, 255, 255, loss.e3, 1.0);
        self.last_req_seq = seq;
    }

    fn process_encoder(&mut self) {
        while self.running.load(Ordering::Acquire) && self.credits >= 1.0 {
            if !self.send_encoded() {
                break;
            }
        }

        if self.coder.rank() != self.coder.symbols() {
            return;
        }

        while self.running.load(Ordering::Acquire)
            && (self.enc_count.load(Ordering::Acquire) as f64) < self.budget
        {
            if !self.send_encoded() {
                break;
            }
        }
    }

    fn send_encoded(&mut self) -> bool {
        let mut buf = vec![0u8; self.coder.payload_size()];
        if self.coder.encode(&mut buf).is_err() {
            tracing::error!(uid = self.uid, "encode failed on a non-empty generation");
            self.running.store(false, Ordering::Release);
            return false;
        }

        let frame = Frame::new(
            Command::Frame,
            vec![
                Attr::IfIndex(self.ifindex),
                Attr::Src(self.src),
                Attr::Dst(self.dst),
                Attr::Block(self.uid),
                Attr::Type(FrameType::Enc),
                Attr::Frame(Arc::new(buf)),
            ],
        );
        self.outbound.push(FrameType::Enc.outbound_priority(), frame);
        self.credits = (self.credits - 1.0).max(0.0);
        self.enc_count.fetch_add(1, Ordering::AcqRel);
        self.counters.increment("enc tx");
        true
    }

    fn process_timer(&mut self) {
        if self.coder.rank() == 0 {
            return;
        }
        let idle = self.last_activity.elapsed();
        if idle.as_secs_f64() > self.config.encoder_timeout_secs {
            tracing::warn!(
                uid = self.uid,
                rank = self.coder.rank(),
                "encoder idle timeout, retiring generation"
            );
            self.counters.increment("idle timeout");
            self.running.store(false, Ordering::Release);
        }
    }
}
