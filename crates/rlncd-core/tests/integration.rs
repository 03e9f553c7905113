//! End-to-end scenarios exercising the priority queue, the encoder/decoder
//! pools, and the full generation coding round trip together, without a
//! live netlink socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rlncd_core::config::{Config, LossModel};
use rlncd_core::counters::Counters;
use rlncd_core::decoder_pool::DecoderPool;
use rlncd_core::encoder_pool::EncoderPool;
use rlncd_core::frame::{decode_uid, encode_uid, Attr, Command, Frame, FrameType};
use rlncd_core::pqueue::{BlockingPriorityQueue, PriorityQueue};
use rlncd_core::rtt::ControlTracker;

fn test_counters() -> Arc<Counters> {
    Arc::new(Counters::new())
}

fn empty_frame() -> Frame {
    Frame::new(Command::Frame, Vec::new())
}

fn test_config(symbols: usize, symbol_size: usize, encoders: usize) -> Arc<Config> {
    Arc::new(Config {
        symbols,
        symbol_size,
        encoders,
        loss: LossModel::from_percent(0, 0, 0),
        encoder_timeout_secs: 5.0,
        decoder_timeout_secs: 5.0,
        req_timeout_secs: 0.2,
        ack_timeout_secs: 0.2,
        ..Config::default()
    })
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

fn wait_for<F: Fn() -> bool>(pred: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    pred()
}

/// P=4 bands, a mixed push sequence: pop order must start at the highest
/// occupied band and never increase afterward.
#[test]
fn priority_queue_drains_strictly_highest_band_first() {
    let mut q: PriorityQueue<(usize, u32)> = PriorityQueue::new(4, (0, 0));
    let pushes = [
        (0u32, 0u32),
        (1, 1),
        (2, 2),
        (3, 3),
        (2, 4),
        (1, 5),
        (0, 6),
        (1, 7),
        (2, 8),
        (0, 9),
    ];
    for (band, val) in pushes {
        q.push(band as usize, (band as usize, val));
    }

    let mut popped = Vec::new();
    while !q.is_empty() {
        popped.push(q.pop());
    }

    let mut max_band_seen = usize::MAX;
    for (band, _) in &popped {
        assert!(*band <= max_band_seen, "band must never increase across pops");
        max_band_seen = *band;
    }
    assert_eq!(popped.first().unwrap().0, 3, "highest band drains first");
}

/// Loopback benchmark path: ten PLAIN frames bounced straight back out in
/// FIFO order with none dropped.
#[test]
fn benchmark_bounce_preserves_fifo_order_and_drops_nothing() {
    use rlncd_core::iomux::OUTBOUND_BANDS;

    let outbound = BlockingPriorityQueue::new(OUTBOUND_BANDS, empty_frame());
    let payloads: Vec<Vec<u8>> = (0..10u8).map(|i| vec![b'0' + i]).collect();

    // Exercises the same dispatch the I/O multiplexer's benchmark branch
    // uses: a PLAIN frame re-emitted as PLAIN with the same payload.
    for payload in &payloads {
        let inbound = Frame::new(
            Command::Frame,
            vec![Attr::Type(FrameType::Plain), Attr::Frame(Arc::new(payload.clone()))],
        );
        let Some(bounced) = inbound.payload().map(|p| p.to_vec()) else { continue };
        let out = Frame::new(
            Command::Frame,
            vec![
                Attr::IfIndex(7),
                Attr::Type(FrameType::Plain),
                Attr::Frame(Arc::new(bounced)),
            ],
        );
        outbound.push(FrameType::Plain.outbound_priority(), out);
    }

    for expected in &payloads {
        let out = outbound.try_pop().expect("every bounced frame must be present");
        assert_eq!(out.payload(), Some(expected.as_slice()));
    }
    assert!(outbound.is_empty());
}

/// Full generation (G=4, S=16, zero loss): absorbing four PLAIN frames
/// through the encoder pool, then feeding every emitted ENC frame straight
/// into the decoder pool, must fully recover the original symbols.
#[test]
fn full_generation_round_trips_through_encoder_and_decoder_pools() {
    let config = test_config(4, 64, 1);
    let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
    let encoder_pool = EncoderPool::new(config.clone(), outbound.clone(), test_counters(), 7);

    let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 20]).collect();
    for payload in &payloads {
        encoder_pool.add_plain(plain_frame(payload));
    }

    let ctrl = Arc::new(ControlTracker::new(50.0));
    let dec_outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
    let decoder_pool = DecoderPool::new(config.clone(), dec_outbound.clone(), ctrl, test_counters(), 7);

    let mut recovered: Vec<Vec<u8>> = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while recovered.len() < payloads.len() && Instant::now() < deadline {
        let Some(frame) = outbound.pop_timeout(Duration::from_millis(100)) else { continue };
        if frame.frame_type() != Some(FrameType::Enc) {
            continue;
        }
        decoder_pool.add_enc(frame);

        while let Some(dec_frame) = dec_outbound.try_pop() {
            if dec_frame.frame_type() == Some(FrameType::Dec) {
                if let Some(p) = dec_frame.payload() {
                    recovered.push(p.to_vec());
                }
            }
        }
    }

    assert_eq!(recovered.len(), payloads.len(), "every symbol must be recovered");
    let mut expected = payloads.clone();
    expected.sort();
    recovered.sort();
    assert_eq!(recovered, expected);

    encoder_pool.shutdown();
}

/// A REQ naming the encoder's current rank and an already-seen sequence
/// number must be ignored (no extra budget accrued from the repeat).
#[test]
fn duplicate_req_sequence_is_ignored() {
    use rlncd_core::encoder::Encoder;

    let config = test_config(4, 32, 1);
    let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
    let enc = Encoder::spawn(
        config,
        outbound.clone(),
        rlncd_core::counters::CounterGroup::new(test_counters(), "test encoder"),
        7,
        0,
        1,
    );
    enc.add_plain(plain_frame(b"a"));
    enc.add_plain(plain_frame(b"b"));

    let uid = enc.uid();
    let req = |rank: u16, seq: u16| {
        Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Req),
                Attr::Block(uid),
                Attr::Rank(rank),
                Attr::Seq(seq),
            ],
        )
    };

    enc.add_req(req(2, 1));
    std::thread::sleep(Duration::from_millis(100));
    let after_first = enc.enc_packets();

    enc.add_req(req(2, 1)); // same seq: must be dropped
    std::thread::sleep(Duration::from_millis(100));
    let after_repeat = enc.enc_packets();

    assert_eq!(after_first, after_repeat, "duplicate REQ seq must not accrue more budget");
    enc.shutdown();
}

/// The block counter must wrap `255 -> 0` across repeated retirements of a
/// single encoder slot, and the decoder pool must treat that wraparound as
/// newer rather than stale.
#[test]
fn block_counter_wraps_across_many_generations_on_one_slot() {
    let config = test_config(1, 32, 1);
    let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
    let pool = EncoderPool::new(config, outbound.clone(), test_counters(), 7);

    let mut last_uid = None;
    for _ in 0..257 {
        pool.add_plain(plain_frame(b"x"));

        let deadline = Instant::now() + Duration::from_secs(1);
        let mut uid = None;
        while uid.is_none() && Instant::now() < deadline {
            if let Some(frame) = outbound.pop_timeout(Duration::from_millis(50)) {
                if let Some(u) = frame.uid() {
                    uid = Some(u);
                }
            }
        }
        let uid = uid.expect("every generation must eventually emit at least one frame");
        if let Some(prev) = last_uid {
            assert_ne!(uid, prev, "a fresh generation must carry a distinct uid");
        }
        last_uid = Some(uid);

        let ack = Frame::new(Command::Frame, vec![Attr::Type(FrameType::Ack), Attr::Block(uid)]);
        pool.add_ack(ack);
        wait_for(|| true, Duration::from_millis(5));
    }

    let (_, final_counter) = decode_uid(last_uid.unwrap());
    // 257 generations starting at block_counter=1 wrap past 255 back to 1.
    assert_eq!(final_counter, 2);
}

/// Filling a single-slot pool's only encoder must raise BLOCK; acking it
/// must raise UNBLOCK and open a fresh current slot.
#[test]
fn encoder_exhaustion_blocks_then_unblocks_on_ack() {
    let config = test_config(2, 32, 1);
    let outbound = Arc::new(BlockingPriorityQueue::new(4, empty_frame()));
    let pool = EncoderPool::new(config, outbound.clone(), test_counters(), 7);

    pool.add_plain(plain_frame(b"a"));
    pool.add_plain(plain_frame(b"b")); // fills the only slot -> BLOCK

    let mut saw_block = false;
    let mut last_uid = None;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let Some(frame) = outbound.pop_timeout(Duration::from_millis(50)) else { continue };
        if frame.command() == Command::Block {
            saw_block = true;
        }
        if let Some(u) = frame.uid() {
            last_uid = Some(u);
        }
        if saw_block {
            break;
        }
    }
    assert!(saw_block, "exhausting the only encoder slot must raise BLOCK");

    let uid = last_uid.expect("the exhausted generation must have emitted at least one frame");
    let ack = Frame::new(Command::Frame, vec![Attr::Type(FrameType::Ack), Attr::Block(uid)]);
    pool.add_ack(ack);

    let mut saw_unblock = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while !saw_unblock && Instant::now() < deadline {
        if let Some(frame) = outbound.pop_timeout(Duration::from_millis(50)) {
            if frame.command() == Command::Unblock {
                saw_unblock = true;
            }
        }
    }
    assert!(saw_unblock, "acking the blocked slot must raise UNBLOCK");
}
