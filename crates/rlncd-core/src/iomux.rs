//! I/O multiplexer: reader/writer threads bridging the netlink socket and
//! the encoder/decoder pools.
//!
//! Grounded in `io.cpp`'s `read_thread`/`write_thread`/`handle_frame`/
//! `bounce_frame`, with `libnl`'s message handle lifetime replaced by the
//! reference-counted [`Frame`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::decoder_pool::DecoderPool;
use crate::encoder_pool::EncoderPool;
use crate::frame::{Attr, Command, Frame, FrameType};
use crate::netlink::NetlinkSocket;
use crate::pqueue::BlockingPriorityQueue;

/// Total outbound priority bands: `PLAIN/DEC=0, ENC=1, REQ/ACK=2, control=3`.
pub const OUTBOUND_BANDS: usize = 4;
/// Poll interval the writer thread uses so a shutdown request is noticed
/// even with the outbound queue otherwise empty and nothing to wake it.
const WRITER_POLL: Duration = Duration::from_millis(200);

fn empty_frame() -> Frame {
    Frame::new(Command::Frame, Vec::new())
}

/// Loop an inbound `PLAIN` frame straight back out as `PLAIN`, the benchmark
/// data path exercising I/O with no coding at all. Grounded in
/// `io.cpp::bounce_frame`. A free function (rather than an `IoMux` method)
/// so it can be exercised without a live netlink socket.
fn bounce_frame(outbound: &BlockingPriorityQueue<Frame>, ifindex: u32, frame: &Frame) {
    let Some(payload) = frame.payload() else { return };
    let out = Frame::new(
        Command::Frame,
        vec![
            Attr::IfIndex(ifindex),
            Attr::Type(FrameType::Plain),
            Attr::Frame(std::sync::Arc::new(payload.to_vec())),
        ],
    );
    outbound.push(FrameType::Plain.outbound_priority(), out);
}

/// Owns the netlink socket and the two worker threads multiplexing it
/// against the encoder/decoder pools' outbound traffic.
pub struct IoMux {
    socket: Arc<NetlinkSocket>,
    outbound: Arc<BlockingPriorityQueue<Frame>>,
    free: Arc<BlockingPriorityQueue<Frame>>,
    running: Arc<AtomicBool>,
    ifindex: Arc<AtomicU32>,
    packets: Arc<AtomicU32>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl IoMux {
    /// Open the netlink socket, register with the kernel family, and start
    /// the reader/writer threads. Grounded in `io.cpp`'s `start()`.
    ///
    /// `outbound` must be the same queue the caller constructed
    /// [`EncoderPool`] and [`DecoderPool`] with — those workers push frames
    /// onto it directly, so `IoMux` drains the callers' queue rather than
    /// standing up a disconnected one of its own.
    pub fn start(
        config: Arc<Config>,
        outbound: Arc<BlockingPriorityQueue<Frame>>,
        encoder_pool: Arc<EncoderPool>,
        decoder_pool: Arc<DecoderPool>,
    ) -> anyhow::Result<Arc<IoMux>> {
        let socket = Arc::new(NetlinkSocket::open()?);
        socket.register(
            &config.interface,
            config.encoders as u32,
            config.loss.e1 as u32,
            config.loss.e2 as u32,
            config.loss.e3 as u32,
        )?;

        let free = Arc::new(BlockingPriorityQueue::new(1, empty_frame()));

        let iomux = Arc::new(IoMux {
            socket,
            outbound,
            free,
            running: Arc::new(AtomicBool::new(true)),
            ifindex: Arc::new(AtomicU32::new(0)),
            packets: Arc::new(AtomicU32::new(0)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        });

        let reader_mux = iomux.clone();
        let reader_config = config.clone();
        let reader_encoders = encoder_pool.clone();
        let reader_decoders = decoder_pool.clone();
        let reader = std::thread::spawn(move || {
            reader_mux.reader_loop(&reader_config, &reader_encoders, &reader_decoders)
        });

        let writer_mux = iomux.clone();
        let writer = std::thread::spawn(move || writer_mux.writer_loop());

        *iomux.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(reader);
        *iomux.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(writer);

        Ok(iomux)
    }

    /// Outbound queue, shared with the encoder/decoder pools' workers so
    /// they can push frames directly without going through `IoMux`.
    pub fn outbound(&self) -> Arc<BlockingPriorityQueue<Frame>> {
        self.outbound.clone()
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex.load(Ordering::Acquire)
    }

    pub fn packets(&self) -> u32 {
        self.packets.load(Ordering::Acquire)
    }

    /// Release a received message's buffer without contending with the
    /// reader thread, which may be blocked inside the kernel `recvfrom`
    /// call. Grounded in `io.cpp`'s `free_msg`/`process_free_queue`; with an
    /// `Arc`-backed [`Frame`] this simply drops the last reference, but the
    /// queue still decouples the drop from whatever thread is holding it.
    pub fn free(&self, frame: Frame) {
        self.free.push(0, frame);
    }

    fn drain_free(&self) {
        while self.free.try_pop().is_some() {}
    }

    fn reader_loop(&self, config: &Config, encoder_pool: &EncoderPool, decoder_pool: &DecoderPool) {
        while self.running.load(Ordering::Acquire) {
            self.drain_free();

            match self.socket.recv() {
                Ok(Some(frame)) => {
                    self.packets.fetch_add(1, Ordering::Relaxed);
                    self.handle_frame(config, encoder_pool, decoder_pool, frame);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "netlink read error");
                }
            }
        }
    }

    fn handle_frame(&self, config: &Config, encoder_pool: &EncoderPool, decoder_pool: &DecoderPool, frame: Frame) {
        match frame.command() {
            Command::Register => {
                if let Some(Attr::IfIndex(idx)) = frame.get(crate::frame::AttrId::IfIndex) {
                    self.ifindex.store(*idx, Ordering::Release);
                }
            }
            Command::Frame => {
                if config.benchmark {
                    if frame.frame_type() == Some(FrameType::Plain) {
                        bounce_frame(&self.outbound, self.ifindex(), &frame);
                    }
                    return;
                }

                match frame.frame_type() {
                    Some(FrameType::Plain) => encoder_pool.add_plain(frame),
                    Some(FrameType::Enc) => decoder_pool.add_enc(frame),
                    Some(FrameType::Req) => encoder_pool.add_req(frame),
                    Some(FrameType::Ack) => encoder_pool.add_ack(frame),
                    _ => tracing::warn!("dropping frame with unexpected or missing TYPE attribute"),
                }
            }
            Command::Block | Command::Unblock => {
                tracing::warn!("unexpected daemon-control command received from kernel");
            }
        }
    }

    fn writer_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            let Some(frame) = self.outbound.pop_timeout(WRITER_POLL) else { continue };
            if let Err(err) = self.socket.send(&frame) {
                tracing::warn!(error = %err, "netlink send error");
            }
        }
    }

    /// Clear `running`, wake both threads (the writer via its condvar, the
    /// reader by sending the socket a short self-addressed message to
    /// unblock `recvfrom`), join them, and drain whatever remains queued.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.outbound.notify_all();
        if let Err(err) = self.socket.wake() {
            tracing::warn!(error = %err, "failed to wake reader thread on shutdown");
        }

        if let Some(h) = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }
        if let Some(h) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = h.join();
        }

        for frame in self.outbound.drain() {
            drop(frame);
        }
        self.drain_free();
    }
}

impl Drop for IoMux {
    fn drop(&mut self) {
        self.shutdown();
    }
}
