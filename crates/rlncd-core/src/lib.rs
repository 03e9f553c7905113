//! # rlncd-core
//!
//! Generation-based Random Linear Network Coding primitives for the `rlncd`
//! overlay daemon: the priority queue, RTT/control-kind tracker, the
//! loss-model budget/credit formulas, the fixed-generation GF(256) coder, and
//! the per-generation encoder/decoder state machines plus their slot pools.
//!
//! ## Crate structure
//!
//! - [`pqueue`] — Strict-priority, FIFO-within-band queue used for every
//!   inbound/outbound message stream in the daemon.
//! - [`rtt`] — Per-control-kind (ACK/REQ) outstanding-count tracker feeding
//!   the adaptive retransmission timeout.
//! - [`budgets`] — Pure loss-model formulas governing credit accrual and
//!   transmission budgets.
//! - [`coder`] — The narrow GF(256) fixed-generation encoder/decoder
//!   contract and its reference implementation.
//! - [`frame`] — Generic-netlink attribute/frame wire encoding.
//! - [`config`] — The daemon's immutable, shared configuration record.
//! - [`error`] — Error tiers distinguishing drop/continue from fatal faults.
//! - [`encoder`] — Per-generation encoder worker logic.
//! - [`decoder`] — Per-generation decoder worker logic.
//! - [`encoder_pool`] — Fixed-slot encoder pool with flow control.
//! - [`decoder_pool`] — Grow-on-demand decoder pool.
//! - [`netlink`] — Generic-netlink wire codec and raw `AF_NETLINK` transport.
//! - [`iomux`] — Reader/writer threads multiplexing the netlink socket
//!   between the encoder and decoder pools.
//! - [`counters`] — Fire-and-forget diagnostic counter map.
//! - [`metrics`] — Tiny Prometheus-style scrape endpoint over the counters
//!   map.

pub mod budgets;
pub mod coder;
pub mod config;
pub mod counters;
pub mod decoder;
pub mod decoder_pool;
pub mod encoder;
pub mod encoder_pool;
pub mod error;
pub mod frame;
pub mod iomux;
pub mod metrics;
pub mod netlink;
pub mod pqueue;
pub mod rtt;
