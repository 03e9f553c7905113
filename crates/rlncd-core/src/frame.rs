//! Generic-netlink attribute/frame wire encoding for the `batman_adv` family.
//!
//! Grounded in the original `io.hpp`/`io.cpp`'s `nl_msg`/`nla_put_*` usage:
//! every message carries a command and a sparse set of typed attributes.
//! Instead of a `libnl` message handle with manual `nlmsg_get`/`nlmsg_free`
//! reference counting, a [`Frame`] here is a plain `Arc`-wrapped value —
//! cloning it at the I/O boundary (ingress duplicating a reference before
//! enqueueing to a worker, egress releasing after transmission) is just an
//! `Arc::clone`, which is what "reference-counted at the I/O boundary" means
//! in a language with no manual refcounting to get wrong.

use std::sync::Arc;

/// Generic-netlink command, `BATADV_HLP_C_*` in the original headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register,
    Frame,
    Block,
    Unblock,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Command> {
        match v {
            1 => Some(Command::Register),
            5 => Some(Command::Frame),
            6 => Some(Command::Block),
            7 => Some(Command::Unblock),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Command::Register => 1,
            Command::Frame => 5,
            Command::Block => 6,
            Command::Unblock => 7,
        }
    }
}

/// `BATADV_HLP_A_TYPE` values: the kind of payload a `FRAME` command carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameType {
    Plain,
    Enc,
    Req,
    Ack,
    Dec,
    PacketNum,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<FrameType> {
        match v {
            0 => Some(FrameType::Plain),
            1 => Some(FrameType::Enc),
            2 => Some(FrameType::Req),
            3 => Some(FrameType::Ack),
            4 => Some(FrameType::Dec),
            5 => Some(FrameType::PacketNum),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            FrameType::Plain => 0,
            FrameType::Enc => 1,
            FrameType::Req => 2,
            FrameType::Ack => 3,
            FrameType::Dec => 4,
            FrameType::PacketNum => 5,
        }
    }

    /// Outbound priority band, matching §4.D: control traffic highest, then
    /// repair requests/acks, then initial coded traffic, then plain/decoded
    /// forwarding lowest. `bands` is the I/O multiplexer's total band count;
    /// the control band (`BLOCK`/`UNBLOCK`, not represented as a `FrameType`
    /// here) lives one above `Req`/`Ack` at `bands - 1`.
    pub fn outbound_priority(self) -> usize {
        match self {
            FrameType::Plain | FrameType::Dec => 0,
            FrameType::Enc => 1,
            FrameType::Req | FrameType::Ack => 2,
            FrameType::PacketNum => 0,
        }
    }
}

/// A 6-byte Ethernet MAC address.
pub type Mac = [u8; 6];

/// A single typed attribute, `nla_put_*`'s payload side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    IfName(String),
    IfIndex(u32),
    Src(Mac),
    Dst(Mac),
    /// Opaque frame payload: PLAIN/DEC carry a length-prefixed byte buffer,
    /// ENC carries the coder's opaque encoded symbol.
    Frame(Arc<Vec<u8>>),
    Block(u16),
    Int(u16),
    Type(FrameType),
    Rank(u16),
    Seq(u16),
    Encs(u32),
    E1(u32),
    E2(u32),
    E3(u32),
}

/// The attribute index a given [`Attr`] variant occupies, `BATADV_HLP_A_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum AttrId {
    IfName = 1,
    IfIndex = 2,
    Src = 3,
    Dst = 4,
    Frame = 5,
    Block = 6,
    Int = 7,
    Type = 8,
    Rank = 9,
    Seq = 10,
    Encs = 11,
    E1 = 12,
    E2 = 13,
    E3 = 14,
}

impl Attr {
    pub fn id(&self) -> AttrId {
        match self {
            Attr::IfName(_) => AttrId::IfName,
            Attr::IfIndex(_) => AttrId::IfIndex,
            Attr::Src(_) => AttrId::Src,
            Attr::Dst(_) => AttrId::Dst,
            Attr::Frame(_) => AttrId::Frame,
            Attr::Block(_) => AttrId::Block,
            Attr::Int(_) => AttrId::Int,
            Attr::Type(_) => AttrId::Type,
            Attr::Rank(_) => AttrId::Rank,
            Attr::Seq(_) => AttrId::Seq,
            Attr::Encs(_) => AttrId::Encs,
            Attr::E1(_) => AttrId::E1,
            Attr::E2(_) => AttrId::E2,
            Attr::E3(_) => AttrId::E3,
        }
    }
}

/// `uid = (slot_id << 8) | block_counter`, per §3.
pub fn encode_uid(slot_id: u8, block_counter: u8) -> u16 {
    ((slot_id as u16) << 8) | block_counter as u16
}

pub fn decode_uid(uid: u16) -> (u8, u8) {
    ((uid >> 8) as u8, (uid & 0xff) as u8)
}

/// A reference-counted generic-netlink message: a command plus its sparse
/// attribute set. Cheap to clone (an `Arc` bump) so it can be duplicated at
/// enqueue and released after processing/transmission without copying the
/// underlying attribute data.
#[derive(Debug, Clone)]
pub struct Frame(Arc<FrameInner>);

#[derive(Debug)]
struct FrameInner {
    command: Command,
    attrs: Vec<Attr>,
}

impl Frame {
    pub fn new(command: Command, attrs: Vec<Attr>) -> Frame {
        Frame(Arc::new(FrameInner { command, attrs }))
    }

    pub fn command(&self) -> Command {
        self.0.command
    }

    pub fn attrs(&self) -> &[Attr] {
        &self.0.attrs
    }

    pub fn get(&self, id: AttrId) -> Option<&Attr> {
        self.0.attrs.iter().find(|a| a.id() == id)
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        match self.get(AttrId::Type)? {
            Attr::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn uid(&self) -> Option<u16> {
        match self.get(AttrId::Block)? {
            Attr::Block(u) => Some(*u),
            _ => None,
        }
    }

    pub fn src(&self) -> Option<Mac> {
        match self.get(AttrId::Src)? {
            Attr::Src(m) => Some(*m),
            _ => None,
        }
    }

    pub fn dst(&self) -> Option<Mac> {
        match self.get(AttrId::Dst)? {
            Attr::Dst(m) => Some(*m),
            _ => None,
        }
    }

    pub fn rank(&self) -> Option<u16> {
        match self.get(AttrId::Rank)? {
            Attr::Rank(r) => Some(*r),
            _ => None,
        }
    }

    pub fn seq(&self) -> Option<u16> {
        match self.get(AttrId::Seq)? {
            Attr::Seq(s) => Some(*s),
            _ => None,
        }
    }

    pub fn ifindex(&self) -> Option<u32> {
        match self.get(AttrId::IfIndex)? {
            Attr::IfIndex(i) => Some(*i),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self.get(AttrId::Frame)? {
            Attr::Frame(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

/// Prefix `payload` with its 2-byte little-endian length, the encoding used
/// for PLAIN and DEC symbol payloads (§6.1). Payloads are capped at 1600
/// bytes by the daemon's decode-length invariant (§3).
pub fn length_prefixed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split a length-prefixed buffer back into its declared length and the
/// payload slice, or `None` if the buffer is shorter than its own prefix
/// claims (a malformed frame, per §7 — drop and continue).
pub fn split_length_prefix(buf: &[u8]) -> Option<(u16, &[u8])> {
    if buf.len() < 2 {
        return None;
    }
    let len = u16::from_le_bytes([buf[0], buf[1]]);
    let rest = &buf[2..];
    if (rest.len() as u64) < len as u64 {
        return None;
    }
    Some((len, &rest[..len as usize]))
}

/// Maximum legal decoded payload length (§3); exceeding this is the one
/// fatal-to-generation decode error (§7).
pub const MAX_PAYLOAD_LEN: usize = 1600;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_round_trips() {
        let uid = encode_uid(3, 250);
        assert_eq!(decode_uid(uid), (3, 250));
    }

    #[test]
    fn uid_wrap_is_zero_block() {
        let uid = encode_uid(0, 0);
        assert_eq!(uid, 0);
        assert_eq!(decode_uid(uid), (0, 0));
    }

    #[test]
    fn length_prefix_round_trips() {
        let payload = b"hello world";
        let framed = length_prefixed(payload);
        let (len, rest) = split_length_prefix(&framed).unwrap();
        assert_eq!(len as usize, payload.len());
        assert_eq!(rest, payload);
    }

    #[test]
    fn split_length_prefix_rejects_truncated_buffer() {
        let mut framed = length_prefixed(b"hello");
        framed.truncate(4);
        assert!(split_length_prefix(&framed).is_none());
    }

    #[test]
    fn frame_type_priority_matches_spec_ordering() {
        assert_eq!(FrameType::Plain.outbound_priority(), 0);
        assert_eq!(FrameType::Dec.outbound_priority(), 0);
        assert_eq!(FrameType::Enc.outbound_priority(), 1);
        assert_eq!(FrameType::Req.outbound_priority(), 2);
        assert_eq!(FrameType::Ack.outbound_priority(), 2);
    }

    #[test]
    fn frame_accessors_round_trip() {
        let f = Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Enc),
                Attr::Block(encode_uid(1, 2)),
                Attr::Src([1, 2, 3, 4, 5, 6]),
                Attr::Dst([6, 5, 4, 3, 2, 1]),
                Attr::Frame(Arc::new(vec![9, 9, 9])),
            ],
        );
        assert_eq!(f.command(), Command::Frame);
        assert_eq!(f.frame_type(), Some(FrameType::Enc));
        assert_eq!(f.uid(), Some(encode_uid(1, 2)));
        assert_eq!(f.src(), Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(f.payload(), Some(&[9u8, 9, 9][..]));
    }
}
