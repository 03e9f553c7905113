//! Generic-netlink wire codec and raw `AF_NETLINK` socket transport.
//!
//! Grounded in `io.cpp`'s `netlink_open`/`netlink_register`/`read_msg`, with
//! `libnl`'s `nl_socket_alloc_cb`/`genlmsg_put`/`nla_put_*` replaced by a
//! hand-rolled byte-level encoder/decoder over a raw socket opened with
//! `libc`, in the style of this codebase's other direct-syscall socket setup
//! (`net/interface.rs`'s `getifaddrs` use, `runtime.rs`'s `setsockopt` calls).

use std::io;
use std::mem::size_of;
use std::os::unix::io::RawFd;

use bytes::{BufMut, BytesMut};

use crate::frame::{Attr, AttrId, Command, Frame, FrameType, Mac};

/// `NETLINK_GENERIC` protocol, the control-plane family id, and the fixed
/// generic-netlink attribute ids used only during family resolution.
const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

const NLA_ALIGNTO: usize = 4;
const NLMSG_ALIGNTO: usize = 4;

/// Minimum send/receive socket buffer size, per §4.D.
const MIN_SOCKET_BUFFER: i32 = 1 << 20;

fn align(len: usize, to: usize) -> usize {
    (len + to - 1) & !(to - 1)
}

/// `nlmsghdr` is 16 bytes: len(4) type(2) flags(2) seq(4) pid(4).
const NLMSGHDR_LEN: usize = 16;
/// `genlmsghdr` is 4 bytes: cmd(1) version(1) reserved(2).
const GENLMSGHDR_LEN: usize = 4;

const NLM_F_REQUEST: u16 = 0x1;

/// Append one `nlattr` (4-byte header, id + length) followed by its
/// 4-byte-aligned payload.
fn put_attr(buf: &mut BytesMut, id: u16, payload: &[u8]) {
    let len = 4 + payload.len();
    buf.put_u16_le(len as u16);
    buf.put_u16_le(id);
    buf.put_slice(payload);
    let pad = align(len, NLA_ALIGNTO) - len;
    buf.put_bytes(0, pad);
}

fn put_attr_u8(buf: &mut BytesMut, id: u16, v: u8) {
    put_attr(buf, id, &[v]);
}

fn put_attr_u16(buf: &mut BytesMut, id: u16, v: u16) {
    put_attr(buf, id, &v.to_ne_bytes());
}

fn put_attr_u32(buf: &mut BytesMut, id: u16, v: u32) {
    put_attr(buf, id, &v.to_ne_bytes());
}

fn put_attr_str(buf: &mut BytesMut, id: u16, s: &str) {
    let mut payload = s.as_bytes().to_vec();
    payload.push(0);
    put_attr(buf, id, &payload);
}

/// One parsed `nlattr`: its id and payload slice (unpadded).
struct ParsedAttr<'a> {
    id: u16,
    payload: &'a [u8],
}

/// Walk a buffer of back-to-back, 4-byte-aligned `nlattr` TLVs.
fn parse_attrs(mut buf: &[u8]) -> Vec<ParsedAttr<'_>> {
    let mut out = Vec::new();
    while buf.len() >= 4 {
        let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let id = u16::from_le_bytes([buf[2], buf[3]]);
        if len < 4 || len > buf.len() {
            break;
        }
        out.push(ParsedAttr {
            id,
            payload: &buf[4..len],
        });
        let advance = align(len, NLA_ALIGNTO).min(buf.len());
        buf = &buf[advance..];
    }
    out
}

/// Encode a [`Frame`] as a generic-netlink message body (family header and
/// attribute set), not including the outer `nlmsghdr`.
fn encode_genlmsg(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u8(frame.command().to_u8());
    buf.put_u8(1); // version
    buf.put_u16_le(0); // reserved

    for attr in frame.attrs() {
        match attr {
            Attr::IfName(s) => put_attr_str(&mut buf, AttrId::IfName as u16, s),
            Attr::IfIndex(v) => put_attr_u32(&mut buf, AttrId::IfIndex as u16, *v),
            Attr::Src(mac) => put_attr(&mut buf, AttrId::Src as u16, mac),
            Attr::Dst(mac) => put_attr(&mut buf, AttrId::Dst as u16, mac),
            Attr::Frame(bytes) => put_attr(&mut buf, AttrId::Frame as u16, bytes),
            Attr::Block(v) => put_attr_u16(&mut buf, AttrId::Block as u16, *v),
            Attr::Int(v) => put_attr_u16(&mut buf, AttrId::Int as u16, *v),
            Attr::Type(t) => put_attr_u8(&mut buf, AttrId::Type as u16, t.to_u8()),
            Attr::Rank(v) => put_attr_u16(&mut buf, AttrId::Rank as u16, *v),
            Attr::Seq(v) => put_attr_u16(&mut buf, AttrId::Seq as u16, *v),
            Attr::Encs(v) => put_attr_u32(&mut buf, AttrId::Encs as u16, *v),
            Attr::E1(v) => put_attr_u32(&mut buf, AttrId::E1 as u16, *v),
            Attr::E2(v) => put_attr_u32(&mut buf, AttrId::E2 as u16, *v),
            Attr::E3(v) => put_attr_u32(&mut buf, AttrId::E3 as u16, *v),
        }
    }

    buf
}

/// Wrap a generic-netlink message body with the outer `nlmsghdr`.
fn wrap_nlmsg(family: u16, seq: u32, body: &[u8]) -> Vec<u8> {
    let total_len = NLMSGHDR_LEN + body.len();
    let mut out = BytesMut::with_capacity(align(total_len, NLMSG_ALIGNTO));
    out.put_u32_le(total_len as u32);
    out.put_u16_le(family);
    out.put_u16_le(NLM_F_REQUEST);
    out.put_u32_le(seq);
    out.put_u32_le(0); // pid, kernel assigns
    out.put_slice(body);
    let pad = align(total_len, NLMSG_ALIGNTO) - total_len;
    out.put_bytes(0, pad);
    out.to_vec()
}

/// One datagram read off the netlink socket: the resolved family id the
/// message arrived on, the genl command byte, and its parsed attribute body.
struct Inbound {
    nlmsg_type: u16,
    cmd: u8,
    body: BytesMut,
}

fn parse_nlmsg(raw: &[u8]) -> Option<Inbound> {
    if raw.len() < NLMSGHDR_LEN + GENLMSGHDR_LEN {
        return None;
    }
    let total_len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
    let nlmsg_type = u16::from_le_bytes([raw[4], raw[5]]);
    if total_len < NLMSGHDR_LEN + GENLMSGHDR_LEN || total_len > raw.len() {
        return None;
    }
    let cmd = raw[NLMSGHDR_LEN];
    let attrs_start = NLMSGHDR_LEN + GENLMSGHDR_LEN;
    let mut body = BytesMut::with_capacity(total_len - attrs_start);
    body.extend_from_slice(&raw[attrs_start..total_len]);
    Some(Inbound { nlmsg_type, cmd, body })
}

/// Reconstruct a [`Frame`] from a genl command byte and its raw attribute
/// TLV buffer. Returns `None` on an unrecognized command, matching
/// `read_msg`'s `switch` falling through silently on anything but
/// `REGISTER`/`FRAME`.
pub fn decode_frame(cmd: u8, body: &[u8]) -> Option<Frame> {
    let command = Command::from_u8(cmd)?;
    let mut attrs = Vec::new();

    for attr in parse_attrs(body) {
        let parsed = match attr.id {
            id if id == AttrId::IfName as u16 => {
                let s = attr.payload.split(|&b| b == 0).next().unwrap_or(attr.payload);
                Some(Attr::IfName(String::from_utf8_lossy(s).into_owned()))
            }
            id if id == AttrId::IfIndex as u16 && attr.payload.len() >= 4 => {
                Some(Attr::IfIndex(u32::from_ne_bytes(attr.payload[..4].try_into().ok()?)))
            }
            id if id == AttrId::Src as u16 && attr.payload.len() >= 6 => {
                let mac: Mac = attr.payload[..6].try_into().ok()?;
                Some(Attr::Src(mac))
            }
            id if id == AttrId::Dst as u16 && attr.payload.len() >= 6 => {
                let mac: Mac = attr.payload[..6].try_into().ok()?;
                Some(Attr::Dst(mac))
            }
            id if id == AttrId::Frame as u16 => Some(Attr::Frame(std::sync::Arc::new(attr.payload.to_vec()))),
            id if id == AttrId::Block as u16 && attr.payload.len() >= 2 => {
                Some(Attr::Block(u16::from_ne_bytes(attr.payload[..2].try_into().ok()?)))
            }
            id if id == AttrId::Int as u16 && attr.payload.len() >= 2 => {
                Some(Attr::Int(u16::from_ne_bytes(attr.payload[..2].try_into().ok()?)))
            }
            id if id == AttrId::Type as u16 && !attr.payload.is_empty() => {
                FrameType::from_u8(attr.payload[0]).map(Attr::Type)
            }
            id if id == AttrId::Rank as u16 && attr.payload.len() >= 2 => {
                Some(Attr::Rank(u16::from_ne_bytes(attr.payload[..2].try_into().ok()?)))
            }
            id if id == AttrId::Seq as u16 && attr.payload.len() >= 2 => {
                Some(Attr::Seq(u16::from_ne_bytes(attr.payload[..2].try_into().ok()?)))
            }
            id if id == AttrId::Encs as u16 && attr.payload.len() >= 4 => {
                Some(Attr::Encs(u32::from_ne_bytes(attr.payload[..4].try_into().ok()?)))
            }
            id if id == AttrId::E1 as u16 && attr.payload.len() >= 4 => {
                Some(Attr::E1(u32::from_ne_bytes(attr.payload[..4].try_into().ok()?)))
            }
            id if id == AttrId::E2 as u16 && attr.payload.len() >= 4 => {
                Some(Attr::E2(u32::from_ne_bytes(attr.payload[..4].try_into().ok()?)))
            }
            id if id == AttrId::E3 as u16 && attr.payload.len() >= 4 => {
                Some(Attr::E3(u32::from_ne_bytes(attr.payload[..4].try_into().ok()?)))
            }
            _ => None,
        };
        if let Some(a) = parsed {
            attrs.push(a);
        }
    }

    Some(Frame::new(command, attrs))
}

/// Resolve an interface name to its kernel `ifindex` via `SIOCGIFINDEX`,
/// the same direct-syscall style this crate uses for the netlink socket
/// itself rather than shelling out to `ip link`. Queried once at startup so
/// encoder/decoder pools can be seeded with the real index immediately,
/// instead of waiting on the kernel's asynchronous `REGISTER` echo.
pub fn resolve_ifindex(interface: &str) -> anyhow::Result<u32> {
    if interface.len() >= libc::IFNAMSIZ {
        anyhow::bail!("interface name '{interface}' too long");
    }

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(interface.as_bytes()) {
        *dst = *src as libc::c_char;
    }

    let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut ifr) };
    unsafe { libc::close(fd) };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }

    let index = unsafe { ifr.ifr_ifru.ifru_ifindex };
    Ok(index as u32)
}

/// A raw `AF_NETLINK`/`NETLINK_GENERIC` socket bound to the kernel's
/// `batman_adv` helper family, resolved once at open time.
pub struct NetlinkSocket {
    fd: RawFd,
    family: u16,
    seq: std::sync::atomic::AtomicU32,
    pid: u32,
}

impl NetlinkSocket {
    /// Open a raw netlink socket, size its buffers, and resolve `batman_adv`
    /// against the kernel's `nlctrl` control family. Grounded in
    /// `io.cpp::netlink_open`.
    pub fn open() -> anyhow::Result<NetlinkSocket> {
        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_GENERIC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let mut sock = NetlinkSocket {
            fd,
            family: 0,
            seq: std::sync::atomic::AtomicU32::new(1),
            pid: 0,
        };

        sock.set_buffer_sizes()?;
        sock.bind()?;
        sock.pid = sock.local_pid()?;
        sock.family = sock.resolve_family("batman_adv")?;
        Ok(sock)
    }

    fn local_pid(&self) -> anyhow::Result<u32> {
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        let mut addrlen = size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockname(
                self.fd,
                &mut addr as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addrlen,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(addr.nl_pid)
    }

    fn set_buffer_sizes(&self) -> anyhow::Result<()> {
        for (opt, name) in [(libc::SO_SNDBUF, "SO_SNDBUF"), (libc::SO_RCVBUF, "SO_RCVBUF")] {
            let ret = unsafe {
                libc::setsockopt(
                    self.fd,
                    libc::SOL_SOCKET,
                    opt,
                    &MIN_SOCKET_BUFFER as *const i32 as *const libc::c_void,
                    size_of::<i32>() as libc::socklen_t,
                )
            };
            if ret != 0 {
                tracing::warn!(opt = name, error = %io::Error::last_os_error(), "setsockopt failed");
            }
        }
        Ok(())
    }

    fn bind(&self) -> anyhow::Result<()> {
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        addr.nl_pid = 0;
        addr.nl_groups = 0;

        let ret = unsafe {
            libc::bind(
                self.fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn send_raw(&self, msg: &[u8]) -> io::Result<()> {
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;

        let ret = unsafe {
            libc::sendto(
                self.fd,
                msg.as_ptr() as *const libc::c_void,
                msg.len(),
                0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Blocking `recvfrom` of a single datagram, returning the raw bytes.
    fn recv_raw(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        let mut addrlen = size_of::<libc::sockaddr_nl>() as libc::socklen_t;
        let ret = unsafe {
            libc::recvfrom(
                self.fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut addrlen,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    /// `CTRL_CMD_GETFAMILY` request/response over `GENL_ID_CTRL`.
    fn resolve_family(&self, name: &str) -> anyhow::Result<u16> {
        let mut body = BytesMut::with_capacity(64);
        body.put_u8(CTRL_CMD_GETFAMILY);
        body.put_u8(1);
        body.put_u16_le(0);
        put_attr_str(&mut body, CTRL_ATTR_FAMILY_NAME, name);

        let msg = wrap_nlmsg(GENL_ID_CTRL, self.next_seq(), &body);
        self.send_raw(&msg)?;

        let mut buf = vec![0u8; 8192];
        loop {
            let n = self.recv_raw(&mut buf)?;
            let Some(inbound) = parse_nlmsg(&buf[..n]) else { continue };
            if inbound.nlmsg_type != GENL_ID_CTRL {
                continue;
            }
            for attr in parse_attrs(&inbound.body) {
                if attr.id == CTRL_ATTR_FAMILY_ID && attr.payload.len() >= 2 {
                    return Ok(u16::from_ne_bytes([attr.payload[0], attr.payload[1]]));
                }
            }
        }
    }

    /// Family id resolved at open time.
    pub fn family(&self) -> u16 {
        self.family
    }

    /// Send a `REGISTER` message carrying the bound interface name and loss
    /// model, per `io.cpp::netlink_register`.
    pub fn register(&self, interface: &str, encoders: u32, e1: u32, e2: u32, e3: u32) -> anyhow::Result<()> {
        let frame = Frame::new(
            Command::Register,
            vec![
                Attr::IfName(interface.to_string()),
                Attr::Encs(encoders),
                Attr::E1(e1),
                Attr::E2(e2),
                Attr::E3(e3),
            ],
        );
        self.send(&frame)
    }

    /// Serialize and transmit one [`Frame`]. Errors here are never fatal to
    /// the process; callers log and move on (§7).
    pub fn send(&self, frame: &Frame) -> anyhow::Result<()> {
        let body = encode_genlmsg(frame);
        let msg = wrap_nlmsg(self.family, self.next_seq(), &body);
        self.send_raw(&msg)?;
        Ok(())
    }

    /// Send a minimal message addressed to this socket's own kernel-assigned
    /// port id, unblocking a reader thread parked in `recvfrom` on shutdown.
    /// Grounded in `io.cpp`'s destructor sending a `BATADV_HLP_C_UNSPEC`
    /// message to itself before joining the reader thread.
    pub fn wake(&self) -> io::Result<()> {
        let msg = wrap_nlmsg(self.family, self.next_seq(), &[0u8; GENLMSGHDR_LEN]);

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as u16;
        addr.nl_pid = self.pid;

        let ret = unsafe {
            libc::sendto(
                self.fd,
                msg.as_ptr() as *const libc::c_void,
                msg.len(),
                0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until one datagram is available, returning the decoded frame
    /// (or `None` for a message this daemon doesn't recognize).
    pub fn recv(&self) -> io::Result<Option<Frame>> {
        let mut buf = vec![0u8; 8192];
        let n = self.recv_raw(&mut buf)?;
        let Some(inbound) = parse_nlmsg(&buf[..n]) else { return Ok(None) };
        if inbound.nlmsg_type != self.family {
            return Ok(None);
        }
        Ok(decode_frame(inbound.cmd, &inbound.body))
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn resolve_ifindex_finds_the_loopback_interface() {
        // Every Linux host has a loopback interface; its index is commonly
        // 1 but not guaranteed, so just check resolution succeeds and is
        // non-zero rather than pin the exact value.
        let idx = resolve_ifindex("lo").expect("lo must resolve");
        assert!(idx > 0);
    }

    #[test]
    fn resolve_ifindex_rejects_oversized_names() {
        let name = "x".repeat(libc::IFNAMSIZ + 1);
        assert!(resolve_ifindex(&name).is_err());
    }

    #[test]
    fn attr_round_trips_through_encode_and_parse() {
        let frame = Frame::new(
            Command::Frame,
            vec![
                Attr::Type(FrameType::Enc),
                Attr::Block(0x0203),
                Attr::Src([1, 2, 3, 4, 5, 6]),
                Attr::Dst([6, 5, 4, 3, 2, 1]),
                Attr::Frame(Arc::new(vec![9, 9, 9, 9, 9])),
            ],
        );

        let body = encode_genlmsg(&frame);
        let cmd = body[0];
        let decoded = decode_frame(cmd, &body[GENLMSGHDR_LEN..]).unwrap();

        assert_eq!(decoded.command(), Command::Frame);
        assert_eq!(decoded.frame_type(), Some(FrameType::Enc));
        assert_eq!(decoded.uid(), Some(0x0203));
        assert_eq!(decoded.src(), Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(decoded.payload(), Some(&[9u8, 9, 9, 9, 9][..]));
    }

    #[test]
    fn ifname_attribute_strips_trailing_nul() {
        let frame = Frame::new(Command::Register, vec![Attr::IfName("bat0".to_string())]);
        let body = encode_genlmsg(&frame);
        let decoded = decode_frame(body[0], &body[GENLMSGHDR_LEN..]).unwrap();
        match decoded.attrs().first() {
            Some(Attr::IfName(s)) => assert_eq!(s, "bat0"),
            other => panic!("expected IfName, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_command_decodes_to_none() {
        assert!(decode_frame(0xff, &[]).is_none());
    }

    #[test]
    fn truncated_attribute_buffer_stops_without_panicking() {
        let mut body = BytesMut::new();
        body.put_u8(Command::Frame.to_u8());
        body.put_u8(1);
        body.put_u16_le(0);
        body.put_slice(&[8, 0, 8, 0, 1]); // claims len=8 (4 byte payload) but only 1 byte present
        let decoded = decode_frame(body[0], &body[GENLMSGHDR_LEN..]);
        assert!(decoded.is_some());
        assert!(decoded.unwrap().attrs().is_empty());
    }

    #[test]
    fn wrap_nlmsg_pads_to_four_byte_alignment() {
        let body = [0u8; 5];
        let msg = wrap_nlmsg(GENL_ID_CTRL, 1, &body);
        assert_eq!(msg.len() % NLMSG_ALIGNTO, 0);
    }
}
