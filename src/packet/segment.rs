//! 定义了在网络上传输的分段及其编解码。
//! Defines the segment transmitted over the network and its codec.
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |        Advertised Window      |               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               +
//! |         Payload Length        |            Checksum           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::seq::SeqNum;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the fixed header on the wire.
/// 线路上固定头部的大小。
pub const HEADER_SIZE: usize = 15;

/// The largest payload whose datagram still fits one IPv4 UDP packet.
/// 其数据报仍可放入单个IPv4 UDP包的最大载荷。
pub const MAX_PAYLOAD_SIZE: usize = 65_507 - HEADER_SIZE;

const CHECKSUM_OFFSET: usize = 13;

/// Segment control flags.
/// 分段控制标志。
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// Synchronise sequence numbers.
    pub const SYN: Flags = Flags(0b0000_0001);
    /// The acknowledgment number is valid.
    pub const ACK: Flags = Flags(0b0000_0010);
    /// The sender has finished sending.
    pub const FIN: Flags = Flags(0b0000_0100);
    /// Abort the connection.
    pub const RST: Flags = Flags(0b0000_1000);

    const ALL: u8 = 0b0000_1111;

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Option<Flags> {
        (bits & !Self::ALL == 0).then_some(Flags(bits))
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names = [
            (Flags::SYN, "SYN"),
            (Flags::ACK, "ACK"),
            (Flags::FIN, "FIN"),
            (Flags::RST, "RST"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Errors produced when decoding a datagram.
///
/// Both variants mean "drop the datagram": the transport treats them exactly
/// like a lost packet.
///
/// 解码数据报时产生的错误。两种变体都表示"丢弃该数据报"。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer is not a well-formed segment.
    /// 缓冲区不是格式正确的分段。
    #[error("malformed segment: {0}")]
    Malformed(&'static str),
    /// The checksum did not verify.
    /// 校验和验证失败。
    #[error("checksum mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Checksum { expected: u16, computed: u16 },
}

/// A protocol segment: header fields plus payload.
///
/// 协议分段：头部字段加载荷。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Sequence number of the first payload byte (or of the SYN/FIN).
    /// 第一个载荷字节（或SYN/FIN）的序列号。
    pub seq: SeqNum,
    /// Next sequence number the sender expects from its peer. Valid with `ACK`.
    /// 发送方期望从对端接收的下一个序列号。仅在设置 `ACK` 时有效。
    pub ack: SeqNum,
    pub flags: Flags,
    /// Free space in the sender's reassembly buffer, in bytes.
    /// 发送方重组缓冲区的空闲空间（字节）。
    pub window: u16,
    pub payload: Bytes,
}

impl Segment {
    /// Creates a segment.
    pub fn new(seq: SeqNum, ack: SeqNum, flags: Flags, window: u16, payload: Bytes) -> Self {
        Self {
            seq,
            ack,
            flags,
            window,
            payload,
        }
    }

    /// How much sequence space this segment occupies: payload bytes plus one
    /// for SYN and one for FIN.
    ///
    /// 此分段占用的序列空间：载荷字节数，SYN和FIN各加一。
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.flags.contains(Flags::SYN) {
            len += 1;
        }
        if self.flags.contains(Flags::FIN) {
            len += 1;
        }
        len
    }

    /// Serialises the segment into a freshly allocated datagram.
    ///
    /// 将分段序列化为新分配的数据报。
    pub fn encode(&self) -> Bytes {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD_SIZE);
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.seq.get());
        buf.put_u32(self.ack.get());
        buf.put_u8(self.flags.bits());
        buf.put_u16(self.window);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u16(0);
        buf.put_slice(&self.payload);

        let checksum = internet_checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Parses a datagram, verifying its length and checksum.
    ///
    /// 解析数据报，验证其长度和校验和。
    pub fn decode(datagram: &[u8]) -> Result<Self, CodecError> {
        if datagram.len() < HEADER_SIZE {
            return Err(CodecError::Malformed("shorter than header"));
        }

        let mut cursor = datagram;
        let seq = SeqNum(cursor.get_u32());
        let ack = SeqNum(cursor.get_u32());
        let flag_bits = cursor.get_u8();
        let window = cursor.get_u16();
        let payload_len = cursor.get_u16() as usize;
        let expected = cursor.get_u16();

        if cursor.remaining() != payload_len {
            return Err(CodecError::Malformed("payload length disagrees with datagram size"));
        }
        let computed = checksum_with_zeroed_field(datagram);
        if computed != expected {
            return Err(CodecError::Checksum { expected, computed });
        }
        let flags = Flags::from_bits(flag_bits).ok_or(CodecError::Malformed("unknown flag bits"))?;

        Ok(Self {
            seq,
            ack,
            flags,
            window,
            payload: Bytes::copy_from_slice(cursor),
        })
    }
}

/// Recomputes the checksum of a received datagram as if its checksum field were zero.
fn checksum_with_zeroed_field(datagram: &[u8]) -> u16 {
    let mut scratch = datagram.to_vec();
    scratch[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].fill(0);
    internet_checksum(&scratch)
}

/// Internet checksum (RFC 1071): one's-complement of the folded one's-complement
/// sum of big-endian 16-bit words, with an odd trailing byte padded on the right.
pub(crate) fn internet_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|pair| u32::from(u16::from_be_bytes([pair[0], pair[1]])))
        .sum();
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
