//! Manages the receiving side of a connection: reassembly of out-of-order
//! segments, in-order delivery and the cumulative acknowledgment.
//!
//! 管理连接的接收端：乱序分段的重组、按序交付以及累积确认。

use crate::packet::SeqNum;
use bytes::Bytes;
use std::collections::{BTreeMap, btree_map::Entry};
use tracing::trace;

/// The result of feeding one segment into the [`ReceiveEngine`].
///
/// 向 [`ReceiveEngine`] 输入一个分段的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Newly contiguous payloads, in stream order.
    /// 新近连续的载荷，按流顺序排列。
    pub delivered: Vec<Bytes>,
    /// The cumulative acknowledgment: the next sequence number expected.
    /// 累积确认：期望的下一个序列号。
    pub ack: SeqNum,
    /// The window to advertise in the acknowledgment.
    /// 在确认中通告的窗口。
    pub window: u16,
    /// Set on the call that consumed the peer's FIN.
    /// 在消费对端FIN的那次调用中被设置。
    pub fin_reached: bool,
    /// Nothing new was learned from the segment.
    /// 该分段没有带来任何新数据。
    pub duplicate: bool,
}

/// Manages incoming data.
///
/// Received bytes are keyed by their offset in the stream (a `u64` counted
/// from the peer's first data byte) so ordering does not depend on
/// sequence-number wraparound.
///
/// 管理传入数据。接收到的字节以其在流中的偏移量为键（从对端第一个数据字节起计数的 `u64`），
/// 因此排序不依赖于序列号回绕。
#[derive(Debug)]
pub struct ReceiveEngine {
    /// The next sequence number we expect.
    rcv_nxt: SeqNum,
    /// Bytes delivered so far, i.e. the stream offset of `rcv_nxt`.
    delivered_offset: u64,
    /// Out-of-order payloads keyed by stream offset.
    out_of_order: BTreeMap<u64, Bytes>,
    buffered_bytes: usize,
    /// Delivered bytes the application has not read yet.
    unread_bytes: usize,
    capacity: usize,
    /// Stream offset at which the peer's FIN sits, once known.
    fin_offset: Option<u64>,
    fin_reached: bool,
}

impl ReceiveEngine {
    /// Creates a receive engine expecting `first_seq` next, which is the
    /// peer's initial sequence number plus one for its SYN.
    ///
    /// 创建一个期望下一个为 `first_seq` 的接收引擎。
    pub fn new(first_seq: SeqNum, capacity: u16) -> Self {
        Self {
            rcv_nxt: first_seq,
            delivered_offset: 0,
            out_of_order: BTreeMap::new(),
            buffered_bytes: 0,
            unread_bytes: 0,
            capacity: usize::from(capacity),
            fin_offset: None,
            fin_reached: false,
        }
    }

    /// The next sequence number expected from the peer.
    pub fn ack_number(&self) -> SeqNum {
        self.rcv_nxt
    }

    /// Remaining capacity in bytes. Both out-of-order data and delivered
    /// data the application has not read yet count against it.
    ///
    /// 剩余容量（字节）。乱序数据和应用尚未读取的已交付数据都会占用容量。
    pub fn window(&self) -> u16 {
        self.free_capacity() as u16
    }

    fn free_capacity(&self) -> usize {
        self.capacity
            .saturating_sub(self.buffered_bytes + self.unread_bytes)
    }

    /// Returns `len` delivered bytes to the window once the application has
    /// taken them.
    ///
    /// 应用取走 `len` 个已交付字节后，将其归还给窗口。
    pub fn on_read(&mut self, len: usize) {
        self.unread_bytes = self.unread_bytes.saturating_sub(len);
    }

    pub fn unread_bytes(&self) -> usize {
        self.unread_bytes
    }

    pub fn fin_reached(&self) -> bool {
        self.fin_reached
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Feeds one received segment into the reassembly buffer.
    ///
    /// Data already delivered is discarded, data beyond the window is
    /// dropped, and the longest contiguous prefix is handed back in order.
    /// Calling this twice with the same segment is harmless.
    ///
    /// 将一个接收到的分段送入重组缓冲区。已交付的数据被丢弃，超出窗口的数据被丢弃，
    /// 最长的连续前缀按顺序返回。用同一分段调用两次是无害的。
    pub fn on_segment(&mut self, seq: SeqNum, payload: Bytes, fin: bool) -> ReceiveOutcome {
        let mut accepted = false;

        if !self.fin_reached {
            let start = self.offset_of(seq);
            let end = start + payload.len() as i64;
            let limit = self.delivered_offset as i64
                + self.capacity.saturating_sub(self.unread_bytes) as i64;

            if !payload.is_empty() {
                accepted = self.insert(start, end, limit, payload);
            }

            if fin && end <= limit && end >= self.delivered_offset as i64 {
                let end = end as u64;
                match self.fin_offset {
                    None => {
                        trace!(offset = end, "FIN received");
                        self.fin_offset = Some(end);
                        accepted = true;
                    }
                    Some(existing) if existing != end => {
                        trace!(existing, offset = end, "Ignoring FIN at a different offset");
                    }
                    Some(_) => {}
                }
            }
        }

        let delivered = self.reassemble();
        let mut fin_reached = false;
        if !self.fin_reached && self.fin_offset == Some(self.delivered_offset) {
            self.fin_reached = true;
            self.rcv_nxt += 1;
            fin_reached = true;
        }

        ReceiveOutcome {
            duplicate: !accepted && delivered.is_empty() && !fin_reached,
            delivered,
            ack: self.rcv_nxt,
            window: self.window(),
            fin_reached,
        }
    }

    /// Stream offset of `seq`, relative to the bytes delivered so far.
    fn offset_of(&self, seq: SeqNum) -> i64 {
        self.delivered_offset as i64 + i64::from(seq.distance_from(self.rcv_nxt))
    }

    /// Stores the in-window part of `[start, end)`. Returns `true` if any new
    /// bytes were kept.
    fn insert(&mut self, start: i64, end: i64, limit: i64, mut payload: Bytes) -> bool {
        let floor = self.delivered_offset as i64;
        if end <= floor || start >= limit {
            trace!(start, end, "Segment outside the receive window dropped");
            return false;
        }
        if start < floor {
            payload = payload.slice((floor - start) as usize..);
        }
        if end > limit {
            let keep = payload.len() - (end - limit) as usize;
            payload.truncate(keep);
        }
        let start = start.max(floor) as u64;

        if payload.len() > self.free_capacity() {
            trace!(start, "Reassembly buffer full, segment dropped");
            return false;
        }

        match self.out_of_order.entry(start) {
            Entry::Vacant(entry) => {
                self.buffered_bytes += payload.len();
                entry.insert(payload);
                true
            }
            Entry::Occupied(mut entry) => {
                if entry.get().len() >= payload.len() {
                    return false;
                }
                self.buffered_bytes = self.buffered_bytes - entry.get().len() + payload.len();
                entry.insert(payload);
                true
            }
        }
    }

    /// Pops every payload that starts at or before the delivery point.
    fn reassemble(&mut self) -> Vec<Bytes> {
        let mut delivered = Vec::new();
        while let Some(entry) = self.out_of_order.first_entry() {
            let offset = *entry.key();
            if offset > self.delivered_offset {
                break;
            }
            let payload = entry.remove();
            self.buffered_bytes -= payload.len();

            let end = offset + payload.len() as u64;
            if end <= self.delivered_offset {
                continue;
            }
            let fresh = payload.slice((self.delivered_offset - offset) as usize..);
            self.delivered_offset = end;
            self.rcv_nxt += fresh.len() as u32;
            self.unread_bytes += fresh.len();
            delivered.push(fresh);
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: u32 = 1000;

    fn engine() -> ReceiveEngine {
        ReceiveEngine::new(SeqNum(FIRST), 4000)
    }

    fn data(byte: u8, len: usize) -> Bytes {
        Bytes::from(vec![byte; len])
    }

    #[test]
    fn test_in_order_delivery() {
        let mut engine = engine();
        let outcome = engine.on_segment(SeqNum(FIRST), data(1, 100), false);
        assert_eq!(outcome.delivered, vec![data(1, 100)]);
        assert_eq!(outcome.ack, SeqNum(FIRST + 100));
        // Delivered but unread bytes still occupy the window.
        assert_eq!(outcome.window, 3900);
        assert!(!outcome.duplicate);

        engine.on_read(100);
        assert_eq!(engine.window(), 4000);
    }

    #[test]
    fn test_out_of_order_is_buffered_then_delivered() {
        let mut engine = engine();

        let outcome = engine.on_segment(SeqNum(FIRST + 100), data(2, 100), false);
        assert!(outcome.delivered.is_empty());
        // The cumulative ACK does not move past the hole.
        assert_eq!(outcome.ack, SeqNum(FIRST));
        assert_eq!(outcome.window, 3900);

        let outcome = engine.on_segment(SeqNum(FIRST + 200), data(3, 50), false);
        assert_eq!(outcome.ack, SeqNum(FIRST));
        assert_eq!(engine.buffered_bytes(), 150);

        let outcome = engine.on_segment(SeqNum(FIRST), data(1, 100), false);
        assert_eq!(outcome.delivered, vec![data(1, 100), data(2, 100), data(3, 50)]);
        assert_eq!(outcome.ack, SeqNum(FIRST + 250));
        assert_eq!(outcome.window, 3750);
        assert_eq!(engine.buffered_bytes(), 0);
        assert_eq!(engine.unread_bytes(), 250);
    }

    #[test]
    fn test_redelivery_is_idempotent() {
        let mut engine = engine();
        engine.on_segment(SeqNum(FIRST + 100), data(2, 100), false);
        let again = engine.on_segment(SeqNum(FIRST + 100), data(2, 100), false);
        assert!(again.duplicate);
        assert_eq!(engine.buffered_bytes(), 100);

        engine.on_segment(SeqNum(FIRST), data(1, 100), false);
        let old = engine.on_segment(SeqNum(FIRST), data(1, 100), false);
        assert!(old.duplicate);
        assert!(old.delivered.is_empty());
        assert_eq!(old.ack, SeqNum(FIRST + 200));
    }

    #[test]
    fn test_partially_old_segment_delivers_only_new_bytes() {
        let mut engine = engine();
        engine.on_segment(SeqNum(FIRST), Bytes::from_static(b"hello"), false);
        let outcome = engine.on_segment(SeqNum(FIRST + 3), Bytes::from_static(b"lo world"), false);
        assert_eq!(outcome.delivered, vec![Bytes::from_static(b" world")]);
        assert_eq!(outcome.ack, SeqNum(FIRST + 11));
    }

    #[test]
    fn test_overlapping_buffered_segments() {
        let mut engine = engine();
        // A one-byte probe followed by the full segment at the same offset.
        engine.on_segment(SeqNum(FIRST + 10), Bytes::from_static(b"a"), false);
        engine.on_segment(SeqNum(FIRST + 10), Bytes::from_static(b"abcd"), false);
        engine.on_segment(SeqNum(FIRST + 12), Bytes::from_static(b"cdef"), false);

        let outcome = engine.on_segment(SeqNum(FIRST), Bytes::from_static(b"0123456789"), false);
        let joined: Vec<u8> = outcome.delivered.iter().flat_map(|b| b.to_vec()).collect();
        assert_eq!(joined, b"0123456789abcdef");
        assert_eq!(outcome.ack, SeqNum(FIRST + 16));
        assert_eq!(engine.buffered_bytes(), 0);
    }

    #[test]
    fn test_data_beyond_window_is_dropped() {
        let mut engine = engine();
        let outcome = engine.on_segment(SeqNum(FIRST + 4000), data(9, 10), false);
        assert!(outcome.duplicate);
        assert_eq!(engine.buffered_bytes(), 0);

        // Straddling the edge keeps only the part that fits.
        engine.on_segment(SeqNum(FIRST + 3990), data(9, 20), false);
        assert_eq!(engine.buffered_bytes(), 10);
        assert_eq!(engine.window(), 3990);
    }

    #[test]
    fn test_unread_data_closes_the_window() {
        let mut engine = engine();
        for i in 0..4 {
            let outcome = engine.on_segment(SeqNum(FIRST + i * 1000), data(1, 1000), false);
            assert_eq!(outcome.delivered.len(), 1);
        }
        assert_eq!(engine.window(), 0);

        // Nothing more is accepted until the application reads.
        let outcome = engine.on_segment(SeqNum(FIRST + 4000), data(2, 1), false);
        assert!(outcome.duplicate);
        assert_eq!(outcome.ack, SeqNum(FIRST + 4000));
        assert_eq!(engine.buffered_bytes(), 0);

        engine.on_read(1500);
        assert_eq!(engine.window(), 1500);
        let outcome = engine.on_segment(SeqNum(FIRST + 4000), data(2, 2000), false);
        assert_eq!(outcome.delivered, vec![data(2, 1500)]);
        assert_eq!(outcome.window, 0);
        assert_eq!(engine.unread_bytes(), 4000);
    }

    #[test]
    fn test_fin_consumes_one_sequence_number() {
        let mut engine = engine();
        let outcome = engine.on_segment(SeqNum(FIRST), data(1, 10), true);
        assert!(outcome.fin_reached);
        assert_eq!(outcome.ack, SeqNum(FIRST + 11));
        assert!(engine.fin_reached());

        // A retransmitted FIN is acknowledged again but changes nothing.
        let again = engine.on_segment(SeqNum(FIRST + 10), Bytes::new(), true);
        assert!(again.duplicate);
        assert!(!again.fin_reached);
        assert_eq!(again.ack, SeqNum(FIRST + 11));
    }

    #[test]
    fn test_early_fin_waits_for_missing_data() {
        let mut engine = engine();
        let outcome = engine.on_segment(SeqNum(FIRST + 5), Bytes::new(), true);
        assert!(!outcome.fin_reached);
        assert_eq!(outcome.ack, SeqNum(FIRST));

        let outcome = engine.on_segment(SeqNum(FIRST), data(1, 5), false);
        assert!(outcome.fin_reached);
        assert_eq!(outcome.delivered, vec![data(1, 5)]);
        assert_eq!(outcome.ack, SeqNum(FIRST + 6));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut engine = ReceiveEngine::new(SeqNum(u32::MAX - 4), 4000);
        engine.on_segment(SeqNum(5), data(2, 10), false);
        let outcome = engine.on_segment(SeqNum(u32::MAX - 4), data(1, 10), false);
        assert_eq!(outcome.delivered, vec![data(1, 10), data(2, 10)]);
        assert_eq!(outcome.ack, SeqNum(15));
    }
}
