//! Test support: an in-memory lossy datagram link and fixture data.
//!
//! 测试支持：内存中的有损数据报链路和测试数据。

use crate::error::Result;
use crate::packet::Segment;
use crate::socket::AsyncUdpSocket;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::trace;

/// A predicate over decoded segments. Returning `false` drops the datagram.
/// 针对已解码分段的谓词。返回 `false` 会丢弃该数据报。
pub type SegmentFilter = Arc<dyn Fn(&Segment) -> bool + Send + Sync>;

type Datagram = (Bytes, SocketAddr);

/// Impairments applied to every datagram a [`SimulatedSocket`] sends.
///
/// 应用于 [`SimulatedSocket`] 发送的每个数据报的损伤。
#[derive(Debug, Clone)]
pub struct LinkConditions {
    /// Probability that a datagram is lost.
    /// 数据报丢失的概率。
    pub loss: f64,
    /// Probability that a datagram is delivered twice.
    /// 数据报被投递两次的概率。
    pub duplicate: f64,
    /// Probability that one bit of a datagram is flipped in transit.
    /// 数据报在传输中被翻转一个比特的概率。
    pub corrupt: f64,
    /// Probability that a datagram is held back by `reorder_delay`.
    /// 数据报被延迟 `reorder_delay` 的概率。
    pub reorder: f64,
    pub reorder_delay: Duration,
    /// One-way delay applied to every datagram.
    /// 应用于每个数据报的单向延迟。
    pub delay: Duration,
    /// Seed for the impairment decisions, so failures can be replayed.
    /// 损伤决策的随机种子，以便重现失败。
    pub seed: u64,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            loss: 0.0,
            duplicate: 0.0,
            corrupt: 0.0,
            reorder: 0.0,
            reorder_delay: Duration::from_millis(5),
            delay: Duration::ZERO,
            seed: 0x5eed,
        }
    }
}

impl LinkConditions {
    /// A link that neither loses nor reorders.
    pub fn perfect() -> Self {
        Self::default()
    }

    pub fn lossy(loss: f64, seed: u64) -> Self {
        Self {
            loss,
            seed,
            ..Self::default()
        }
    }
}

/// One end of an in-memory datagram link.
///
/// Each end owns an inbox; sending pushes into the peer's inbox after the
/// configured impairments are applied. An optional filter sees every
/// decodable segment before the impairments and can drop it.
///
/// 内存数据报链路的一端。每一端拥有一个收件箱；发送时在应用配置的损伤后推入对端的收件箱。
#[derive(Clone)]
pub struct SimulatedSocket {
    local_addr: SocketAddr,
    inbox: Arc<AsyncMutex<mpsc::UnboundedReceiver<Datagram>>>,
    peer: mpsc::UnboundedSender<Datagram>,
    conditions: LinkConditions,
    rng: Arc<Mutex<StdRng>>,
    filter: Option<SegmentFilter>,
    sent: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SimulatedSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedSocket")
            .field("local_addr", &self.local_addr)
            .field("conditions", &self.conditions)
            .finish()
    }
}

impl SimulatedSocket {
    /// Creates two connected sockets sharing the same link conditions.
    ///
    /// 创建两个共享相同链路条件的已连接套接字。
    pub fn pair(conditions: LinkConditions) -> (Self, Self) {
        let a = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10_001);
        let b = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10_002);
        Self::pair_with(a, b, conditions)
    }

    pub fn pair_with(a: SocketAddr, b: SocketAddr, conditions: LinkConditions) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let mut reverse = conditions.clone();
        reverse.seed = conditions.seed.wrapping_add(1);
        (
            Self::new(a, rx_a, tx_b, conditions),
            Self::new(b, rx_b, tx_a, reverse),
        )
    }

    fn new(
        local_addr: SocketAddr,
        inbox: mpsc::UnboundedReceiver<Datagram>,
        peer: mpsc::UnboundedSender<Datagram>,
        conditions: LinkConditions,
    ) -> Self {
        Self {
            local_addr,
            inbox: Arc::new(AsyncMutex::new(inbox)),
            peer,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(conditions.seed))),
            conditions,
            filter: None,
            sent: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Installs a filter on outgoing segments.
    ///
    /// 为发出的分段安装过滤器。
    pub fn with_filter(mut self, filter: impl Fn(&Segment) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Datagrams handed to the link, dropped or not.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    /// Datagrams dropped by the filter or by simulated loss.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Decides the fate of one datagram of `len` bytes: `None` to drop it,
    /// otherwise the delay, the number of copies to deliver and the bit to
    /// flip, if any.
    fn impair(&self, len: usize) -> Option<(Duration, usize, Option<usize>)> {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        let c = &self.conditions;
        if rng.random_bool(c.loss.clamp(0.0, 1.0)) {
            return None;
        }
        let copies = if rng.random_bool(c.duplicate.clamp(0.0, 1.0)) { 2 } else { 1 };
        let mut delay = c.delay;
        if rng.random_bool(c.reorder.clamp(0.0, 1.0)) {
            delay += c.reorder_delay;
        }
        let flip = (len > 0 && rng.random_bool(c.corrupt.clamp(0.0, 1.0)))
            .then(|| rng.random_range(0..len * 8));
        Some((delay, copies, flip))
    }

    fn deliver(&self, datagram: Datagram, delay: Duration) {
        if delay.is_zero() {
            let _ = self.peer.send(datagram);
            return;
        }
        let peer = self.peer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = peer.send(datagram);
        });
    }
}

#[async_trait]
impl AsyncUdpSocket for SimulatedSocket {
    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> Result<usize> {
        self.sent.fetch_add(1, Ordering::Relaxed);

        if let Some(filter) = &self.filter {
            if let Ok(segment) = Segment::decode(buf) {
                if !filter(&segment) {
                    trace!(addr = %self.local_addr, seq = %segment.seq, "Segment dropped by filter");
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(buf.len());
                }
            }
        }

        let Some((delay, copies, flip)) = self.impair(buf.len()) else {
            trace!(addr = %self.local_addr, "Datagram lost on simulated link");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(buf.len());
        };

        let mut datagram = BytesMut::from(buf);
        if let Some(bit) = flip {
            trace!(addr = %self.local_addr, bit, "Datagram corrupted on simulated link");
            datagram[bit / 8] ^= 1 << (bit % 8);
        }
        let datagram = datagram.freeze();
        for _ in 0..copies {
            self.deliver((datagram.clone(), self.local_addr), delay);
        }
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some((data, addr)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, addr))
            }
            // Like a UDP socket, a vanished peer just means silence.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Right-aligned decimal counters, `"{i:>10} "` repeated, cut to `size` bytes.
/// Any corruption or reordering shows up as a broken count.
///
/// 右对齐的十进制计数器（重复 `"{i:>10} "`），截断为 `size` 字节。
pub fn sequential_numbers(size: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(size + 11);
    let mut i: u64 = 0;
    while buf.len() < size {
        buf.extend_from_slice(format!("{i:>10} ").as_bytes());
        i += 1;
    }
    buf.truncate(size);
    buf.freeze()
}

/// `size` pseudo-random bytes from a fixed seed.
///
/// 使用固定种子生成的 `size` 个伪随机字节。
pub fn random_bytes(size: usize, seed: u64) -> Bytes {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    Bytes::from(data)
}
