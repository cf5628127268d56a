#![deny(clippy::expect_used, clippy::unwrap_used)]

//! A reliable, ordered byte stream over UDP with pluggable congestion control.
//! 基于UDP、拥塞控制算法可插拔的可靠有序字节流。

pub mod config;
pub mod error;
pub mod packet;
pub mod socket;
pub mod stats;
pub mod testing;

pub mod congestion;
pub mod core;

pub use config::{CongestionAlgorithm, Config};
pub use core::stream::Stream;
pub use error::{Error, FailureReason, Result};
pub use socket::ReliableUdpSocket;
pub use stats::{ConnectionStats, TransferReport};
