//! The packet module, containing the segment wire format and sequence arithmetic.
//! packet 模块，包含分段的线路格式和序列号运算。

pub mod segment;
pub mod seq;

pub use segment::{CodecError, Flags, HEADER_SIZE, MAX_PAYLOAD_SIZE, Segment};
pub use seq::SeqNum;
