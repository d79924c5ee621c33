//! RTP wire types and receive-side sequence bookkeeping.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Header layout, SSRC routing, Appendix A.1 sequence validation |
//! | [RFC 4585](https://tools.ietf.org/html/rfc4585) | RTCP feedback | Generic NACK message format (§6.2.1) |
//!
//! ## Receive pipeline
//!
//! Each accepted media datagram flows through three stages:
//!
//! 1. [`packet`] — header field extraction and payload offset computation.
//! 2. [`sequence::ExtendedSequenceCounter`] — extends the 16-bit sequence
//!    number to a monotonic 64-bit value across wraps and classifies the
//!    source per RFC 3550 A.1.
//! 3. [`tracker::SequenceTracker`] — buffers recent arrivals, detects gaps
//!    once the reorder window drains, and schedules NACK retransmission
//!    requests.

pub mod packet;
pub mod rtcp;
pub mod sequence;
pub mod tracker;

pub use packet::RtpPacket;
pub use sequence::{ExtendResult, ExtendedSequenceCounter};
pub use tracker::SequenceTracker;

/// 16-bit RTP sequence number as carried on the wire.
pub type SequenceNumber = u16;

/// 64-bit extended sequence number (wrap cycles folded in).
pub type ExtendedSequenceNumber = u64;

/// 32-bit RTP synchronization source identifier.
pub type Ssrc = u32;

/// 32-bit RTP media timestamp.
pub type RtpTimestamp = u32;

/// 7-bit RTP payload type.
pub type PayloadType = u8;
