//! # ftl — FTL ingest server library for low-latency live streaming
//!
//! A Rust library implementing the ingest side of the FTL
//! ("Faster-Than-Light") protocol: broadcasters authenticate over a short
//! TCP handshake, then stream RTP-framed Opus audio and H.264 video over
//! UDP. The server validates and tracks the packet stream, requests
//! retransmission of lost packets via RTCP NACK, reconstructs keyframes
//! for preview generation, and hands every accepted packet to a
//! downstream consumer.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Header parsing, SSRC routing, Appendix A.1 sequence validation |
//! | [RFC 4585](https://tools.ietf.org/html/rfc4585) | RTCP feedback | Generic NACK retransmission requests (§6.2.1) |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL unit / FU-A inspection for keyframe capture |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Host platform (relay, registry, previews)    │
//! ├──────────────────────────────────────────────┤
//! │  IngestServer  — listener, lifecycle, wiring │
//! │  Services      — capability traits           │
//! ├──────────────────────────────────────────────┤
//! │  Control       — TCP handshake state machine │
//! │  Media         — UDP receiver per channel    │
//! ├──────────────────────────────────────────────┤
//! │  Rtp           — wire types, seq tracking    │
//! │  Keyframe      — H.264 frame assembly        │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ftl::{IngestServer, DummyCredentialProvider, DummyStreamRegistry, NullPacketSink};
//!
//! let mut server = IngestServer::new(
//!     "0.0.0.0:8084",
//!     Arc::new(DummyCredentialProvider::default()),
//!     Arc::new(DummyStreamRegistry::default()),
//!     None,
//!     Arc::new(NullPacketSink),
//! );
//! server.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`IngestServer`] orchestrator and [`ServerConfig`].
//! - [`control`] — Ingest control connection state machine.
//! - [`media`] — Per-channel UDP media receiver and statistics.
//! - [`protocol`] — Control command parsing and response codes.
//! - [`rtp`] — RTP/RTCP wire types, extended sequence counter, NACK tracker.
//! - [`keyframe`] — H.264 keyframe assembly for previews.
//! - [`services`] — Capability traits for the hosting platform.
//! - [`ports`] — Media UDP port allocation.
//! - [`error`] — [`FtlError`] enum and [`Result`] alias.

pub mod control;
pub mod error;
pub mod keyframe;
pub mod media;
pub mod ports;
pub mod protocol;
pub mod rtp;
pub mod server;
pub mod services;
pub mod types;

mod reporter;

pub use error::{FtlError, Result};
pub use keyframe::Frame;
pub use protocol::ResponseCode;
pub use rtp::RtpPacket;
pub use server::{IngestServer, ServerConfig};
pub use services::{
    CredentialProvider, DummyCredentialProvider, DummyStreamRegistry, NullPacketSink,
    PreviewEncoder, RtpPacketSink, StreamRegistry,
};
pub use types::{
    AudioCodec, ChannelId, MediaMetadata, StreamId, StreamMetadata, StreamStats, VideoCodec,
};
