//! Capability interfaces consumed by the ingest core.
//!
//! The server treats the hosting platform as a set of narrow capabilities:
//! a credential store for HMAC keys, a stream registry for lifecycle and
//! metadata, a preview encoder for keyframe thumbnails, and a packet sink
//! for downstream relay. Implementations are shared across connections and
//! invoked from packet and reporter threads, so they must be thread-safe.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::Result;
use crate::rtp::RtpPacket;
use crate::types::{ChannelId, StreamId, StreamMetadata, VideoCodec};

/// Resolves channel IDs to their shared HMAC secrets.
pub trait CredentialProvider: Send + Sync {
    /// Get the private HMAC key for a channel. An error means the channel
    /// is unknown or the backing store is unavailable; either way the
    /// broadcaster cannot authenticate.
    fn hmac_key(&self, channel_id: ChannelId) -> Result<Vec<u8>>;
}

/// Records stream lifecycle and periodic metadata with the hosting service.
pub trait StreamRegistry: Send + Sync {
    /// A broadcaster authenticated and negotiated media; returns the ID of
    /// the new stream session.
    fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId>;

    /// Periodic statistics snapshot for a live stream.
    fn update_metadata(&self, stream_id: StreamId, metadata: &StreamMetadata) -> Result<()>;

    /// The stream ended (broadcaster disconnect, error, or shutdown).
    fn end_stream(&self, stream_id: StreamId) -> Result<()>;

    /// A JPEG preview image of the stream's latest keyframe.
    fn submit_preview(&self, stream_id: StreamId, jpeg: &[u8]) -> Result<()>;
}

/// Encodes a complete keyframe's RTP packets into a JPEG preview image.
pub trait PreviewEncoder: Send + Sync {
    fn encode(&self, codec: VideoCodec, packets: &[RtpPacket]) -> Result<Vec<u8>>;
}

/// Receives every accepted media packet, in receipt order per stream.
///
/// Invoked from media receiver threads with no locks held.
pub trait RtpPacketSink: Send + Sync {
    fn on_packet(&self, channel_id: ChannelId, stream_id: StreamId, packet: &RtpPacket);
}

/// Credential provider with one fixed key for every channel.
///
/// For development and tests only — any channel ID authenticates against
/// the same secret.
pub struct DummyCredentialProvider {
    key: Vec<u8>,
}

impl DummyCredentialProvider {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for DummyCredentialProvider {
    fn default() -> Self {
        Self::new(&b"aBcDeFgHiJkLmNoPqRsTuVwXyZ123456"[..])
    }
}

impl CredentialProvider for DummyCredentialProvider {
    fn hmac_key(&self, _channel_id: ChannelId) -> Result<Vec<u8>> {
        Ok(self.key.clone())
    }
}

/// Stream registry that assigns IDs from a counter and logs everything.
#[derive(Default)]
pub struct DummyStreamRegistry {
    next_stream_id: AtomicU32,
}

impl StreamRegistry for DummyStreamRegistry {
    fn start_stream(&self, channel_id: ChannelId) -> Result<StreamId> {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(channel_id, stream_id, "stream started");
        Ok(stream_id)
    }

    fn update_metadata(&self, stream_id: StreamId, metadata: &StreamMetadata) -> Result<()> {
        tracing::debug!(
            stream_id,
            bitrate_bps = metadata.source_bitrate_bps,
            received = metadata.packets_received,
            nacked = metadata.packets_nacked,
            lost = metadata.packets_lost,
            "stream metadata"
        );
        Ok(())
    }

    fn end_stream(&self, stream_id: StreamId) -> Result<()> {
        tracing::info!(stream_id, "stream ended");
        Ok(())
    }

    fn submit_preview(&self, stream_id: StreamId, jpeg: &[u8]) -> Result<()> {
        tracing::debug!(stream_id, bytes = jpeg.len(), "stream preview");
        Ok(())
    }
}

/// Packet sink that drops everything, for setups with no relay layer.
#[derive(Default)]
pub struct NullPacketSink;

impl RtpPacketSink for NullPacketSink {
    fn on_packet(&self, _channel_id: ChannelId, _stream_id: StreamId, _packet: &RtpPacket) {}
}
