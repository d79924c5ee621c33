//! Media connection: per-channel UDP RTP/RTCP reception.
//!
//! One UDP socket is bound per streaming channel. A dedicated receiver
//! thread polls it with a short timeout so stop requests take effect
//! within ~200 ms. Each datagram is routed by SSRC: packets matching the
//! negotiated audio/video SSRCs flow through sequence tracking, loss
//! detection (NACK), rolling statistics, and keyframe capture before being
//! handed to the packet sink; anything else is interpreted through the FTL
//! sentinel payload types (sender report, ping).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::RwLock;

use crate::keyframe::{Frame, KeyframeAssembler};
use crate::rtp::tracker::SequenceTracker;
use crate::rtp::{RtpPacket, Ssrc, packet, rtcp};
use crate::services::RtpPacketSink;
use crate::types::{ChannelId, MediaMetadata, StreamId, StreamStats, VideoCodec};

/// FTL sentinel payload type for an RTCP-style sender report.
const FTL_PAYLOAD_TYPE_SENDER_REPORT: u8 = 200;
/// FTL sentinel payload type for a round-trip probe; echoed verbatim.
const FTL_PAYLOAD_TYPE_PING: u8 = 250;

/// Socket read timeout; doubles as the stop-flag poll interval.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// Tuning knobs for a media connection.
#[derive(Debug, Clone)]
pub struct MediaConnectionOptions {
    /// Window for the rolling bitrate average.
    pub rolling_window: Duration,
    /// Whether lost packets are NACKed back to the broadcaster.
    pub nack_enabled: bool,
}

impl Default for MediaConnectionOptions {
    fn default() -> Self {
        Self {
            rolling_window: Duration::from_millis(2000),
            nack_enabled: true,
        }
    }
}

/// Per-SSRC receive state.
struct SsrcData {
    packets_received: u64,
    /// Bytes received by arrival instant; entries older than the rolling
    /// window are trimmed on every update.
    rolling_bytes: std::collections::BTreeMap<Instant, usize>,
    keyframes: KeyframeAssembler,
    tracker: SequenceTracker,
}

impl SsrcData {
    fn new() -> Self {
        Self {
            packets_received: 0,
            rolling_bytes: std::collections::BTreeMap::new(),
            keyframes: KeyframeAssembler::new(),
            tracker: SequenceTracker::new(),
        }
    }
}

struct MediaData {
    /// Current peer the broadcaster sends from. The IP is pinned to the
    /// control connection's address; the port follows NAT rebinds.
    peer: Option<SocketAddr>,
    ssrc_data: HashMap<Ssrc, SsrcData>,
}

/// Receives the RTP media stream for one channel.
///
/// Owned by the [`IngestServer`](crate::IngestServer); holds only an
/// opaque closed-notification closure rather than any reference back to
/// its owner.
pub struct MediaConnection {
    socket: UdpSocket,
    port: u16,
    metadata: MediaMetadata,
    channel_id: ChannelId,
    stream_id: StreamId,
    expected_ip: IpAddr,
    options: MediaConnectionOptions,
    sink: Arc<dyn RtpPacketSink>,
    stop: AtomicBool,
    start_time: SystemTime,
    started_at: Instant,
    data: RwLock<MediaData>,
}

impl MediaConnection {
    /// Wrap an already-bound socket. The receiver thread starts separately
    /// via [`start`](Self::start) so the owner can register the connection
    /// before any packet (or error) can race the registration.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        socket: UdpSocket,
        port: u16,
        metadata: MediaMetadata,
        channel_id: ChannelId,
        stream_id: StreamId,
        expected_ip: IpAddr,
        options: MediaConnectionOptions,
        sink: Arc<dyn RtpPacketSink>,
    ) -> std::io::Result<Arc<Self>> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut ssrc_data = HashMap::new();
        if metadata.has_audio {
            ssrc_data.insert(metadata.audio_ssrc, SsrcData::new());
        }
        if metadata.has_video {
            ssrc_data.insert(metadata.video_ssrc, SsrcData::new());
        }

        Ok(Arc::new(Self {
            socket,
            port,
            metadata,
            channel_id,
            stream_id,
            expected_ip,
            options,
            sink,
            stop: AtomicBool::new(false),
            start_time: SystemTime::now(),
            started_at: Instant::now(),
            data: RwLock::new(MediaData {
                peer: None,
                ssrc_data,
            }),
        }))
    }

    /// Spawn the receiver thread. `on_closed` fires exactly once, after
    /// the read loop exits for any reason (stop request or socket error).
    pub(crate) fn start(
        self: &Arc<Self>,
        on_closed: impl FnOnce(&MediaConnection) + Send + 'static,
    ) {
        let conn = Arc::clone(self);
        thread::spawn(move || {
            conn.run();
            on_closed(&conn);
        });
        tracing::info!(
            channel_id = self.channel_id,
            stream_id = self.stream_id,
            port = self.port,
            "media stream receiving"
        );
    }

    /// Request the receiver thread to stop. Idempotent, non-blocking, and
    /// safe to call from any thread including the receiver itself; the
    /// loop observes the flag on its next poll wake-up (≤200 ms).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn metadata(&self) -> &MediaMetadata {
        &self.metadata
    }

    /// The address the broadcaster currently sends media from, once the
    /// first packet has arrived.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.data.read().peer
    }

    /// Rolling statistics snapshot across all SSRCs.
    pub fn stats(&self) -> StreamStats {
        let data = self.data.read();
        let mut packets_received = 0;
        let mut packets_nacked = 0;
        let mut packets_lost = 0;
        let mut rolling_bytes = 0usize;
        for ssrc_data in data.ssrc_data.values() {
            packets_received += ssrc_data.tracker.received_count();
            packets_nacked += ssrc_data.tracker.nack_count();
            packets_lost += ssrc_data.tracker.lost_count();
            rolling_bytes += ssrc_data.rolling_bytes.values().sum::<usize>();
        }

        StreamStats {
            start_time: self.start_time,
            duration: self.started_at.elapsed(),
            rolling_average_bitrate_bps: ((rolling_bytes * 8) as f64
                / self.options.rolling_window.as_secs_f64()) as u32,
            packets_received,
            packets_nacked,
            packets_lost,
        }
    }

    /// The latest complete video keyframe, if the stream has video and one
    /// has been captured.
    pub fn keyframe(&self) -> Option<Frame> {
        if !self.metadata.has_video {
            return None;
        }
        let data = self.data.read();
        data.ssrc_data
            .get(&self.metadata.video_ssrc)
            .and_then(|ssrc_data| ssrc_data.keyframes.keyframe())
    }

    fn run(&self) {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        while !self.is_stopped() {
            match self.socket.recv_from(&mut buffer) {
                Ok((len, src)) => self.handle_datagram(&buffer[..len], src),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        channel_id = self.channel_id,
                        stream_id = self.stream_id,
                        error = %e,
                        "failed to read from media socket"
                    );
                    break;
                }
            }
        }

        tracing::debug!(
            channel_id = self.channel_id,
            stream_id = self.stream_id,
            "stopping media connection thread"
        );
    }

    fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        if bytes.len() < packet::RTP_HEADER_LEN {
            tracing::warn!(
                channel_id = self.channel_id,
                stream_id = self.stream_id,
                size = bytes.len(),
                "received non-RTP packet (< 12 bytes), discarding"
            );
            return;
        }

        if src.ip() != self.expected_ip {
            tracing::warn!(
                channel_id = self.channel_id,
                %src,
                expected = %self.expected_ip,
                "discarding packet from unexpected peer"
            );
            return;
        }
        // Track the sender's current port so NACKs and echoes follow NAT
        // rebinds.
        self.data.write().peer = Some(src);

        let ssrc = packet::ssrc(bytes);
        if (self.metadata.has_audio && ssrc == self.metadata.audio_ssrc)
            || (self.metadata.has_video && ssrc == self.metadata.video_ssrc)
        {
            self.handle_media_packet(bytes, src);
            return;
        }

        // FTL folds the marker bit into the payload type for non-media
        // packets, so sentinel values above 127 need reconstructing.
        match packet::sentinel_payload_type(bytes) {
            FTL_PAYLOAD_TYPE_PING => self.handle_ping(bytes, src),
            FTL_PAYLOAD_TYPE_SENDER_REPORT => self.handle_sender_report(bytes),
            other => {
                tracing::warn!(
                    channel_id = self.channel_id,
                    payload_type = other,
                    original = packet::payload_type(bytes),
                    "unknown RTP payload type"
                );
            }
        }
    }

    fn handle_media_packet(&self, bytes: &[u8], src: SocketAddr) {
        let ssrc = packet::ssrc(bytes);
        let seq = packet::sequence_number(bytes);
        let is_video = self.metadata.has_video && ssrc == self.metadata.video_ssrc;

        let rtp_packet = {
            let mut data = self.data.write();

            // FTL clients often send a burst of audio packets first as a
            // speed test. Ignore audio until the first video packet shows
            // up.
            if !is_video && self.metadata.has_video {
                let video_started = data
                    .ssrc_data
                    .get(&self.metadata.video_ssrc)
                    .is_some_and(|video| video.packets_received > 0);
                if !video_started {
                    return;
                }
            }

            let Some(ssrc_data) = data.ssrc_data.get_mut(&ssrc) else {
                return;
            };

            let extended_seq = ssrc_data.tracker.track(seq);

            if self.options.nack_enabled {
                for missing in ssrc_data.tracker.get_missing() {
                    self.send_nack(ssrc, missing, src);
                    ssrc_data.tracker.nack_sent(missing);
                }
            }

            let rtp_packet = RtpPacket::new(bytes.to_vec(), extended_seq);

            ssrc_data.packets_received += 1;
            self.update_rolling_bytes(ssrc_data, bytes.len());

            if is_video && self.metadata.video_codec == VideoCodec::H264 {
                ssrc_data.keyframes.handle_packet(&rtp_packet);
            }

            rtp_packet
        };

        // Sink callbacks run without the data lock held.
        self.sink
            .on_packet(self.channel_id, self.stream_id, &rtp_packet);
    }

    fn update_rolling_bytes(&self, ssrc_data: &mut SsrcData, len: usize) {
        let now = Instant::now();
        *ssrc_data.rolling_bytes.entry(now).or_insert(0) += len;

        while let Some((&at, _)) = ssrc_data.rolling_bytes.first_key_value() {
            if now.duration_since(at) > self.options.rolling_window {
                ssrc_data.rolling_bytes.remove(&at);
            } else {
                // Map is sorted by arrival, so the rest is fresh.
                break;
            }
        }
    }

    fn send_nack(&self, ssrc: Ssrc, extended_seq: u64, peer: SocketAddr) {
        // One lost packet per NACK; the following-lost bitmask stays zero.
        let nack = rtcp::write_nack(ssrc, extended_seq as u16, 0);
        if let Err(e) = self.socket.send_to(&nack, peer) {
            tracing::warn!(ssrc, extended_seq, error = %e, "failed to send NACK");
        } else {
            tracing::trace!(ssrc, seq = extended_seq as u16, "NACK sent");
        }
    }

    /// The broadcaster is measuring round-trip time; pong the datagram
    /// back unchanged.
    fn handle_ping(&self, bytes: &[u8], src: SocketAddr) {
        if let Err(e) = self.socket.send_to(bytes, src) {
            tracing::warn!(channel_id = self.channel_id, error = %e, "failed to echo ping");
        }
    }

    fn handle_sender_report(&self, bytes: &[u8]) {
        if bytes.len() != rtcp::SENDER_REPORT_LEN {
            tracing::warn!(
                channel_id = self.channel_id,
                size = bytes.len(),
                expected = rtcp::SENDER_REPORT_LEN,
                "invalid sender report length"
            );
        }
        // Nothing is derived from sender reports yet.
    }
}
