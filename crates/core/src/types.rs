//! Core FTL data model: identifiers, codecs, and handshake metadata.

use std::time::{Duration, SystemTime};

/// Broadcaster identity, provided by the client in `CONNECT`.
pub type ChannelId = u32;

/// Per-session stream identity, assigned by the
/// [`StreamRegistry`](crate::services::StreamRegistry) when a stream starts.
pub type StreamId = u32;

/// Video codec negotiated during the ingest handshake.
///
/// FTL only carries H.264 video; anything else is accepted on the wire as
/// `Unsupported` and rejected when the client tries to start streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoCodec {
    #[default]
    Unsupported,
    H264,
}

impl VideoCodec {
    /// Parse a `VideoCodec` attribute value (case-insensitive).
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("h264") {
            Self::H264
        } else {
            Self::Unsupported
        }
    }

    /// Codec name as reported in stream metadata (empty for unsupported).
    pub fn name(self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::Unsupported => "",
        }
    }
}

/// Audio codec negotiated during the ingest handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioCodec {
    #[default]
    Unsupported,
    Opus,
}

impl AudioCodec {
    /// Parse an `AudioCodec` attribute value (case-insensitive).
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("opus") {
            Self::Opus
        } else {
            Self::Unsupported
        }
    }

    /// Codec name as reported in stream metadata (empty for unsupported).
    pub fn name(self) -> &'static str {
        match self {
            Self::Opus => "opus",
            Self::Unsupported => "",
        }
    }
}

/// Stream parameters negotiated over the control connection.
///
/// Built up one attribute command at a time after authentication, then
/// frozen once the `.` command starts the media connection. SSRCs and
/// payload types must be non-zero for each media kind that is present.
#[derive(Debug, Clone, Default)]
pub struct MediaMetadata {
    pub vendor_name: String,
    pub vendor_version: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub video_width: u16,
    pub video_height: u16,
    pub video_ssrc: u32,
    pub audio_ssrc: u32,
    pub video_payload_type: u8,
    pub audio_payload_type: u8,
}

impl MediaMetadata {
    /// Apply one `Key: Value` attribute from the control handshake.
    ///
    /// Invalid integer values are logged and leave the field at its
    /// previous value; unknown keys are logged and ignored.
    pub fn apply_attribute(&mut self, key: &str, value: &str) {
        match key {
            "VendorName" => self.vendor_name = value.to_string(),
            "VendorVersion" => self.vendor_version = value.to_string(),
            "Video" => self.has_video = value == "true",
            "Audio" => self.has_audio = value == "true",
            "VideoCodec" => self.video_codec = VideoCodec::parse(value),
            "AudioCodec" => self.audio_codec = AudioCodec::parse(value),
            "VideoWidth" => match value.parse() {
                Ok(width) => self.video_width = width,
                Err(_) => tracing::warn!(value, "client provided invalid video width"),
            },
            "VideoHeight" => match value.parse() {
                Ok(height) => self.video_height = height,
                Err(_) => tracing::warn!(value, "client provided invalid video height"),
            },
            "VideoIngestSSRC" => match value.parse() {
                Ok(ssrc) => self.video_ssrc = ssrc,
                Err(_) => tracing::warn!(value, "client provided invalid video ssrc"),
            },
            "AudioIngestSSRC" => match value.parse() {
                Ok(ssrc) => self.audio_ssrc = ssrc,
                Err(_) => tracing::warn!(value, "client provided invalid audio ssrc"),
            },
            "VideoPayloadType" => match value.parse::<u8>() {
                Ok(pt) if pt <= 127 => self.video_payload_type = pt,
                _ => tracing::warn!(value, "client provided invalid video payload type"),
            },
            "AudioPayloadType" => match value.parse::<u8>() {
                Ok(pt) if pt <= 127 => self.audio_payload_type = pt,
                _ => tracing::warn!(value, "client provided invalid audio payload type"),
            },
            _ => tracing::warn!(key, value, "unrecognized attribute from client"),
        }
    }

    /// Whether the metadata is sufficient to start a media connection.
    ///
    /// At least one of audio/video must be present, and each present side
    /// needs a non-zero payload type, a non-zero SSRC, and a supported codec.
    pub fn is_complete(&self) -> bool {
        if !self.has_audio && !self.has_video {
            return false;
        }
        if self.has_audio
            && (self.audio_payload_type == 0
                || self.audio_ssrc == 0
                || self.audio_codec == AudioCodec::Unsupported)
        {
            return false;
        }
        if self.has_video
            && (self.video_payload_type == 0
                || self.video_ssrc == 0
                || self.video_codec == VideoCodec::Unsupported)
        {
            return false;
        }
        true
    }
}

/// Rolling statistics snapshot for one media connection.
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Wall-clock instant the media connection came up.
    pub start_time: SystemTime,
    /// Monotonic time since the media connection came up.
    pub duration: Duration,
    /// Average inbound bitrate over the configured rolling window.
    pub rolling_average_bitrate_bps: u32,
    pub packets_received: u64,
    pub packets_nacked: u64,
    pub packets_lost: u64,
}

/// Periodic metadata snapshot delivered to the
/// [`StreamRegistry`](crate::services::StreamRegistry).
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub ingest_hostname: String,
    pub stream_time_seconds: u32,
    pub viewers: u32,
    pub source_bitrate_bps: u32,
    pub packets_received: u64,
    pub packets_nacked: u64,
    pub packets_lost: u64,
    pub ping_ms: u16,
    pub vendor_name: String,
    pub vendor_version: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_width: u16,
    pub video_height: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_metadata() -> MediaMetadata {
        let mut metadata = MediaMetadata::default();
        metadata.apply_attribute("Video", "true");
        metadata.apply_attribute("VideoCodec", "H264");
        metadata.apply_attribute("VideoIngestSSRC", "123456790");
        metadata.apply_attribute("VideoPayloadType", "96");
        metadata.apply_attribute("Audio", "true");
        metadata.apply_attribute("AudioCodec", "opus");
        metadata.apply_attribute("AudioIngestSSRC", "123456789");
        metadata.apply_attribute("AudioPayloadType", "97");
        metadata
    }

    #[test]
    fn codec_parse_case_insensitive() {
        assert_eq!(VideoCodec::parse("h264"), VideoCodec::H264);
        assert_eq!(VideoCodec::parse("H264"), VideoCodec::H264);
        assert_eq!(VideoCodec::parse("vp8"), VideoCodec::Unsupported);
        assert_eq!(AudioCodec::parse("OPUS"), AudioCodec::Opus);
        assert_eq!(AudioCodec::parse("aac"), AudioCodec::Unsupported);
    }

    #[test]
    fn full_attribute_set_is_complete() {
        assert!(valid_metadata().is_complete());
    }

    #[test]
    fn no_media_is_incomplete() {
        assert!(!MediaMetadata::default().is_complete());
    }

    #[test]
    fn audio_without_ssrc_is_incomplete() {
        let mut metadata = valid_metadata();
        metadata.audio_ssrc = 0;
        assert!(!metadata.is_complete());
    }

    #[test]
    fn video_with_unsupported_codec_is_incomplete() {
        let mut metadata = valid_metadata();
        metadata.video_codec = VideoCodec::Unsupported;
        assert!(!metadata.is_complete());
    }

    #[test]
    fn invalid_integer_keeps_previous_value() {
        let mut metadata = valid_metadata();
        metadata.apply_attribute("VideoWidth", "1920");
        metadata.apply_attribute("VideoWidth", "not-a-number");
        assert_eq!(metadata.video_width, 1920);

        metadata.apply_attribute("VideoPayloadType", "300");
        assert_eq!(metadata.video_payload_type, 96);
    }

    #[test]
    fn unknown_attribute_is_ignored() {
        let mut metadata = valid_metadata();
        metadata.apply_attribute("SomethingElse", "whatever");
        assert!(metadata.is_complete());
    }

    #[test]
    fn audio_flag_only_true_on_exact_match() {
        let mut metadata = MediaMetadata::default();
        metadata.apply_attribute("Audio", "True");
        assert!(!metadata.has_audio);
        metadata.apply_attribute("Audio", "true");
        assert!(metadata.has_audio);
    }
}
