//! Periodic per-stream metadata reporting and preview generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::media::MediaConnection;
use crate::rtp::RtpTimestamp;
use crate::services::{PreviewEncoder, StreamRegistry};
use crate::types::StreamMetadata;

/// How often the reporter checks its stop conditions between ticks.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawn the reporting thread for one live media connection.
///
/// Every `interval`, the reporter snapshots the connection's statistics
/// and pushes a [`StreamMetadata`] update to the registry. When preview
/// generation is enabled and a new complete keyframe has appeared since
/// the last report, it is encoded to JPEG and submitted as well. Failures
/// in either path are logged and the cycle resumes; a broken registry
/// never takes the stream down.
///
/// The thread exits when the media connection stops or the server shuts
/// down.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn(
    media: Arc<MediaConnection>,
    registry: Arc<dyn StreamRegistry>,
    encoder: Option<Arc<dyn PreviewEncoder>>,
    hostname: String,
    interval: Duration,
    generate_previews: bool,
    running: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut last_keyframe: Option<RtpTimestamp> = None;
        let mut next_tick = Instant::now() + interval;

        while running.load(Ordering::SeqCst) && !media.is_stopped() {
            let now = Instant::now();
            if now < next_tick {
                thread::sleep(POLL_INTERVAL.min(next_tick - now));
                continue;
            }
            next_tick += interval;

            report(&media, registry.as_ref(), &hostname);

            if generate_previews
                && let Some(encoder) = &encoder
            {
                last_keyframe =
                    submit_preview(&media, registry.as_ref(), encoder.as_ref(), last_keyframe);
            }
        }

        tracing::debug!(
            channel_id = media.channel_id(),
            stream_id = media.stream_id(),
            "metadata reporter exiting"
        );
    });
}

fn report(media: &MediaConnection, registry: &dyn StreamRegistry, hostname: &str) {
    let snapshot = snapshot_metadata(media, hostname);
    if let Err(e) = registry.update_metadata(media.stream_id(), &snapshot) {
        tracing::error!(
            stream_id = media.stream_id(),
            error = %e,
            "failed to update stream metadata"
        );
    }
}

/// Build the registry-facing snapshot from connection stats and handshake
/// metadata.
pub(crate) fn snapshot_metadata(media: &MediaConnection, hostname: &str) -> StreamMetadata {
    let stats = media.stats();
    let metadata = media.metadata();
    StreamMetadata {
        ingest_hostname: hostname.to_string(),
        stream_time_seconds: stats.duration.as_secs() as u32,
        viewers: 0,
        source_bitrate_bps: stats.rolling_average_bitrate_bps,
        packets_received: stats.packets_received,
        packets_nacked: stats.packets_nacked,
        packets_lost: stats.packets_lost,
        ping_ms: 0,
        vendor_name: metadata.vendor_name.clone(),
        vendor_version: metadata.vendor_version.clone(),
        video_codec: metadata.video_codec.name().to_string(),
        audio_codec: metadata.audio_codec.name().to_string(),
        video_width: metadata.video_width,
        video_height: metadata.video_height,
    }
}

/// Encode and submit the current keyframe if it is newer than the last
/// one reported. Returns the timestamp of the last successfully submitted
/// keyframe.
fn submit_preview(
    media: &MediaConnection,
    registry: &dyn StreamRegistry,
    encoder: &dyn PreviewEncoder,
    last_keyframe: Option<RtpTimestamp>,
) -> Option<RtpTimestamp> {
    let Some(frame) = media.keyframe() else {
        return last_keyframe;
    };
    if last_keyframe == Some(frame.timestamp()) {
        return last_keyframe;
    }

    let jpeg = match encoder.encode(media.metadata().video_codec, frame.packets()) {
        Ok(jpeg) => jpeg,
        Err(e) => {
            tracing::error!(
                stream_id = media.stream_id(),
                error = %e,
                "preview encoding failed"
            );
            return last_keyframe;
        }
    };

    if let Err(e) = registry.submit_preview(media.stream_id(), &jpeg) {
        tracing::error!(
            stream_id = media.stream_id(),
            error = %e,
            "preview submission failed"
        );
        return last_keyframe;
    }

    Some(frame.timestamp())
}
