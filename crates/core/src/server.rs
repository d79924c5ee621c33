//! High-level FTL ingest server orchestrator.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::control::{ControlConnection, ControlHandler};
use crate::error::{FtlError, Result};
use crate::keyframe::Frame;
use crate::media::{MediaConnection, MediaConnectionOptions};
use crate::ports::PortAllocator;
use crate::protocol::ResponseCode;
use crate::reporter;
use crate::services::{CredentialProvider, PreviewEncoder, RtpPacketSink, StreamRegistry};
use crate::types::{ChannelId, MediaMetadata, StreamId, StreamMetadata, StreamStats};

/// Server-level configuration consumed by the ingest core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hostname reported in stream metadata snapshots.
    pub hostname: String,
    /// Pool of UDP ports handed out to media connections, `[min, max)`.
    pub media_port_range: Range<u16>,
    /// Period of metadata snapshots pushed to the stream registry.
    pub metadata_report_interval: Duration,
    /// Window for the rolling bitrate average.
    pub rolling_window: Duration,
    /// Whether lost packets are NACKed back to broadcasters.
    pub nack_enabled: bool,
    /// Whether keyframes are encoded into JPEG previews.
    pub generate_previews: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            media_port_range: 9000..65535,
            metadata_report_interval: Duration::from_secs(4),
            rolling_window: Duration::from_millis(2000),
            nack_enabled: true,
            generate_previews: true,
        }
    }
}

/// High-level FTL ingest server.
///
/// Owns the TCP control listener, the per-broadcaster control connections,
/// and the live media connections. Collaborators are injected as narrow
/// capabilities: a [`CredentialProvider`] answers HMAC key lookups during
/// authentication, a [`StreamRegistry`] records stream lifecycle and
/// metadata, an optional [`PreviewEncoder`] turns keyframes into JPEG
/// previews, and every accepted media packet is handed to the
/// [`RtpPacketSink`].
pub struct IngestServer {
    inner: Arc<ServerInner>,
    running: Arc<AtomicBool>,
    bind_addr: String,
}

impl IngestServer {
    pub fn new(
        bind_addr: &str,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn StreamRegistry>,
        previews: Option<Arc<dyn PreviewEncoder>>,
        sink: Arc<dyn RtpPacketSink>,
    ) -> Self {
        Self::with_config(
            bind_addr,
            ServerConfig::default(),
            credentials,
            registry,
            previews,
            sink,
        )
    }

    /// Create a server with custom configuration.
    pub fn with_config(
        bind_addr: &str,
        config: ServerConfig,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn StreamRegistry>,
        previews: Option<Arc<dyn PreviewEncoder>>,
        sink: Arc<dyn RtpPacketSink>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let ports = PortAllocator::new(config.media_port_range.clone());
        let inner = Arc::new_cyclic(|me: &Weak<ServerInner>| ServerInner {
            me: me.clone(),
            config,
            credentials,
            registry,
            previews,
            sink,
            ports,
            streams: Mutex::new(HashMap::new()),
            controls: Mutex::new(HashMap::new()),
            next_control_id: AtomicU64::new(0),
            running: running.clone(),
        });
        Self {
            inner,
            running,
            bind_addr: bind_addr.to_string(),
        }
    }

    /// Start listening for ingest control connections on a new thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(FtlError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let inner = self.inner.clone();
        let running = self.running.clone();

        tracing::info!(addr = %self.bind_addr, "FTL ingest server listening");

        thread::spawn(move || {
            accept_loop(listener, inner, running);
        });

        Ok(())
    }

    /// Stop the listener and tear down every live connection.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        for control_stop in self.inner.controls.lock().values() {
            control_stop.store(true, Ordering::SeqCst);
        }

        let media: Vec<Arc<MediaConnection>> = self
            .inner
            .streams
            .lock()
            .values()
            .map(|active| active.media.clone())
            .collect();
        for connection in media {
            connection.stop();
        }

        tracing::info!("ingest server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Channels currently streaming.
    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.inner.streams.lock().keys().copied().collect()
    }

    /// Statistics snapshot for a live channel.
    pub fn stream_stats(&self, channel_id: ChannelId) -> Option<StreamStats> {
        let streams = self.inner.streams.lock();
        streams.get(&channel_id).map(|active| active.media.stats())
    }

    /// Latest complete keyframe for a live channel's video stream.
    pub fn keyframe(&self, channel_id: ChannelId) -> Option<Frame> {
        let media = {
            let streams = self.inner.streams.lock();
            streams.get(&channel_id).map(|active| active.media.clone())
        };
        media.and_then(|media| media.keyframe())
    }

    /// On-demand metadata snapshot for a live channel, as the reporter
    /// would build it.
    pub fn stream_metadata(&self, channel_id: ChannelId) -> Option<StreamMetadata> {
        let media = {
            let streams = self.inner.streams.lock();
            streams.get(&channel_id).map(|active| active.media.clone())
        };
        media.map(|media| reporter::snapshot_metadata(&media, &self.inner.config.hostname))
    }
}

/// One streaming broadcaster: the media connection plus the stop flag of
/// its paired control connection.
struct ActiveStream {
    media: Arc<MediaConnection>,
    control_stop: Arc<AtomicBool>,
}

struct ServerInner {
    me: Weak<ServerInner>,
    config: ServerConfig,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<dyn StreamRegistry>,
    previews: Option<Arc<dyn PreviewEncoder>>,
    sink: Arc<dyn RtpPacketSink>,
    ports: PortAllocator,
    streams: Mutex<HashMap<ChannelId, ActiveStream>>,
    /// Stop flags of every open control connection, keyed by connection id.
    controls: Mutex<HashMap<u64, Arc<AtomicBool>>>,
    next_control_id: AtomicU64,
    running: Arc<AtomicBool>,
}

impl ServerInner {
    /// Bind a socket from the media port pool, skipping ports that turn
    /// out to be taken at the OS level.
    fn bind_media_socket(&self) -> std::result::Result<(UdpSocket, u16), ResponseCode> {
        loop {
            let Some(port) = self.ports.allocate() else {
                tracing::error!("no media ports available");
                return Err(ResponseCode::InternalServerError);
            };
            match UdpSocket::bind(("0.0.0.0", port)) {
                Ok(socket) => return Ok((socket, port)),
                Err(e) => {
                    // Leave the port marked in use so we do not retry it.
                    tracing::warn!(port, error = %e, "media port bind failed, trying next");
                }
            }
        }
    }

    /// Cleanup path shared by media-thread exit and early spawn failure:
    /// forget the channel, recycle the port, and let the registry know.
    fn media_closed(&self, channel_id: ChannelId, stream_id: StreamId, port: u16) {
        let removed = self.streams.lock().remove(&channel_id);

        self.ports.release(port);

        if let Err(e) = self.registry.end_stream(stream_id) {
            tracing::error!(stream_id, error = %e, "failed to end stream");
        }

        if let Some(active) = removed {
            // One last preview so the service keeps a thumbnail of how the
            // stream ended.
            if self.config.generate_previews
                && let Some(encoder) = &self.previews
                && let Some(frame) = active.media.keyframe()
            {
                match encoder.encode(active.media.metadata().video_codec, frame.packets()) {
                    Ok(jpeg) => {
                        if let Err(e) = self.registry.submit_preview(stream_id, &jpeg) {
                            tracing::error!(stream_id, error = %e, "final preview submission failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(stream_id, error = %e, "final preview encoding failed");
                    }
                }
            }

            active.control_stop.store(true, Ordering::SeqCst);
        }

        tracing::info!(channel_id, stream_id, "media connection closed");
    }
}

impl ControlHandler for ServerInner {
    fn hmac_key(&self, channel_id: ChannelId) -> Result<Vec<u8>> {
        self.credentials.hmac_key(channel_id)
    }

    fn media_port_request(
        &self,
        channel_id: ChannelId,
        metadata: &MediaMetadata,
        peer_addr: SocketAddr,
        control_stop: Arc<AtomicBool>,
    ) -> std::result::Result<u16, ResponseCode> {
        if self.streams.lock().contains_key(&channel_id) {
            tracing::warn!(channel_id, "channel already has a media connection");
            return Err(ResponseCode::ChannelInUse);
        }

        let (socket, port) = self.bind_media_socket()?;

        let stream_id = match self.registry.start_stream(channel_id) {
            Ok(stream_id) => stream_id,
            Err(e) => {
                tracing::error!(channel_id, error = %e, "stream registry rejected stream start");
                self.ports.release(port);
                return Err(ResponseCode::InternalServerError);
            }
        };

        let options = MediaConnectionOptions {
            rolling_window: self.config.rolling_window,
            nack_enabled: self.config.nack_enabled,
        };
        let media = match MediaConnection::new(
            socket,
            port,
            metadata.clone(),
            channel_id,
            stream_id,
            peer_addr.ip(),
            options,
            self.sink.clone(),
        ) {
            Ok(media) => media,
            Err(e) => {
                tracing::error!(channel_id, error = %e, "failed to set up media connection");
                self.ports.release(port);
                if let Err(e) = self.registry.end_stream(stream_id) {
                    tracing::error!(stream_id, error = %e, "failed to end stream");
                }
                return Err(ResponseCode::InternalServerError);
            }
        };

        // Register before the receiver thread starts so a racing shutdown
        // or instant socket error cannot observe an untracked stream.
        self.streams.lock().insert(
            channel_id,
            ActiveStream {
                media: media.clone(),
                control_stop,
            },
        );

        let me = self.me.clone();
        media.start(move |conn| {
            if let Some(inner) = me.upgrade() {
                inner.media_closed(conn.channel_id(), conn.stream_id(), conn.port());
            }
        });

        if !self.config.metadata_report_interval.is_zero() {
            reporter::spawn(
                media,
                self.registry.clone(),
                self.previews.clone(),
                self.config.hostname.clone(),
                self.config.metadata_report_interval,
                self.config.generate_previews,
                self.running.clone(),
            );
        }

        Ok(port)
    }

    fn control_closed(&self, channel_id: Option<ChannelId>, was_streaming: bool) {
        if !was_streaming {
            return;
        }
        let Some(channel_id) = channel_id else {
            return;
        };
        // The broadcaster's control channel went away; stop its media
        // connection, which drives the rest of the teardown.
        let media = {
            let streams = self.streams.lock();
            streams.get(&channel_id).map(|active| active.media.clone())
        };
        if let Some(media) = media {
            media.stop();
        }
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50 ms poll interval so
/// that [`IngestServer::stop`] can terminate it promptly.
fn accept_loop(listener: TcpListener, inner: Arc<ServerInner>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let handler: Arc<dyn ControlHandler> = inner.clone();
                let r = running.clone();
                let stop = Arc::new(AtomicBool::new(false));

                let control_id = inner.next_control_id.fetch_add(1, Ordering::SeqCst);
                inner.controls.lock().insert(control_id, stop.clone());

                let owner = inner.clone();
                thread::spawn(move || {
                    ControlConnection::handle(stream, handler, r, stop);
                    let remaining = {
                        let mut controls = owner.controls.lock();
                        controls.remove(&control_id);
                        controls.len()
                    };
                    tracing::debug!(control_id, remaining, "control connection removed");
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}
