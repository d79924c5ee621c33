//! Ingest control connection: the per-broadcaster TCP state machine.
//!
//! A broadcaster authenticates over a short line-oriented handshake before
//! any media flows:
//!
//! ```text
//! New --HMAC--> HmacIssued --CONNECT--> Authenticated
//!     --attributes--> AttributesSet --.--> Streaming
//! ```
//!
//! Authentication is HMAC challenge/response: the server hands out 128
//! random bytes, the client returns HMAC-SHA512 of them keyed with the
//! channel's shared secret. Verification is constant-time.
//!
//! Any malformed or out-of-state command warns and closes the connection
//! with a best-effort response code; the client must reconnect and start
//! over.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use hmac::{Hmac, Mac};
use rand::RngExt;
use sha2::Sha512;

use crate::error::Result;
use crate::protocol::response::{challenge_line, media_port_line};
use crate::protocol::{Command, ResponseCode, command};
use crate::types::{ChannelId, MediaMetadata};

type HmacSha512 = Hmac<Sha512>;

/// Size of the random HMAC challenge payload.
const HMAC_CHALLENGE_SIZE: usize = 128;

/// Socket read timeout; doubles as the stop-flag poll interval.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Commands longer than this can only be garbage; close instead of
/// buffering without bound.
const MAX_COMMAND_BUFFER: usize = 8192;

/// Server-side operations a control connection needs: key lookup during
/// `CONNECT` and media port assignment on `.`. Implemented by the
/// [`IngestServer`](crate::IngestServer).
pub trait ControlHandler: Send + Sync {
    /// Fetch the HMAC key for a channel.
    fn hmac_key(&self, channel_id: ChannelId) -> Result<Vec<u8>>;

    /// Allocate and start a media connection for an authenticated channel.
    /// Returns the bound UDP port, or the response code to fail the
    /// connection with.
    fn media_port_request(
        &self,
        channel_id: ChannelId,
        metadata: &MediaMetadata,
        peer_addr: SocketAddr,
        control_stop: Arc<AtomicBool>,
    ) -> std::result::Result<u16, ResponseCode>;

    /// The control transport went away (client disconnect, error, or
    /// server-initiated stop).
    fn control_closed(&self, channel_id: Option<ChannelId>, was_streaming: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlState {
    New,
    HmacIssued,
    Authenticated,
    AttributesSet,
    Streaming,
}

enum Flow {
    Continue,
    Close(&'static str),
}

/// A single ingest control connection with its own lifecycle.
pub struct ControlConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: ControlState,
    channel_id: Option<ChannelId>,
    challenge: Vec<u8>,
    metadata: MediaMetadata,
    buffer: Vec<u8>,
    stop: Arc<AtomicBool>,
}

impl ControlConnection {
    /// Entry point: run a control connection to completion on the current
    /// thread and notify the handler on exit.
    pub fn handle(
        stream: TcpStream,
        handler: Arc<dyn ControlHandler>,
        running: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "ingest client connected");

        if stream.set_read_timeout(Some(READ_TIMEOUT)).is_err() {
            return;
        }

        let mut conn = ControlConnection {
            stream,
            peer_addr,
            state: ControlState::New,
            channel_id: None,
            challenge: Vec::new(),
            metadata: MediaMetadata::default(),
            buffer: Vec::new(),
            stop,
        };

        let reason = conn.run(handler.as_ref(), &running);
        handler.control_closed(conn.channel_id, conn.state == ControlState::Streaming);

        tracing::info!(%peer_addr, reason, "ingest client disconnected");
    }

    /// Command loop. Returns the reason for exiting.
    fn run(&mut self, handler: &dyn ControlHandler, running: &AtomicBool) -> &'static str {
        let mut chunk = [0u8; 1024];

        while running.load(Ordering::SeqCst) && !self.stop.load(Ordering::SeqCst) {
            let read = match self.stream.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(read) => read,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return "read error",
            };

            self.buffer.extend_from_slice(&chunk[..read]);

            while let Some(text) = self.next_command() {
                match self.process(&text, handler) {
                    Flow::Continue => {}
                    Flow::Close(reason) => return reason,
                }
            }

            if self.buffer.len() > MAX_COMMAND_BUFFER {
                tracing::warn!(peer = %self.peer_addr, "command buffer overflow");
                return "command buffer overflow";
            }
        }

        "server shutting down"
    }

    /// Pop the next complete command off the buffer, if a delimiter has
    /// arrived. Partial commands stay buffered across reads.
    fn next_command(&mut self) -> Option<String> {
        let delimiter = crate::protocol::COMMAND_DELIMITER;
        let index = self
            .buffer
            .windows(delimiter.len())
            .position(|window| window == delimiter)?;
        let command = String::from_utf8_lossy(&self.buffer[..index]).into_owned();
        self.buffer.drain(..index + delimiter.len());
        Some(command)
    }

    fn process(&mut self, text: &str, handler: &dyn ControlHandler) -> Flow {
        let parsed = match command::parse(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, command = text, "bad ingest command");
                return self.close_with(ResponseCode::BadRequest, "protocol error");
            }
        };

        match parsed {
            Command::Hmac => self.process_hmac(),
            Command::Connect { channel_id, digest } => {
                self.process_connect(channel_id, &digest, handler)
            }
            Command::Attribute { key, value } => self.process_attribute(&key, &value),
            Command::Dot => self.process_dot(handler),
            Command::Ping => self.process_ping(),
        }
    }

    fn process_hmac(&mut self) -> Flow {
        if self.state != ControlState::New {
            tracing::warn!(peer = %self.peer_addr, state = ?self.state, "HMAC out of state");
            return self.close_with(ResponseCode::BadRequest, "protocol error");
        }

        self.challenge = vec![0u8; HMAC_CHALLENGE_SIZE];
        rand::rng().fill(self.challenge.as_mut_slice());

        let line = challenge_line(&hex::encode(&self.challenge));
        if self.write(&line).is_err() {
            return Flow::Close("write error");
        }
        self.state = ControlState::HmacIssued;
        Flow::Continue
    }

    fn process_connect(
        &mut self,
        channel_id: ChannelId,
        digest: &[u8],
        handler: &dyn ControlHandler,
    ) -> Flow {
        if self.state != ControlState::HmacIssued {
            tracing::warn!(peer = %self.peer_addr, state = ?self.state, "CONNECT out of state");
            return self.close_with(ResponseCode::BadRequest, "protocol error");
        }

        let key = match handler.hmac_key(channel_id) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "could not look up HMAC key");
                return self.close_with(ResponseCode::Unauthorized, "unknown channel");
            }
        };

        let Ok(mut mac) = HmacSha512::new_from_slice(&key) else {
            return self.close_with(ResponseCode::Unauthorized, "bad channel key");
        };
        mac.update(&self.challenge);

        if mac.verify_slice(digest).is_err() {
            tracing::info!(channel_id, peer = %self.peer_addr, "invalid HMAC digest, disconnecting");
            return self.close_with(ResponseCode::Unauthorized, "authentication failed");
        }

        if self.write(&ResponseCode::Ok.line()).is_err() {
            return Flow::Close("write error");
        }
        self.channel_id = Some(channel_id);
        self.state = ControlState::Authenticated;
        tracing::info!(peer = %self.peer_addr, channel_id, "authenticated successfully");
        Flow::Continue
    }

    fn process_attribute(&mut self, key: &str, value: &str) -> Flow {
        match self.state {
            ControlState::Authenticated | ControlState::AttributesSet => {
                self.metadata.apply_attribute(key, value);
                self.state = ControlState::AttributesSet;
                Flow::Continue
            }
            ControlState::Streaming => {
                tracing::warn!(peer = %self.peer_addr, "attribute after stream start, disconnecting");
                self.close_with(ResponseCode::BadRequest, "attribute after stream start")
            }
            _ => {
                tracing::warn!(peer = %self.peer_addr, "attribute before authentication, disconnecting");
                self.close_with(ResponseCode::BadRequest, "attribute before authentication")
            }
        }
    }

    fn process_dot(&mut self, handler: &dyn ControlHandler) -> Flow {
        if self.state != ControlState::AttributesSet {
            tracing::warn!(peer = %self.peer_addr, state = ?self.state, "stream start out of state");
            return self.close_with(ResponseCode::BadRequest, "protocol error");
        }
        let Some(channel_id) = self.channel_id else {
            return self.close_with(ResponseCode::BadRequest, "protocol error");
        };

        if !self.metadata.is_complete() {
            tracing::warn!(
                peer = %self.peer_addr,
                channel_id,
                metadata = ?self.metadata,
                "stream start without valid metadata"
            );
            return self.close_with(ResponseCode::BadRequest, "invalid stream metadata");
        }

        let port = match handler.media_port_request(
            channel_id,
            &self.metadata,
            self.peer_addr,
            self.stop.clone(),
        ) {
            Ok(port) => port,
            Err(code) => {
                tracing::error!(channel_id, %code, "could not assign media port");
                return self.close_with(code, "media port assignment failed");
            }
        };

        // Transition first: if the response write fails, teardown must
        // still stop the media connection that was just started.
        self.state = ControlState::Streaming;
        if self.write(&media_port_line(port)).is_err() {
            return Flow::Close("write error");
        }
        tracing::info!(channel_id, port, "assigned media port");
        Flow::Continue
    }

    fn process_ping(&mut self) -> Flow {
        // TODO: rate-limit PING responses per connection.
        if self.state == ControlState::New {
            tracing::warn!(peer = %self.peer_addr, "PING before handshake");
            return self.close_with(ResponseCode::BadRequest, "protocol error");
        }
        if self.write(&ResponseCode::Ping.line()).is_err() {
            return Flow::Close("write error");
        }
        Flow::Continue
    }

    /// Best-effort response code, then tear the transport down.
    fn close_with(&mut self, code: ResponseCode, reason: &'static str) -> Flow {
        let _ = self.write(&code.line());
        let _ = self.stream.shutdown(Shutdown::Both);
        Flow::Close(reason)
    }

    fn write(&mut self, line: &str) -> std::io::Result<()> {
        self.stream.write_all(line.as_bytes())
    }
}
