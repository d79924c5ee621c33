//! FTL ingest control protocol: command parsing and response codes.
//!
//! The control channel is a line-oriented TCP protocol. Commands are
//! delimited by a double CRLF (`\r\n\r\n`); responses are a numeric code,
//! optionally followed by arguments, terminated by a single `\n`:
//!
//! ```text
//! C: HMAC\r\n\r\n
//! S: 200 <256 hex chars>\n
//! C: CONNECT 1 $<128 hex chars>\r\n\r\n
//! S: 200\n
//! C: VideoCodec: H264\r\n\r\n
//! C: .\r\n\r\n
//! S: 200 hi. Use UDP port 9003\n
//! ```

pub mod command;
pub mod response;

pub use command::Command;
pub use response::ResponseCode;

/// Byte sequence separating commands on the control channel.
pub const COMMAND_DELIMITER: &[u8] = b"\r\n\r\n";
