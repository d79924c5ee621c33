use crate::error::{FtlError, ParseErrorKind, Result};
use crate::types::ChannelId;

/// A parsed ingest control command.
///
/// Commands arrive CRLF-CRLF delimited on the control channel; by the time
/// they reach [`parse`], the delimiter has been stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `HMAC` — request an authentication challenge.
    Hmac,
    /// `CONNECT <channel id> $<hex digest>` — prove possession of the
    /// channel's shared secret. The digest is the client's
    /// HMAC-SHA512 over the challenge bytes, decoded from hex.
    Connect {
        channel_id: ChannelId,
        digest: Vec<u8>,
    },
    /// `<Key>: <Value>` — one stream metadata attribute.
    Attribute { key: String, value: String },
    /// `.` — attributes done, start the media connection.
    Dot,
    /// `PING …` — keepalive / round-trip probe.
    Ping,
}

/// Parse one delimiter-stripped command.
///
/// Match order follows the protocol: exact `HMAC`, `CONNECT` prefix,
/// `Key: Value` attribute shape, exact `.`, then `PING` prefix. Anything
/// else is an unknown command, which callers treat as fatal for the
/// connection.
pub fn parse(command: &str) -> Result<Command> {
    if command.is_empty() {
        return Err(FtlError::Parse {
            kind: ParseErrorKind::EmptyCommand,
        });
    }

    if command == "HMAC" {
        return Ok(Command::Hmac);
    }

    if command.starts_with("CONNECT") {
        return parse_connect(command);
    }

    // The attribute grammar is greedy: the key consumes as much as it
    // can, so a command with several ": " separators splits at the last.
    if let Some((key, value)) = command.rsplit_once(": ")
        && !key.is_empty()
        && !value.is_empty()
    {
        return Ok(Command::Attribute {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    if command == "." {
        return Ok(Command::Dot);
    }

    if command.starts_with("PING") {
        return Ok(Command::Ping);
    }

    Err(FtlError::Parse {
        kind: ParseErrorKind::UnknownCommand,
    })
}

/// `CONNECT ([0-9]+) \$([0-9a-f]+)`
fn parse_connect(command: &str) -> Result<Command> {
    let malformed = || FtlError::Parse {
        kind: ParseErrorKind::MalformedConnect,
    };

    let rest = command.strip_prefix("CONNECT ").ok_or_else(malformed)?;
    let (channel_str, digest_hex) = rest.split_once(" $").ok_or_else(malformed)?;

    if channel_str.is_empty() || !channel_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let channel_id: ChannelId = channel_str.parse().map_err(|_| malformed())?;

    if digest_hex.is_empty()
        || !digest_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(malformed());
    }
    let digest = hex::decode(digest_hex).map_err(|_| malformed())?;

    Ok(Command::Connect { channel_id, digest })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hmac() {
        assert_eq!(parse("HMAC").unwrap(), Command::Hmac);
    }

    #[test]
    fn parse_connect_command() {
        let parsed = parse("CONNECT 1234 $0badc0de").unwrap();
        assert_eq!(
            parsed,
            Command::Connect {
                channel_id: 1234,
                digest: vec![0x0b, 0xad, 0xc0, 0xde],
            }
        );
    }

    #[test]
    fn parse_connect_rejects_uppercase_hex() {
        assert!(parse("CONNECT 1 $0BADC0DE").is_err());
    }

    #[test]
    fn parse_connect_rejects_odd_length_hex() {
        assert!(parse("CONNECT 1 $abc").is_err());
    }

    #[test]
    fn parse_connect_rejects_missing_dollar() {
        assert!(parse("CONNECT 1 abcd").is_err());
    }

    #[test]
    fn parse_connect_rejects_non_numeric_channel() {
        assert!(parse("CONNECT abc $ab").is_err());
        assert!(parse("CONNECT -1 $ab").is_err());
    }

    #[test]
    fn parse_connect_rejects_channel_overflow() {
        assert!(parse("CONNECT 99999999999999 $ab").is_err());
    }

    #[test]
    fn parse_attribute() {
        let parsed = parse("VideoCodec: H264").unwrap();
        assert_eq!(
            parsed,
            Command::Attribute {
                key: "VideoCodec".to_string(),
                value: "H264".to_string(),
            }
        );
    }

    #[test]
    fn parse_attribute_key_is_greedy() {
        let parsed = parse("VendorName: obs: studio").unwrap();
        assert_eq!(
            parsed,
            Command::Attribute {
                key: "VendorName: obs".to_string(),
                value: "studio".to_string(),
            }
        );
    }

    #[test]
    fn parse_dot() {
        assert_eq!(parse(".").unwrap(), Command::Dot);
    }

    #[test]
    fn parse_ping_with_trailing_payload() {
        assert_eq!(parse("PING").unwrap(), Command::Ping);
        assert_eq!(parse("PING 12345").unwrap(), Command::Ping);
    }

    #[test]
    fn attribute_shape_wins_over_ping_prefix() {
        // Mirrors the protocol's match order: "PING: x" is an attribute.
        let parsed = parse("PING: 1").unwrap();
        assert!(matches!(parsed, Command::Attribute { .. }));
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert!(parse("").is_err());
        assert!(parse("GARBAGE").is_err());
        assert!(parse("hmac").is_err());
    }
}
