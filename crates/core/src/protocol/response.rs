use std::fmt;

/// Ingest response codes written on the control channel.
///
/// This is the exhaustive set used by the FTL protocol. Codes are written
/// as their decimal value followed by `\n`; a handful of success responses
/// carry arguments (see [`challenge_line`] and [`media_port_line`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResponseCode {
    Ok = 200,
    Ping = 201,
    BadRequest = 400,
    Unauthorized = 401,
    OldVersion = 402,
    AudioSsrcCollision = 403,
    VideoSsrcCollision = 404,
    InvalidStreamKey = 405,
    ChannelInUse = 406,
    RegionUnsupported = 407,
    NoMediaTimeout = 408,
    GameBlocked = 409,
    ServerTerminate = 410,
    InternalServerError = 500,
    InternalMemoryError = 900,
    InternalCommandError = 901,
    InternalSocketClosed = 902,
    InternalSocketTimeout = 903,
}

impl ResponseCode {
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Bare response line: `"<code>\n"`.
    pub fn line(self) -> String {
        format!("{}\n", self.code())
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Response to `HMAC`: the challenge as lowercase hex.
pub fn challenge_line(challenge_hex: &str) -> String {
    format!("{} {}\n", ResponseCode::Ok.code(), challenge_hex)
}

/// Response to `.`: tells the client which UDP port to stream media to.
pub fn media_port_line(port: u16) -> String {
    format!("{} hi. Use UDP port {}\n", ResponseCode::Ok.code(), port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_protocol_constants() {
        assert_eq!(ResponseCode::Ok.code(), 200);
        assert_eq!(ResponseCode::Ping.code(), 201);
        assert_eq!(ResponseCode::BadRequest.code(), 400);
        assert_eq!(ResponseCode::Unauthorized.code(), 401);
        assert_eq!(ResponseCode::ChannelInUse.code(), 406);
        assert_eq!(ResponseCode::ServerTerminate.code(), 410);
        assert_eq!(ResponseCode::InternalServerError.code(), 500);
        assert_eq!(ResponseCode::InternalSocketTimeout.code(), 903);
    }

    #[test]
    fn line_formats() {
        assert_eq!(ResponseCode::Unauthorized.line(), "401\n");
        assert_eq!(challenge_line("0a0b"), "200 0a0b\n");
        assert_eq!(media_port_line(9003), "200 hi. Use UDP port 9003\n");
    }
}
