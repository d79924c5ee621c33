//! RTCP messages the ingest path sends and recognizes.

use super::Ssrc;

/// RTCP transport-layer feedback packet type (RFC 4585 §6.1).
pub const RTCP_TYPE_RTPFB: u8 = 205;

/// Feedback message type for a Generic NACK (RFC 4585 §6.2.1).
pub const RTCP_FMT_NACK: u8 = 1;

/// Expected size of the FTL sender report datagram (sentinel type 200).
pub const SENDER_REPORT_LEN: usize = 28;

/// Size of a single-FCI Generic NACK packet.
pub const NACK_LEN: usize = 16;

/// Build a Generic NACK feedback packet (RFC 4585 §6.2.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|  FMT=1  |    PT=205     |          length=3             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of packet sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of media source                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            PID                |             BLP               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The ingest path sends one NACK per lost packet, so `blp` (the bitmask
/// of following lost packets) is always zero today; a future sender may
/// coalesce consecutive losses into it.
pub fn write_nack(media_ssrc: Ssrc, pid: u16, blp: u16) -> [u8; NACK_LEN] {
    let mut packet = [0u8; NACK_LEN];
    packet[0] = (2 << 6) | RTCP_FMT_NACK;
    packet[1] = RTCP_TYPE_RTPFB;
    // Length in 32-bit words minus one.
    packet[2..4].copy_from_slice(&3u16.to_be_bytes());
    packet[4..8].copy_from_slice(&media_ssrc.to_be_bytes());
    packet[8..12].copy_from_slice(&media_ssrc.to_be_bytes());
    packet[12..14].copy_from_slice(&pid.to_be_bytes());
    packet[14..16].copy_from_slice(&blp.to_be_bytes());
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nack_layout() {
        let packet = write_nack(0x075BCD16, 103, 0);

        assert_eq!(packet.len(), 16);
        assert_eq!(packet[0] >> 6, 2); // version
        assert_eq!((packet[0] >> 5) & 1, 0); // padding
        assert_eq!(packet[0] & 0x1f, RTCP_FMT_NACK);
        assert_eq!(packet[1], RTCP_TYPE_RTPFB);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 3);

        let sender = u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]);
        let media = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
        assert_eq!(sender, 0x075BCD16);
        assert_eq!(media, 0x075BCD16);

        assert_eq!(u16::from_be_bytes([packet[12], packet[13]]), 103);
        assert_eq!(u16::from_be_bytes([packet[14], packet[15]]), 0);
    }

    #[test]
    fn nack_blp_passthrough() {
        let packet = write_nack(1, 500, 0b0000_0000_0000_0101);
        assert_eq!(u16::from_be_bytes([packet[14], packet[15]]), 0b101);
    }
}
