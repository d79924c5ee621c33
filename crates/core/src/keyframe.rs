//! H.264 keyframe capture for preview generation.
//!
//! FTL delivers keyframes as a run of RTP packets sharing one timestamp:
//! SPS and PPS parameter sets followed by an IDR slice, which is usually
//! fragmented across many FU-A packets (RFC 6184 §5.8). The assembler
//! collects those packets per timestamp and only publishes a frame once it
//! is provably complete, so consumers never see a partial keyframe.

use crate::rtp::{RtpPacket, RtpTimestamp};

/// NAL unit types that belong to a keyframe.
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
/// Fragmentation units (RFC 6184 §5.8).
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;

/// A run of RTP packets sharing one timestamp, ordered by extended
/// sequence number.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    timestamp: RtpTimestamp,
    packets: Vec<RtpPacket>,
}

impl Frame {
    fn new(timestamp: RtpTimestamp) -> Self {
        Self {
            timestamp,
            packets: Vec::new(),
        }
    }

    /// RTP timestamp shared by every packet in the frame.
    pub fn timestamp(&self) -> RtpTimestamp {
        self.timestamp
    }

    pub fn packets(&self) -> &[RtpPacket] {
        &self.packets
    }

    /// A frame is complete iff it is non-empty, the last packet carries the
    /// RTP marker bit, and extended sequence numbers form a contiguous run.
    pub fn is_complete(&self) -> bool {
        let Some(last) = self.packets.last() else {
            return false;
        };
        if !last.marker() {
            return false;
        }

        let mut expected = self.packets[0].extended_seq;
        for packet in &self.packets {
            if packet.extended_seq != expected {
                return false;
            }
            expected += 1;
        }
        true
    }

    /// Insert a packet keeping ascending extended sequence order.
    ///
    /// Packets almost always arrive in order, so scan backwards from the
    /// tail. Duplicates are dropped.
    fn insert_in_sequence_order(&mut self, packet: RtpPacket) {
        for (index, existing) in self.packets.iter().enumerate().rev() {
            if packet.extended_seq == existing.extended_seq {
                return;
            }
            if packet.extended_seq > existing.extended_seq {
                self.packets.insert(index + 1, packet);
                return;
            }
        }
        // Older than the whole list.
        self.packets.insert(0, packet);
    }
}

/// Maintains the latest complete keyframe for one video SSRC.
#[derive(Debug, Default)]
pub struct KeyframeAssembler {
    current: Frame,
    pending: Frame,
}

impl KeyframeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one video RTP packet, accumulating keyframe parts.
    ///
    /// Packets that are not part of a keyframe are ignored. A timestamp
    /// change swaps a complete pending frame into the current slot and
    /// starts collecting the new one.
    pub fn handle_packet(&mut self, packet: &RtpPacket) {
        if !is_keyframe_part(packet.payload()) {
            return;
        }

        let timestamp = packet.timestamp();
        if timestamp != self.pending.timestamp {
            if self.pending.is_complete() {
                std::mem::swap(&mut self.current, &mut self.pending);
                tracing::trace!(
                    packets = self.current.packets.len(),
                    timestamp = self.current.timestamp,
                    "keyframe recorded"
                );
            } else if !self.pending.packets.is_empty() {
                tracing::debug!(
                    timestamp = self.pending.timestamp,
                    "not recording incomplete keyframe"
                );
            }
            self.pending = Frame::new(timestamp);
        }

        self.pending.insert_in_sequence_order(packet.clone());
    }

    /// The latest complete keyframe, if one has been captured yet.
    pub fn keyframe(&self) -> Option<Frame> {
        if self.current.packets.is_empty() {
            None
        } else {
            Some(self.current.clone())
        }
    }
}

/// Whether an RTP payload carries part of an H.264 keyframe.
///
/// True for SPS, PPS, and IDR NAL units, and for FU-A/FU-B fragments
/// whose fragmented type is SPS or IDR.
fn is_keyframe_part(payload: &[u8]) -> bool {
    if payload.len() < 2 {
        return false;
    }
    let nal_type = payload[0] & 0x1f;
    match nal_type {
        NAL_TYPE_IDR | NAL_TYPE_SPS | NAL_TYPE_PPS => true,
        NAL_TYPE_FU_A | NAL_TYPE_FU_B => {
            let fragment_type = payload[1] & 0x1f;
            fragment_type == NAL_TYPE_IDR || fragment_type == NAL_TYPE_SPS
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::packet::RTP_HEADER_LEN;

    fn video_packet(seq: u64, timestamp: u32, marker: bool, payload: &[u8]) -> RtpPacket {
        let mut bytes = vec![0u8; RTP_HEADER_LEN];
        bytes[0] = 2 << 6;
        bytes[1] = ((marker as u8) << 7) | 96;
        bytes[2..4].copy_from_slice(&(seq as u16).to_be_bytes());
        bytes[4..8].copy_from_slice(&timestamp.to_be_bytes());
        bytes[8..12].copy_from_slice(&123456790u32.to_be_bytes());
        bytes.extend_from_slice(payload);
        RtpPacket::new(bytes, seq)
    }

    fn fu_a(fragment_type: u8, start: bool, end: bool) -> Vec<u8> {
        let indicator = 0x60 | NAL_TYPE_FU_A;
        let header = ((start as u8) << 7) | ((end as u8) << 6) | fragment_type;
        vec![indicator, header, 0xAA, 0xBB]
    }

    #[test]
    fn classifies_keyframe_payloads() {
        assert!(is_keyframe_part(&[0x65, 0x00])); // IDR
        assert!(is_keyframe_part(&[0x67, 0x42])); // SPS
        assert!(is_keyframe_part(&[0x68, 0xCE])); // PPS
        assert!(is_keyframe_part(&fu_a(NAL_TYPE_IDR, true, false)));
        assert!(is_keyframe_part(&fu_a(NAL_TYPE_SPS, true, false)));
        assert!(!is_keyframe_part(&fu_a(1, true, false))); // non-IDR slice fragment
        assert!(!is_keyframe_part(&[0x61, 0x00])); // non-IDR slice
        assert!(!is_keyframe_part(&[0x65])); // too short
    }

    #[test]
    fn empty_frame_is_incomplete() {
        assert!(!Frame::default().is_complete());
    }

    #[test]
    fn frame_without_marker_is_incomplete() {
        let mut frame = Frame::new(1000);
        frame.insert_in_sequence_order(video_packet(1, 1000, false, &[0x65, 0x00]));
        assert!(!frame.is_complete());
    }

    #[test]
    fn frame_with_gap_is_incomplete() {
        let mut frame = Frame::new(1000);
        frame.insert_in_sequence_order(video_packet(1, 1000, false, &[0x67, 0x42]));
        frame.insert_in_sequence_order(video_packet(3, 1000, true, &[0x65, 0x00]));
        assert!(!frame.is_complete());
    }

    #[test]
    fn contiguous_marked_frame_is_complete() {
        let mut frame = Frame::new(1000);
        frame.insert_in_sequence_order(video_packet(1, 1000, false, &[0x67, 0x42]));
        frame.insert_in_sequence_order(video_packet(2, 1000, false, &[0x68, 0xCE]));
        frame.insert_in_sequence_order(video_packet(3, 1000, true, &[0x65, 0x00]));
        assert!(frame.is_complete());
    }

    #[test]
    fn out_of_order_insertion_sorts_by_sequence() {
        let mut frame = Frame::new(1000);
        frame.insert_in_sequence_order(video_packet(3, 1000, true, &[0x65, 0x00]));
        frame.insert_in_sequence_order(video_packet(1, 1000, false, &[0x67, 0x42]));
        frame.insert_in_sequence_order(video_packet(2, 1000, false, &[0x68, 0xCE]));

        let seqs: Vec<u64> = frame.packets().iter().map(|p| p.extended_seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(frame.is_complete());
    }

    #[test]
    fn assembles_keyframe_across_fragments() {
        let mut assembler = KeyframeAssembler::new();
        let timestamp = 90000;

        assembler.handle_packet(&video_packet(10, timestamp, false, &[0x67, 0x42, 0x00]));
        assembler.handle_packet(&video_packet(11, timestamp, false, &[0x68, 0xCE, 0x38]));
        assembler.handle_packet(&video_packet(12, timestamp, false, &fu_a(NAL_TYPE_IDR, true, false)));
        assembler.handle_packet(&video_packet(13, timestamp, false, &fu_a(NAL_TYPE_IDR, false, false)));
        assembler.handle_packet(&video_packet(14, timestamp, true, &fu_a(NAL_TYPE_IDR, false, true)));
        assert!(assembler.keyframe().is_none());

        // Next keyframe-relevant timestamp promotes the pending frame.
        assembler.handle_packet(&video_packet(40, timestamp + 3000, false, &[0x67, 0x42, 0x00]));

        let keyframe = assembler.keyframe().expect("complete keyframe");
        assert_eq!(keyframe.timestamp(), timestamp);
        let seqs: Vec<u64> = keyframe.packets().iter().map(|p| p.extended_seq).collect();
        assert_eq!(seqs, vec![10, 11, 12, 13, 14]);
        assert!(keyframe.packets().last().is_some_and(|p| p.marker()));
    }

    #[test]
    fn incomplete_pending_frame_is_discarded() {
        let mut assembler = KeyframeAssembler::new();

        // Keyframe missing its final (marker) fragment.
        assembler.handle_packet(&video_packet(10, 1000, false, &[0x67, 0x42, 0x00]));
        assembler.handle_packet(&video_packet(11, 1000, false, &fu_a(NAL_TYPE_IDR, true, false)));

        assembler.handle_packet(&video_packet(20, 4000, false, &[0x67, 0x42, 0x00]));
        assert!(assembler.keyframe().is_none());
    }

    #[test]
    fn non_keyframe_packets_are_ignored() {
        let mut assembler = KeyframeAssembler::new();
        assembler.handle_packet(&video_packet(1, 1000, true, &[0x61, 0x00]));
        assembler.handle_packet(&video_packet(2, 2000, true, &[0x41, 0x9A]));
        assert!(assembler.keyframe().is_none());
    }

    #[test]
    fn newer_complete_keyframe_replaces_older() {
        let mut assembler = KeyframeAssembler::new();

        assembler.handle_packet(&video_packet(1, 1000, true, &[0x65, 0x88]));
        assembler.handle_packet(&video_packet(50, 7000, true, &[0x65, 0x99]));
        let first = assembler.keyframe().expect("first keyframe");
        assert_eq!(first.timestamp(), 1000);

        assembler.handle_packet(&video_packet(90, 13000, true, &[0x65, 0xAA]));
        let second = assembler.keyframe().expect("second keyframe");
        assert_eq!(second.timestamp(), 7000);
    }
}
