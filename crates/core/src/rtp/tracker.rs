use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use super::sequence::{ExtendedSequenceCounter, ExtendResult};
use super::{ExtendedSequenceNumber, SequenceNumber};

/// Receive-side sequence tracker for one SSRC.
///
/// Decides three things per incoming packet:
///
/// 1. which extended sequence number the raw 16-bit `seq` maps to
///    (including retransmissions of previously NACKed packets, which must
///    reuse their originally assigned slot);
/// 2. which sequence numbers are currently missing and should be NACKed —
///    gaps are only declared once a packet ages out of the short reorder
///    window, so small out-of-order delivery does not trigger spurious
///    NACKs;
/// 3. when to give up on an outstanding NACK.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    counter: ExtendedSequenceCounter,
    initialized: bool,
    max_seq: ExtendedSequenceNumber,
    /// Recently arrived packets, held briefly to absorb reordering.
    reorder_buffer: BTreeMap<ExtendedSequenceNumber, Instant>,
    /// Longer history of arrivals, bounding all other tables.
    receive_buffer: BTreeMap<ExtendedSequenceNumber, Instant>,
    /// Gaps observed when the reorder window drained, not yet NACKed.
    missing: BTreeSet<ExtendedSequenceNumber>,
    /// NACKs sent and not yet answered, by extended sequence and send time.
    nacks_outstanding: BTreeMap<ExtendedSequenceNumber, Instant>,
    /// Raw sequence -> extended slot, so retransmissions are recognized.
    nack_mapping: HashMap<SequenceNumber, ExtendedSequenceNumber>,
    packets_received: u64,
    packets_missed: u64,
    packets_lost: u64,
    packets_since_last_missed: u64,
    nacks_sent: u64,
}

impl SequenceTracker {
    pub const REORDER_BUFFER_SIZE: usize = 256;
    pub const REORDER_BUFFER_TIMEOUT: Duration = Duration::from_millis(20);
    pub const RECEIVE_BUFFER_SIZE: usize = 2048;
    pub const RECEIVE_BUFFER_TIMEOUT: Duration = Duration::from_secs(2);
    pub const MAX_OUTSTANDING_NACKS: usize = 64;
    pub const MAX_DROPOUT: u16 = ExtendedSequenceCounter::MAX_DROPOUT;

    pub fn new() -> Self {
        Self::default()
    }

    /// Track an incoming packet, returning its extended sequence number.
    pub fn track(&mut self, seq: SequenceNumber) -> ExtendedSequenceNumber {
        self.packets_received += 1;

        if let Some(&extended_seq) = self.nack_mapping.get(&seq) {
            tracing::trace!(extended_seq, "received retransmission of NACKed packet");
            self.packets_lost = self.packets_lost.saturating_sub(1);
            self.nack_mapping.remove(&seq);
            self.nacks_outstanding.remove(&extended_seq);
            self.missing.remove(&extended_seq);
            self.emplace(extended_seq);
            return extended_seq;
        }

        let ExtendResult {
            extended_seq,
            valid,
            reset,
        } = self.counter.extend(seq);

        if reset {
            tracing::trace!("resyncing sequence tracking for source");
            self.resync();
        }
        if !valid {
            tracing::trace!(seq, extended_seq, "source not valid, using RTP packet anyway");
        }

        self.emplace(extended_seq);
        extended_seq
    }

    /// Record that a NACK went out for `extended_seq`.
    ///
    /// The sequence stops appearing in [`get_missing`](Self::get_missing)
    /// until the retransmission arrives or the NACK expires, and a
    /// raw-sequence mapping is kept so the retransmitted packet is assigned
    /// its original extended slot.
    pub fn nack_sent(&mut self, extended_seq: ExtendedSequenceNumber) {
        self.nacks_outstanding.insert(extended_seq, Instant::now());
        self.nack_mapping.insert(extended_seq as SequenceNumber, extended_seq);
        self.nacks_sent += 1;
    }

    /// Missing sequence numbers that should be NACKed now, newest first.
    ///
    /// Never returns more than `MAX_OUTSTANDING_NACKS` minus the number of
    /// NACKs already in flight; when the table is congested, outstanding
    /// NACKs older than `RECEIVE_BUFFER_TIMEOUT` are given up on first.
    pub fn get_missing(&mut self) -> Vec<ExtendedSequenceNumber> {
        let mut to_nack: Vec<ExtendedSequenceNumber> = self
            .missing
            .iter()
            .filter(|seq| !self.nacks_outstanding.contains_key(seq))
            .copied()
            .collect();

        if to_nack.len() + self.nacks_outstanding.len() > Self::MAX_OUTSTANDING_NACKS {
            let now = Instant::now();
            let expired: Vec<ExtendedSequenceNumber> = self
                .nacks_outstanding
                .iter()
                .filter(|&(_, &sent_at)| now.duration_since(sent_at) >= Self::RECEIVE_BUFFER_TIMEOUT)
                .map(|(&seq, _)| seq)
                .collect();
            for seq in expired {
                self.nacks_outstanding.remove(&seq);
                self.missing.remove(&seq);
            }
        }

        // Hand back recent packets first.
        to_nack.reverse();

        let budget = Self::MAX_OUTSTANDING_NACKS.saturating_sub(self.nacks_outstanding.len());
        if to_nack.len() > budget {
            tracing::debug!(
                to_nack = to_nack.len(),
                outstanding = self.nacks_outstanding.len(),
                "unable to NACK some missed packets"
            );
            to_nack.truncate(budget);
        }

        to_nack
    }

    pub fn received_count(&self) -> u64 {
        self.packets_received
    }

    pub fn missed_count(&self) -> u64 {
        self.packets_missed
    }

    pub fn lost_count(&self) -> u64 {
        self.packets_lost
    }

    pub fn nack_count(&self) -> u64 {
        self.nacks_sent
    }

    fn emplace(&mut self, extended_seq: ExtendedSequenceNumber) {
        let now = Instant::now();

        if self.receive_buffer.contains_key(&extended_seq) {
            // Duplicate packet, nothing to do.
            return;
        }
        self.receive_buffer.insert(extended_seq, now);
        self.reorder_buffer.insert(extended_seq, now);

        // Drain the reorder window head by size bound and by age; drained
        // sequences are final, so gaps below them are real. Check them.
        while let Some((&head, &arrived_at)) = self.reorder_buffer.first_key_value() {
            let over_size = self.reorder_buffer.len() >= Self::REORDER_BUFFER_SIZE;
            let aged_out = now.duration_since(arrived_at) >= Self::REORDER_BUFFER_TIMEOUT;
            if !over_size && !aged_out {
                break;
            }
            self.reorder_buffer.remove(&head);
            self.check_for_missing(head);
        }

        // Bound the receive buffer, dropping all bookkeeping for evicted
        // sequences.
        while self.receive_buffer.len() > Self::RECEIVE_BUFFER_SIZE {
            let Some((seq, _)) = self.receive_buffer.pop_first() else {
                break;
            };
            self.missing.remove(&seq);
            self.nacks_outstanding.remove(&seq);
            if self.nack_mapping.get(&(seq as SequenceNumber)) == Some(&seq) {
                self.nack_mapping.remove(&(seq as SequenceNumber));
            }
        }
    }

    /// A sequence left the reorder window; classify the gap to the highest
    /// sequence seen so far.
    fn check_for_missing(&mut self, extended_seq: ExtendedSequenceNumber) {
        if !self.initialized {
            self.max_seq = extended_seq.wrapping_sub(1);
            self.initialized = true;
        }

        self.missing.remove(&extended_seq);
        self.nacks_outstanding.remove(&extended_seq);

        let gap = extended_seq.wrapping_sub(self.max_seq) as i64;
        if gap == 1 {
            // In-order packet.
            self.packets_since_last_missed += 1;
        } else if gap < 0 {
            tracing::trace!(
                gap,
                extended_seq,
                max_seq = self.max_seq,
                "out of order packet, no NACKing"
            );
        } else if gap > Self::MAX_DROPOUT as i64 {
            tracing::warn!(
                gap,
                extended_seq,
                max_seq = self.max_seq,
                "missed too many packets, not NACKing"
            );
        } else {
            // Mark all sequence numbers in the gap as missing (if any).
            for i in 1..gap {
                self.missed_packet(extended_seq - i as u64);
            }
        }

        if gap > 0 {
            self.max_seq = extended_seq;
        }
    }

    fn missed_packet(&mut self, extended_seq: ExtendedSequenceNumber) {
        self.missing.insert(extended_seq);
        self.packets_missed += 1;
        self.packets_lost += 1;
        self.packets_since_last_missed = 0;
    }

    /// The source restarted; all previous extended sequence state is void.
    fn resync(&mut self) {
        self.initialized = false;
        self.reorder_buffer.clear();
        self.receive_buffer.clear();
        self.missing.clear();
        self.nacks_outstanding.clear();
        self.nack_mapping.clear();
        self.max_seq = 0;
        self.packets_since_last_missed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_expect(tracker: &mut SequenceTracker, extended: u64) {
        let result = tracker.track(extended as u16);
        assert_eq!(result, extended, "extended value for seq {}", extended as u16);
    }

    #[test]
    fn sequence_from_zero_with_no_missing_packets() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..100u64 {
            track_expect(&mut tracker, seq);
        }
        assert!(tracker.get_missing().is_empty());
    }

    #[test]
    fn sequence_that_wraps_with_no_missing_packets() {
        let mut tracker = SequenceTracker::new();
        let start = u16::MAX as u64 - 50;
        for seq in start..start + 100 {
            track_expect(&mut tracker, seq);
        }
        assert!(tracker.get_missing().is_empty());
        assert_eq!(tracker.lost_count(), 0);
    }

    #[test]
    fn every_other_packet_missing() {
        let mut tracker = SequenceTracker::new();
        let mut seq = 0u64;
        for _ in 0..20 + SequenceTracker::REORDER_BUFFER_SIZE {
            track_expect(&mut tracker, seq);
            seq += 2;
        }
        assert_eq!(tracker.get_missing().len(), 20);
    }

    #[test]
    fn track_two_nacks() {
        let mut tracker = SequenceTracker::new();
        let mut seq = u16::MAX as u64 - 100;

        for _ in 0..100 {
            track_expect(&mut tracker, seq);
            seq += 1;
        }

        let skip_start = seq;
        seq += 2;

        // Enough traffic to flush the skipped slots out of the reorder window.
        for _ in 0..SequenceTracker::REORDER_BUFFER_SIZE + 50 {
            track_expect(&mut tracker, seq);
            seq += 1;
        }

        assert_eq!(tracker.get_missing(), vec![skip_start + 1, skip_start]);
        tracker.nack_sent(skip_start);
        tracker.nack_sent(skip_start + 1);
        assert!(tracker.get_missing().is_empty());
        assert_eq!(tracker.lost_count(), 2);

        // Retransmissions keep their originally assigned slots.
        track_expect(&mut tracker, skip_start);
        track_expect(&mut tracker, skip_start + 1);

        assert!(tracker.get_missing().is_empty());
        assert_eq!(tracker.lost_count(), 0);
    }

    #[test]
    fn skip_second_packet() {
        let mut tracker = SequenceTracker::new();
        let mut seq = 0u64;

        track_expect(&mut tracker, seq);
        seq += 1;

        let skipped = seq;
        seq += 1;

        for _ in 0..SequenceTracker::REORDER_BUFFER_SIZE + 50 {
            track_expect(&mut tracker, seq);
            seq += 1;
        }

        assert_eq!(tracker.get_missing(), vec![skipped]);
    }

    #[test]
    fn missing_appears_once_and_nack_suppresses_it() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..100u64 {
            if seq != 50 {
                track_expect(&mut tracker, seq);
            }
        }
        for seq in 100..100 + SequenceTracker::REORDER_BUFFER_SIZE as u64 {
            track_expect(&mut tracker, seq);
        }

        assert_eq!(tracker.get_missing(), vec![50]);
        tracker.nack_sent(50);
        // Repeated polls stay quiet while the NACK is outstanding.
        assert!(tracker.get_missing().is_empty());
        assert!(tracker.get_missing().is_empty());
    }

    #[test]
    fn outstanding_nacks_stay_bounded() {
        let mut tracker = SequenceTracker::new();
        let mut seq = 0u64;

        // Lose two packets out of every three, far more gaps than the NACK
        // budget allows.
        for _ in 0..SequenceTracker::RECEIVE_BUFFER_SIZE {
            track_expect(&mut tracker, seq);
            seq += 3;
        }

        let to_nack = tracker.get_missing();
        assert!(to_nack.len() <= SequenceTracker::MAX_OUTSTANDING_NACKS);
        for missing in to_nack {
            tracker.nack_sent(missing);
        }
        assert!(tracker.get_missing().is_empty());
    }

    #[test]
    fn newest_missing_first() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..600u64 {
            if seq != 10 && seq != 200 {
                track_expect(&mut tracker, seq);
            }
        }

        let missing = tracker.get_missing();
        assert_eq!(missing, vec![200, 10]);
    }

    #[test]
    fn counter_reset_clears_tracking_state() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..400u64 {
            if seq != 100 {
                track_expect(&mut tracker, seq);
            }
        }
        assert!(!tracker.get_missing().is_empty());

        // A large jump confirmed by a sequential packet resyncs the source;
        // stale gaps from before the restart must not be NACKed.
        tracker.track(30000);
        tracker.track(30001);
        assert!(tracker.get_missing().is_empty());
    }
}
