//! Fixed-capacity sliding outstanding window (C3).
//!
//! Slots are indexed by `position(seqno) = (-seqno) & (W-1)`: the negation
//! makes the bit index *decrease* as seqno increases, so a scan starting at
//! the head and walking forward through index space walks backward through
//! time, which is what `find_next_bit` et al. want. The backing bitmap is
//! doubled (length `2W`) with the upper half always mirroring the lower
//! half, so a scan that starts near the head and runs for up to `W` bits
//! never needs a wraparound branch.
//!
//! The doubled bitmap here is a plain `Vec<bool>` rather than a word-packed
//! bitmap: it trades the kernel's word-parallel bit tricks for clarity,
//! which is an explicitly sanctioned substitution for implementations
//! without kernel-style bitmap primitives.

use crate::fastpass::pktdesc::PacketDescriptor;

/// Returned by `at_or_before` when no occupied slot exists within the
/// window at or before the queried seqno.
pub const NOT_FOUND: i64 = -1;

#[derive(Debug)]
pub struct OutstandingWindow {
    capacity: usize,
    mask: u64,
    /// `slots[position(seqno)]` holds the descriptor for `seqno`, if any.
    slots: Vec<Option<PacketDescriptor>>,
    /// doubled bitmap, length `2 * capacity`; `bits[i] == bits[i + capacity]`
    /// always holds for `i < capacity`.
    bits: Vec<bool>,
    tx_num_unacked: usize,
    next_seqno: u64,
}

impl OutstandingWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "outstanding window capacity must be a power of two");
        OutstandingWindow {
            capacity,
            mask: (capacity as u64) - 1,
            slots: (0..capacity).map(|_| None).collect(),
            bits: vec![false; 2 * capacity],
            tx_num_unacked: 0,
            next_seqno: 0,
        }
    }

    pub fn set_next_seqno(&mut self, seqno: u64) {
        self.next_seqno = seqno;
    }

    pub fn next_seqno(&self) -> u64 {
        self.next_seqno
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tx_num_unacked(&self) -> usize {
        self.tx_num_unacked
    }

    pub fn position(&self, seqno: u64) -> usize {
        (seqno.wrapping_neg() & self.mask) as usize
    }

    fn set_bit(&mut self, idx: usize) {
        self.bits[idx] = true;
        self.bits[idx + self.capacity] = true;
    }

    fn clear_bit(&mut self, idx: usize) {
        self.bits[idx] = false;
        self.bits[idx + self.capacity] = false;
    }

    /// Smallest index in `[start, end)` whose bit is set, or `end` if none.
    fn find_next_bit(&self, start: usize, end: usize) -> usize {
        (start..end).find(|&i| self.bits[i]).unwrap_or(end)
    }

    /// Largest index strictly below `end` whose bit is set, or `end` if none.
    fn find_last_bit(&self, end: usize) -> usize {
        (0..end).rev().find(|&i| self.bits[i]).unwrap_or(end)
    }

    pub fn is_unacked(&self, seqno: u64) -> bool {
        self.bits[self.position(seqno)]
    }

    /// Stores `desc` at `self.next_seqno` and advances it. `desc.seqno` must
    /// already equal `self.next_seqno` (the session stamps it in `commit`
    /// before calling `add`).
    pub fn add(&mut self, desc: PacketDescriptor) {
        debug_assert_eq!(desc.seqno, self.next_seqno);
        let evicted = self.next_seqno.wrapping_sub(self.capacity as u64);
        assert!(
            !self.is_unacked(evicted),
            "commit over an occupied head slot: caller must prepare_to_send first"
        );

        let idx = self.position(self.next_seqno);
        self.set_bit(idx);
        self.slots[idx] = Some(desc);
        self.tx_num_unacked += 1;
        self.next_seqno = self.next_seqno.wrapping_add(1);
    }

    /// Removes and returns the descriptor at `seqno`. Panics if `seqno` was
    /// not occupied — popping an empty slot is a programming error.
    pub fn pop(&mut self, seqno: u64) -> PacketDescriptor {
        assert!(self.is_unacked(seqno), "pop of an empty outstanding-window slot");
        let idx = self.position(seqno);
        self.clear_bit(idx);
        self.tx_num_unacked -= 1;
        self.slots[idx].take().expect("bit set implies slot occupied")
    }

    /// `seqno - s`, where `s` is the highest occupied seqno `<= seqno`, or
    /// `NOT_FOUND` if none exists within the window.
    pub fn at_or_before(&self, seqno: u64) -> i64 {
        assert!(seqno < self.next_seqno, "at_or_before queried for a seqno not yet sent");

        if seqno.wrapping_add(self.capacity as u64) < self.next_seqno {
            return NOT_FOUND;
        }

        let head_index = self.position(self.next_seqno.wrapping_sub(1));
        let seqno_index = head_index + self.position(seqno.wrapping_sub(self.next_seqno.wrapping_sub(1)));
        let bound = head_index + self.capacity;
        let found = self.find_next_bit(seqno_index, bound);

        if found == bound {
            NOT_FOUND
        } else {
            (found - seqno_index) as i64
        }
    }

    /// Smallest occupied seqno `>= hint`. Assumes at least one such slot
    /// exists and that `hint` lies within the window.
    pub fn earliest_unacked_hint(&self, hint: u64) -> u64 {
        let hint_pos = self.position(hint);
        let bound = hint_pos + self.capacity + 1;
        let found = self.find_last_bit(bound);
        hint.wrapping_add((hint_pos + self.capacity - found) as u64)
    }

    pub fn earliest_unacked(&self) -> u64 {
        self.earliest_unacked_hint(self.next_seqno.wrapping_sub(self.capacity as u64))
    }

    pub fn timestamp(&self, seqno: u64) -> u64 {
        self.slots[self.position(seqno)]
            .as_ref()
            .expect("timestamp queried for an unoccupied seqno")
            .sent_timestamp_ns
    }

    pub fn empty(&self) -> bool {
        self.tx_num_unacked == 0
    }

    /// Pops and drops every occupied slot. Used on protocol reset and
    /// session teardown; the caller is responsible for delivering any
    /// NACKs before discarding the returned descriptors, if desired.
    pub fn reset(&mut self) -> Vec<PacketDescriptor> {
        let mut drained = Vec::with_capacity(self.tx_num_unacked);
        let mut tslot = self.next_seqno.wrapping_sub(1);
        loop {
            let gap = self.at_or_before(tslot);
            if gap < 0 {
                break;
            }
            tslot = tslot.wrapping_sub(gap as u64);
            drained.push(self.pop(tslot));
        }
        drained
    }
}
