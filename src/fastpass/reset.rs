//! Reset/epoch manager (C4): derives the sequence-number base from a
//! timestamp and validates peer RESET payloads.

/// Seed used by the kernel's `jhash_1word`; carried over so both peers
/// derive the same epoch hash from the same reset timestamp.
const JHASH_INITVAL: u32 = 0xdead_beef;

/// Jenkins one-word hash, `jhash_1word(a, initval)` from `<linux/jhash.h>`.
/// Both sides of the protocol must compute this identically or they will
/// never converge on the same sequence-number base.
pub fn jhash_1word(a: u32, initval: u32) -> u32 {
    let mut a = a.wrapping_add(JHASH_INITVAL).wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

pub fn hash_of_reset_time(reset_time: u64) -> u32 {
    jhash_1word(reset_time as u32, (reset_time >> 32) as u32)
}

/// `reset_time + hash(reset_time)` splatted into both halves of the word.
pub fn seqno_base(reset_time: u64) -> u64 {
    let h = hash_of_reset_time(reset_time) as u64;
    reset_time.wrapping_add(h).wrapping_add(h << 32)
}

/// Extends a 56-bit wire timestamp to 64 bits by choosing the value
/// congruent to `partial` mod 2^56 nearest to `now`.
pub fn reconstruct_56(partial: u64, now: u64) -> u64 {
    let mut full = now.wrapping_sub(1u64 << 55);
    full = full.wrapping_add(partial.wrapping_sub(full) & ((1u64 << 56) - 1));
    full
}

fn in_window(tstamp: u64, win_middle: u64, win_size: u64) -> bool {
    tstamp >= win_middle.wrapping_sub(win_size / 2) && tstamp < win_middle.wrapping_add((win_size + 1) / 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// Matched the already-accepted reset; first time, flips `in_sync`.
    ConfirmedInSync,
    /// Matched the already-accepted reset, but we were already in sync.
    Redundant,
    /// Timestamp fell outside `[now - win/2, now + win/2)`.
    OutOfWindow,
    /// A newer reset was already accepted within the window.
    Outdated,
    /// A new epoch: caller must drain the outstanding window and rebase.
    Accepted { reset_time: u64, next_seqno: u64 },
}

#[derive(Debug)]
pub struct ResetManager {
    pub last_reset_time: u64,
    pub in_sync: bool,
    pub rst_win_ns: u64,
}

impl ResetManager {
    pub fn new(rst_win_ns: u64) -> Self {
        ResetManager {
            last_reset_time: 0,
            in_sync: false,
            rst_win_ns,
        }
    }

    /// Picks a fresh epoch at connect/init time, matching `do_proto_reset`.
    pub fn init(&mut self, now: u64) -> u64 {
        self.last_reset_time = now;
        self.in_sync = false;
        seqno_base(now)
    }

    /// Processes an inbound RESET payload (§4.2). Returns the outcome; the
    /// caller is responsible for acting on `Accepted` (draining the window,
    /// rebasing `next_seqno`, notifying `handle_reset`).
    pub fn handle_reset(&mut self, partial_tstamp: u64, now: u64) -> ResetOutcome {
        let full = reconstruct_56(partial_tstamp, now);

        if full == self.last_reset_time {
            return if !self.in_sync {
                self.in_sync = true;
                ResetOutcome::ConfirmedInSync
            } else {
                ResetOutcome::Redundant
            };
        }

        if !in_window(full, now, self.rst_win_ns) {
            return ResetOutcome::OutOfWindow;
        }

        if in_window(self.last_reset_time, now, self.rst_win_ns) && full < self.last_reset_time {
            return ResetOutcome::Outdated;
        }

        self.last_reset_time = full;
        self.in_sync = true;
        ResetOutcome::Accepted {
            reset_time: full,
            next_seqno: seqno_base(full),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jhash_is_deterministic() {
        // Same inputs must always produce the same hash -- both peers rely
        // on this to derive an identical sequence-number base.
        assert_eq!(jhash_1word(0, 0), jhash_1word(0, 0));
        assert_eq!(jhash_1word(12345, 0), 0x735a_b228);
        assert_ne!(jhash_1word(0, 0), jhash_1word(1, 0));
    }

    #[test]
    fn seqno_base_splats_hash_into_both_halves() {
        let base = seqno_base(12345);
        let h = hash_of_reset_time(12345) as u64;
        assert_eq!(base, 12345u64.wrapping_add(h).wrapping_add(h << 32));
    }

    #[test]
    fn reconstruct_56_picks_nearest_congruent_value() {
        let now = 10_000_000_000u64;
        let full = 9_999_999_000u64;
        let partial = full & ((1u64 << 56) - 1);
        assert_eq!(reconstruct_56(partial, now), full);
    }

    #[test]
    fn reset_idempotence() {
        let mut rm = ResetManager::new(1_000_000_000);
        let now = 1_000_000_000u64;
        let partial = now & ((1u64 << 56) - 1);

        match rm.handle_reset(partial, now) {
            ResetOutcome::Accepted { reset_time, .. } => assert_eq!(reset_time, now),
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert!(rm.in_sync);

        match rm.handle_reset(partial, now) {
            ResetOutcome::Redundant => {}
            other => panic!("expected Redundant, got {other:?}"),
        }
        assert_eq!(rm.last_reset_time, now);
    }

    #[test]
    fn out_of_window_reset_is_rejected() {
        let mut rm = ResetManager::new(1_000_000_000); // 1s window
        let now = 10_000_000_000u64; // 10s
        let stale = 2_000_000_000u64; // 2s
        let partial = stale & ((1u64 << 56) - 1);

        // reconstruct_56 will land near `now`, not at `stale`, since it
        // picks the nearest congruent value -- so force an actual
        // out-of-window partial by using a full timestamp far from now
        // that still reconstructs to itself (within the +-2^55 range).
        let outcome = rm.handle_reset(partial, now);
        assert_eq!(outcome, ResetOutcome::OutOfWindow);
    }
}
