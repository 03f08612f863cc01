//! Session state (C7): holds the outstanding window, reset manager, timer,
//! and stats behind one mutex; exposes commit/send/receive; dispatches to
//! the upper-layer collaborator. See §5: the core re-uses a single lock
//! rather than introducing its own, which here is simply the mutex guarding
//! `SessionCore`.

use std::sync::{Arc, Mutex};

use crate::fastpass::callback::{NullUpper, Upper};
use crate::fastpass::clock::Clock;
use crate::fastpass::config::{ConfigError, SessionConfig};
use crate::fastpass::outwnd::OutstandingWindow;
use crate::fastpass::pktdesc::PacketDescriptor;
use crate::fastpass::reset::{ResetManager, ResetOutcome};
use crate::fastpass::stats::Stats;
use crate::fastpass::timer::RetransTimer;
use crate::fastpass::transport::Transport;
use crate::fastpass::wire::{self, Payload, WireError};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("invalid session configuration: {0}")]
    Config(#[from] ConfigError),
}

struct SessionCore {
    outwnd: OutstandingWindow,
    reset_mgr: ResetManager,
    stats: Stats,
    earliest_unacked: u64,
    send_timeout_us: u64,
    destroyed: bool,
    upper: Box<dyn Upper>,
}

/// Ties together the outstanding window, reset manager, retransmission
/// timer, and wire codec into the operations exposed to the upper layer.
pub struct Session {
    core: Arc<Mutex<SessionCore>>,
    timer: RetransTimer,
    transport: Box<dyn Transport>,
}

impl Session {
    pub fn new<C>(
        config: SessionConfig,
        clock: C,
        now_ns: u64,
        transport: Box<dyn Transport>,
        upper: Box<dyn Upper>,
    ) -> Result<Self, SetupError>
    where
        C: Clock + 'static,
    {
        config.validate()?;

        let mut outwnd = OutstandingWindow::new(config.outwnd_capacity);
        let mut reset_mgr = ResetManager::new(config.rst_win_ns);
        let next_seqno = reset_mgr.init(now_ns);
        outwnd.set_next_seqno(next_seqno);

        let core = Arc::new(Mutex::new(SessionCore {
            outwnd,
            reset_mgr,
            stats: Stats::default(),
            earliest_unacked: next_seqno,
            send_timeout_us: config.send_timeout_us,
            destroyed: false,
            upper,
        }));

        let core_for_timer = core.clone();
        let timer = RetransTimer::spawn(clock, move |now| retrans_tasklet(&core_for_timer, now));

        Ok(Session { core, timer, transport })
    }

    /// Builds a session with a no-op upper layer, for demos/tests that
    /// don't care about ALLOC/ACK/NACK delivery.
    pub fn with_null_upper<C>(
        config: SessionConfig,
        clock: C,
        now_ns: u64,
        transport: Box<dyn Transport>,
    ) -> Result<Self, SetupError>
    where
        C: Clock + 'static,
    {
        Self::new(config, clock, now_ns, transport, Box::new(NullUpper))
    }

    /// §4.5 `prepare_to_send`: evicts the packet about to fall off the
    /// window's trailing edge, if any, treating it as a NACK.
    pub fn prepare_to_send(&self, now_ns: u64) {
        let evicted = {
            let mut core = self.core.lock().unwrap();
            let window_edge = core.outwnd.next_seqno().wrapping_sub(core.outwnd.capacity() as u64);
            if core.outwnd.is_unacked(window_edge) {
                let desc = core.outwnd.pop(window_edge);
                core.stats.fall_off_outwnd += 1;
                core.upper.handle_neg_ack(desc);
                tracing::debug!(seqno = window_edge, now_ns, "packet fell off outstanding window");
                true
            } else {
                false
            }
        };
        if evicted {
            self.cancel_and_reset();
        }
    }

    /// §4.5 `commit`: stamps and admits `desc`, arming the timer if the
    /// window was empty. Returns the stamped descriptor, ready for `send`.
    pub fn commit(&self, mut desc: PacketDescriptor, now_ns: u64) -> PacketDescriptor {
        let mut core = self.core.lock().unwrap();

        let seqno = core.outwnd.next_seqno();
        desc.seqno = seqno;
        desc.sent_timestamp_ns = now_ns;
        desc.send_reset = !core.reset_mgr.in_sync;
        desc.reset_timestamp_ns = core.reset_mgr.last_reset_time;

        let wire_copy = desc.clone();
        core.outwnd.add(desc);

        let became_first = core.outwnd.tx_num_unacked() == 1;
        let deadline = if became_first {
            core.earliest_unacked = seqno;
            Some(now_ns + core.send_timeout_us)
        } else {
            None
        };
        drop(core);

        if let Some(deadline) = deadline {
            tracing::debug!(seqno, deadline, "arming retransmission timer for first in-flight packet");
            self.timer.arm(deadline);
        }
        wire_copy
    }

    /// Snapshot of the counters in §6.
    pub fn stats(&self) -> Stats {
        self.core.lock().unwrap().stats
    }

    /// §4.5 `send`: serializes and hands the packet to the transport. A
    /// transport error is counted, never retried -- the timer provides
    /// reliability on the already-committed descriptor.
    pub fn send(&self, desc: &PacketDescriptor) {
        let bytes = wire::encode_packet(desc);
        if self.transport.send(&bytes).is_err() {
            let mut core = self.core.lock().unwrap();
            core.stats.xmit_errors += 1;
            tracing::warn!(seqno = desc.seqno, "transmit failed; relying on retransmission timer");
        }
    }

    /// §4.5 `receive`: parses `bytes` and dispatches each payload.
    pub fn receive(&self, bytes: &[u8], now_ns: u64) {
        if wire::parse_header(bytes).is_err() {
            self.core.lock().unwrap().stats.rx_too_short += 1;
            return;
        }
        self.core.lock().unwrap().stats.rx_pkts += 1;

        let mut reader = wire::PayloadReader::new(&bytes[wire::HEADER_LEN..]);
        for item in &mut reader {
            match item {
                Ok(Payload::Reset { partial_timestamp }) => {
                    self.handle_reset_payload(partial_timestamp, now_ns)
                }
                Ok(Payload::Ack { ack_seq, ack_runlen }) => self.handle_ack_payload(ack_seq, ack_runlen),
                Ok(Payload::Alloc { base_tslot, dst, tslots }) => {
                    self.core.lock().unwrap().upper.handle_alloc(base_tslot, &dst, &tslots);
                }
                Err(e) => {
                    let mut core = self.core.lock().unwrap();
                    match e {
                        WireError::TooShort => core.stats.rx_too_short += 1,
                        WireError::IncompleteReset => core.stats.rx_incomplete_reset += 1,
                        WireError::IncompleteAlloc => core.stats.rx_incomplete_alloc += 1,
                        WireError::IncompleteAck => core.stats.rx_incomplete_ack += 1,
                        WireError::UnknownPayload(_) => core.stats.rx_unknown_payload += 1,
                    }
                    tracing::warn!(error = %e, "dropping remainder of malformed packet");
                    break;
                }
            }
        }
    }

    fn handle_reset_payload(&self, partial_timestamp: u64, now_ns: u64) {
        let became_empty_window;
        {
            let mut core = self.core.lock().unwrap();
            match core.reset_mgr.handle_reset(partial_timestamp, now_ns) {
                ResetOutcome::ConfirmedInSync => {
                    tracing::debug!("reset confirmed, now in sync");
                    became_empty_window = false;
                }
                ResetOutcome::Redundant => {
                    core.stats.redundant_reset += 1;
                    became_empty_window = false;
                }
                ResetOutcome::OutOfWindow => {
                    core.stats.reset_out_of_window += 1;
                    became_empty_window = false;
                }
                ResetOutcome::Outdated => {
                    core.stats.outdated_reset += 1;
                    became_empty_window = false;
                }
                ResetOutcome::Accepted { next_seqno, .. } => {
                    let drained = core.outwnd.reset();
                    core.outwnd.set_next_seqno(next_seqno);
                    core.earliest_unacked = next_seqno;
                    for desc in drained {
                        core.upper.handle_neg_ack(desc);
                    }
                    core.upper.handle_reset();
                    tracing::debug!(next_seqno, "accepted new reset epoch");
                    became_empty_window = true;
                }
            }
        }
        if became_empty_window {
            self.cancel_and_reset();
        }
    }

    fn handle_ack_payload(&self, ack_seq: u16, ack_runlen: u32) {
        let mut n_acked = 0u32;
        {
            let mut core = self.core.lock().unwrap();
            let next_seqno = core.outwnd.next_seqno();
            let mut cur_seqno = next_seqno.wrapping_sub(1u64 << 16);
            cur_seqno = cur_seqno.wrapping_add((ack_seq as u64).wrapping_sub(cur_seqno) & 0xFFFF);

            if cur_seqno.wrapping_add(core.outwnd.capacity() as u64) < next_seqno {
                core.stats.too_early_ack += 1;
                return;
            }

            if core.outwnd.is_unacked(cur_seqno) {
                let desc = core.outwnd.pop(cur_seqno);
                core.upper.handle_ack(desc);
                n_acked += 1;
            }

            let mut end_seqno = cur_seqno.wrapping_sub(1);
            let mut runlen = ack_runlen << 4;

            'runs: loop {
                cur_seqno = end_seqno;
                end_seqno = end_seqno.wrapping_sub((runlen >> 28) as u64);
                runlen <<= 4;

                loop {
                    let offset = core.outwnd.at_or_before(cur_seqno);
                    if offset < 0 {
                        break 'runs;
                    }
                    cur_seqno = cur_seqno.wrapping_sub(offset as u64);

                    if cur_seqno > end_seqno {
                        let desc = core.outwnd.pop(cur_seqno);
                        core.upper.handle_ack(desc);
                        n_acked += 1;
                        continue;
                    }
                    break;
                }

                // finished this ack run; skip over the unacked run that
                // follows it (the next nibble) before resuming the scan
                if runlen != 0 {
                    end_seqno = end_seqno.wrapping_sub((runlen >> 28) as u64);
                    runlen <<= 4;
                } else {
                    break;
                }
            }
        }
        if n_acked > 0 {
            self.cancel_and_reset();
        }
    }

    /// §4.3 `cancel_and_reset`: tolerates a concurrently firing deferred
    /// task by simply giving up if the cancel loses the race.
    fn cancel_and_reset(&self) {
        if !self.timer.try_cancel() {
            return;
        }
        let deadline = {
            let mut core = self.core.lock().unwrap();
            if core.outwnd.empty() {
                None
            } else {
                let earliest = core.outwnd.earliest_unacked();
                core.earliest_unacked = earliest;
                Some(core.outwnd.timestamp(earliest) + core.send_timeout_us)
            }
        };
        if let Some(deadline) = deadline {
            self.timer.arm(deadline);
        }
    }

    /// Tears down the session: cancels the timer synchronously, drains the
    /// window (delivering NACKs for whatever was still outstanding).
    /// Idempotent and always safe to call.
    pub fn destroy(&self) {
        let drained = {
            let mut core = self.core.lock().unwrap();
            if core.destroyed {
                return;
            }
            core.destroyed = true;
            core.outwnd.reset()
        };
        self.timer.shutdown_and_join();
        let mut core = self.core.lock().unwrap();
        for desc in drained {
            core.upper.handle_neg_ack(desc);
        }
    }
}

/// The deferred task (retrans_tasklet): walks forward from the earliest
/// unacked entry, NACKing everything whose deadline has passed; returns
/// the next deadline to arm, or `None` if the window is now empty.
fn retrans_tasklet(core: &Arc<Mutex<SessionCore>>, now: u64) -> Option<u64> {
    let mut core = core.lock().unwrap();
    if core.destroyed {
        return None;
    }

    let mut hint = core.earliest_unacked;
    loop {
        if core.outwnd.empty() {
            return None;
        }
        let seqno = core.outwnd.earliest_unacked_hint(hint);
        let deadline = core.outwnd.timestamp(seqno) + core.send_timeout_us;
        if deadline > now {
            core.earliest_unacked = seqno;
            return Some(deadline);
        }
        let desc = core.outwnd.pop(seqno);
        core.upper.handle_neg_ack(desc);
        tracing::debug!(seqno, "retransmission timer expired, NACKing");
        hint = seqno;
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum UpperEvent {
        Reset,
        Ack(u64),
        NegAck(u64),
        Alloc(u32, usize, usize),
    }

    #[derive(Debug, Default)]
    pub struct RecordingUpper {
        pub events: Arc<StdMutex<Vec<UpperEvent>>>,
    }

    impl RecordingUpper {
        pub fn new() -> (Self, Arc<StdMutex<Vec<UpperEvent>>>) {
            let events = Arc::new(StdMutex::new(Vec::new()));
            (RecordingUpper { events: events.clone() }, events)
        }
    }

    impl Upper for RecordingUpper {
        fn handle_reset(&mut self) {
            self.events.lock().unwrap().push(UpperEvent::Reset);
        }
        fn handle_ack(&mut self, desc: PacketDescriptor) {
            self.events.lock().unwrap().push(UpperEvent::Ack(desc.seqno));
        }
        fn handle_neg_ack(&mut self, desc: PacketDescriptor) {
            self.events.lock().unwrap().push(UpperEvent::NegAck(desc.seqno));
        }
        fn handle_alloc(&mut self, base_tslot: u32, dst: &[u16], tslots: &[u8]) {
            self.events
                .lock()
                .unwrap()
                .push(UpperEvent::Alloc(base_tslot, dst.len(), tslots.len()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::fastpass::clock::FakeClock;
    use crate::fastpass::transport::testutil::RecordingTransport;

    fn new_session(clock: FakeClock, now: u64) -> (Session, Arc<std::sync::Mutex<Vec<UpperEvent>>>, Arc<RecordingTransport>) {
        let (upper, events) = RecordingUpper::new();
        let transport = Arc::new(RecordingTransport::default());
        let cfg = SessionConfig {
            outwnd_capacity: 8,
            send_timeout_us: 100_000_000, // 100ms, in ns-equivalent units for this fake-clock test
            rst_win_ns: 1_000_000_000,
        };
        let sess = Session::new(cfg, clock, now, Box::new(transport_proxy(transport.clone())), Box::new(upper)).unwrap();
        (sess, events, transport)
    }

    struct ProxyTransport(Arc<RecordingTransport>);
    impl Transport for ProxyTransport {
        fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
            self.0.send(bytes)
        }
    }
    fn transport_proxy(t: Arc<RecordingTransport>) -> ProxyTransport {
        ProxyTransport(t)
    }

    #[test]
    fn commit_stamps_and_admits_descriptor() {
        let clock = FakeClock::new(0);
        let (sess, _events, _transport) = new_session(clock, 1_000);
        let desc = PacketDescriptor::new(vec![]);
        let stamped = sess.commit(desc, 1_000);
        assert_eq!(stamped.sent_timestamp_ns, 1_000);
        assert!(stamped.send_reset);
    }

    #[test]
    fn fall_off_nack_on_prepare_to_send() {
        let clock = FakeClock::new(0);
        let (sess, events, _t) = new_session(clock, 0);

        for i in 0..8u64 {
            sess.prepare_to_send(i);
            let d = sess.commit(PacketDescriptor::new(vec![]), i);
            sess.send(&d);
        }
        // window is now full (8 == capacity); one more prepare_to_send
        // should evict and NACK the oldest.
        sess.prepare_to_send(8);
        let evs = events.lock().unwrap();
        assert!(evs.iter().any(|e| matches!(e, UpperEvent::NegAck(_))));
    }

    #[test]
    fn run_length_ack_decodes_expected_set() {
        let clock = FakeClock::new(0);
        let (sess, events, _t) = new_session(clock, 0);

        let mut last_seqno = 0;
        for i in 0..8u64 {
            sess.prepare_to_send(i);
            let d = sess.commit(PacketDescriptor::new(vec![]), i);
            last_seqno = d.seqno;
            sess.send(&d);
        }

        // carried seqno 7 is acked directly, then the run-length nibbles
        // (after the leading nibble the wire format always discards) walk
        // ack-run[1]=6, unacked-run[1]=5 (left outstanding, not acked),
        // ack-run[2]=4, and the field is then exhausted -- 3,2,1,0 are
        // never reached. This is the exact nibble walk fpproto_handle_ack
        // performs, not an illustrative approximation.
        let ack_seq = last_seqno as u16;
        let ack_runlen: u32 = 0x1_1_1_1_0_0_0_0;
        sess.receive(&build_ack_packet(ack_seq, ack_runlen), 100);

        let acked: Vec<u64> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                UpperEvent::Ack(seqno) => Some(*seqno),
                _ => None,
            })
            .collect();
        assert_eq!(acked, vec![7, 6, 4]);
        assert_eq!(sess.stats().fall_off_outwnd, 0);
    }

    fn build_ack_packet(ack_seq: u16, ack_runlen: u32) -> Vec<u8> {
        use crate::fastpass::wire::{encode_ack_payload, HEADER_LEN};
        let mut buf = vec![0u8; HEADER_LEN];
        buf.extend_from_slice(&encode_ack_payload(ack_seq, ack_runlen));
        buf
    }

    #[test]
    fn out_of_window_reset_counts_and_leaves_state() {
        let clock = FakeClock::new(0);
        let (sess, _events, _t) = new_session(clock, 10_000_000_000);

        let mut buf = vec![0u8; crate::fastpass::wire::HEADER_LEN];
        let partial = (2_000_000_000u64) & ((1u64 << 56) - 1);
        let hi = ((partial >> 32) as u32) & 0x00FF_FFFF;
        let lo = partial as u32;
        buf.extend_from_slice(&hi.to_be_bytes());
        buf.extend_from_slice(&lo.to_be_bytes());

        sess.receive(&buf, 10_000_000_000);
        assert_eq!(sess.stats().reset_out_of_window, 1);
    }
}
