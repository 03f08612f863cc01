//! Counters exposed by the session (§6).

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub rx_pkts: u64,
    pub rx_too_short: u64,
    pub rx_incomplete_reset: u64,
    pub rx_incomplete_alloc: u64,
    pub rx_incomplete_ack: u64,
    pub rx_unknown_payload: u64,
    pub redundant_reset: u64,
    pub reset_out_of_window: u64,
    pub outdated_reset: u64,
    pub too_early_ack: u64,
    pub fall_off_outwnd: u64,
    pub xmit_errors: u64,
    pub skb_alloc_error: u64,
}
