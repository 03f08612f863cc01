//! Session configuration (mirrors `inet-rip`'s `RipConfig`: a plain data
//! struct with a `Default` impl carrying the protocol's literal constants).

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Outstanding-window capacity; must be a power of two. Source uses 256.
    pub outwnd_capacity: usize,
    /// Retransmission deadline relative to send time, in microseconds.
    pub send_timeout_us: u64,
    /// Acceptable window around "now" for peer reset timestamps, in ns.
    pub rst_win_ns: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            outwnd_capacity: 256,
            send_timeout_us: 2_000,
            rst_win_ns: 2_000_000_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("outstanding window capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.outwnd_capacity.is_power_of_two() {
            return Err(ConfigError::CapacityNotPowerOfTwo(self.outwnd_capacity));
        }
        Ok(())
    }
}
