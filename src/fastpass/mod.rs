//! Fastpass control-protocol reliability core: an outstanding window, a
//! retransmission timer, a reset/epoch handshake, and a wire codec for
//! RESET/ALLOC/ACK/AREQ frames. Socket plumbing and the qdisc scheduling
//! logic that sits above this sit outside the module; see [`Upper`] and
//! [`Transport`] for the seams.

mod callback;
mod clock;
mod config;
mod outwnd;
mod pktdesc;
mod reset;
mod session;
mod stats;
mod timer;
mod transport;
mod wire;

pub use callback::{NullUpper, Upper};
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, SessionConfig};
pub use pktdesc::{AllocReq, DescriptorPool, PacketDescriptor};
pub use reset::ResetOutcome;
pub use session::{SetupError, Session};
pub use stats::Stats;
pub use transport::{Transport, UdpTransport, FASTPASS_PORT};
pub use wire::{encode_ack_payload, parse_header, FrameHeader, Payload, WireError, HEADER_LEN};
