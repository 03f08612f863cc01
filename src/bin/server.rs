//! `arbiter`: a minimal Fastpass peer that acknowledges every packet it
//! receives. Out of scope for the reliability core (it plays the role of
//! the scheduler on the other end of the wire, not the qdisc side this
//! crate implements) so it talks the wire codec directly instead of going
//! through `Session`.

use std::net::UdpSocket;

use fastpass_proto::fastpass::{encode_ack_payload, parse_header, HEADER_LEN};

fn main() {
    tracing_subscriber::fmt::init();

    let socket = UdpSocket::bind("127.0.0.1:34343").expect("bind arbiter socket");
    tracing::info!(addr = ?socket.local_addr().unwrap(), "arbiter listening");

    let mut buf = [0u8; 1500];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "recv failed");
                continue;
            }
        };

        let bytes = &buf[..n];
        let header = match parse_header(bytes) {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed packet");
                continue;
            }
        };

        tracing::debug!(seqno_low16 = header.seqno_low16, from = ?peer, "received packet");

        let mut reply = vec![0u8; HEADER_LEN];
        reply.extend_from_slice(&encode_ack_payload(header.seqno_low16, 0));
        if let Err(e) = socket.send_to(&reply, peer) {
            tracing::warn!(error = %e, "ack send failed");
        }
    }
}
