//! `endpoint`: exercises a Fastpass session against the `arbiter` demo peer.
//! Commits and sends an AREQ packet once a second, and feeds every inbound
//! datagram back into the session.

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fastpass_proto::fastpass::{
    AllocReq, PacketDescriptor, Session, SessionConfig, SystemClock, Transport, Upper,
};

struct ConnectedUdp(UdpSocket);

impl Transport for ConnectedUdp {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.0.send(bytes).map(|_| ())
    }
}

struct PrintingUpper;

impl Upper for PrintingUpper {
    fn handle_reset(&mut self) {
        tracing::info!("peer confirmed reset");
    }
    fn handle_ack(&mut self, desc: PacketDescriptor) {
        tracing::info!(seqno = desc.seqno, "acked");
    }
    fn handle_neg_ack(&mut self, desc: PacketDescriptor) {
        tracing::info!(seqno = desc.seqno, "nacked");
    }
    fn handle_alloc(&mut self, base_tslot: u32, dst: &[u16], tslots: &[u8]) {
        tracing::info!(base_tslot, ?dst, n_tslots = tslots.len(), "alloc received");
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
}

fn main() {
    tracing_subscriber::fmt::init();

    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind endpoint socket");
    socket.connect("127.0.0.1:34343").expect("connect to arbiter");
    let recv_socket = socket.try_clone().expect("clone socket for receiver");

    let config = SessionConfig::default();
    let session = Arc::new(
        Session::new(
            config,
            SystemClock::new(),
            now_ns(),
            Box::new(ConnectedUdp(socket)),
            Box::new(PrintingUpper),
        )
        .expect("construct session"),
    );

    {
        let session = session.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 1500];
            loop {
                match recv_socket.recv(&mut buf) {
                    Ok(n) => session.receive(&buf[..n], now_ns()),
                    Err(e) => {
                        tracing::warn!(error = %e, "recv failed");
                        break;
                    }
                }
            }
        });
    }

    loop {
        let ts = now_ns();
        session.prepare_to_send(ts);
        let desc = PacketDescriptor::new(vec![AllocReq { dst_key: 1, tslot_count: 4 }]);
        let stamped = session.commit(desc, ts);
        session.send(&stamped);
        tracing::debug!(seqno = stamped.seqno, "sent");
        thread::sleep(Duration::from_secs(1));
    }
}
