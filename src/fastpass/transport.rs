//! Datagram transport the session hands serialized frames to (out of scope
//! per the core: this is the "external collaborator" from §1, not part of
//! the reliability logic itself).

use std::io;
use std::net::{ToSocketAddrs, UdpSocket};

/// The kernel source's fixed control-protocol port (host order 1);
/// documented, not enforced -- binding to it needs privilege outside the
/// kernel context it came from.
pub const FASTPASS_PORT: u16 = 1;

pub trait Transport: Send + Sync {
    fn send(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Real transport: a connected `UdpSocket`.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn connect<A: ToSocketAddrs, B: ToSocketAddrs>(local: A, peer: B) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(peer)?;
        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Transport for UdpTransport {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send(bytes).map(|_| ())
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Records every frame handed to it instead of putting it on a wire.
    #[derive(Debug, Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<Vec<u8>>>,
        pub fail_next: Mutex<bool>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, bytes: &[u8]) -> io::Result<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(io::Error::new(io::ErrorKind::Other, "injected failure"));
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }
}
