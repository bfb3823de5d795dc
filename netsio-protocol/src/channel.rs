//! UDP channel carrying NetSIO messages to and from the peripheral emulator.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::{Message, ProtocolError};

/// Conventional NetSIO port of the peripheral emulator
pub const DEFAULT_NETSIO_PORT: u16 = 9997;

/// Largest datagram we ever expect: kind byte + full data block
const RECV_BUF_SIZE: usize = 1 + crate::MAX_DATA_BLOCK_SIZE;

/// One UDP socket bound to an ephemeral local port, talking to a single peer.
///
/// Sends never block. Receives are bounded by an explicit timeout and
/// discard malformed datagrams and traffic from foreign addresses rather
/// than failing.
pub struct UdpChannel {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpChannel {
    /// Open a channel to the given peer
    pub fn connect(peer: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_addr)?;
        Ok(UdpChannel { socket, peer })
    }

    /// The peer this channel talks to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a message to the peer without blocking
    pub fn send(&self, msg: &Message) -> Result<(), ProtocolError> {
        let encoded = msg.encode()?;
        self.socket.set_nonblocking(true)?;
        match self.socket.send_to(&encoded, self.peer) {
            Ok(_) => {
                trace!("-> {:?}", msg);
                Ok(())
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                // UDP send buffers are rarely full; drop rather than stall
                warn!("send buffer full, dropping {:?}", msg);
                Ok(())
            }
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }

    /// Wait up to `timeout` for the next message from the peer.
    ///
    /// Returns `Ok(None)` when the deadline passes without a decodable
    /// message. Malformed input is logged and discarded, and the wait
    /// continues until the deadline.
    pub fn recv(&self, timeout: Duration) -> Result<Option<Message>, ProtocolError> {
        let deadline = Instant::now() + timeout;
        self.socket.set_nonblocking(false)?;

        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // set_read_timeout rejects zero durations
            self.socket
                .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if !Self::same_peer(from, self.peer) {
                        trace!("ignoring datagram from foreign address {}", from);
                        continue;
                    }
                    match Message::decode(&buf[..n]) {
                        Ok(msg) => {
                            trace!("<- {:?}", msg);
                            return Ok(Some(msg));
                        }
                        Err(e) => {
                            warn!("discarding malformed datagram ({} bytes): {}", n, e);
                            continue;
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }

    /// Non-blocking receive: returns immediately with `Ok(None)` when no
    /// datagram is queued
    pub fn try_recv(&self) -> Result<Option<Message>, ProtocolError> {
        self.socket.set_nonblocking(true)?;

        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if !Self::same_peer(from, self.peer) {
                        trace!("ignoring datagram from foreign address {}", from);
                        continue;
                    }
                    match Message::decode(&buf[..n]) {
                        Ok(msg) => {
                            trace!("<- {:?}", msg);
                            return Ok(Some(msg));
                        }
                        Err(e) => {
                            warn!("discarding malformed datagram ({} bytes): {}", n, e);
                            continue;
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        }
    }

    fn same_peer(from: SocketAddr, peer: SocketAddr) -> bool {
        // An unspecified peer IP (tests binding 0.0.0.0) matches loopback
        from.port() == peer.port() && (from.ip() == peer.ip() || peer.ip().is_unspecified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn pair() -> (UdpChannel, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let channel = UdpChannel::connect(peer.local_addr().unwrap()).unwrap();
        (channel, peer)
    }

    #[test]
    fn test_send_recv() {
        let (channel, peer) = pair();

        channel.send(&Message::PingRequest).unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(Message::decode(&buf[..n]).unwrap(), Message::PingRequest);

        peer.send_to(&Message::PingResponse.encode().unwrap(), from)
            .unwrap();
        let msg = channel.recv(Duration::from_millis(500)).unwrap();
        assert_eq!(msg, Some(Message::PingResponse));
    }

    #[test]
    fn test_recv_timeout() {
        let (channel, _peer) = pair();
        let start = Instant::now();
        let msg = channel.recv(Duration::from_millis(30)).unwrap();
        assert_eq!(msg, None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_malformed_datagram_discarded() {
        let (channel, peer) = pair();

        // Learn the channel's address first
        channel.send(&Message::BusIdle).unwrap();
        let mut buf = [0u8; 16];
        let (_, from) = peer.recv_from(&mut buf).unwrap();

        // Unknown kind, then a valid message; the garbage must not surface
        peer.send_to(&[0x7E, 0x01, 0x02], from).unwrap();
        peer.send_to(&Message::AliveResponse.encode().unwrap(), from)
            .unwrap();

        let msg = channel.recv(Duration::from_millis(500)).unwrap();
        assert_eq!(msg, Some(Message::AliveResponse));
    }

    #[test]
    fn test_try_recv_empty() {
        let (channel, _peer) = pair();
        assert_eq!(channel.try_recv().unwrap(), None);
    }
}
