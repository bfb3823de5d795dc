//! Connection lifecycle for the NetSIO link: resolve, handshake, keep-alive,
//! loss detection and reconnection with escalating backoff.
//!
//! All waits are deadline-bounded. Backoff and reconnection are driven by
//! deadlines checked from `tick`, never by sleeping the emulation thread;
//! the only short blocking waits are the 50 ms handshake ping windows.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use netsio_protocol::{Message, UdpChannel};

/// Default bus speed negotiated until the peer requests otherwise
pub const DEFAULT_BAUD: u32 = 19_200;

/// Silence before a keep-alive request is emitted
pub(crate) const ALIVE_AFTER: Duration = Duration::from_millis(1000);

/// Total silence before liveness is considered lost
pub(crate) const SILENCE_LIMIT: Duration = Duration::from_millis(5000);

const HANDSHAKE_PING_GAP: Duration = Duration::from_millis(50);
const HANDSHAKE_PING_TIMEOUT: Duration = Duration::from_millis(50);
const DIAG_PING_GAP: Duration = Duration::from_secs(1);
const DIAG_PING_TIMEOUT: Duration = Duration::from_secs(2);
const LOSS_SUSPEND: Duration = Duration::from_secs(5);

/// Backoff bands in milliseconds: below the error threshold the low value
/// applies, from the threshold on the high one
const BACKOFF_INITIAL_MS: (u64, u64) = (400, 2000);
const BACKOFF_RECONNECT_MS: (u64, u64) = (1000, 5000);
const BACKOFF_ERROR_THRESHOLD: u32 = 5;

/// Consecutive reconnect failures before the unreachable flag is raised
/// for the UI; retries continue regardless
pub const MAX_REBUILD_ATTEMPTS: u32 = 8;

/// Connection state machine positions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Resolving,
    Handshaking,
    Connected,
    Reconnecting,
}

/// Snapshot of connection state for a UI indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnStatus {
    pub state: ConnState,
    pub error_count: u32,
    pub unreachable: bool,
    pub baud: u32,
}

impl ConnStatus {
    fn initial() -> Self {
        ConnStatus {
            state: ConnState::Disconnected,
            error_count: 0,
            unreachable: false,
            baud: DEFAULT_BAUD,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DiagState {
    first_sent: Instant,
    second_sent: Option<Instant>,
}

/// The single per-instance connection. Fields are reset, not re-allocated,
/// across reconnects; drive slots and the boot flag live elsewhere and
/// survive every rebuild.
pub struct Connection {
    target: String,
    state: ConnState,
    channel: Option<UdpChannel>,
    peer: Option<SocketAddr>,
    last_rx: Instant,
    last_alive_request: Option<Instant>,
    error_count: u32,
    baud: u32,
    enabled: bool,
    reconnecting_band: bool,
    next_attempt: Option<Instant>,
    diag: Option<DiagState>,
    unreachable: bool,
    shared: Arc<Mutex<ConnStatus>>,
}

impl Connection {
    pub fn new(target: String) -> Self {
        Connection {
            target,
            state: ConnState::Disconnected,
            channel: None,
            peer: None,
            last_rx: Instant::now(),
            last_alive_request: None,
            error_count: 0,
            baud: DEFAULT_BAUD,
            enabled: false,
            reconnecting_band: false,
            next_attempt: None,
            diag: None,
            unreachable: false,
            shared: Arc::new(Mutex::new(ConnStatus::initial())),
        }
    }

    /// Shared status cell for UI snapshots
    pub fn status_handle(&self) -> Arc<Mutex<ConnStatus>> {
        self.shared.clone()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn unreachable(&self) -> bool {
        self.unreachable
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn set_baud(&mut self, baud: u32) {
        self.baud = baud;
        self.publish();
    }

    pub fn channel(&self) -> Option<&UdpChannel> {
        self.channel.as_ref()
    }

    /// Skip resolve/handshake and attach an already-open channel
    #[cfg(test)]
    pub(crate) fn force_connected_for_tests(&mut self, channel: UdpChannel) {
        self.enabled = true;
        self.channel = Some(channel);
        self.state = ConnState::Connected;
        self.last_rx = Instant::now();
        self.publish();
    }

    /// Backdate the silence clock to drive liveness-loss paths
    #[cfg(test)]
    pub(crate) fn age_last_rx_for_tests(&mut self, age: Duration) {
        self.last_rx = Instant::now() - age;
    }

    /// Any inbound traffic resets the silence clock
    pub fn note_rx(&mut self) {
        self.last_rx = Instant::now();
    }

    /// Begin connecting on the initial-connect backoff band
    pub fn start(&mut self) {
        self.enabled = true;
        self.reconnecting_band = false;
        self.next_attempt = None;
        if self.state == ConnState::Disconnected {
            self.state = ConnState::Resolving;
        }
        self.publish();
    }

    /// Tear down: notify the peer, close the socket, stop retrying
    pub fn stop(&mut self) {
        if let Some(channel) = &self.channel {
            let _ = channel.send(&Message::DeviceDisconnect);
        }
        self.channel = None;
        self.diag = None;
        self.next_attempt = None;
        self.enabled = false;
        self.state = ConnState::Disconnected;
        self.publish();
    }

    /// Send a message if a socket is open; transport errors are logged,
    /// never fatal
    pub fn send(&self, msg: &Message) {
        if let Some(channel) = &self.channel {
            if let Err(e) = channel.send(msg) {
                warn!("send failed: {}", e);
            }
        }
    }

    /// Drive the state machine; called once per frame and before each bus
    /// transaction that needs the link
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            ConnState::Disconnected => {
                if self.enabled && self.due(now) {
                    self.state = ConnState::Resolving;
                }
            }
            ConnState::Resolving => {
                if self.due(now) {
                    self.resolve_and_open(now);
                }
            }
            ConnState::Handshaking => {
                if self.handshake() {
                    info!("connected to peripheral emulator at {}", self.target);
                    self.state = ConnState::Connected;
                    self.error_count = 0;
                    self.unreachable = false;
                    self.last_rx = now;
                    self.last_alive_request = None;
                } else {
                    debug!("handshake with {} failed", self.target);
                    self.channel = None;
                    self.fail_attempt(now);
                }
            }
            ConnState::Connected => {
                self.check_liveness(now);
            }
            ConnState::Reconnecting => {
                self.run_diagnostics(now);
            }
        }
        self.publish();
    }

    fn due(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    fn resolve_and_open(&mut self, now: Instant) {
        let resolved = self
            .target
            .to_socket_addrs()
            .map(|mut addrs| addrs.next())
            .unwrap_or(None);

        let peer = match resolved {
            Some(addr) => addr,
            None => {
                warn!("cannot resolve '{}'", self.target);
                self.fail_attempt(now);
                return;
            }
        };

        match UdpChannel::connect(peer) {
            Ok(channel) => {
                let _ = channel.send(&Message::DeviceConnect);
                self.peer = Some(peer);
                self.channel = Some(channel);
                self.state = ConnState::Handshaking;
            }
            Err(e) => {
                warn!("cannot open socket to {}: {}", peer, e);
                self.fail_attempt(now);
            }
        }
    }

    /// Two pings, 50 ms apart, 50 ms response window each; both must answer
    fn handshake(&mut self) -> bool {
        let channel = match &self.channel {
            Some(c) => c,
            None => return false,
        };

        for attempt in 0..2 {
            if attempt == 1 {
                std::thread::sleep(HANDSHAKE_PING_GAP);
            }
            if channel.send(&Message::PingRequest).is_err() {
                return false;
            }

            let deadline = Instant::now() + HANDSHAKE_PING_TIMEOUT;
            let mut answered = false;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match channel.recv(remaining) {
                    Ok(Some(Message::PingResponse)) => {
                        answered = true;
                        break;
                    }
                    // Stale traffic from a previous epoch; keep waiting
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            if !answered {
                return false;
            }
        }
        true
    }

    fn check_liveness(&mut self, now: Instant) {
        let silence = now.saturating_duration_since(self.last_rx);
        if silence >= SILENCE_LIMIT {
            warn!(
                "peer silent for {} ms, probing with diagnostic pings",
                silence.as_millis()
            );
            self.state = ConnState::Reconnecting;
            self.reconnecting_band = true;
            self.last_alive_request = None;
            self.send(&Message::PingRequest);
            self.diag = Some(DiagState {
                first_sent: now,
                second_sent: None,
            });
        } else if silence >= ALIVE_AFTER {
            let request_due = self
                .last_alive_request
                .map_or(true, |at| now.saturating_duration_since(at) >= ALIVE_AFTER);
            if request_due {
                self.send(&Message::AliveRequest);
                self.last_alive_request = Some(now);
            }
        }
    }

    /// Non-blocking diagnostic-ping sequence after liveness loss
    fn run_diagnostics(&mut self, now: Instant) {
        let diag = match self.diag {
            Some(d) => d,
            None => {
                // Between suspend periods, or channel already torn down
                if self.due(now) {
                    if self.channel.is_some() {
                        self.send(&Message::PingRequest);
                        self.diag = Some(DiagState {
                            first_sent: now,
                            second_sent: None,
                        });
                    } else {
                        self.state = ConnState::Resolving;
                    }
                }
                return;
            }
        };

        // Poll for a response to either ping
        let mut answered = false;
        if let Some(channel) = &self.channel {
            while let Ok(Some(msg)) = channel.try_recv() {
                if msg == Message::PingResponse {
                    answered = true;
                }
            }
        }

        if answered {
            info!("peer answered diagnostics, rebuilding connection");
            self.diag = None;
            self.rebuild(now);
            return;
        }

        if diag.second_sent.is_none()
            && now.saturating_duration_since(diag.first_sent) >= DIAG_PING_GAP
        {
            self.send(&Message::PingRequest);
            self.diag = Some(DiagState {
                second_sent: Some(now),
                ..diag
            });
            return;
        }

        let both_expired = match diag.second_sent {
            Some(second) => now.saturating_duration_since(second) >= DIAG_PING_TIMEOUT,
            None => false,
        } && now.saturating_duration_since(diag.first_sent) >= DIAG_PING_TIMEOUT;

        if both_expired {
            self.diag = None;
            self.error_count += 1;
            self.note_reconnect_failure();
            self.next_attempt = Some(now + LOSS_SUSPEND);
            debug!(
                "diagnostic pings unanswered, suspending {} ms (errors: {})",
                LOSS_SUSPEND.as_millis(),
                self.error_count
            );
        }
    }

    /// Full teardown and rebuild: close the socket, tell the peer, re-run
    /// the Resolving -> Handshaking path. Drive slots and the boot flag are
    /// owned elsewhere and deliberately untouched.
    fn rebuild(&mut self, _now: Instant) {
        if let Some(channel) = &self.channel {
            let _ = channel.send(&Message::DeviceDisconnect);
        }
        self.channel = None;
        self.next_attempt = None;
        self.state = ConnState::Resolving;
    }

    fn fail_attempt(&mut self, now: Instant) {
        self.error_count += 1;
        if self.reconnecting_band {
            self.note_reconnect_failure();
        }
        let suspend = self.backoff_duration();
        self.next_attempt = Some(now + suspend);
        self.state = ConnState::Disconnected;
        debug!(
            "connect attempt {} failed, retrying in {} ms",
            self.error_count,
            suspend.as_millis()
        );
    }

    fn note_reconnect_failure(&mut self) {
        if self.error_count >= MAX_REBUILD_ATTEMPTS && !self.unreachable {
            self.unreachable = true;
            warn!("peripheral emulator unreachable (still retrying)");
        }
    }

    /// Current suspend interval per the escalation rule
    pub(crate) fn backoff_duration(&self) -> Duration {
        let (low, high) = if self.reconnecting_band {
            BACKOFF_RECONNECT_MS
        } else {
            BACKOFF_INITIAL_MS
        };
        Duration::from_millis(if self.error_count < BACKOFF_ERROR_THRESHOLD {
            low
        } else {
            high
        })
    }

    fn publish(&self) {
        let mut shared = crate::relock(&self.shared);
        shared.state = self.state;
        shared.error_count = self.error_count;
        shared.unreachable = self.unreachable;
        shared.baud = self.baud;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn recv_kind(peer: &UdpSocket) -> Option<Message> {
        peer.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 600];
        match peer.recv_from(&mut buf) {
            Ok((n, _)) => Message::decode(&buf[..n]).ok(),
            Err(_) => None,
        }
    }

    fn connected_pair() -> (Connection, UdpSocket) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = format!("127.0.0.1:{}", peer.local_addr().unwrap().port());
        let mut conn = Connection::new(target);
        conn.enabled = true;
        conn.channel = Some(UdpChannel::connect(peer.local_addr().unwrap()).unwrap());
        conn.state = ConnState::Connected;
        conn.last_rx = Instant::now();
        (conn, peer)
    }

    #[test]
    fn test_backoff_bands() {
        let mut conn = Connection::new("localhost:9997".to_string());

        conn.error_count = 0;
        assert_eq!(conn.backoff_duration(), Duration::from_millis(400));
        conn.error_count = 4;
        assert_eq!(conn.backoff_duration(), Duration::from_millis(400));
        conn.error_count = 5;
        assert_eq!(conn.backoff_duration(), Duration::from_millis(2000));

        conn.reconnecting_band = true;
        conn.error_count = 2;
        assert_eq!(conn.backoff_duration(), Duration::from_millis(1000));
        conn.error_count = 6;
        assert_eq!(conn.backoff_duration(), Duration::from_millis(5000));
    }

    #[test]
    fn test_backoff_escalates_monotonically() {
        let mut conn = Connection::new("127.0.0.1:1".to_string());
        conn.enabled = true;
        let now = Instant::now();

        let mut last = Duration::ZERO;
        for _ in 0..6 {
            conn.fail_attempt(now);
            let current = conn.backoff_duration();
            assert!(current >= last);
            last = current;
        }
        assert_eq!(last, Duration::from_millis(2000));
    }

    #[test]
    fn test_keepalive_after_one_second_of_silence() {
        let (mut conn, peer) = connected_pair();
        conn.last_rx = Instant::now() - Duration::from_millis(1200);

        conn.tick(Instant::now());
        assert_eq!(conn.state(), ConnState::Connected);
        assert_eq!(recv_kind(&peer), Some(Message::AliveRequest));

        // Within the next second no further request is emitted
        conn.tick(Instant::now());
        peer.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut buf = [0u8; 16];
        assert!(peer.recv_from(&mut buf).is_err());
    }

    #[test]
    fn test_silence_limit_triggers_diagnostics() {
        let (mut conn, peer) = connected_pair();
        conn.last_rx = Instant::now() - Duration::from_millis(5100);

        conn.tick(Instant::now());
        assert_eq!(conn.state(), ConnState::Reconnecting);
        assert_eq!(recv_kind(&peer), Some(Message::PingRequest));
    }

    #[test]
    fn test_diag_response_rebuilds() {
        let (mut conn, peer) = connected_pair();
        conn.last_rx = Instant::now() - Duration::from_millis(5100);
        conn.tick(Instant::now());
        assert_eq!(conn.state(), ConnState::Reconnecting);

        // Answer the diagnostic ping; next tick tears down and resolves anew
        let mut buf = [0u8; 16];
        let (_, from) = peer.recv_from(&mut buf).unwrap();
        peer.send_to(&Message::PingResponse.encode().unwrap(), from)
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        conn.tick(Instant::now());
        assert_eq!(conn.state(), ConnState::Resolving);
        assert!(conn.channel.is_none());
    }

    #[test]
    fn test_handshake_success() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 600];
            peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut pings = 0;
            while pings < 2 {
                if let Ok((n, from)) = peer.recv_from(&mut buf) {
                    if let Ok(Message::PingRequest) = Message::decode(&buf[..n]) {
                        peer.send_to(&Message::PingResponse.encode().unwrap(), from)
                            .unwrap();
                        pings += 1;
                    }
                }
            }
        });

        let mut conn = Connection::new(format!("127.0.0.1:{}", peer_addr.port()));
        conn.enabled = true;
        conn.channel = Some(UdpChannel::connect(peer_addr).unwrap());
        conn.state = ConnState::Handshaking;
        conn.tick(Instant::now());

        assert_eq!(conn.state(), ConnState::Connected);
        assert_eq!(conn.error_count(), 0);
        responder.join().unwrap();
    }

    #[test]
    fn test_handshake_timeout_backs_off() {
        // Nobody answers on this socket
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut conn = Connection::new(format!(
            "127.0.0.1:{}",
            peer.local_addr().unwrap().port()
        ));
        conn.enabled = true;
        conn.channel = Some(UdpChannel::connect(peer.local_addr().unwrap()).unwrap());
        conn.state = ConnState::Handshaking;
        conn.tick(Instant::now());

        assert_eq!(conn.state(), ConnState::Disconnected);
        assert_eq!(conn.error_count(), 1);
        assert!(conn.next_attempt.is_some());
    }

    #[test]
    fn test_status_snapshot_published() {
        let mut conn = Connection::new("localhost:9997".to_string());
        let handle = conn.status_handle();
        conn.start();
        let status = *handle.lock().unwrap();
        assert_eq!(status.state, ConnState::Resolving);
        assert_eq!(status.baud, DEFAULT_BAUD);
    }
}
