//! Network worker thread
//!
//! Owns one connection to the helmet and runs blocking socket I/O on a
//! dedicated thread, emitting decoded messages and status changes over an
//! mpsc channel. TCP mode reconnects forever with a fixed wait between
//! attempts; UDP mode binds once and treats receive timeouts as idle polling.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::framing::FrameDecoder;
use super::types::{ConnDescriptor, ConnState, ConnStatus, WorkerEvent};
use crate::types::Transport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const DATAGRAM_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default wait between TCP reconnect attempts
pub const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(5);

/// Shared control surface for a running worker
///
/// Held by the ingestion manager; `stop` and `send` are safe from any thread.
#[derive(Clone)]
pub struct WorkerHandle {
    running: Arc<AtomicBool>,
    socket: Arc<Mutex<Option<TcpStream>>>,
}

impl WorkerHandle {
    /// Request cooperative shutdown
    ///
    /// Clears the running flag and shuts the socket down to unblock a pending
    /// read; the worker thread observes the flag within one I/O timeout.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.socket.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Write a newline-terminated JSON message to the helmet
    ///
    /// Returns false without raising when not connected. Only the stream
    /// transport supports sending; on UDP the socket slot is never populated.
    pub fn send(&self, data: &serde_json::Value) -> bool {
        let guard = self.socket.lock();
        let Some(stream) = guard.as_ref() else {
            return false;
        };

        let mut line = match serde_json::to_vec(data) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode outbound message: {}", e);
                return false;
            }
        };
        line.push(b'\n');

        let mut writer = stream;
        match writer.write_all(&line) {
            Ok(()) => true,
            Err(e) => {
                warn!("Send error: {}", e);
                false
            }
        }
    }
}

/// Worker that runs the connection state machine on a blocking thread
pub struct NetWorker {
    desc: ConnDescriptor,
    reconnect_wait: Duration,
    state: ConnState,
    running: Arc<AtomicBool>,
    /// Shared clone of the connected stream, used by [`WorkerHandle::send`]
    socket: Arc<Mutex<Option<TcpStream>>>,
    event_tx: Sender<WorkerEvent>,
}

impl NetWorker {
    /// Create a worker and its control handle
    pub fn new(desc: ConnDescriptor, event_tx: Sender<WorkerEvent>) -> (Self, WorkerHandle) {
        let running = Arc::new(AtomicBool::new(true));
        let socket = Arc::new(Mutex::new(None));

        let handle = WorkerHandle {
            running: Arc::clone(&running),
            socket: Arc::clone(&socket),
        };

        let worker = Self {
            desc,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            state: ConnState::Disconnected,
            running,
            socket,
            event_tx,
        };

        (worker, handle)
    }

    /// Override the wait between reconnect attempts
    pub fn with_reconnect_wait(mut self, wait: Duration) -> Self {
        self.reconnect_wait = wait;
        self
    }

    /// Run the blocking connection loop until stopped
    pub fn run(&mut self) {
        info!(
            "Network worker started ({} {}:{})",
            self.desc.transport.label(),
            self.desc.host,
            self.desc.port
        );

        match self.desc.transport {
            Transport::Tcp => self.run_tcp(),
            Transport::Udp => self.run_udp(),
        }

        *self.socket.lock() = None;
        self.set_state(ConnState::Disconnected);
        info!("Network worker stopped");
    }

    /// TCP client with a reconnect cycle
    fn run_tcp(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.set_state(ConnState::Connecting);

            match self.connect_tcp() {
                Ok(stream) => {
                    self.set_state(ConnState::Connected);
                    self.emit_status(ConnStatus::connected(&self.desc));
                    info!("Connected to {}:{} over TCP", self.desc.host, self.desc.port);

                    self.receive_loop(stream);

                    *self.socket.lock() = None;
                    self.emit_status(ConnStatus::disconnected());
                }
                Err(e) => {
                    self.emit_error(format!("Connection error: {}", e));
                    self.emit_status(ConnStatus::disconnected());
                }
            }

            if self.running.load(Ordering::SeqCst) {
                self.set_state(ConnState::ReconnectWait);
                self.wait_for_reconnect();
            }
        }
    }

    fn connect_tcp(&self) -> std::io::Result<TcpStream> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        *self.socket.lock() = Some(stream.try_clone()?);
        Ok(stream)
    }

    /// Read frames until the peer closes, an error occurs, or stop is requested
    fn receive_loop(&mut self, mut stream: TcpStream) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        while self.running.load(Ordering::SeqCst) {
            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("Peer closed the connection");
                    break;
                }
                Ok(n) => {
                    for message in decoder.push(&buf[..n]) {
                        let _ = self.event_tx.send(WorkerEvent::Data(message));
                    }
                }
                // Read timeout: idle polling so the stop flag gets checked
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    self.emit_error(format!("Receive error: {}", e));
                    break;
                }
            }
        }
    }

    /// UDP listener: bind once, no reconnect cycle
    fn run_udp(&mut self) {
        self.set_state(ConnState::Connecting);

        let socket = match UdpSocket::bind(("0.0.0.0", self.desc.port)) {
            Ok(socket) => socket,
            Err(e) => {
                self.emit_error(format!("UDP setup error: {}", e));
                return;
            }
        };
        if let Err(e) = socket.set_read_timeout(Some(DATAGRAM_TIMEOUT)) {
            self.emit_error(format!("UDP setup error: {}", e));
            return;
        }

        self.set_state(ConnState::Connected);
        self.emit_status(ConnStatus {
            connected: true,
            protocol: Some(Transport::Udp.label().to_string()),
            host: None,
            port: Some(self.desc.port),
        });
        info!("Listening for datagrams on port {}", self.desc.port);

        let mut buf = [0u8; 4096];
        while self.running.load(Ordering::SeqCst) {
            match socket.recv_from(&mut buf) {
                Ok((n, _addr)) => {
                    if let Some(message) = FrameDecoder::decode_datagram(&buf[..n]) {
                        let _ = self.event_tx.send(WorkerEvent::Data(message));
                    }
                }
                // Receive timeout is cooperative-cancellation polling, not an error
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) => {
                    self.emit_error(format!("Receive error: {}", e));
                }
            }
        }

        self.emit_status(ConnStatus::disconnected());
    }

    fn resolve(&self) -> std::io::Result<SocketAddr> {
        (self.desc.host.as_str(), self.desc.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(ErrorKind::AddrNotAvailable, "no address resolved")
            })
    }

    /// Sleep out the reconnect wait in slices so stop is observed promptly
    fn wait_for_reconnect(&self) {
        let deadline = Instant::now() + self.reconnect_wait;
        while self.running.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }

    fn set_state(&mut self, next: ConnState) {
        if next != self.state {
            trace!("Connection state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn emit_status(&self, status: ConnStatus) {
        let _ = self.event_tx.send(WorkerEvent::Status(status));
    }

    fn emit_error(&self, message: String) {
        warn!("{}", message);
        let _ = self.event_tx.send(WorkerEvent::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::mpsc::{self, Receiver};

    fn desc(host: &str, port: u16, transport: Transport) -> ConnDescriptor {
        ConnDescriptor {
            host: host.to_string(),
            port,
            transport,
        }
    }

    /// Accept with a deadline so a broken reconnect fails the test instead of
    /// hanging it
    fn accept_with_deadline(listener: &TcpListener, deadline: Duration) -> TcpStream {
        let until = Instant::now() + deadline;
        loop {
            match listener.accept() {
                Ok((stream, _)) => return stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    assert!(Instant::now() < until, "timed out waiting for connection");
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("accept failed: {}", e),
            }
        }
    }

    fn expect_status(rx: &Receiver<WorkerEvent>, want_connected: bool) -> ConnStatus {
        loop {
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(WorkerEvent::Status(status)) if status.connected == want_connected => {
                    return status;
                }
                Ok(_) => continue,
                Err(e) => panic!("timed out waiting for status event: {}", e),
            }
        }
    }

    fn expect_data(rx: &Receiver<WorkerEvent>) -> serde_json::Value {
        loop {
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(WorkerEvent::Data(message)) => return message,
                Ok(_) => continue,
                Err(e) => panic!("timed out waiting for data event: {}", e),
            }
        }
    }

    #[test]
    fn test_tcp_reconnect_after_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, rx) = mpsc::channel();
        let (worker, handle) = NetWorker::new(desc("127.0.0.1", port, Transport::Tcp), tx);
        let mut worker = worker.with_reconnect_wait(Duration::from_millis(100));
        let thread = std::thread::spawn(move || worker.run());

        let mut conn = accept_with_deadline(&listener, Duration::from_secs(2));
        let status = expect_status(&rx, true);
        assert_eq!(status.protocol.as_deref(), Some("TCP"));

        conn.write_all(b"{\"type\":\"gas\",\"value\":1}\n").unwrap();
        let message = expect_data(&rx);
        assert_eq!(message["type"], "gas");

        // Peer closes: worker must report the drop and then re-attempt
        drop(conn);
        expect_status(&rx, false);

        let _conn2 = accept_with_deadline(&listener, Duration::from_secs(2));
        expect_status(&rx, true);

        handle.stop();
        thread.join().unwrap();
    }

    #[test]
    fn test_udp_datagrams_are_decoded() {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (tx, rx) = mpsc::channel();
        let (mut worker, handle) = NetWorker::new(desc("127.0.0.1", port, Transport::Udp), tx);
        let thread = std::thread::spawn(move || worker.run());

        expect_status(&rx, true);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(b"{\"type\":\"humidity\",\"value\":55}", ("127.0.0.1", port))
            .unwrap();

        let message = expect_data(&rx);
        assert_eq!(message["value"], 55);

        handle.stop();
        thread.join().unwrap();
    }

    #[test]
    fn test_send_without_connection_returns_false() {
        let (tx, _rx) = mpsc::channel();
        let (_worker, handle) = NetWorker::new(desc("127.0.0.1", 1, Transport::Tcp), tx);

        assert!(!handle.send(&json!({"command": "ping"})));
    }
}
