// Ride tracking client
// Connection lifecycle, per-ride room membership, and the I/O loop that
// feeds accepted location updates to the subscriber

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::feed::SyntheticFeed;
use crate::net::connection::Connection;
use crate::net::frames::{ClientFrame, RawLocationUpdate, ServerFrame};
use crate::normalizer::{normalize, LocationUpdate};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

/// An active (or requested) subscription to one ride's update stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership {
    pub ride_id: i64,
    pub user_id: i64,
    pub role: String,
}

/// Room membership state. At most one ride is tracked per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomState {
    /// Not subscribed to any ride.
    NoRoom,
    /// Join frame sent, acknowledgement not yet received.
    PendingJoin(RoomMembership),
    /// Server acknowledged the join.
    Active(RoomMembership),
}

impl RoomState {
    /// The membership the relevance filter should judge updates against,
    /// pending or acknowledged.
    pub fn membership(&self) -> Option<&RoomMembership> {
        match self {
            RoomState::NoRoom => None,
            RoomState::PendingJoin(m) | RoomState::Active(m) => Some(m),
        }
    }
}

/// Events delivered to the subscriber (the map view).
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// Transport is open (initial connect or successful reconnect).
    Connected,
    /// Transport closed; `reason` is set for unexpected closes.
    Disconnected { reason: Option<String> },
    /// An automatic reconnect attempt is being made.
    Reconnecting { attempt: u32 },
    /// All reconnect attempts failed. Terminal until `connect()` is
    /// called again.
    ReconnectExhausted,
    /// Server acknowledged the join request.
    RoomJoined { ride_id: i64 },
    /// Server acknowledged a leave request.
    RoomLeft { ride_id: Option<i64> },
    /// A location update passed validation.
    Location(LocationUpdate),
    /// Non-fatal advisory from the server's error frame.
    Advisory { message: String },
}

/// Commands from the handle to the I/O loop.
enum Command {
    Join(RoomMembership),
    Leave { ride_id: i64, user_id: i64 },
    AttachFeed(mpsc::Receiver<RawLocationUpdate>),
    DetachFeed,
}

/// State shared between the handle and the I/O loop.
struct Shared {
    state: AtomicU8,
    reconnect_attempts: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Connected,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// One live connection session: command channel, shutdown signal, task.
struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Client for the real-time ride location feed.
///
/// Owns exactly one logical connection. Constructed per tracking view and
/// torn down with it; nothing here is a process-wide singleton. The
/// returned event receiver is the only way join/leave completion and
/// steady-state failures are observed.
pub struct RideTracker {
    endpoint: String,
    config: TrackerConfig,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<TrackerEvent>,
    session: Option<Session>,
    feed: SyntheticFeed,
    /// Feed stream created before `connect()`; handed to the I/O loop on
    /// the next connect.
    pending_feed: Option<mpsc::Receiver<RawLocationUpdate>>,
}

impl RideTracker {
    /// Create a tracker for the given endpoint, returning the handle and
    /// the event stream.
    pub fn new(
        endpoint: impl Into<String>,
        config: TrackerConfig,
    ) -> (Self, mpsc::Receiver<TrackerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let feed = SyntheticFeed::new(config.feed_interval);

        let tracker = RideTracker {
            endpoint: endpoint.into(),
            config,
            shared: Arc::new(Shared::new()),
            event_tx,
            session: None,
            feed,
            pending_feed: None,
        };
        (tracker, event_rx)
    }

    /// Establish the connection. Idempotent: returns immediately when
    /// already connected. Resolves once the transport is open, or fails
    /// with [`TrackerError`] on error or connect timeout.
    pub async fn connect(&mut self) -> Result<(), TrackerError> {
        if self.is_connected() {
            debug!("connect: already connected to {}", self.endpoint);
            return Ok(());
        }
        // Reap a session whose connection was lost terminally
        if let Some(session) = self.session.take() {
            session.task.abort();
        }

        self.shared.set_state(ConnectionState::Connecting);
        let conn = match Connection::dial(&self.endpoint, self.config.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        info!("connected to {} ({})", self.endpoint, conn.peer_addr());

        self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connected);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let io = IoLoop {
            endpoint: self.endpoint.clone(),
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            event_tx: self.event_tx.clone(),
            room: RoomState::NoRoom,
            feed_rx: self.pending_feed.take(),
        };
        let task = tokio::spawn(io.run(conn, cmd_rx, shutdown_rx));
        self.session = Some(Session {
            cmd_tx,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    /// Deliberately close the connection. Suppresses automatic
    /// reconnection and cancels any pending reconnect wait and the
    /// synthetic feed timer.
    pub async fn disconnect(&mut self) {
        self.feed.stop();
        self.pending_feed = None;

        if let Some(mut session) = self.session.take() {
            if let Some(tx) = session.shutdown_tx.take() {
                let _ = tx.send(());
            }
            match time::timeout(self.config.shutdown_timeout, &mut session.task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("i/o loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("i/o loop did not exit within timeout, aborting");
                    session.task.abort();
                    let _ = (&mut session.task).await;
                }
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// True only when the internal state says connected *and* the live
    /// channel to the I/O loop agrees. Guards against drift between the
    /// flag and transport truth.
    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
            && self
                .session
                .as_ref()
                .is_some_and(|session| !session.cmd_tx.is_closed())
    }

    /// Current connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Reconnect attempts consumed since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Request to track a ride. Fire-and-forget: completion arrives as a
    /// [`TrackerEvent::RoomJoined`] event. When a different ride is being
    /// tracked the controller leaves it first (leave-before-join on the
    /// wire). Logged no-op while disconnected; callers gate on
    /// [`is_connected`](Self::is_connected).
    pub fn join_room(&self, ride_id: i64, user_id: i64, role: &str) {
        if !self.is_connected() {
            warn!("cannot join ride room {ride_id} while disconnected");
            return;
        }
        self.send_command(Command::Join(RoomMembership {
            ride_id,
            user_id,
            role: role.to_string(),
        }));
    }

    /// Request to stop tracking a ride. Fire-and-forget; logged no-op
    /// while disconnected.
    pub fn leave_room(&self, ride_id: i64, user_id: i64) {
        if !self.is_connected() {
            warn!("cannot leave ride room {ride_id} while disconnected");
            return;
        }
        self.send_command(Command::Leave { ride_id, user_id });
    }

    /// Start the synthetic feed, tagged for the given ride/user so its
    /// updates pass the relevance check. Restarts cleanly when already
    /// running.
    pub fn start_synthetic_feed(&mut self, ride_id: i64, user_id: i64) {
        let rx = self.feed.start(ride_id, user_id);
        match &self.session {
            Some(session) => {
                let _ = session.cmd_tx.send(Command::AttachFeed(rx));
            }
            None => self.pending_feed = Some(rx),
        }
    }

    /// Stop the synthetic feed and detach it from the I/O loop.
    pub fn stop_synthetic_feed(&mut self) {
        self.feed.stop();
        self.pending_feed = None;
        if let Some(session) = &self.session {
            let _ = session.cmd_tx.send(Command::DetachFeed);
        }
    }

    fn send_command(&self, cmd: Command) {
        if let Some(session) = &self.session {
            if session.cmd_tx.send(cmd).is_err() {
                warn!("i/o loop is gone, dropping request");
            }
        }
    }
}

impl Drop for RideTracker {
    fn drop(&mut self) {
        // Drop is synchronous, so a graceful shutdown cannot be awaited
        // here; aborting the task closes the transport.
        if let Some(session) = self.session.take() {
            session.task.abort();
        }
    }
}

/// Why a drive pass over the connection ended.
enum Exit {
    /// Local shutdown: disconnect() or the handle was dropped.
    Deliberate,
    /// Unexpected close; reconnection policy applies.
    Lost(String),
}

/// Background I/O loop. Owns the transport, the room membership state,
/// and the normalizer path; multiplexes reads, handle commands, and the
/// synthetic feed via `select!`.
struct IoLoop {
    endpoint: String,
    config: TrackerConfig,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<TrackerEvent>,
    room: RoomState,
    feed_rx: Option<mpsc::Receiver<RawLocationUpdate>>,
}

impl IoLoop {
    async fn run(
        mut self,
        mut conn: Connection,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("i/o loop started");
        self.emit(TrackerEvent::Connected);

        loop {
            match self.drive(&mut conn, &mut cmd_rx, &mut shutdown_rx).await {
                Exit::Deliberate => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.emit(TrackerEvent::Disconnected { reason: None });
                    break;
                }
                Exit::Lost(reason) => {
                    warn!("connection lost: {reason}");
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.emit(TrackerEvent::Disconnected {
                        reason: Some(reason),
                    });
                    match self.reconnect(&mut shutdown_rx).await {
                        Some(new_conn) => {
                            self.shared.reconnect_attempts.store(0, Ordering::SeqCst);
                            self.shared.set_state(ConnectionState::Connected);
                            info!("reconnected to {}", self.endpoint);
                            self.emit(TrackerEvent::Connected);
                            conn = new_conn;
                            self.rejoin(&mut conn).await;
                        }
                        None => break,
                    }
                }
            }
        }

        debug!("i/o loop exited");
    }

    /// Multiplex one connection until it closes or shutdown is signalled.
    async fn drive(
        &mut self,
        conn: &mut Connection,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> Exit {
        loop {
            tokio::select! {
                _ = &mut *shutdown_rx => {
                    debug!("shutdown signal received");
                    return Exit::Deliberate;
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Err(e) = self.handle_command(conn, cmd).await {
                                return Exit::Lost(format!("send failed: {e}"));
                            }
                        }
                        // Handle dropped: treat like a deliberate close
                        None => {
                            debug!("command channel closed");
                            return Exit::Deliberate;
                        }
                    }
                }
                result = conn.read_line() => {
                    match result {
                        Ok(line) if line.is_empty() => {
                            return Exit::Lost("server closed connection".to_string());
                        }
                        Ok(line) => self.handle_line(&line),
                        Err(e) => return Exit::Lost(format!("read failed: {e}")),
                    }
                }
                raw = recv_feed(&mut self.feed_rx) => self.handle_raw(raw),
            }
        }
    }

    async fn handle_command(&mut self, conn: &mut Connection, cmd: Command) -> io::Result<()> {
        match cmd {
            Command::Join(membership) => {
                let prior = self.room.membership().map(|m| (m.ride_id, m.user_id));
                if let Some((prior_ride, prior_user)) = prior {
                    if prior_ride == membership.ride_id {
                        debug!("already tracking ride {}", membership.ride_id);
                        return Ok(());
                    }
                    // Leave before join, so updates for two rides never
                    // overlap on this membership
                    conn.write_frame(&ClientFrame::LeaveRideRoom {
                        ride_id: prior_ride,
                        user_id: prior_user,
                    })
                    .await?;
                    info!("left ride room {prior_ride} to switch rides");
                    self.room = RoomState::NoRoom;
                }
                conn.write_frame(&ClientFrame::JoinRideRoom {
                    ride_id: membership.ride_id,
                    user_id: membership.user_id,
                    role: membership.role.clone(),
                })
                .await?;
                info!("join requested for ride {}", membership.ride_id);
                self.room = RoomState::PendingJoin(membership);
            }
            Command::Leave { ride_id, user_id } => {
                conn.write_frame(&ClientFrame::LeaveRideRoom { ride_id, user_id })
                    .await?;
                info!("leave requested for ride {ride_id}");
                if self
                    .room
                    .membership()
                    .is_some_and(|m| m.ride_id == ride_id)
                {
                    self.room = RoomState::NoRoom;
                }
            }
            Command::AttachFeed(rx) => {
                self.feed_rx = Some(rx);
            }
            Command::DetachFeed => {
                self.feed_rx = None;
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) {
        let frame: ServerFrame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("ignoring unrecognized frame: {e} (raw: {line})");
                return;
            }
        };

        match frame {
            ServerFrame::RoomAdded { ride_id } => self.handle_room_added(ride_id),
            ServerFrame::UpdatePassengers(raw) => self.handle_raw(raw),
            ServerFrame::RoomLeft { ride_id } => {
                info!("server confirmed leave for ride {ride_id:?}");
                self.emit(TrackerEvent::RoomLeft { ride_id });
            }
            ServerFrame::Error { message } => {
                let message = message.unwrap_or_else(|| "unspecified server error".to_string());
                warn!("server error frame: {message}");
                self.emit(TrackerEvent::Advisory { message });
            }
        }
    }

    fn handle_room_added(&mut self, ride_id: Option<i64>) {
        match std::mem::replace(&mut self.room, RoomState::NoRoom) {
            RoomState::PendingJoin(m) if ride_id.is_none() || ride_id == Some(m.ride_id) => {
                info!("tracking ride {}", m.ride_id);
                self.emit(TrackerEvent::RoomJoined { ride_id: m.ride_id });
                self.room = RoomState::Active(m);
            }
            other => {
                debug!("roomAdded with no matching pending join (ride {ride_id:?})");
                self.room = other;
            }
        }
    }

    /// Run one raw payload through the normalizer against the membership
    /// as it stands right now. An update racing ahead of its roomAdded
    /// ack is judged against the pending membership; no buffering.
    fn handle_raw(&mut self, raw: RawLocationUpdate) {
        match normalize(&raw, self.room.membership()) {
            Ok(update) => {
                debug!(
                    "location update accepted: {:.4}, {:.4}",
                    update.latitude, update.longitude
                );
                self.emit(TrackerEvent::Location(update));
            }
            Err(reason) => debug!("dropping location update: {reason}"),
        }
    }

    /// Bounded reconnection: fixed delay per attempt, hard cap on
    /// consecutive attempts, cancelled by the shutdown signal.
    async fn reconnect(&mut self, shutdown_rx: &mut oneshot::Receiver<()>) -> Option<Connection> {
        self.shared.set_state(ConnectionState::Connecting);
        loop {
            let attempts = self.shared.reconnect_attempts.load(Ordering::SeqCst);
            if attempts >= self.config.max_reconnect_attempts {
                error!("giving up after {attempts} reconnect attempts");
                self.shared.set_state(ConnectionState::Disconnected);
                self.emit(TrackerEvent::ReconnectExhausted);
                return None;
            }
            let attempt = attempts + 1;
            self.shared.reconnect_attempts.store(attempt, Ordering::SeqCst);
            self.emit(TrackerEvent::Reconnecting { attempt });

            tokio::select! {
                _ = &mut *shutdown_rx => {
                    debug!("shutdown during reconnect wait");
                    self.shared.set_state(ConnectionState::Disconnected);
                    return None;
                }
                _ = time::sleep(self.config.reconnect_delay) => {}
            }

            match Connection::dial(&self.endpoint, self.config.connect_timeout).await {
                Ok(conn) => return Some(conn),
                Err(e) => warn!(
                    "reconnect attempt {attempt}/{} failed: {e}",
                    self.config.max_reconnect_attempts
                ),
            }
        }
    }

    /// The server forgets room membership when the transport drops, so a
    /// remembered ride is re-requested after a successful reconnect.
    async fn rejoin(&mut self, conn: &mut Connection) {
        let membership = match std::mem::replace(&mut self.room, RoomState::NoRoom) {
            RoomState::PendingJoin(m) | RoomState::Active(m) => m,
            RoomState::NoRoom => return,
        };
        let frame = ClientFrame::JoinRideRoom {
            ride_id: membership.ride_id,
            user_id: membership.user_id,
            role: membership.role.clone(),
        };
        match conn.write_frame(&frame).await {
            Ok(()) => info!(
                "re-requested join for ride {} after reconnect",
                membership.ride_id
            ),
            Err(e) => warn!(
                "failed to re-join ride {} after reconnect: {e}",
                membership.ride_id
            ),
        }
        self.room = RoomState::PendingJoin(membership);
    }

    /// Non-blocking event emission; a slow subscriber loses events rather
    /// than stalling the I/O loop.
    fn emit(&self, event: TrackerEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            debug!("dropping tracker event: {e}");
        }
    }
}

/// Receive from the synthetic feed when one is attached, otherwise park.
async fn recv_feed(slot: &mut Option<mpsc::Receiver<RawLocationUpdate>>) -> RawLocationUpdate {
    if let Some(rx) = slot {
        if let Some(raw) = rx.recv().await {
            return raw;
        }
    }
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;

    fn test_config() -> TrackerConfig {
        TrackerConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(20),
            max_reconnect_attempts: 5,
            feed_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_millis(500),
            event_capacity: 64,
        }
    }

    struct FakeServer {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl FakeServer {
        /// Accept the next client connection.
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, write_half) = stream.into_split();
            FakeServer {
                reader: BufReader::new(read_half),
                writer: write_half,
            }
        }

        /// Read one frame sent by the client.
        async fn read_frame(&mut self) -> serde_json::Value {
            let mut line = String::new();
            time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a client frame")
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        /// Send one frame line to the client.
        async fn send(&mut self, frame: &str) {
            self.writer.write_all(frame.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
        }
    }

    async fn next_event(events: &mut mpsc::Receiver<TrackerEvent>) -> TrackerEvent {
        time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for a tracker event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        tracker.connect().await.unwrap();
        assert!(tracker.is_connected());
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));

        let _server = FakeServer::accept(&listener).await;
        // A second transport is never opened
        let second = time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(second.is_err());

        tracker.disconnect().await;
        assert!(!tracker.is_connected());
        assert_eq!(tracker.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_fails_when_nobody_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut tracker, _events) = RideTracker::new(addr.to_string(), test_config());
        let result = tracker.connect().await;
        assert!(result.is_err());
        assert!(!tracker.is_connected());
        assert_eq!(tracker.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_join_while_disconnected_is_a_recorded_noop() {
        let (tracker, _events) = RideTracker::new("127.0.0.1:9", test_config());
        // Must not panic or error; callers gate on is_connected()
        tracker.join_room(8, 42, "admin");
        tracker.leave_room(8, 42);
        assert!(!tracker.is_connected());
    }

    #[tokio::test]
    async fn test_room_switch_sends_leave_before_join() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, _events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        let mut server = FakeServer::accept(&listener).await;

        tracker.join_room(8, 42, "admin");
        let frame = server.read_frame().await;
        assert_eq!(frame["event"], "joinRideRoom");
        assert_eq!(frame["rideId"], 8);
        assert_eq!(frame["userId"], 42);
        assert_eq!(frame["role"], "admin");

        // Switching rides without an explicit leave first
        tracker.join_room(9, 42, "admin");
        let frame = server.read_frame().await;
        assert_eq!(frame["event"], "leaveRideRoom");
        assert_eq!(frame["rideId"], 8);
        let frame = server.read_frame().await;
        assert_eq!(frame["event"], "joinRideRoom");
        assert_eq!(frame["rideId"], 9);

        tracker.disconnect().await;
    }

    #[tokio::test]
    async fn test_ack_and_update_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));

        let mut server = FakeServer::accept(&listener).await;
        tracker.join_room(8, 42, "admin");
        server.read_frame().await;

        // An update racing ahead of the ack is judged against the pending
        // membership, not buffered
        server
            .send(r#"{"event":"updatePassengers","lat":"24.8607","long":"67.0011","rideId":8}"#)
            .await;
        match next_event(&mut events).await {
            TrackerEvent::Location(update) => {
                assert!((update.latitude - 24.8607).abs() < 1e-9);
                assert!((update.longitude - 67.0011).abs() < 1e-9);
            }
            other => panic!("expected Location, got {:?}", other),
        }

        server.send(r#"{"event":"roomAdded","rideId":8}"#).await;
        match next_event(&mut events).await {
            TrackerEvent::RoomJoined { ride_id } => assert_eq!(ride_id, 8),
            other => panic!("expected RoomJoined, got {:?}", other),
        }

        // Cross-talk from another ride never reaches the subscriber
        server
            .send(r#"{"event":"updatePassengers","lat":"24.86","long":"67.00","rideId":99}"#)
            .await;
        // Placeholder noise is dropped too
        server
            .send(r#"{"event":"updatePassengers","lat":"lat","long":"long","rideId":8}"#)
            .await;
        // Error frames surface as advisories, not failures
        server.send(r#"{"event":"error","message":"room full"}"#).await;
        match next_event(&mut events).await {
            TrackerEvent::Advisory { message } => assert_eq!(message, "room full"),
            other => panic!("expected Advisory, got {:?}", other),
        }

        tracker.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_attempts_are_bounded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));

        let server = FakeServer::accept(&listener).await;
        // Kill the server side entirely so every redial is refused
        drop(server);
        drop(listener);

        match next_event(&mut events).await {
            TrackerEvent::Disconnected { reason } => assert!(reason.is_some()),
            other => panic!("expected Disconnected, got {:?}", other),
        }
        for expected in 1..=5u32 {
            match next_event(&mut events).await {
                TrackerEvent::Reconnecting { attempt } => assert_eq!(attempt, expected),
                other => panic!("expected Reconnecting, got {:?}", other),
            }
        }
        // No sixth attempt is scheduled
        match next_event(&mut events).await {
            TrackerEvent::ReconnectExhausted => {}
            other => panic!("expected ReconnectExhausted, got {:?}", other),
        }

        assert!(!tracker.is_connected());
        assert_eq!(tracker.connection_state(), ConnectionState::Disconnected);
        assert_eq!(tracker.reconnect_attempts(), 5);
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_remembered_ride() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));

        let mut server = FakeServer::accept(&listener).await;
        tracker.join_room(8, 42, "admin");
        server.read_frame().await;
        server.send(r#"{"event":"roomAdded","rideId":8}"#).await;
        assert!(matches!(
            next_event(&mut events).await,
            TrackerEvent::RoomJoined { ride_id: 8 }
        ));

        // Unexpected close; the listener stays up so the redial succeeds
        drop(server);
        assert!(matches!(
            next_event(&mut events).await,
            TrackerEvent::Disconnected { reason: Some(_) }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            TrackerEvent::Reconnecting { attempt: 1 }
        ));

        let mut server = FakeServer::accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));
        let frame = server.read_frame().await;
        assert_eq!(frame["event"], "joinRideRoom");
        assert_eq!(frame["rideId"], 8);

        tracker.disconnect().await;
    }

    #[tokio::test]
    async fn test_deliberate_disconnect_suppresses_reconnection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));
        let _server = FakeServer::accept(&listener).await;

        tracker.disconnect().await;
        match next_event(&mut events).await {
            TrackerEvent::Disconnected { reason } => assert!(reason.is_none()),
            other => panic!("expected Disconnected, got {:?}", other),
        }
        // No reconnect is ever scheduled after a deliberate close
        let quiet = time::timeout(Duration::from_millis(200), events.recv()).await;
        match quiet {
            Err(_) => {}
            Ok(None) => {}
            Ok(Some(event)) => panic!("unexpected event after disconnect: {:?}", event),
        }
    }

    #[tokio::test]
    async fn test_synthetic_feed_drives_the_normal_pipeline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut tracker, mut events) = RideTracker::new(addr.to_string(), test_config());
        tracker.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TrackerEvent::Connected));

        let mut server = FakeServer::accept(&listener).await;
        tracker.join_room(8, 42, "admin");
        server.read_frame().await;

        tracker.start_synthetic_feed(8, 42);
        for index in 0..3u64 {
            let (lat, lon) = crate::feed::route_point(index);
            match next_event(&mut events).await {
                TrackerEvent::Location(update) => {
                    assert_eq!(update.latitude, lat);
                    assert_eq!(update.longitude, lon);
                }
                other => panic!("expected Location, got {:?}", other),
            }
        }

        tracker.stop_synthetic_feed();
        tracker.disconnect().await;
    }
}
