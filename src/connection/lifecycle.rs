/// Connection state machine: connect, heartbeat, close and reconnect timing
///
/// Pure bookkeeping; the socket itself lives in `client`. Deadlines are
/// tokio instants so the event loop can sleep on them directly.
use std::fmt;
use tokio::time::{Duration, Instant};

/// Close code sent by `disconnect()`; the only code that suppresses reconnect
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code
pub const NO_STATUS_CLOSURE: u16 = 1005;
/// Connection lost without a close frame, or the handshake failed
pub const ABNORMAL_CLOSURE: u16 = 1006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        })
    }
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    last_close_code: Option<u16>,
    attempt_in_flight: bool,
    // At most one pending reconnect
    reconnect_at: Option<Instant>,
    next_ping_at: Option<Instant>,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
}

impl ConnectionLifecycle {
    pub fn new(heartbeat_interval: Duration, reconnect_delay: Duration) -> Self {
        ConnectionLifecycle {
            state: ConnectionState::Disconnected,
            last_close_code: None,
            attempt_in_flight: false,
            reconnect_at: None,
            next_ping_at: None,
            heartbeat_interval,
            reconnect_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn last_close_code(&self) -> Option<u16> {
        self.last_close_code
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn heartbeat_deadline(&self) -> Option<Instant> {
        self.next_ping_at
    }

    /// Caller-initiated connect
    ///
    /// Refused while connected, while an attempt is in flight or while a
    /// reconnect is already scheduled.
    pub fn request_connect(&mut self) -> bool {
        if self.state == ConnectionState::Connected
            || self.attempt_in_flight
            || self.reconnect_at.is_some()
        {
            return false;
        }
        self.begin_attempt();
        true
    }

    /// The reconnect deadline passed; returns true if an attempt should start
    pub fn reconnect_elapsed(&mut self) -> bool {
        if self.reconnect_at.take().is_none() {
            return false;
        }
        if self.state == ConnectionState::Connected || self.attempt_in_flight {
            return false;
        }
        self.begin_attempt();
        true
    }

    fn begin_attempt(&mut self) {
        self.attempt_in_flight = true;
        self.state = ConnectionState::Connecting;
    }

    /// Handshake completed
    pub fn connected(&mut self, now: Instant) {
        self.attempt_in_flight = false;
        self.state = ConnectionState::Connected;
        self.reconnect_at = None;
        self.next_ping_at = Some(now + self.heartbeat_interval);
    }

    /// The transport closed or could not be created
    ///
    /// Stops the heartbeat and returns true when the close was abnormal and
    /// a reconnect should be scheduled.
    pub fn closed(&mut self, code: u16) -> bool {
        self.attempt_in_flight = false;
        self.next_ping_at = None;
        self.last_close_code = Some(code);
        self.state = ConnectionState::Disconnected;
        code != NORMAL_CLOSURE
    }

    /// Arm the single reconnect timer; false if one is already pending
    pub fn schedule_reconnect(&mut self, now: Instant) -> bool {
        if self.state == ConnectionState::Connected {
            return false;
        }
        self.state = ConnectionState::Reconnecting;
        if self.reconnect_at.is_some() {
            return false;
        }
        self.reconnect_at = Some(now + self.reconnect_delay);
        true
    }

    /// Heartbeat deadline reached; true if a ping should go out now
    pub fn heartbeat_due(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Connected {
            self.next_ping_at = None;
            return false;
        }
        self.next_ping_at = Some(now + self.heartbeat_interval);
        true
    }

    /// Explicit disconnect: clears both timers and any in-flight attempt
    pub fn disconnect(&mut self) {
        self.reconnect_at = None;
        self.next_ping_at = None;
        self.attempt_in_flight = false;
        self.last_close_code = Some(NORMAL_CLOSURE);
        self.state = ConnectionState::Disconnected;
    }
}
