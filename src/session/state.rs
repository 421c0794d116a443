use std::fmt;
use std::time::Duration;

/// Where the connection loop currently is.
///
/// ```text
/// Disconnected -> Connecting -> AwaitingVerack -> Connected -> Disconnected ...
/// ```
///
/// `ShuttingDown` is terminal and can be entered from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingVerack,
    Connected,
    ShuttingDown,
}

impl ConnectionState {
    /// Applies a transition, refusing to leave `ShuttingDown`.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if *self == ConnectionState::ShuttingDown || *self == next {
            return false;
        }
        *self = next;
        true
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingVerack => "awaiting-verack",
            ConnectionState::Connected => "connected",
            ConnectionState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// Linear reconnect backoff: every failure adds `increment`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    increment: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(increment: Duration, max: Duration) -> Self {
        Self {
            increment,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay to wait after the failure just observed.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.current.saturating_add(self.increment).min(self.max);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}
