//! Authentication gate.
//!
//! With credentials configured, the first package on a new connection is
//! `Authenticate`. Everything submitted before the server answers is held
//! back and released in submission order once the gate opens.

use evstore_protocol::{Command, Credentials, Package};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How the authentication handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationStatus {
    Success,
    Failed,
    Timeout,
    /// No credentials were configured.
    Ignored,
}

impl fmt::Display for AuthenticationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationStatus::Success => write!(f, "success"),
            AuthenticationStatus::Failed => write!(f, "failed"),
            AuthenticationStatus::Timeout => write!(f, "timeout"),
            AuthenticationStatus::Ignored => write!(f, "ignored"),
        }
    }
}

/// The gate opened; `released` must be written in order.
#[derive(Debug)]
pub struct GateOpened {
    pub status: AuthenticationStatus,
    pub released: Vec<Package>,
}

#[derive(Debug)]
enum GateState {
    Pending { correlation_id: Uuid, deadline: Instant },
    Open(AuthenticationStatus),
}

#[derive(Debug)]
pub struct AuthenticationGate {
    state: GateState,
    queue: VecDeque<Package>,
}

impl AuthenticationGate {
    /// Starts the handshake for a new connection. Returns the `Authenticate`
    /// package to write, if credentials are configured.
    pub fn start(
        credentials: Option<&Credentials>,
        timeout: Duration,
        now: Instant,
    ) -> (Self, Option<Package>) {
        match credentials {
            Some(credentials) => {
                let correlation_id = Uuid::new_v4();
                let package = Package::new(Command::Authenticate, correlation_id)
                    .with_credentials(Some(credentials.clone()));
                let gate = Self {
                    state: GateState::Pending {
                        correlation_id,
                        deadline: now + timeout,
                    },
                    queue: VecDeque::new(),
                };
                (gate, Some(package))
            }
            None => (Self::open(AuthenticationStatus::Ignored), None),
        }
    }

    fn open(status: AuthenticationStatus) -> Self {
        Self {
            state: GateState::Open(status),
            queue: VecDeque::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, GateState::Open(_))
    }

    pub fn status(&self) -> Option<AuthenticationStatus> {
        match self.state {
            GateState::Open(status) => Some(status),
            GateState::Pending { .. } => None,
        }
    }

    /// Correlation id of the outstanding `Authenticate`, while pending.
    pub fn pending_correlation(&self) -> Option<Uuid> {
        match self.state {
            GateState::Pending { correlation_id, .. } => Some(correlation_id),
            GateState::Open(_) => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            GateState::Pending { deadline, .. } => Some(deadline),
            GateState::Open(_) => None,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Passes a package through the gate. Returns it if it may be written now.
    pub fn submit(&mut self, package: Package) -> Option<Package> {
        if self.is_open() {
            Some(package)
        } else {
            self.queue.push_back(package);
            None
        }
    }

    /// Handles `Authenticated` or `NotAuthenticated` for the pending handshake.
    pub fn handle(&mut self, package: &Package) -> Option<GateOpened> {
        if self.pending_correlation() != Some(package.correlation_id) {
            return None;
        }
        let status = match package.command {
            Command::Authenticated => AuthenticationStatus::Success,
            Command::NotAuthenticated => AuthenticationStatus::Failed,
            _ => return None,
        };
        Some(self.release(status))
    }

    /// Opens the gate with `Timeout` once the handshake deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<GateOpened> {
        match self.state {
            GateState::Pending { deadline, .. } if deadline <= now => {
                Some(self.release(AuthenticationStatus::Timeout))
            }
            _ => None,
        }
    }

    fn release(&mut self, status: AuthenticationStatus) -> GateOpened {
        self.state = GateState::Open(status);
        GateOpened {
            status,
            released: self.queue.drain(..).collect(),
        }
    }
}
