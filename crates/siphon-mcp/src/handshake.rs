//! Handshake state machine
//!
//! `uninitialized -> pending_ack -> initialized`. The handshake is advisory:
//! a method arriving early promotes the session straight to `initialized`
//! instead of being rejected. States only ever move forward.

use crate::protocol::methods;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    Uninitialized,
    PendingAck,
    Initialized,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::PendingAck => "pending_ack",
            Self::Initialized => "initialized",
        }
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which incoming methods a rule fires on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodMatch {
    Exactly(&'static str),
    AnyExcept(&'static str),
}

impl MethodMatch {
    fn matches(&self, method: &str) -> bool {
        match self {
            Self::Exactly(m) => *m == method,
            Self::AnyExcept(m) => *m != method,
        }
    }
}

/// One row of a transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub from: HandshakeState,
    pub on: MethodMatch,
    pub to: HandshakeState,
}

/// Implicit promotions, applied before a message is handled
pub const PROMOTIONS: &[Rule] = &[
    Rule {
        from: HandshakeState::Uninitialized,
        on: MethodMatch::AnyExcept(methods::INITIALIZE),
        to: HandshakeState::Initialized,
    },
    Rule {
        from: HandshakeState::PendingAck,
        on: MethodMatch::AnyExcept(methods::INITIALIZED),
        to: HandshakeState::Initialized,
    },
];

/// Canonical transitions, applied once a message has been handled
pub const COMPLETIONS: &[Rule] = &[
    Rule {
        from: HandshakeState::Uninitialized,
        on: MethodMatch::Exactly(methods::INITIALIZE),
        to: HandshakeState::PendingAck,
    },
    Rule {
        from: HandshakeState::PendingAck,
        on: MethodMatch::Exactly(methods::INITIALIZED),
        to: HandshakeState::Initialized,
    },
    Rule {
        from: HandshakeState::Initialized,
        on: MethodMatch::Exactly(methods::INITIALIZED),
        to: HandshakeState::Initialized,
    },
];

fn lookup(table: &[Rule], state: HandshakeState, method: &str) -> Option<HandshakeState> {
    table
        .iter()
        .find(|r| r.from == state && r.on.matches(method))
        .map(|r| r.to)
}

/// Promotion owed to `method` arriving in `state`, if any
pub fn promotion(state: HandshakeState, method: &str) -> Option<HandshakeState> {
    lookup(PROMOTIONS, state, method)
}

/// Transition owed to `method` once handled in `state`, if any
pub fn completion(state: HandshakeState, method: &str) -> Option<HandshakeState> {
    lookup(COMPLETIONS, state, method)
}

/// Forward-only state holder
#[derive(Debug)]
pub struct Handshake {
    state: std::sync::Mutex<HandshakeState>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(HandshakeState::Uninitialized),
        }
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `to` unless the current state is already at or past it.
    /// Returns the state after the call.
    pub fn advance(&self, to: HandshakeState) -> HandshakeState {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if to > *state {
            *state = to;
        }
        *state
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}
