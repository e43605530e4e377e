//! Handshake state machine

/// Lifecycle of one protocol session
///
/// `Uninitialized → Ready → ShuttingDown → Terminated`. `exit` may jump to
/// `Terminated` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Ready,
    ShuttingDown,
    Terminated,
}

/// Which state a method needs before it may run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Allowed in any state before shutdown
    Always,
    /// Only after `initialize`
    RequiresReady,
}

/// Outcome of checking a request against the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    NotInitialized,
    ShuttingDown,
}

/// Methods the dispatcher knows how to answer
pub fn gate_for(method: &str) -> Option<Gate> {
    match method {
        "initialize" | "ping" => Some(Gate::Always),
        "tools/list" | "mcp.listTools" | "tools/call" | "mcp.callTool" | "prompts/list"
        | "resources/list" | "shutdown" => Some(Gate::RequiresReady),
        _ => None,
    }
}

impl ServerState {
    /// Decide whether a known method may run now
    pub fn admit(&self, method: &str, gate: Gate) -> Admission {
        match self {
            ServerState::ShuttingDown | ServerState::Terminated if method != "ping" => {
                Admission::ShuttingDown
            }
            ServerState::Uninitialized if gate == Gate::RequiresReady => {
                Admission::NotInitialized
            }
            _ => Admission::Accept,
        }
    }

    pub fn on_initialize(&mut self) {
        if *self == ServerState::Uninitialized {
            *self = ServerState::Ready;
        }
    }

    pub fn on_shutdown(&mut self) {
        *self = ServerState::ShuttingDown;
    }

    /// Transition to `Terminated`; true when the exit was orderly
    pub fn on_exit(&mut self) -> bool {
        let clean = *self == ServerState::ShuttingDown;
        *self = ServerState::Terminated;
        clean
    }
}
