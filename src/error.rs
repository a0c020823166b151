//! Error types for registry construction and machine execution.

use thiserror::Error;

/// Configuration problems detected while freezing a state registry.
///
/// Everything in here is caught by [`RegistryBuilder::build`](crate::registry::RegistryBuilder::build)
/// before a single instance exists; a registry that builds cleanly can only
/// fail at runtime through [`FatalError`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Two states were registered under the same name.
    #[error("duplicate state `{0}`")]
    DuplicateState(String),

    /// No initial state was declared.
    #[error("no initial state declared")]
    MissingInitial,

    /// The declared initial state was never registered.
    #[error("initial state `{0}` is not registered")]
    UnknownInitial(String),

    /// A handler was tagged with a channel the transport configuration does
    /// not declare.
    #[error("state `{state}` handles channel `{channel}`, which is not declared")]
    UnknownChannel { state: String, channel: String },

    /// A declarative transition names a state that does not exist.
    #[error("state `{state}` transitions to unknown state `{target}`")]
    UnknownTarget { state: String, target: String },

    /// A state declared two expire handlers for the same timer name.
    #[error("state `{state}` declares timer `{timer}` twice")]
    DuplicateTimer { state: String, timer: String },
}

/// Unrecoverable runtime errors. Any of these terminates the instance that
/// produced it; none of them is reachable from well-formed configuration
/// unless a handler closure does something the build-time pass cannot see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// A handler called `transit` with a state name the registry does not
    /// contain. Declarative transitions are rejected at build time; this
    /// variant only fires for targets computed inside opaque closures.
    #[error("transition from `{from}` to unknown state `{target}`")]
    UnknownState { from: String, target: String },

    /// Chained transitions (entry actions that transit again) exceeded the
    /// recursion limit, which almost always means a transition cycle that
    /// never settles.
    #[error("transition chain starting from `{from}` exceeded the depth limit")]
    TransitChainOverflow { from: String },

    /// A handler started a timer whose name has no expire handler in the
    /// current state, so its expiry could never be dispatched.
    #[error("state `{state}` started timer `{timer}` without an expire handler")]
    UndeclaredTimer { state: String, timer: String },
}

/// Failure to queue raw bytes into an instance mailbox.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The mailbox is full (fail-fast `try_submit` only; `submit` awaits
    /// capacity instead).
    #[error("instance mailbox is full")]
    Full,

    /// The instance has shut down or died from a fatal error; no further
    /// events may be queued.
    #[error("instance has shut down")]
    Closed,
}
