//! Channel tags and the internal per-instance event type.

use core::fmt;

/// Channel tag multiplexing multiple logical input sources into one state's
/// handler set.
///
/// Untagged handlers listen on [`Channel::Default`] only; a handler registered
/// for a named channel sees only events submitted on that channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    /// The unnamed transport every untagged handler listens on.
    #[default]
    Default,
    /// A named secondary transport (e.g. a `sub` channel next to the main one).
    Named(String),
}

impl Channel {
    /// Builds a named channel tag.
    #[must_use]
    pub fn named(tag: impl Into<String>) -> Self {
        Channel::Named(tag.into())
    }

    /// Tag text for logging; the default channel renders as `default`.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Channel::Default => "default",
            Channel::Named(tag) => tag,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Everything a machine instance ever dequeues. External bytes and internal
/// timer expiries flow through the same mailbox, which is what serializes
/// them against each other.
#[derive(Debug)]
pub(crate) enum InstanceEvent {
    /// Raw bytes from the transport, not yet decoded.
    Raw { bytes: Vec<u8>, channel: Channel },
    /// A named timer's deadline passed. The generation lets the driver drop
    /// expiries that were canceled or rescheduled after this event was
    /// already queued.
    TimerExpired { name: String, generation: u64 },
    /// Explicit shutdown marker.
    Shutdown,
}
