//! The execution context handed to every action body.
//!
//! Handlers never mutate the machine directly and never rely on enclosing
//! scope for runtime operations: everything they may do (transitions, timer
//! control, outbound sends) is requested through an [`ActionContext`] and
//! applied by the executor after the body returns. That keeps predicate
//! evaluation side-effect free and makes the transition protocol atomic even
//! when an entry action transits again.

use std::time::Duration;

use crate::event::Channel;

/// One operation recorded by an action body, applied in order by the
/// transition executor after the body returns.
#[derive(Debug)]
pub(crate) enum Command<S> {
    Transit(String),
    StartTimer { name: String, after: Duration },
    CancelTimer { name: String },
    Send { channel: Channel, signal: S },
}

/// Context passed into entry/exit actions, event handlers, and timer expire
/// handlers.
pub struct ActionContext<'a, S> {
    pub(crate) state: &'a str,
    pub(crate) signal: Option<&'a S>,
    pub(crate) channel: Option<&'a Channel>,
    pub(crate) commands: &'a mut Vec<Command<S>>,
}

impl<'a, S> ActionContext<'a, S> {
    /// Name of the state this action is running in.
    #[must_use]
    pub fn state(&self) -> &str {
        self.state
    }

    /// The decoded signal that triggered this action. `None` for timer
    /// expirations and for the initial entry action.
    #[must_use]
    pub fn signal(&self) -> Option<&S> {
        self.signal
    }

    /// Channel the triggering signal arrived on, when there is one.
    #[must_use]
    pub fn channel(&self) -> Option<&Channel> {
        self.channel
    }

    /// Requests an atomic transition to `target`. Applied after the body
    /// returns: exit action, timer cancellation, state swap, entry action,
    /// in that order, before any further queued event is dispatched.
    pub fn transit(&mut self, target: impl Into<String>) {
        self.commands.push(Command::Transit(target.into()));
    }

    /// Starts (or restarts) the named timer relative to now. Restarting an
    /// active name discards the prior deadline; exactly one expiry fires, at
    /// the new deadline. The timer dies with the current state occupancy.
    pub fn start_timer(&mut self, name: impl Into<String>, after: Duration) {
        self.commands.push(Command::StartTimer {
            name: name.into(),
            after,
        });
    }

    /// Cancels the named timer if it is active.
    pub fn cancel_timer(&mut self, name: impl Into<String>) {
        self.commands.push(Command::CancelTimer { name: name.into() });
    }

    /// Emits an outbound signal on the default channel. The signal is
    /// encoded by the instance's codec and handed to its transport sink.
    pub fn send(&mut self, signal: S) {
        self.commands.push(Command::Send {
            channel: Channel::Default,
            signal,
        });
    }

    /// Emits an outbound signal on a named channel.
    pub fn send_on(&mut self, tag: impl Into<String>, signal: S) {
        self.commands.push(Command::Send {
            channel: Channel::named(tag),
            signal,
        });
    }
}
