//! The deterministic machine core: ordered predicate dispatch and the
//! atomic transition protocol.
//!
//! A [`Machine`] owns the current-state pointer and nothing else that is
//! mutable. Each call to [`Machine::start`], [`Machine::offer`], or
//! [`Machine::expire`] runs to completion synchronously, chained
//! transitions included, and returns the ordered [`Effect`]s the driver
//! must apply (timer operations and outbound sends). Because the driver
//! processes one event at a time and applies effects before dequeuing the
//! next, no event can ever be dispatched against a state mid-transition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::context::{ActionContext, Command};
use crate::error::FatalError;
use crate::event::Channel;
use crate::registry::{Action, StateDef, StateRegistry};

/// Chained-transition recursion limit. Entry actions may legitimately
/// transit again (pass-through states); a chain deeper than this is treated
/// as a cycle and kills the instance.
pub(crate) const MAX_TRANSIT_DEPTH: usize = 32;

/// Side effect the driver must apply, in order, after a dispatch returns.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect<S> {
    /// Schedule (or reschedule) the named timer relative to now.
    StartTimer { name: String, after: Duration },
    /// Cancel the named timer if active.
    CancelTimer { name: String },
    /// Cancel every timer of the state occupancy being left. Emitted by the
    /// transition protocol between the exit and entry actions.
    CancelAllTimers,
    /// Encode and deliver an outbound signal.
    Send { channel: Channel, signal: S },
}

/// The synchronous execution core. Most hosts drive it through
/// [`spawn_instance`](crate::instance::spawn_instance); it is public so that
/// custom drivers and tests can run it deterministically without a runtime.
pub struct Machine<S> {
    registry: Arc<StateRegistry<S>>,
    current: Arc<StateDef<S>>,
}

impl<S> Machine<S> {
    #[must_use]
    pub fn new(registry: Arc<StateRegistry<S>>) -> Self {
        let current = Arc::clone(registry.initial_state());
        Machine { registry, current }
    }

    /// Name of the state the machine currently occupies.
    #[must_use]
    pub fn current_state(&self) -> &str {
        &self.current.name
    }

    /// Runs the initial state's entry action (and any chained transitions).
    /// Must be called exactly once, before the first event is offered.
    ///
    /// # Errors
    /// Fatal if the entry chain transits to an unknown state or overflows
    /// the depth guard.
    pub fn start(&mut self) -> Result<Vec<Effect<S>>, FatalError> {
        let mut effects = Vec::new();
        if let Some(entry) = self.current.entry.clone() {
            self.run_action(&entry, None, None, &mut effects, 0)?;
        }
        Ok(effects)
    }

    /// Offers one decoded signal to the current state.
    ///
    /// Handlers whose channel tag matches the event's channel are tried in
    /// declaration order; the first predicate that holds runs. If none
    /// holds, the catch-all runs (default channel only); otherwise the
    /// event is dropped with a debug log.
    ///
    /// # Errors
    /// Fatal errors come only from the selected handler's commands (unknown
    /// transit target, chain overflow, undeclared timer).
    pub fn offer(&mut self, signal: &S, channel: &Channel) -> Result<Vec<Effect<S>>, FatalError> {
        let state = Arc::clone(&self.current);
        let selected = state
            .handlers
            .iter()
            .find(|handler| handler.channel == *channel && (handler.predicate)(signal))
            .map(|handler| Arc::clone(&handler.action));

        let action = match selected {
            Some(action) => action,
            None => match (&state.catch_all, channel) {
                (Some(catch_all), Channel::Default) => Arc::clone(catch_all),
                _ => {
                    debug!(state = %state.name, channel = %channel, "no handler matched; event dropped");
                    return Ok(Vec::new());
                }
            },
        };

        let mut effects = Vec::new();
        self.run_action(&action, Some(signal), Some(channel), &mut effects, 0)?;
        Ok(effects)
    }

    /// Dispatches a timer expiry to the current state's expire handler.
    ///
    /// A name the current state does not declare is stale (the owning state
    /// was already left) and is dropped silently; the driver's generation
    /// check makes this a second line of defense.
    ///
    /// # Errors
    /// Same fatal conditions as [`Machine::offer`].
    pub fn expire(&mut self, name: &str) -> Result<Vec<Effect<S>>, FatalError> {
        let state = Arc::clone(&self.current);
        let Some(action) = state.expirations.get(name).map(Arc::clone) else {
            trace!(state = %state.name, timer = name, "stale timer expiry dropped");
            return Ok(Vec::new());
        };

        let mut effects = Vec::new();
        self.run_action(&action, None, None, &mut effects, 0)?;
        Ok(effects)
    }

    /// Runs one action body, then applies the commands it recorded.
    fn run_action(
        &mut self,
        action: &Action<S>,
        signal: Option<&S>,
        channel: Option<&Channel>,
        effects: &mut Vec<Effect<S>>,
        depth: usize,
    ) -> Result<(), FatalError> {
        let state = Arc::clone(&self.current);
        let mut commands: Vec<Command<S>> = Vec::new();
        action(&mut ActionContext {
            state: &state.name,
            signal,
            channel,
            commands: &mut commands,
        });
        self.apply(commands, signal, channel, effects, depth)
    }

    fn apply(
        &mut self,
        commands: Vec<Command<S>>,
        signal: Option<&S>,
        channel: Option<&Channel>,
        effects: &mut Vec<Effect<S>>,
        depth: usize,
    ) -> Result<(), FatalError> {
        for command in commands {
            match command {
                Command::StartTimer { name, after } => {
                    if !self.current.expirations.contains_key(&name) {
                        return Err(FatalError::UndeclaredTimer {
                            state: self.current.name.clone(),
                            timer: name,
                        });
                    }
                    effects.push(Effect::StartTimer { name, after });
                }
                Command::CancelTimer { name } => effects.push(Effect::CancelTimer { name }),
                Command::Send { channel, signal } => effects.push(Effect::Send { channel, signal }),
                Command::Transit(target) => {
                    self.transit(&target, signal, channel, effects, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    /// The atomic transition protocol: exit action, cancel the leaving
    /// state's timers, swap, entry action. Entry actions may transit again;
    /// the whole chain completes before the next queued event is seen.
    fn transit(
        &mut self,
        target: &str,
        signal: Option<&S>,
        channel: Option<&Channel>,
        effects: &mut Vec<Effect<S>>,
        depth: usize,
    ) -> Result<(), FatalError> {
        if depth > MAX_TRANSIT_DEPTH {
            return Err(FatalError::TransitChainOverflow {
                from: self.current.name.clone(),
            });
        }

        if let Some(exit) = self.current.exit.clone() {
            self.run_action(&exit, signal, channel, effects, depth)?;
        }

        effects.push(Effect::CancelAllTimers);

        let Some(next) = self.registry.lookup(target) else {
            return Err(FatalError::UnknownState {
                from: self.current.name.clone(),
                target: target.to_string(),
            });
        };
        let next = Arc::clone(next);
        debug!(from = %self.current.name, to = %next.name, "transition");
        self.current = next;

        if let Some(entry) = self.current.entry.clone() {
            self.run_action(&entry, signal, channel, effects, depth)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RegistryBuilder, StateBuilder};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry(builder: RegistryBuilder<u8>) -> Arc<StateRegistry<u8>> {
        Arc::new(builder.build().unwrap())
    }

    #[test]
    fn initial_entry_runs_once_before_events() {
        let entries = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&entries);
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a")
                        .entry(move |_| {
                            counted.fetch_add(1, Ordering::SeqCst);
                        })
                        .on(|_| true, |_| {}),
                )
                .initial("a"),
        );

        let mut machine = Machine::new(registry);
        assert_eq!(entries.load(Ordering::SeqCst), 0);
        machine.start().unwrap();
        assert_eq!(entries.load(Ordering::SeqCst), 1);

        machine.offer(&1, &Channel::Default).unwrap();
        machine.offer(&2, &Channel::Default).unwrap();
        assert_eq!(entries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_matching_predicate_wins() {
        let hits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&hits);
        let second = Arc::clone(&hits);
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a")
                        .on(
                            |v| *v < 10,
                            move |_| first.lock().unwrap().push("p1"),
                        )
                        .on(
                            |v| *v < 100,
                            move |_| second.lock().unwrap().push("p2"),
                        ),
                )
                .initial("a"),
        );

        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        machine.offer(&5, &Channel::Default).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["p1"]);

        machine.offer(&50, &Channel::Default).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["p1", "p2"]);
    }

    #[test]
    fn second_event_sees_post_transition_state() {
        let hits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let in_b = Arc::clone(&hits);
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a").transition(|v| *v == 1, "b"))
                .state(
                    StateBuilder::new("b").on(|v| *v == 2, move |_| in_b.lock().unwrap().push("b:2")),
                )
                .initial("a"),
        );

        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        machine.offer(&1, &Channel::Default).unwrap();
        assert_eq!(machine.current_state(), "b");
        machine.offer(&2, &Channel::Default).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["b:2"]);
    }

    #[test]
    fn unmatched_event_without_catch_all_is_dropped() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a").on(|v| *v == 1, |_| {}))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let effects = machine.offer(&9, &Channel::Default).unwrap();
        assert!(effects.is_empty());
        assert_eq!(machine.current_state(), "a");
    }

    #[test]
    fn catch_all_runs_when_nothing_matches() {
        let caught = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&caught);
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a")
                        .on(|v| *v == 1, |_| {})
                        .otherwise(move |_| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        }),
                )
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();

        machine.offer(&1, &Channel::Default).unwrap();
        assert_eq!(caught.load(Ordering::SeqCst), 0);

        machine.offer(&9, &Channel::Default).unwrap();
        assert_eq!(caught.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn catch_all_does_not_match_named_channels() {
        let caught = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&caught);
        let registry = registry(
            RegistryBuilder::new()
                .channel("sub")
                .state(StateBuilder::new("a").otherwise(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();

        machine.offer(&1, &Channel::named("sub")).unwrap();
        assert_eq!(caught.load(Ordering::SeqCst), 0);

        machine.offer(&1, &Channel::Default).unwrap();
        assert_eq!(caught.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_tag_routes_to_tagged_handler() {
        let hits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let on_default = Arc::clone(&hits);
        let on_sub = Arc::clone(&hits);
        let registry = registry(
            RegistryBuilder::new()
                .channel("sub")
                .state(
                    StateBuilder::new("a")
                        .on(|v| *v == 1, move |_| on_default.lock().unwrap().push("default"))
                        .on_channel("sub", |v| *v == 1, move |_| {
                            on_sub.lock().unwrap().push("sub");
                        }),
                )
                .initial("a"),
        );

        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        machine.offer(&1, &Channel::named("sub")).unwrap();
        machine.offer(&1, &Channel::Default).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["sub", "default"]);
    }

    #[test]
    fn pass_through_initial_state_chains() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("initial").entry(|cx| cx.transit("state1")))
                .state(StateBuilder::new("state1"))
                .initial("initial"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        assert_eq!(machine.current_state(), "state1");
    }

    #[test]
    fn transition_orders_exit_cancel_entry() {
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let on_exit = Arc::clone(&order);
        let on_entry = Arc::clone(&order);
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a")
                        .exit(move |_| on_exit.lock().unwrap().push("exit a"))
                        .transition(|_| true, "b"),
                )
                .state(StateBuilder::new("b").entry(move |_| on_entry.lock().unwrap().push("enter b")))
                .initial("a"),
        );

        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let effects = machine.offer(&0, &Channel::Default).unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["exit a", "enter b"]);
        assert_eq!(effects, vec![Effect::CancelAllTimers]);
    }

    #[test]
    fn dynamic_unknown_target_is_fatal() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a").on(|_| true, |cx| cx.transit("nowhere")))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let err = machine.offer(&0, &Channel::Default).unwrap_err();
        assert_eq!(
            err,
            FatalError::UnknownState {
                from: "a".into(),
                target: "nowhere".into()
            }
        );
    }

    #[test]
    fn transit_cycle_overflows_depth_guard() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a").entry(|cx| cx.transit("b")).on(|_| true, |cx| cx.transit("b")))
                .state(StateBuilder::new("b").entry(|cx| cx.transit("a")))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        let err = machine.start().unwrap_err();
        assert!(matches!(err, FatalError::TransitChainOverflow { .. }));
    }

    #[test]
    fn undeclared_timer_start_is_fatal() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a").on(|_| true, |cx| {
                    cx.start_timer("ghost", Duration::from_secs(1));
                }))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let err = machine.offer(&0, &Channel::Default).unwrap_err();
        assert_eq!(
            err,
            FatalError::UndeclaredTimer {
                state: "a".into(),
                timer: "ghost".into()
            }
        );
    }

    #[test]
    fn declared_timer_start_becomes_effect() {
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a")
                        .entry(|cx| cx.start_timer("t", Duration::from_secs(3)))
                        .expire("t", |_| {}),
                )
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        let effects = machine.start().unwrap();
        assert_eq!(
            effects,
            vec![Effect::StartTimer {
                name: "t".into(),
                after: Duration::from_secs(3)
            }]
        );
    }

    #[test]
    fn expire_for_undeclared_name_is_stale_and_dropped() {
        let registry = registry(
            RegistryBuilder::new()
                .state(StateBuilder::new("a"))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let effects = machine.expire("gone").unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn expire_runs_declared_handler() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let registry = registry(
            RegistryBuilder::new()
                .state(
                    StateBuilder::new("a").expire("t", move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        machine.expire("t").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_effects_preserve_order_and_channel() {
        let registry = registry(
            RegistryBuilder::new()
                .channel("sub")
                .state(StateBuilder::new("a").on(|_| true, |cx| {
                    cx.send(1);
                    cx.send_on("sub", 2);
                }))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        let effects = machine.offer(&0, &Channel::Default).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::Send {
                    channel: Channel::Default,
                    signal: 1
                },
                Effect::Send {
                    channel: Channel::named("sub"),
                    signal: 2
                },
            ]
        );
    }

    #[test]
    fn handler_signal_and_channel_are_visible_in_context() {
        let seen: Arc<Mutex<Vec<(u8, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let registry = registry(
            RegistryBuilder::new()
                .channel("sub")
                .state(StateBuilder::new("a").on_channel("sub", |_| true, move |cx| {
                    let signal = *cx.signal().unwrap();
                    let channel = cx.channel().unwrap().tag().to_string();
                    sink.lock().unwrap().push((signal, channel));
                }))
                .initial("a"),
        );
        let mut machine = Machine::new(registry);
        machine.start().unwrap();
        machine.offer(&7, &Channel::named("sub")).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(7, "sub".to_string())]);
    }
}
