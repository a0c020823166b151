//! State definitions, the builders that assemble them, and the frozen
//! registry instances execute against.
//!
//! A [`StateRegistry`] is built once at configuration time and never mutated
//! afterward; instances share it behind an `Arc`. Validation that does not
//! require executing handler closures happens in
//! [`RegistryBuilder::build`]: duplicate states, undeclared channels,
//! unknown declarative transition targets, duplicate timer declarations,
//! and the initial-state reference.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::context::ActionContext;
use crate::error::ConfigError;
use crate::event::Channel;

/// Boolean condition over the current signal, evaluated in declaration order
/// to select a handler. Must be side-effect free.
pub type Predicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// An action body: entry/exit action, event handler, or timer expire
/// handler. Receives everything it may touch through the context.
pub type Action<S> = Arc<dyn Fn(&mut ActionContext<'_, S>) + Send + Sync>;

pub(crate) struct HandlerDef<S> {
    pub(crate) channel: Channel,
    pub(crate) predicate: Predicate<S>,
    pub(crate) action: Action<S>,
}

/// Immutable description of one state.
pub(crate) struct StateDef<S> {
    pub(crate) name: String,
    pub(crate) entry: Option<Action<S>>,
    pub(crate) exit: Option<Action<S>>,
    /// Ordered; the first predicate that holds wins.
    pub(crate) handlers: Vec<HandlerDef<S>>,
    /// Always-matching default slot, conceptually last. Default channel only.
    pub(crate) catch_all: Option<Action<S>>,
    /// Timer name → expire handler.
    pub(crate) expirations: HashMap<String, Action<S>>,
}

/// Fluent builder for one state definition.
///
/// ```
/// use wirestate::{StateBuilder, RegistryBuilder};
///
/// #[derive(Clone)]
/// struct Sig { version: u8 }
///
/// let registry = RegistryBuilder::new()
///     .state(
///         StateBuilder::<Sig>::new("state1")
///             .transition(|sig| sig.version == 0x61, "state2")
///             .otherwise(|_cx| tracing::info!("unknown")),
///     )
///     .state(StateBuilder::new("state2").transition(|sig: &Sig| sig.version == 0x62, "state1"))
///     .initial("state1")
///     .build()
///     .unwrap();
/// assert_eq!(registry.initial(), "state1");
/// ```
pub struct StateBuilder<S> {
    name: String,
    entry: Option<Action<S>>,
    exit: Option<Action<S>>,
    handlers: Vec<HandlerDef<S>>,
    catch_all: Option<Action<S>>,
    expirations: Vec<(String, Action<S>)>,
    /// Targets named through the declarative sugar, checked at build time.
    declared_targets: Vec<String>,
}

impl<S> StateBuilder<S> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        StateBuilder {
            name: name.into(),
            entry: None,
            exit: None,
            handlers: Vec::new(),
            catch_all: None,
            expirations: Vec::new(),
            declared_targets: Vec::new(),
        }
    }

    /// Entry action, run when the state is entered (including the initial
    /// state at instance start). May itself call
    /// [`transit`](ActionContext::transit) for pass-through states.
    #[must_use]
    pub fn entry(mut self, action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static) -> Self {
        self.entry = Some(Arc::new(action));
        self
    }

    /// Exit action, run before the state's timers are canceled on the way
    /// out.
    #[must_use]
    pub fn exit(mut self, action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static) -> Self {
        self.exit = Some(Arc::new(action));
        self
    }

    /// Guarded handler on the default channel. Handlers are evaluated in
    /// declaration order; the first matching predicate wins.
    #[must_use]
    pub fn on(
        self,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static,
    ) -> Self {
        self.handler(Channel::Default, predicate, action)
    }

    /// Guarded handler on a named channel.
    #[must_use]
    pub fn on_channel(
        self,
        tag: impl Into<String>,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static,
    ) -> Self {
        self.handler(Channel::named(tag), predicate, action)
    }

    /// Guarded transition on the default channel. Unlike a handler that
    /// calls [`transit`](ActionContext::transit) itself, the target here is
    /// data and gets validated when the registry is built.
    #[must_use]
    pub fn transition(
        mut self,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        self.declared_targets.push(target.clone());
        self.on(predicate, move |cx| cx.transit(target.clone()))
    }

    /// Guarded transition on a named channel, target validated at build
    /// time.
    #[must_use]
    pub fn transition_on(
        mut self,
        tag: impl Into<String>,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        target: impl Into<String>,
    ) -> Self {
        let target = target.into();
        self.declared_targets.push(target.clone());
        self.on_channel(tag, predicate, move |cx| cx.transit(target.clone()))
    }

    /// Catch-all handler for the default channel, conceptually last in
    /// evaluation order. Without one, unmatched events are dropped with a
    /// debug log.
    #[must_use]
    pub fn otherwise(mut self, action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static) -> Self {
        self.catch_all = Some(Arc::new(action));
        self
    }

    /// Declares the named timer and its expire handler. Only declared timers
    /// may be started while this state is current.
    #[must_use]
    pub fn expire(
        mut self,
        timer: impl Into<String>,
        action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static,
    ) -> Self {
        self.expirations.push((timer.into(), Arc::new(action)));
        self
    }

    fn handler(
        mut self,
        channel: Channel,
        predicate: impl Fn(&S) -> bool + Send + Sync + 'static,
        action: impl Fn(&mut ActionContext<'_, S>) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.push(HandlerDef {
            channel,
            predicate: Arc::new(predicate),
            action: Arc::new(action),
        });
        self
    }

    fn freeze(self) -> Result<(StateDef<S>, Vec<String>), ConfigError> {
        let mut expirations = HashMap::with_capacity(self.expirations.len());
        for (timer, action) in self.expirations {
            if expirations.insert(timer.clone(), action).is_some() {
                return Err(ConfigError::DuplicateTimer {
                    state: self.name,
                    timer,
                });
            }
        }
        Ok((
            StateDef {
                name: self.name,
                entry: self.entry,
                exit: self.exit,
                handlers: self.handlers,
                catch_all: self.catch_all,
                expirations,
            },
            self.declared_targets,
        ))
    }
}

/// Builder for the whole registry: transport channels, states, and the
/// initial state.
pub struct RegistryBuilder<S> {
    channels: HashSet<String>,
    states: Vec<StateBuilder<S>>,
    initial: Option<String>,
}

impl<S> Default for RegistryBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RegistryBuilder<S> {
    #[must_use]
    pub fn new() -> Self {
        RegistryBuilder {
            channels: HashSet::new(),
            states: Vec::new(),
            initial: None,
        }
    }

    /// Declares a named transport channel. Handlers may only be tagged with
    /// declared channels; the default channel always exists.
    #[must_use]
    pub fn channel(mut self, tag: impl Into<String>) -> Self {
        self.channels.insert(tag.into());
        self
    }

    #[must_use]
    pub fn state(mut self, state: StateBuilder<S>) -> Self {
        self.states.push(state);
        self
    }

    /// Declares the initial state. Its entry action runs synchronously when
    /// an instance is spawned, before any external event.
    #[must_use]
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial = Some(name.into());
        self
    }

    /// Freezes the registry, running the load-time verification pass.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found: duplicate or missing states,
    /// undeclared channel tags, unknown declarative transition targets, or
    /// duplicate timer declarations.
    pub fn build(self) -> Result<StateRegistry<S>, ConfigError> {
        let initial_name = self.initial.ok_or(ConfigError::MissingInitial)?;

        let mut states: HashMap<String, Arc<StateDef<S>>> = HashMap::with_capacity(self.states.len());
        let mut targets: Vec<(String, String)> = Vec::new();
        for builder in self.states {
            let (def, declared) = builder.freeze()?;
            let name = def.name.clone();
            for target in declared {
                targets.push((name.clone(), target));
            }
            if states.insert(name.clone(), Arc::new(def)).is_some() {
                return Err(ConfigError::DuplicateState(name));
            }
        }

        for (state, def) in &states {
            for handler in &def.handlers {
                if let Channel::Named(tag) = &handler.channel {
                    if !self.channels.contains(tag) {
                        return Err(ConfigError::UnknownChannel {
                            state: state.clone(),
                            channel: tag.clone(),
                        });
                    }
                }
            }
        }

        for (state, target) in targets {
            if !states.contains_key(&target) {
                return Err(ConfigError::UnknownTarget { state, target });
            }
        }

        let initial = states
            .get(&initial_name)
            .cloned()
            .ok_or(ConfigError::UnknownInitial(initial_name))?;

        Ok(StateRegistry { states, initial })
    }
}

/// The immutable description of every state of one machine type, shared by
/// all of its instances.
pub struct StateRegistry<S> {
    states: HashMap<String, Arc<StateDef<S>>>,
    initial: Arc<StateDef<S>>,
}

impl<S> std::fmt::Debug for StateRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("initial", &self.initial.name)
            .finish()
    }
}

impl<S> StateRegistry<S> {
    #[must_use]
    pub fn builder() -> RegistryBuilder<S> {
        RegistryBuilder::new()
    }

    /// Name of the initial state.
    #[must_use]
    pub fn initial(&self) -> &str {
        &self.initial.name
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Names of all registered states, in no particular order.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub(crate) fn initial_state(&self) -> &Arc<StateDef<S>> {
        &self.initial
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Arc<StateDef<S>>> {
        self.states.get(name)
    }
}
