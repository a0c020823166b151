//! # wirestate
//!
//! A declarative runtime for protocol session state machines. A machine
//! type is a frozen [`StateRegistry`]: named states with entry/exit
//! actions, ordered predicate-guarded event handlers (optionally tagged
//! with a [`Channel`]), and named timers whose expiry triggers handlers in
//! the state that started them. Raw transport bytes are decoded into typed
//! signals by a per-protocol [`SignalCodec`] before dispatch; outbound
//! signals are encoded by the same codec and handed to an [`OutboundSink`].
//!
//! Each running session is a [`MachineInstance`]: one tokio task with one
//! mailbox through which external signals and internal timer expiries are
//! serialized, so transitions are atomic: exit action, timer cancellation,
//! state swap, then entry action, with no event dispatched in between.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wirestate::{DecodeParams, RegistryBuilder, StateBuilder};
//!
//! #[derive(Clone)]
//! struct Sig { version: u8 }
//!
//! let registry = Arc::new(
//!     RegistryBuilder::<Sig>::new()
//!         .state(
//!             StateBuilder::new("initial")
//!                 .entry(|cx| cx.start_timer("to_main", Duration::from_secs(3)))
//!                 .expire("to_main", |cx| cx.transit("main")),
//!         )
//!         .state(StateBuilder::new("main").transition(|sig: &Sig| sig.version == 0x62, "initial"))
//!         .initial("initial")
//!         .build()
//!         .expect("valid configuration"),
//! );
//! # let _ = registry;
//! ```

pub mod codec;
pub mod context;
pub mod error;
pub mod event;
pub mod instance;
pub mod machine;
pub mod registry;
pub mod timer;

pub use codec::{DecodeError, DecodeParams, OutboundSink, SignalCodec};
pub use context::ActionContext;
pub use error::{ConfigError, FatalError, SubmitError};
pub use event::Channel;
pub use instance::{MachineInstance, spawn_instance, spawn_instance_with};
pub use machine::{Effect, Machine};
pub use registry::{Action, Predicate, RegistryBuilder, StateBuilder, StateRegistry};
pub use timer::{TimerService, TokioTimer};
