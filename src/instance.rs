//! Per-session machine instances: the serialized event loop and the handle
//! the host keeps.
//!
//! Each instance is one spawned tokio task owning a [`Machine`], a
//! [`TimerManager`], the codec, and the outbound sink. A single bounded
//! mailbox carries raw transport bytes, timer expiries, and the shutdown
//! marker; the loop fully processes one event, dispatch plus all resulting
//! effects, before dequeuing the next, which is what upholds the
//! transition-atomicity invariant. Instances share no mutable state and may
//! run in parallel freely.

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use crate::codec::{DecodeParams, OutboundSink, SignalCodec};
use crate::error::{FatalError, SubmitError};
use crate::event::{Channel, InstanceEvent};
use crate::machine::{Effect, Machine};
use crate::registry::StateRegistry;
use crate::timer::{TimerManager, TimerService, TokioTimer};

/// Mailbox depth per instance. `submit` applies async back-pressure when the
/// mailbox is full; `try_submit` fails fast instead.
const MAILBOX_CAPACITY: usize = 64;

/// Handle to a running machine instance.
///
/// Dropping the handle without calling [`shutdown`](MachineInstance::shutdown)
/// lets the instance drain what is already queued (including pending timer
/// expiries) and then stop; explicit shutdown stops it at the next dequeue
/// and cancels all timers immediately.
#[derive(Debug)]
pub struct MachineInstance {
    tx: mpsc::Sender<InstanceEvent>,
    task: JoinHandle<()>,
}

impl MachineInstance {
    /// Feeds raw bytes on the default channel, awaiting mailbox capacity.
    ///
    /// # Errors
    /// [`SubmitError::Closed`] once the instance has shut down or died.
    pub async fn submit(&self, bytes: impl Into<Vec<u8>>) -> Result<(), SubmitError> {
        self.submit_on(Channel::Default, bytes).await
    }

    /// Feeds raw bytes on the given channel, awaiting mailbox capacity.
    ///
    /// # Errors
    /// [`SubmitError::Closed`] once the instance has shut down or died.
    pub async fn submit_on(
        &self,
        channel: Channel,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), SubmitError> {
        self.tx
            .send(InstanceEvent::Raw {
                bytes: bytes.into(),
                channel,
            })
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Non-blocking submit on the default channel.
    ///
    /// # Errors
    /// [`SubmitError::Full`] when the mailbox is at capacity,
    /// [`SubmitError::Closed`] once the instance is gone.
    pub fn try_submit(&self, bytes: impl Into<Vec<u8>>) -> Result<(), SubmitError> {
        match self.tx.try_send(InstanceEvent::Raw {
            bytes: bytes.into(),
            channel: Channel::Default,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SubmitError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }

    /// Stops the instance: cancels all outstanding timers, discards state,
    /// and waits for the event loop to finish. Queued events behind the
    /// shutdown marker are dropped.
    pub async fn shutdown(self) {
        // Send may fail if the loop already died from a fatal error; joining
        // is what matters either way.
        let _ = self.tx.send(InstanceEvent::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Creates a machine instance over the given registry, codec, and sink.
///
/// The initial state's entry action, and any transition chain it starts,
/// runs synchronously before this returns, so the machine is settled before
/// the first external event can possibly be dispatched. Must be called from
/// within a tokio runtime.
///
/// # Errors
/// A [`FatalError`] from the initial entry chain (unknown transit target,
/// chain overflow, undeclared timer).
pub fn spawn_instance<C, O>(
    registry: Arc<StateRegistry<C::Signal>>,
    codec: C,
    params: DecodeParams,
    outbound: O,
) -> Result<MachineInstance, FatalError>
where
    C: SignalCodec,
    O: OutboundSink,
{
    spawn_instance_with::<TokioTimer, C, O>(registry, codec, params, outbound)
}

/// [`spawn_instance`] with an explicit [`TimerService`], for hosts that
/// bring their own clock.
///
/// # Errors
/// Same as [`spawn_instance`].
pub fn spawn_instance_with<T, C, O>(
    registry: Arc<StateRegistry<C::Signal>>,
    codec: C,
    params: DecodeParams,
    outbound: O,
) -> Result<MachineInstance, FatalError>
where
    T: TimerService + 'static,
    C: SignalCodec,
    O: OutboundSink,
{
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

    let mut driver = Driver::<T, C, O> {
        machine: Machine::new(registry),
        timers: TimerManager::new(tx.downgrade()),
        codec,
        params,
        outbound,
        _timer: PhantomData,
    };

    // Initial entry runs on the caller, before the loop exists and before
    // any event can be queued.
    let effects = driver.machine.start()?;
    driver.perform(effects);

    let task = tokio::spawn(driver.run(rx));
    Ok(MachineInstance { tx, task })
}

struct Driver<T, C, O>
where
    T: TimerService,
    C: SignalCodec,
    O: OutboundSink,
{
    machine: Machine<C::Signal>,
    timers: TimerManager,
    codec: C,
    params: DecodeParams,
    outbound: O,
    _timer: PhantomData<fn() -> T>,
}

impl<T, C, O> Driver<T, C, O>
where
    T: TimerService,
    C: SignalCodec,
    O: OutboundSink,
{
    async fn run(mut self, mut rx: mpsc::Receiver<InstanceEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                InstanceEvent::Raw { bytes, channel } => {
                    let signal = match self.codec.decode(&bytes, &self.params) {
                        Ok(signal) => signal,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "dropping undecodable input");
                            continue;
                        }
                    };
                    match self.machine.offer(&signal, &channel) {
                        Ok(effects) => self.perform(effects),
                        Err(err) => {
                            error!(error = %err, "fatal machine error; instance stopping");
                            break;
                        }
                    }
                }
                InstanceEvent::TimerExpired { name, generation } => {
                    if !self.timers.accept(&name, generation) {
                        trace!(timer = %name, "stale timer expiry dropped");
                        continue;
                    }
                    match self.machine.expire(&name) {
                        Ok(effects) => self.perform(effects),
                        Err(err) => {
                            error!(error = %err, "fatal machine error; instance stopping");
                            break;
                        }
                    }
                }
                InstanceEvent::Shutdown => break,
            }
        }
        self.timers.cancel_all();
    }

    fn perform(&mut self, effects: Vec<Effect<C::Signal>>) {
        for effect in effects {
            match effect {
                Effect::StartTimer { name, after } => self.timers.start::<T>(&name, after),
                Effect::CancelTimer { name } => self.timers.cancel(&name),
                Effect::CancelAllTimers => self.timers.cancel_all(),
                Effect::Send { channel, signal } => {
                    let frame = self.codec.encode(&signal);
                    self.outbound.deliver(&channel, frame);
                }
            }
        }
    }
}
