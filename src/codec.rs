//! Collaborator seams: the wire codec and the outbound transport sink.
//!
//! The core never interprets bytes itself. A [`SignalCodec`] implementation
//! (one per protocol) turns raw frames into typed signals on the way in and
//! back into frames on the way out; an [`OutboundSink`] receives the encoded
//! frames a handler asked to send. Both are supplied by the host when an
//! instance is spawned.

use thiserror::Error;

use crate::event::Channel;

/// Per-machine-type decode configuration, passed to the codec on every
/// decode call. The meaning of each parameter belongs to the codec; the core
/// only carries the list around (e.g. a positional value-offset adjustment).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeParams(Vec<i64>);

impl DecodeParams {
    #[must_use]
    pub fn new(params: impl Into<Vec<i64>>) -> Self {
        DecodeParams(params.into())
    }

    /// Parameter at `index`, or 0 when absent.
    #[must_use]
    pub fn get(&self, index: usize) -> i64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }
}

/// Why a raw frame could not be decoded. Decode failures are never fatal:
/// the driver logs them and drops the frame, and the machine stays where it
/// was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("input truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Byte ↔ signal conversion for one protocol.
pub trait SignalCodec: Send + 'static {
    /// The decoded, typed representation handlers and predicates see.
    type Signal: Send + 'static;

    /// Decodes one inbound frame.
    ///
    /// # Errors
    /// Returns [`DecodeError`] when the frame cannot be interpreted; the
    /// caller drops the frame.
    fn decode(&self, bytes: &[u8], params: &DecodeParams) -> Result<Self::Signal, DecodeError>;

    /// Encodes one outbound signal into a frame for the transport.
    fn encode(&self, signal: &Self::Signal) -> Vec<u8>;
}

/// Where encoded outbound frames go. The transport itself is out of scope;
/// the core treats it as a sink.
pub trait OutboundSink: Send + 'static {
    fn deliver(&mut self, channel: &Channel, frame: Vec<u8>);
}
