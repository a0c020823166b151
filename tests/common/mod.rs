//! Shared test fixtures: the two-field version/value codec and a recording
//! transport sink.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use wirestate::{Channel, DecodeError, DecodeParams, OutboundSink, SignalCodec};

/// Routes handler logs to the test harness so they show up under
/// `--nocapture`. Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A decoded two-field protocol message: one version byte, one value byte
/// adjusted by the first decode parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionValue {
    pub version: u8,
    pub value: i64,
}

impl VersionValue {
    pub fn new(version: u8, value: i64) -> Self {
        VersionValue { version, value }
    }
}

/// Codec for [`VersionValue`]: byte 0 is the version, byte 1 the raw value;
/// decode adds the first decode parameter to the value, encode packs the two
/// bytes back.
pub struct VersionValueCodec;

impl SignalCodec for VersionValueCodec {
    type Signal = VersionValue;

    fn decode(&self, bytes: &[u8], params: &DecodeParams) -> Result<VersionValue, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError::Truncated {
                need: 2,
                got: bytes.len(),
            });
        }
        Ok(VersionValue {
            version: bytes[0],
            value: i64::from(bytes[1]) + params.get(0),
        })
    }

    fn encode(&self, signal: &VersionValue) -> Vec<u8> {
        vec![signal.version, (signal.value & 0xff) as u8]
    }
}

/// Sink that records every delivered frame for later assertions.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<(Channel, Vec<u8>)>>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<(Channel, Vec<u8>)> {
        self.frames.lock().unwrap().clone()
    }
}

impl OutboundSink for RecordingSink {
    fn deliver(&mut self, channel: &Channel, frame: Vec<u8>) {
        self.frames.lock().unwrap().push((channel.clone(), frame));
    }
}
