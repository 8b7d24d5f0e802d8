//! Acknowledgment gate: handshake classification of incoming frames
//!
//! Until a frame satisfies the acknowledgment predicate the stream is not
//! considered connected and every other frame is silently dropped. The
//! triggering frame flips the gate exactly once; whether it is itself
//! forwarded to the application is a policy decision (`filter_acknowledge`).

use serde_json::Value;

use crate::config::{is_heartbeat, AckFilter};

/// Post-handshake classification of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameClass {
    Heartbeat,
    Data,
}

/// Outcome of routing one frame through the gate
pub(crate) enum GateVerdict {
    /// Pre-handshake frame that does not satisfy the acknowledgment filter
    Ignored,
    /// This frame completed the handshake; `then` carries its own
    /// classification when the triggering frame is forwarded
    Connected { then: Option<FrameClass> },
    /// Ordinary post-handshake frame
    Frame(FrameClass),
}

pub(crate) struct AckGate {
    filter: AckFilter,
    filter_acknowledge: bool,
    satisfied: bool,
}

impl AckGate {
    pub fn new(filter: AckFilter, filter_acknowledge: bool) -> Self {
        Self {
            filter,
            filter_acknowledge,
            satisfied: false,
        }
    }

    /// Classify a decoded frame; the caller guards that `frame` is an object
    pub fn classify(&mut self, frame: &Value) -> GateVerdict {
        if !self.satisfied {
            if !(self.filter)(frame) {
                return GateVerdict::Ignored;
            }
            self.satisfied = true;
            let then = (!self.filter_acknowledge).then(|| Self::class_of(frame));
            return GateVerdict::Connected { then };
        }
        GateVerdict::Frame(Self::class_of(frame))
    }

    fn class_of(frame: &Value) -> FrameClass {
        if is_heartbeat(frame) {
            FrameClass::Heartbeat
        } else {
            FrameClass::Data
        }
    }
}
