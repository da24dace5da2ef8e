use gka_transport::Endpoint;

use crate::scheduler::Task;
use crate::types::MemberId;

/// Why an inbound datagram could not be turned into a [`Message`](crate::Message).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl From<rmp_serde::decode::Error> for DecodeError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        DecodeError::MalformedMessage {
            reason: e.to_string(),
        }
    }
}

/// Protocol-level errors.
#[derive(Debug, thiserror::Error)]
pub enum GkaError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<rmp_serde::encode::Error> for GkaError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        GkaError::Encode(e.to_string())
    }
}

impl From<gka_transport::TransportError> for GkaError {
    fn from(e: gka_transport::TransportError) -> Self {
        GkaError::Transport(e.to_string())
    }
}

/// Conditions that look like failures but are part of normal operation
/// on an unreliable network. They are logged and never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Absorbed {
    #[error("{endpoint} is already an assigned member")]
    DuplicateAdmission { endpoint: Endpoint },

    #[error("cascade waits for member {expected}, holding values up to {highest_known}")]
    OutOfOrderCascade {
        expected: MemberId,
        highest_known: MemberId,
    },

    #[error("{0:?} fired after its guard became false")]
    TimerRace(Task),
}

impl Absorbed {
    pub(crate) fn log(&self) {
        tracing::debug!(absorbed = %self, "absorbed");
    }
}
