use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventHeader;
use crate::payload::Payload;

/// A decoded inbound message: header + payload.
///
/// This is the unit the dispatcher processes inside one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseManagementEvent {
    pub event: EventHeader,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Error)]
#[error("failed to decode response management event: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

impl ResponseManagementEvent {
    pub fn new(event: EventHeader, payload: Payload) -> Self {
        Self { event, payload }
    }

    /// Decode a message body (JSON).
    pub fn from_slice(body: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode to a message body (JSON).
    pub fn to_vec(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}
