use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant of a response-management event.
///
/// Unknown discriminants are preserved in [`EventType::Other`] so the dispatcher can
/// reject them by name instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    CaseCreated,
    CaseUpdated,
    UacUpdated,
    FulfilmentRequested,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::CaseCreated => "CASE_CREATED",
            EventType::CaseUpdated => "CASE_UPDATED",
            EventType::UacUpdated => "UAC_UPDATED",
            EventType::FulfilmentRequested => "FULFILMENT_REQUESTED",
            EventType::Other(name) => name,
        }
    }
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "CASE_CREATED" => EventType::CaseCreated,
            "CASE_UPDATED" => EventType::CaseUpdated,
            "UAC_UPDATED" => EventType::UacUpdated,
            "FULFILMENT_REQUESTED" => EventType::FulfilmentRequested,
            _ => EventType::Other(value),
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event header: what happened, who sent it, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
}

impl EventHeader {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            source: None,
            channel: None,
            date_time: None,
            transaction_id: None,
        }
    }
}
