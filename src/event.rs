use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{client::JsonRpcError, filter::EventCategory, Result};

/// A flattened event attribute: one value, or every value when the key repeats.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Normalized chain event handed to the consumer.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEvent {
    pub event_type: EventCategory,
    /// Local receipt time, not block time.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_events: Option<BTreeMap<String, AttributeValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// What an inbound stream message turned out to be.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Subscription acknowledgment: an empty result object.
    Ack,
    Event(Box<ParsedEvent>),
    Error(JsonRpcError),
    /// Valid JSON that carries neither an event nor an error.
    Ignored,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct EventResult {
    data: Option<EventData>,
    #[serde(default)]
    events: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Deserialize)]
struct EventData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
}

/// Collapse single-element attribute lists to a scalar and drop empty ones.
pub fn flatten_attributes(events: BTreeMap<String, Vec<String>>) -> BTreeMap<String, AttributeValue> {
    events
        .into_iter()
        .filter_map(|(key, mut values)| match values.len() {
            0 => None,
            1 => values.pop().map(|v| (key, AttributeValue::Single(v))),
            _ => Some((key, AttributeValue::Multiple(values))),
        })
        .collect()
}

/// Parse one text frame from the event stream.
///
/// Fails only when the frame is not JSON or the event envelope is malformed.
pub fn classify(
    text: &str,
    category: EventCategory,
    include_raw: bool,
    now: DateTime<Utc>,
) -> Result<Inbound> {
    let raw: Value = serde_json::from_str(text)?;
    let envelope: Envelope = serde_json::from_value(raw.clone())?;

    if let Some(error) = envelope.error {
        return Ok(Inbound::Error(error));
    }

    let Some(result) = envelope.result else {
        return Ok(Inbound::Ignored);
    };

    if result.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(Inbound::Ack);
    }

    let result: EventResult = serde_json::from_value(result)?;
    let Some(data) = result.data else {
        return Ok(Inbound::Ignored);
    };

    Ok(Inbound::Event(Box::new(ParsedEvent {
        event_type: category,
        timestamp: now,
        kind: data.kind,
        data: data.value,
        parsed_events: result.events.map(flatten_attributes),
        raw: include_raw.then_some(raw),
    })))
}
