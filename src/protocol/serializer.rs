//! Outbound event construction.
//!
//! Pure functions of their inputs: no shared state and no failure modes.

use serde_json::{Map, Value};

use super::{Element, Node, attrs, tags};

fn addressed(tag: &str, reference: Value, subject: Option<&str>) -> Element {
    Element::new(tag)
        .with_attr(attrs::REF, reference)
        .with_attr(
            attrs::SUBJECT,
            subject.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null),
        )
}

/// Data event carrying already-encoded field content.
pub fn data_event(reference: Value, subject: Option<&str>, content: Vec<Node>) -> Element {
    let mut event = addressed(tags::DATA_EVENT, reference, subject);
    event.content = content;
    event
}

/// Error event with a single error child carrying `reason`.
pub fn error_event(reference: Value, subject: Option<&str>, reason: &str) -> Element {
    addressed(tags::ERROR_EVENT, reference, subject)
        .with_child(Element::new(tags::ERROR).with_attr(attrs::REASON, reason))
}

/// Internal event whose attributes are the stringified result fields.
pub fn internal_event(attributes: Map<String, Value>) -> Element {
    Element {
        tag: tags::INTERNAL.to_string(),
        attr: attributes,
        content: Vec::new(),
    }
}
