//! Wire vocabulary for the platform's event protocol.
//!
//! Every event on the connection is a JSON tree of `{tag, attr, content}`
//! elements. Content entries are either nested elements (metadata items,
//! field datums) or bare scalars (field values, property values). Nothing in
//! this module knows about operations or fields; it only gives the rest of
//! the crate a typed view of the tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runtime::error::DecodeError;

pub mod serializer;

/// Event and item tags used on the wire.
pub mod tags {
    /// Metadata event opening an instance.
    pub const OPEN_EVENT: &str = "open_event";
    /// Metadata event extending an instance's schema.
    pub const AGGREGATE_EVENT: &str = "aggregate_event";
    /// Operational event carrying field data.
    pub const DATA_EVENT: &str = "data_event";
    /// Failure reply.
    pub const ERROR_EVENT: &str = "error_event";
    /// Locally scoped script invocation.
    pub const INTERNAL: &str = "internal";

    /// Child of an error event.
    pub const ERROR: &str = "error";
    /// A single field value in event content.
    pub const DATUM: &str = "datum";

    /// Field declaration group.
    pub const FIELDS: &str = "fields";
    /// Service descriptor.
    pub const SERVICE: &str = "service";
    /// Service property.
    pub const PROP: &str = "prop";
    /// Reply declaration under a request or consume operation.
    pub const REPLY: &str = "reply";

    /// Request/reply operation group.
    pub const REQUESTS: &str = "requests";
    /// Solicit/response operation group.
    pub const SOLICITS: &str = "solicits";
    /// Misspelt solicit group emitted by older platform releases.
    pub const SOLICITS_LEGACY: &str = "solicts";
    /// Consume operation group.
    pub const CONSUMES: &str = "consumes";
    /// Notify operation group.
    pub const NOTIFIES: &str = "notifies";
    /// Response operation group.
    pub const RESPONSES: &str = "responses";

    /// Request operation item.
    pub const REQUEST: &str = "request";
    /// Solicit operation item.
    pub const SOLICIT: &str = "solicit";
    /// Misspelt solicit item emitted by older platform releases.
    pub const SOLICIT_LEGACY: &str = "solict";
    /// Consume operation item.
    pub const CONSUME: &str = "consume";
    /// One-way operation item (derived from consume items without replies).
    pub const ONE_WAY: &str = "one_way";
    /// Notify operation item.
    pub const NOTIFY: &str = "notify";
    /// Response operation item.
    pub const RESPONSE: &str = "response";
}

/// Attribute names used on the wire.
pub mod attrs {
    /// Instance id on inbound events, correlation id on outbound ones.
    pub const REF: &str = "ref";
    /// Event or item identifier.
    pub const ID: &str = "id";
    /// Item name.
    pub const NAME: &str = "name";
    /// Operation or reply addressed by a data event.
    pub const SUBJECT: &str = "subject";
    /// Declared type of a field or property.
    pub const TYPE: &str = "type";
    /// Service fulfilment type.
    pub const PROVISION: &str = "provision";
    /// Field id carried by a datum.
    pub const FIELD: &str = "field";
    /// Failure description on an error child.
    pub const REASON: &str = "reason";
}

/// A tagged node of the wire tree.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Element {
    /// Element tag.
    pub tag: String,
    /// Attributes keyed by name.
    #[serde(default)]
    pub attr: Map<String, Value>,
    /// Child nodes in order.
    #[serde(default)]
    pub content: Vec<Node>,
}

/// Content entry: either a nested element or a bare value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Nested element.
    Element(Element),
    /// Scalar value.
    Value(Value),
}

/// Classification of an inbound event by its tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Instance schema declaration.
    Open,
    /// Instance schema extension.
    Aggregate,
    /// Operational data.
    Data,
    /// Internal script invocation.
    Internal,
    /// Anything else.
    Other,
}

impl EventKind {
    /// Classify an event tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            tags::OPEN_EVENT => EventKind::Open,
            tags::AGGREGATE_EVENT => EventKind::Aggregate,
            tags::DATA_EVENT => EventKind::Data,
            tags::INTERNAL => EventKind::Internal,
            _ => EventKind::Other,
        }
    }

    /// Whether the event carries schema rather than data.
    pub fn is_metadata(self) -> bool {
        matches!(self, EventKind::Open | EventKind::Aggregate)
    }
}

impl Element {
    /// Create an element with no attributes or content.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attr: Map::new(),
            content: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attr.insert(name.to_string(), value.into());
        self
    }

    /// Builder-style child setter.
    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.content.push(child.into());
        self
    }

    /// Check whether the tag matches.
    pub fn has_tag(&self, expected: &str) -> bool {
        self.tag == expected
    }

    /// Raw attribute value.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attr.get(name)
    }

    /// Attribute interpreted as a string.
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr.get(name).and_then(Value::as_str)
    }

    /// Attribute that must be present as a string.
    pub fn require_attr(&self, name: &'static str) -> Result<&str, DecodeError> {
        self.attr_str(name).ok_or(DecodeError::MissingAttribute {
            tag: self.tag.clone(),
            attribute: name,
        })
    }

    /// Iterate over nested elements, skipping scalar content.
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.content.iter().filter_map(Node::as_element)
    }

    /// First scalar in the content list.
    pub fn first_value(&self) -> Option<&Value> {
        self.content.first().and_then(Node::as_value)
    }
}

impl Node {
    /// View as an element.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            Node::Value(_) => None,
        }
    }

    /// View as a scalar.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Node::Value(value) => Some(value),
            Node::Element(_) => None,
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Value(value)
    }
}

/// Parse a raw frame into an event element.
pub fn parse_event(raw: &str) -> Result<Element, DecodeError> {
    let event: Element = serde_json::from_str(raw)?;
    Ok(event)
}

/// Render an event element as a single-line JSON frame.
pub fn render_event(event: &Element) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_tree_with_scalars() {
        let raw = json!({
            "tag": "data_event",
            "attr": {"ref": "I-1", "id": "E-7", "subject": "B-1"},
            "content": [{"tag": "datum", "attr": {"field": "B-10"}, "content": [10]}]
        })
        .to_string();

        let event = parse_event(&raw).unwrap();
        assert_eq!(EventKind::from_tag(&event.tag), EventKind::Data);
        assert_eq!(event.attr_str(attrs::SUBJECT), Some("B-1"));

        let datum = event.children().next().unwrap();
        assert_eq!(datum.attr_str(attrs::FIELD), Some("B-10"));
        assert_eq!(datum.first_value(), Some(&json!(10)));
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let event = parse_event(r#"{"tag":"consume","attr":{"id":"B-3","name":"Log"}}"#).unwrap();
        assert!(event.content.is_empty());
        assert!(event.first_value().is_none());
    }

    #[test]
    fn object_without_tag_is_a_scalar() {
        let node: Node = serde_json::from_value(json!({"key": 1})).unwrap();
        assert!(node.as_value().is_some());
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(matches!(parse_event("{not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn require_attr_reports_tag_and_name() {
        let element = Element::new("prop");
        let err = element.require_attr(attrs::NAME).unwrap_err();
        assert!(err.to_string().contains("prop"));
        assert!(err.to_string().contains("name"));
    }
}
