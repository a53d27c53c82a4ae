//! Per-instance schema learned from open and aggregate events.
//!
//! The platform registers no schema ahead of time. Each instance receives
//! its operations, fields and service properties piecemeal, and every merge
//! only ever extends what is already known.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::protocol::{Element, Node, attrs, tags};

/// Classification of an addressable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Request/reply: the platform asks, the service replies.
    Request,
    /// Solicit/response: the service asks, the platform replies.
    Solicit,
    /// Consume with declared replies.
    Consume,
    /// Consume without replies: fire and forget.
    OneWay,
    /// Unsolicited notification from the service.
    Notify,
    /// Platform reply to a solicit.
    Response,
}

impl OpKind {
    /// Resolve an operation item tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            tags::REQUEST => Some(OpKind::Request),
            tags::SOLICIT | tags::SOLICIT_LEGACY => Some(OpKind::Solicit),
            tags::CONSUME => Some(OpKind::Consume),
            tags::ONE_WAY => Some(OpKind::OneWay),
            tags::NOTIFY => Some(OpKind::Notify),
            tags::RESPONSE => Some(OpKind::Response),
            _ => None,
        }
    }

    /// Wire spelling of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Request => tags::REQUEST,
            OpKind::Solicit => tags::SOLICIT,
            OpKind::Consume => tags::CONSUME,
            OpKind::OneWay => tags::ONE_WAY,
            OpKind::Notify => tags::NOTIFY,
            OpKind::Response => tags::RESPONSE,
        }
    }

    /// Kinds whose replies are recorded.
    pub fn declares_replies(self) -> bool {
        matches!(self, OpKind::Request | OpKind::Consume)
    }

    /// Kinds addressable by name (everything except responses).
    pub fn is_named(self) -> bool {
        !matches!(self, OpKind::Response)
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a field or property.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `boolean`
    Boolean,
    /// `float`
    Float,
    /// `integer`
    Integer,
    /// `string`
    String,
    /// `time`
    Time,
    /// Any other declared type, kept verbatim.
    Other(String),
}

impl FieldType {
    /// Resolve a type tag. Never fails: unknown tags are kept as `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "boolean" => FieldType::Boolean,
            "float" => FieldType::Float,
            "integer" => FieldType::Integer,
            "string" => FieldType::String,
            "time" => FieldType::Time,
            other => FieldType::Other(other.to_string()),
        }
    }

    /// Wire spelling of the type.
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Boolean => "boolean",
            FieldType::Float => "float",
            FieldType::Integer => "integer",
            FieldType::String => "string",
            FieldType::Time => "time",
            FieldType::Other(tag) => tag,
        }
    }

    /// Plain scalar types that script languages can bind directly.
    pub fn is_plain_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::Boolean | FieldType::Float | FieldType::Integer | FieldType::String
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an instance's operations are fulfilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceType {
    /// Registered in-process callbacks (`docker` provision).
    Callback,
    /// Script bodies carried in service properties (`script` provision).
    Script,
    /// Anything else.
    Other(String),
}

impl ServiceType {
    /// Resolve a provision tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "docker" => ServiceType::Callback,
            "script" => ServiceType::Script,
            other => ServiceType::Other(other.to_string()),
        }
    }
}

/// A service configuration property.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property value as received.
    pub value: Value,
    /// Declared type tag (a field type, or a script language for sources).
    pub type_tag: Option<String>,
}

impl Property {
    /// Declared type interpreted as a field type.
    pub fn field_type(&self) -> Option<FieldType> {
        self.type_tag.as_deref().map(FieldType::from_tag)
    }

    /// Value as text, when it is a string.
    pub fn as_text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Wire id and declared type of a named field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Wire id; `None` for synthetic fields.
    pub id: Option<String>,
    /// Declared type.
    pub field_type: Option<FieldType>,
}

/// Schema of one service instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    service_type: Option<ServiceType>,
    op_kinds: HashMap<String, OpKind>,
    op_names: HashMap<String, String>,
    op_ids: HashMap<String, String>,
    replies: HashMap<String, HashMap<String, String>>,
    field_names: HashMap<String, String>,
    fields: HashMap<String, FieldDescriptor>,
    properties: BTreeMap<String, Property>,
}

impl Metadata {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a sequence of metadata items into this schema.
    pub fn merge(&mut self, items: &[Node]) {
        for item in items.iter().filter_map(Node::as_element) {
            match item.tag.as_str() {
                tags::REQUESTS
                | tags::SOLICITS
                | tags::SOLICITS_LEGACY
                | tags::CONSUMES
                | tags::NOTIFIES
                | tags::RESPONSES => {
                    for op in item.children() {
                        self.merge_operation(op);
                    }
                }
                tags::FIELDS => {
                    for field in item.children() {
                        self.merge_field(field);
                    }
                }
                tags::SERVICE => self.merge_service(item),
                other => debug!(tag = other, "ignoring metadata item"),
            }
        }
    }

    fn merge_operation(&mut self, op: &Element) {
        let Some(declared) = OpKind::from_tag(&op.tag) else {
            debug!(tag = %op.tag, "ignoring unknown operation item");
            return;
        };
        let (Some(id), Some(name)) = (op.attr_str(attrs::ID), op.attr_str(attrs::NAME)) else {
            debug!(tag = %op.tag, "ignoring operation without id and name");
            return;
        };

        let replies: Vec<(&str, &str)> = op
            .children()
            .filter_map(|reply| Some((reply.attr_str(attrs::NAME)?, reply.attr_str(attrs::ID)?)))
            .collect();

        // Replies recorded by an earlier merge keep a consume answerable.
        let answered = self.replies.get(id).is_some_and(|known| !known.is_empty());
        let kind = if declared == OpKind::Consume && replies.is_empty() && !answered {
            OpKind::OneWay
        } else {
            declared
        };

        debug!(id, name, %kind, "adding operation");
        self.op_names.insert(id.to_string(), name.to_string());
        if kind.is_named() {
            self.op_ids.insert(name.to_string(), id.to_string());
        }
        self.op_kinds.insert(id.to_string(), kind);

        if kind.declares_replies() {
            let entry = self.replies.entry(id.to_string()).or_default();
            for (reply_name, reply_id) in replies {
                entry.insert(reply_name.to_string(), reply_id.to_string());
            }
        }
    }

    fn merge_field(&mut self, field: &Element) {
        let Some(type_tag) = field.attr_str(attrs::TYPE).filter(|t| !t.is_empty()) else {
            return;
        };
        let (Some(id), Some(name)) = (field.attr_str(attrs::ID), field.attr_str(attrs::NAME))
        else {
            debug!("ignoring typed field without id and name");
            return;
        };

        debug!(id, name, type_tag, "adding field");
        self.field_names.insert(id.to_string(), name.to_string());
        self.fields.insert(
            name.to_string(),
            FieldDescriptor {
                id: Some(id.to_string()),
                field_type: Some(FieldType::from_tag(type_tag)),
            },
        );
    }

    fn merge_service(&mut self, service: &Element) {
        if self.service_type.is_none() {
            self.service_type = service.attr_str(attrs::PROVISION).map(ServiceType::from_tag);
        }

        for prop in service.children().filter(|child| child.has_tag(tags::PROP)) {
            let Some(name) = prop.attr_str(attrs::NAME) else {
                debug!("ignoring unnamed property");
                continue;
            };
            let Some(value) = prop.first_value() else {
                debug!(name, "ignoring property without value");
                continue;
            };
            self.properties.insert(
                name.to_string(),
                Property {
                    value: value.clone(),
                    type_tag: prop.attr_str(attrs::TYPE).map(str::to_string),
                },
            );
        }
    }

    /// Service fulfilment type, if declared.
    pub fn service_type(&self) -> Option<&ServiceType> {
        self.service_type.as_ref()
    }

    /// Kind of the operation with the given id.
    pub fn op_kind(&self, op_id: &str) -> Option<OpKind> {
        self.op_kinds.get(op_id).copied()
    }

    /// Name of the operation with the given id.
    pub fn op_name(&self, op_id: &str) -> Option<&str> {
        self.op_names.get(op_id).map(String::as_str)
    }

    /// Id of the (non-response) operation with the given name.
    pub fn op_id(&self, op_name: &str) -> Option<&str> {
        self.op_ids.get(op_name).map(String::as_str)
    }

    /// Subject addressing the named reply of an operation.
    pub fn reply_subject(&self, op_id: &str, reply_name: &str) -> Option<&str> {
        self.replies
            .get(op_id)
            .and_then(|replies| replies.get(reply_name))
            .map(String::as_str)
    }

    /// All declared replies of an operation.
    pub fn replies(&self, op_id: &str) -> Option<&HashMap<String, String>> {
        self.replies.get(op_id)
    }

    /// Name of the field with the given wire id.
    pub fn field_name(&self, field_id: &str) -> Option<&str> {
        self.field_names.get(field_id).map(String::as_str)
    }

    /// Descriptor of the named field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Iterate over registered fields by name.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(name, desc)| (name.as_str(), desc))
    }

    /// Property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// All properties, ordered by name.
    pub fn properties(&self) -> &BTreeMap<String, Property> {
        &self.properties
    }

    /// Number of registered operations.
    pub fn operation_count(&self) -> usize {
        self.op_kinds.len()
    }

    /// Number of registered fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(value: serde_json::Value) -> Vec<Node> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn consume_without_replies_becomes_one_way() {
        let mut md = Metadata::new();
        md.merge(&items(json!([
            {"tag": "consumes", "content": [
                {"tag": "consume", "attr": {"id": "B-3", "name": "Log"}},
                {"tag": "consume", "attr": {"id": "B-4", "name": "Store"}, "content": [
                    {"tag": "reply", "attr": {"id": "B-5", "name": "Ok"}}
                ]}
            ]}
        ])));

        assert_eq!(md.op_kind("B-3"), Some(OpKind::OneWay));
        assert_eq!(md.op_kind("B-4"), Some(OpKind::Consume));
        assert_eq!(md.reply_subject("B-4", "Ok"), Some("B-5"));
        assert!(md.replies("B-3").is_none());
    }

    #[test]
    fn responses_are_not_addressable_by_name() {
        let mut md = Metadata::new();
        md.merge(&items(json!([
            {"tag": "responses", "content": [
                {"tag": "response", "attr": {"id": "B-8", "name": "Answer"}}
            ]},
            {"tag": "solicts", "content": [
                {"tag": "solict", "attr": {"id": "B-9", "name": "Ask"}}
            ]}
        ])));

        assert_eq!(md.op_kind("B-8"), Some(OpKind::Response));
        assert_eq!(md.op_name("B-8"), Some("Answer"));
        assert_eq!(md.op_id("Answer"), None);
        assert_eq!(md.op_kind("B-9"), Some(OpKind::Solicit));
        assert_eq!(md.op_id("Ask"), Some("B-9"));
    }

    #[test]
    fn untyped_fields_are_skipped() {
        let mut md = Metadata::new();
        md.merge(&items(json!([
            {"tag": "fields", "content": [
                {"tag": "field", "attr": {"id": "B-10", "name": "n", "type": "integer"}},
                {"tag": "field", "attr": {"id": "B-11", "name": "folder"}}
            ]}
        ])));

        assert_eq!(md.field_count(), 1);
        assert_eq!(md.field_name("B-10"), Some("n"));
        assert_eq!(md.field_name("B-11"), None);
        assert_eq!(md.field("n").unwrap().field_type, Some(FieldType::Integer));
    }

    #[test]
    fn service_type_first_write_wins_and_props_accumulate() {
        let mut md = Metadata::new();
        md.merge(&items(json!([
            {"tag": "service", "attr": {"provision": "script"}, "content": [
                {"tag": "prop", "attr": {"name": "script.src", "type": "python"}, "content": ["def x(): pass"]}
            ]}
        ])));
        md.merge(&items(json!([
            {"tag": "service", "attr": {"provision": "docker"}, "content": [
                {"tag": "prop", "attr": {"name": "limit", "type": "integer"}, "content": [5]}
            ]}
        ])));

        assert_eq!(md.service_type(), Some(&ServiceType::Script));
        assert_eq!(md.properties().len(), 2);
        assert_eq!(md.property("limit").unwrap().value, json!(5));
        assert_eq!(
            md.property("script.src").unwrap().type_tag.as_deref(),
            Some("python")
        );
    }

    #[test]
    fn redeclared_consume_keeps_its_replies() {
        let with_replies = json!([
            {"tag": "consumes", "content": [
                {"tag": "consume", "attr": {"id": "B-4", "name": "Store"}, "content": [
                    {"tag": "reply", "attr": {"id": "B-5", "name": "Ok"}}
                ]}
            ]}
        ]);
        let bare = json!([
            {"tag": "consumes", "content": [
                {"tag": "consume", "attr": {"id": "B-4", "name": "Store"}}
            ]}
        ]);

        let mut forward = Metadata::new();
        forward.merge(&items(with_replies.clone()));
        forward.merge(&items(bare.clone()));
        assert_eq!(forward.op_kind("B-4"), Some(OpKind::Consume));
        assert_eq!(forward.reply_subject("B-4", "Ok"), Some("B-5"));

        let mut backward = Metadata::new();
        backward.merge(&items(bare));
        backward.merge(&items(with_replies));
        assert_eq!(backward, forward);
    }

    #[test]
    fn later_merges_extend_replies() {
        let mut md = Metadata::new();
        md.merge(&items(json!([
            {"tag": "requests", "content": [
                {"tag": "request", "attr": {"id": "B-1", "name": "Check"}, "content": [
                    {"tag": "reply", "attr": {"id": "B-2", "name": "Yes"}}
                ]}
            ]}
        ])));
        md.merge(&items(json!([
            {"tag": "requests", "content": [
                {"tag": "request", "attr": {"id": "B-1", "name": "Check"}, "content": [
                    {"tag": "reply", "attr": {"id": "B-6", "name": "No"}}
                ]}
            ]}
        ])));

        assert_eq!(md.reply_subject("B-1", "Yes"), Some("B-2"));
        assert_eq!(md.reply_subject("B-1", "No"), Some("B-6"));
        assert_eq!(md.operation_count(), 1);
    }
}
