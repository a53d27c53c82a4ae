//! Field codec: wire datums to name-keyed field maps and back.
//!
//! Field ids are only meaningful per instance, so both directions resolve
//! through the instance's [`Metadata`]. Service properties are exposed to
//! handlers as synthetic fields with no wire id, which is also what keeps
//! them from ever being encoded back onto the wire.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::error::{DecodeError, DecodeResult};
use super::metadata::{FieldDescriptor, Metadata};
use crate::protocol::{Element, Node, attrs, serializer, tags};
use crate::util::value::{coerce, scalar_text};

/// Field values keyed by field name.
pub type FieldMap = Map<String, Value>;

/// Field descriptors keyed by field name.
pub type FieldSchema = BTreeMap<String, FieldDescriptor>;

/// Conventional prefix of platform-issued field ids.
pub const FIELD_ID_PREFIX: &str = "B-";

/// Result of decoding event content.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Wire fields by name, plus synthetic property fields.
    pub fields: FieldMap,
    /// Registered schema extended with the synthetic entries.
    pub schema: FieldSchema,
}

/// Flat field name used for a service property.
pub fn synthetic_name(property: &str) -> String {
    property.replace('.', "__")
}

/// Decode datum content into named fields.
pub fn decode(metadata: &Metadata, content: &[Node]) -> DecodeResult<Decoded> {
    let mut fields = FieldMap::new();
    let mut checked_prefix = false;

    for datum in content.iter().filter_map(Node::as_element) {
        let Some(field_id) = datum.attr_str(attrs::FIELD) else {
            continue;
        };
        let Some(name) = metadata.field_name(field_id) else {
            debug!(field_id, "dropping unregistered field");
            continue;
        };

        if !checked_prefix {
            checked_prefix = true;
            if !field_id.starts_with(FIELD_ID_PREFIX) {
                warn!(field_id, "field id lacks the conventional prefix, decoding anyway");
            }
        }

        let value = datum
            .first_value()
            .ok_or_else(|| DecodeError::MissingValue(field_id.to_string()))?;
        fields.insert(name.to_string(), value.clone());
    }

    let mut schema: FieldSchema = metadata
        .fields()
        .map(|(name, descriptor)| (name.to_string(), descriptor.clone()))
        .collect();

    for (property, value) in metadata.properties() {
        let name = synthetic_name(property);
        fields.insert(name.clone(), Value::String(scalar_text(&value.value)));
        schema.insert(
            name,
            FieldDescriptor {
                id: None,
                field_type: value.field_type(),
            },
        );
    }

    Ok(Decoded { fields, schema })
}

/// Encode named fields as datum content. Fields without a wire id or
/// declared type are omitted.
pub fn encode(metadata: &Metadata, fields: &FieldMap) -> Vec<Node> {
    fields
        .iter()
        .filter_map(|(name, value)| {
            let descriptor = metadata.field(name)?;
            let (Some(id), Some(field_type)) =
                (descriptor.id.as_deref(), descriptor.field_type.as_ref())
            else {
                return None;
            };
            Some(Node::Element(
                Element::new(tags::DATUM)
                    .with_attr(attrs::FIELD, id)
                    .with_child(coerce(value, Some(field_type))),
            ))
        })
        .collect()
}

/// Data event addressed to `subject` whose content encodes `fields`.
pub fn data_event(
    reference: Value,
    subject: Option<&str>,
    metadata: &Metadata,
    fields: &FieldMap,
) -> Element {
    serializer::data_event(reference, subject, encode(metadata, fields))
}
