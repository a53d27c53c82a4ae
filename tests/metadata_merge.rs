//! Property-based tests for schema merging and the field codec.

use proptest::prelude::*;
use serde_json::{Value, json};
use svclink::protocol::Node;
use svclink::runtime::codec::{self, FieldMap};
use svclink::runtime::{Metadata, OpKind};

/// Operation group tag and item tag for a generated kind.
fn group(kind: u8) -> (&'static str, &'static str) {
    match kind % 5 {
        0 => ("requests", "request"),
        1 => ("solicits", "solicit"),
        2 => ("consumes", "consume"),
        3 => ("notifies", "notify"),
        _ => ("responses", "response"),
    }
}

/// One metadata item per generated operation, ids and names unique by index.
fn arb_items() -> impl Strategy<Value = Vec<Value>> {
    prop::collection::vec((any::<u8>(), 0usize..3, any::<bool>()), 1..8).prop_map(|ops| {
        ops.into_iter()
            .enumerate()
            .map(|(index, (kind, reply_count, typed))| {
                let (group_tag, item_tag) = group(kind);
                let replies: Vec<Value> = (0..reply_count)
                    .map(|r| {
                        json!({"tag": "reply", "attr": {"id": format!("B-{index}-{r}"), "name": format!("R{r}")}})
                    })
                    .collect();
                let field_type = if typed { "integer" } else { "" };
                json!([
                    {"tag": group_tag, "content": [
                        {"tag": item_tag, "attr": {"id": format!("B-{index}"), "name": format!("Op{index}")}, "content": replies}
                    ]},
                    {"tag": "fields", "content": [
                        {"tag": "field", "attr": {"id": format!("B-f{index}"), "name": format!("f{index}"), "type": field_type}}
                    ]}
                ])
            })
            .collect()
    })
}

fn nodes(value: &Value) -> Vec<Node> {
    serde_json::from_value(value.clone()).unwrap()
}

fn merged(items: &[Value]) -> Metadata {
    let mut metadata = Metadata::new();
    for item in items {
        metadata.merge(&nodes(item));
    }
    metadata
}

/// Datum for `field` carrying `value`.
fn datum(field: &str, value: Value) -> Value {
    json!({"tag": "datum", "attr": {"field": field}, "content": [value]})
}

/// Wire content keyed by field id, so trees compare regardless of datum order.
fn by_field(content: &[Node]) -> Vec<(String, Value)> {
    let mut pairs: Vec<(String, Value)> = content
        .iter()
        .filter_map(Node::as_element)
        .map(|datum| {
            (
                datum.attr_str("field").unwrap_or_default().to_string(),
                datum.first_value().cloned().unwrap_or(Value::Null),
            )
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

proptest! {
    #[test]
    fn reencoding_decoded_content_reproduces_the_wire(
        n in prop::option::of(any::<i64>()),
        label in prop::option::of("[a-z ]{0,12}"),
        flag in prop::option::of(any::<bool>()),
        prop_value in "[a-z0-9]{1,8}",
    ) {
        let metadata = merged(&[json!([
            {"tag": "service", "attr": {"provision": "docker"}, "content": [
                {"tag": "prop", "attr": {"name": "docker.image", "type": "string"}, "content": [prop_value]}
            ]},
            {"tag": "fields", "content": [
                {"tag": "field", "attr": {"id": "B-1", "name": "n", "type": "integer"}},
                {"tag": "field", "attr": {"id": "B-2", "name": "label", "type": "string"}},
                {"tag": "field", "attr": {"id": "B-3", "name": "flag", "type": "boolean"}}
            ]}
        ])]);

        let mut tree = Vec::new();
        if let Some(flag) = flag {
            tree.push(datum("B-3", json!(flag)));
        }
        if let Some(label) = label {
            tree.push(datum("B-2", json!(label)));
        }
        if let Some(n) = n {
            tree.push(datum("B-1", json!(n)));
        }
        let tree = nodes(&Value::Array(tree));

        let decoded = codec::decode(&metadata, &tree).unwrap();
        prop_assert_eq!(
            decoded.fields.get("docker__image"),
            Some(&Value::String(prop_value.clone()))
        );

        let reencoded = codec::encode(&metadata, &decoded.fields);
        prop_assert_eq!(by_field(&reencoded), by_field(&tree));
    }


    #[test]
    fn merging_twice_changes_nothing(items in arb_items()) {
        let once = merged(&items);
        let mut twice = once.clone();
        for item in &items {
            twice.merge(&nodes(item));
        }
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_order_does_not_matter(items in arb_items()) {
        let forward = merged(&items);
        let mut reversed_items = items.clone();
        reversed_items.reverse();
        let backward = merged(&reversed_items);
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(forward.operation_count(), items.len());
    }

    #[test]
    fn consumes_without_replies_are_one_way(items in arb_items()) {
        let metadata = merged(&items);
        for index in 0..items.len() {
            let id = format!("B-{index}");
            if metadata.op_kind(&id) == Some(OpKind::OneWay) {
                prop_assert!(metadata.replies(&id).is_none_or(|replies| replies.is_empty()));
            }
        }
    }

    #[test]
    fn encoded_fields_decode_to_the_same_values(n in any::<i64>(), label in "[a-z ]{0,12}") {
        let metadata = merged(&[json!([
            {"tag": "fields", "content": [
                {"tag": "field", "attr": {"id": "B-1", "name": "n", "type": "integer"}},
                {"tag": "field", "attr": {"id": "B-2", "name": "label", "type": "string"}}
            ]}
        ])]);
        let mut fields = FieldMap::new();
        fields.insert("n".into(), json!(n));
        fields.insert("label".into(), json!(label));

        let decoded = codec::decode(&metadata, &codec::encode(&metadata, &fields)).unwrap();
        prop_assert_eq!(decoded.fields, fields);
    }
}
