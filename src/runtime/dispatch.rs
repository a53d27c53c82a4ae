//! Event dispatch
//!
//! Every inbound event yields at most one reply. Notifications produced while
//! an operation runs are sent through the outbound sink before the reply is
//! returned, so they always precede it on the wire.

use std::path::PathBuf;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::codec::{self, FieldMap};
use super::error::{AdapterError, InvocationError, Result};
use super::invoke::{Invocation, invoke};
use super::metadata::{Metadata, OpKind};
use super::{Adapter, EventSink, correlation_id};
use crate::protocol::{self, Element, EventKind, attrs, serializer};
use crate::util::value::scalar_text;

/// Reason reported when a request's handler reports failure.
pub const SCRIPT_FAILURE_REASON: &str = "script result: false";

/// Operation run for internal events.
pub const INTERNAL_OPERATION: &str = "main";

impl Adapter {
    /// Handle one raw frame. Frames that cannot be parsed yield an error
    /// event with no correlation.
    pub fn handle_message(&mut self, raw: &str, outbound: &mut dyn EventSink) -> Option<Element> {
        debug!(raw, "received message");
        match protocol::parse_event(raw) {
            Ok(event) => self.handle_event(&event, outbound),
            Err(err) => {
                error!(%err, "discarding unparseable message");
                let err = AdapterError::from(err);
                Some(serializer::error_event(Value::Null, None, &err.to_string()))
            }
        }
    }

    /// Handle one parsed event, returning the reply to send, if any. Any
    /// failure becomes an error event correlated with the inbound event.
    pub fn handle_event(&mut self, event: &Element, outbound: &mut dyn EventSink) -> Option<Element> {
        match self.route(event, outbound) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(tag = %event.tag, error = %err, "event failed");
                Some(serializer::error_event(
                    correlation_id(event),
                    event.attr_str(attrs::SUBJECT),
                    &err.to_string(),
                ))
            }
        }
    }

    fn route(&mut self, event: &Element, outbound: &mut dyn EventSink) -> Result<Option<Element>> {
        match EventKind::from_tag(&event.tag) {
            kind @ (EventKind::Open | EventKind::Aggregate) => {
                let instance_id = event.require_attr(attrs::REF)?;
                if kind == EventKind::Aggregate && !self.registry.contains(instance_id) {
                    warn!(instance = instance_id, "aggregate event before open, creating instance");
                }
                self.registry.merge(instance_id, &event.content);
                Ok(None)
            }
            EventKind::Data => self.handle_data(event, outbound),
            EventKind::Internal => self.handle_internal(event),
            EventKind::Other => {
                debug!(tag = %event.tag, "ignoring event");
                Ok(None)
            }
        }
    }

    fn handle_data(&mut self, event: &Element, outbound: &mut dyn EventSink) -> Result<Option<Element>> {
        let instance_id = event.require_attr(attrs::REF)?;
        let subject = event.require_attr(attrs::SUBJECT)?;

        let Self {
            config,
            registry,
            callbacks,
            executor,
        } = self;
        let metadata = registry.get(instance_id)?;
        let Some(kind) = metadata.op_kind(subject) else {
            debug!(instance = instance_id, subject, "ignoring data for undeclared subject");
            return Ok(None);
        };

        match kind {
            OpKind::Request | OpKind::Consume | OpKind::OneWay => {
                let decoded = codec::decode(metadata, &event.content)?;
                let invocation = Invocation {
                    instance_id,
                    op_id: subject,
                    kind,
                    metadata,
                    decoded: &decoded,
                };
                let result = {
                    let mut notify = |op_name: &str, fields: FieldMap| {
                        deliver(instance_id, metadata, op_name, &fields, &mut *outbound)
                    };
                    invoke(
                        &invocation,
                        callbacks,
                        &mut **executor,
                        &config.env_root,
                        &mut notify,
                    )
                };

                if kind == OpKind::OneWay {
                    match result {
                        Ok(outcome) if !outcome.ok => {
                            debug!(subject, output = %outcome.output_name, "one-way operation reported failure")
                        }
                        Ok(_) => {}
                        Err(err) => warn!(subject, error = %err, "one-way operation failed"),
                    }
                    return Ok(None);
                }

                let outcome = result?;
                if !outcome.ok {
                    return Ok(Some(serializer::error_event(
                        correlation_id(event),
                        Some(subject),
                        SCRIPT_FAILURE_REASON,
                    )));
                }

                let reply = metadata
                    .reply_subject(subject, &outcome.output_name)
                    .ok_or_else(|| InvocationError::UnknownReply {
                        operation: subject.to_string(),
                        output: outcome.output_name.clone(),
                    })?;
                let mut fields = decoded.fields;
                fields.extend(outcome.fields);
                debug!(subject, reply, "replying");
                Ok(Some(codec::data_event(
                    correlation_id(event),
                    Some(reply),
                    metadata,
                    &fields,
                )))
            }
            OpKind::Response => {
                let decoded = codec::decode(metadata, &event.content)?;
                match callbacks.response_handler() {
                    Some(handler) => handler(&decoded.fields)
                        .map_err(|err| InvocationError::Failed(format!("{err:#}")))?,
                    None => warn!(subject, "no response handler registered"),
                }
                Ok(None)
            }
            OpKind::Solicit | OpKind::Notify => {
                debug!(subject, kind = %kind, "ignoring data for outbound operation");
                Ok(None)
            }
        }
    }

    fn handle_internal(&mut self, event: &Element) -> Result<Option<Element>> {
        let Some(module) = self.config.internal_script.clone() else {
            debug!("no internal script configured, ignoring internal event");
            return Ok(None);
        };
        let instance_id = event.require_attr(attrs::REF)?;
        run_internal(self, instance_id, module, &event.attr).map(Some)
    }
}

fn run_internal(
    adapter: &mut Adapter,
    instance_id: &str,
    module: PathBuf,
    fields: &FieldMap,
) -> Result<Element> {
    info!(instance = instance_id, ?module, "running internal script");
    let outcome =
        adapter
            .executor
            .execute_module(instance_id, &module, INTERNAL_OPERATION, fields)?;
    if !outcome.ok {
        return Err(InvocationError::Failed(SCRIPT_FAILURE_REASON.into()).into());
    }

    let mut attributes = Map::new();
    for (name, value) in &outcome.fields {
        attributes.insert(name.clone(), Value::String(scalar_text(value)));
    }
    attributes.insert(attrs::REF.into(), Value::String(instance_id.to_string()));
    Ok(serializer::internal_event(attributes))
}

/// Data event for the operation named `op_name`, addressed by instance.
pub fn collect_event(
    instance_id: &str,
    metadata: &Metadata,
    op_name: &str,
    fields: &FieldMap,
) -> Result<Element> {
    let subject = metadata
        .op_id(op_name)
        .ok_or_else(|| AdapterError::UnknownOperation {
            instance: instance_id.to_string(),
            operation: op_name.to_string(),
        })?;
    Ok(codec::data_event(
        Value::String(instance_id.to_string()),
        Some(subject),
        metadata,
        fields,
    ))
}

fn deliver(
    instance_id: &str,
    metadata: &Metadata,
    op_name: &str,
    fields: &FieldMap,
    outbound: &mut dyn EventSink,
) -> bool {
    let sent = collect_event(instance_id, metadata, op_name, fields)
        .and_then(|event| outbound.send(&event).map_err(AdapterError::from));
    match sent {
        Ok(()) => {
            debug!(instance = instance_id, op = op_name, "notification sent");
            true
        }
        Err(err) => {
            warn!(instance = instance_id, op = op_name, error = %err, "notification dropped");
            false
        }
    }
}
