//! Service invocation: fulfilling an operation through a registered callback
//! or through the script-execution collaborator.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::debug;

use super::codec::{Decoded, FieldMap};
use super::error::{AdapterError, InvocationError, Result, ScriptError, ScriptResult};
use super::metadata::{Metadata, OpKind, ServiceType};
use crate::script::{NotifyFn, ScriptExecutor, ScriptLanguage, ScriptRequest};

/// Property whose presence forces the script strategy.
pub const CONTAINER_SOURCE: &str = "docker.src";
/// Script body property of script services.
pub const SCRIPT_SOURCE: &str = "script.src";
/// Subdirectory of a work area holding materialized file properties.
pub const FILES_DIR: &str = "envs";
/// Output name used for successful results that name none.
pub const OK_OUTPUT: &str = "Ok";
/// Output name used for failed or malformed results.
pub const ERROR_OUTPUT: &str = "Error";

/// What a callback or script produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Reply name chosen by the handler.
    pub output_name: String,
    /// Output fields by name.
    pub fields: FieldMap,
}

impl Outcome {
    /// Successful outcome.
    pub fn success(output_name: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            ok: true,
            output_name: output_name.into(),
            fields,
        }
    }

    /// Failed outcome.
    pub fn failure(output_name: impl Into<String>) -> Self {
        Self {
            ok: false,
            output_name: output_name.into(),
            fields: FieldMap::new(),
        }
    }
}

/// Handler for request, consume and one-way operations: `(op name, fields)`.
pub type OperationHandler = Box<dyn FnMut(&str, &FieldMap) -> anyhow::Result<Outcome> + Send>;

/// Handler for response events.
pub type ResponseHandler = Box<dyn FnMut(&FieldMap) -> anyhow::Result<()> + Send>;

/// Callbacks registered by application code.
#[derive(Default)]
pub struct Callbacks {
    request: Option<OperationHandler>,
    one_way: Option<OperationHandler>,
    response: Option<ResponseHandler>,
}

impl Callbacks {
    /// Register the handler for request and consume operations.
    pub fn on_request<F>(&mut self, handler: F)
    where
        F: FnMut(&str, &FieldMap) -> anyhow::Result<Outcome> + Send + 'static,
    {
        debug!("registering request handler");
        self.request = Some(Box::new(handler));
    }

    /// Register the handler for one-way operations.
    pub fn on_one_way<F>(&mut self, handler: F)
    where
        F: FnMut(&str, &FieldMap) -> anyhow::Result<Outcome> + Send + 'static,
    {
        debug!("registering one-way handler");
        self.one_way = Some(Box::new(handler));
    }

    /// Register the handler for response events.
    pub fn on_response<F>(&mut self, handler: F)
    where
        F: FnMut(&FieldMap) -> anyhow::Result<()> + Send + 'static,
    {
        debug!("registering response handler");
        self.response = Some(Box::new(handler));
    }

    /// Operation handler serving the given kind.
    pub fn handler_for(&mut self, kind: OpKind) -> Option<&mut OperationHandler> {
        match kind {
            OpKind::Request | OpKind::Consume => self.request.as_mut(),
            OpKind::OneWay => self.one_way.as_mut(),
            _ => None,
        }
    }

    /// Response handler, if registered.
    pub fn response_handler(&mut self) -> Option<&mut ResponseHandler> {
        self.response.as_mut()
    }
}

/// How an instance's operations are fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// In-process callback.
    Callback,
    /// Script body held in the named property.
    Script {
        /// Property carrying the script body.
        source: &'static str,
    },
}

/// Pick a strategy for an instance. A container source property overrides
/// the declared service type.
pub fn select_strategy(metadata: &Metadata) -> Option<Strategy> {
    if metadata.property(CONTAINER_SOURCE).is_some() {
        return Some(Strategy::Script {
            source: CONTAINER_SOURCE,
        });
    }

    match metadata.service_type() {
        Some(ServiceType::Callback) => Some(Strategy::Callback),
        Some(ServiceType::Script) => Some(Strategy::Script {
            source: SCRIPT_SOURCE,
        }),
        _ => None,
    }
}

/// Properties named `<source>.<file>` as `(file, contents)` pairs.
pub fn file_properties(metadata: &Metadata, source: &str) -> Vec<(String, String)> {
    let prefix = format!("{source}.");
    metadata
        .properties()
        .iter()
        .filter_map(|(name, property)| {
            let file = name.strip_prefix(&prefix)?;
            let contents = property
                .as_text()
                .map(str::to_string)
                .unwrap_or_else(|| property.value.to_string());
            Some((file.to_string(), contents))
        })
        .collect()
}

/// Scoped directory for one script execution, removed when dropped.
#[derive(Debug)]
pub struct WorkArea {
    dir: TempDir,
    files_dir: PathBuf,
}

impl WorkArea {
    /// Create a fresh work area under `root`.
    pub fn create(root: &Path) -> ScriptResult<Self> {
        fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix("run-").tempdir_in(root)?;
        let files_dir = dir.path().join(FILES_DIR);
        fs::create_dir(&files_dir)?;
        debug!(path = ?dir.path(), "created work area");
        Ok(Self { dir, files_dir })
    }

    /// Root of the work area.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory holding materialized file properties.
    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Write `(file, contents)` pairs into the files directory.
    pub fn write_files(&self, files: &[(String, String)]) -> ScriptResult<()> {
        for (name, contents) in files {
            let file_name = Path::new(name).file_name().ok_or_else(|| {
                ScriptError::InvalidSource(format!("file property '{name}' has no file name"))
            })?;
            let path = self.files_dir.join(file_name);
            debug!(?path, "materializing file property");
            fs::write(path, contents)?;
        }
        Ok(())
    }
}

/// Everything needed to fulfil one operation.
pub(crate) struct Invocation<'a> {
    pub instance_id: &'a str,
    pub op_id: &'a str,
    pub kind: OpKind,
    pub metadata: &'a Metadata,
    pub decoded: &'a Decoded,
}

impl Invocation<'_> {
    fn op_name(&self) -> &str {
        self.metadata.op_name(self.op_id).unwrap_or(self.op_id)
    }

    fn unfulfillable(&self) -> AdapterError {
        AdapterError::Unfulfillable {
            instance: self.instance_id.to_string(),
            operation: self.op_name().to_string(),
        }
    }
}

/// Fulfil an operation with the strategy the instance's schema selects.
pub(crate) fn invoke(
    invocation: &Invocation<'_>,
    callbacks: &mut Callbacks,
    executor: &mut dyn ScriptExecutor,
    env_root: &Path,
    notify: &mut NotifyFn<'_>,
) -> Result<Outcome> {
    let strategy =
        select_strategy(invocation.metadata).ok_or_else(|| invocation.unfulfillable())?;
    let op_name = invocation.op_name();
    debug!(instance = invocation.instance_id, op = op_name, ?strategy, "invoking");

    match strategy {
        Strategy::Callback => {
            let handler = callbacks
                .handler_for(invocation.kind)
                .ok_or_else(|| invocation.unfulfillable())?;
            handler(op_name, &invocation.decoded.fields)
                .map_err(|err| AdapterError::from(InvocationError::Failed(format!("{err:#}"))))
        }
        Strategy::Script { source } => {
            let property = invocation
                .metadata
                .property(source)
                .ok_or_else(|| invocation.unfulfillable())?;
            let script = property.as_text().ok_or_else(|| {
                ScriptError::InvalidSource(format!("property '{source}' is not text"))
            })?;
            let language = ScriptLanguage::from_tag(property.type_tag.as_deref().unwrap_or(""));
            let files = file_properties(invocation.metadata, source);

            let area = WorkArea::create(env_root)?;
            area.write_files(&files)?;

            let request = ScriptRequest {
                instance_id: invocation.instance_id,
                operation: op_name,
                language,
                script,
                fields: &invocation.decoded.fields,
                schema: &invocation.decoded.schema,
                files: &files,
                work_dir: area.path(),
                files_dir: area.files_dir(),
            };
            let outcome = executor.execute(&request, notify)?;
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Node;
    use serde_json::json;

    fn metadata(value: serde_json::Value) -> Metadata {
        let items: Vec<Node> = serde_json::from_value(value).unwrap();
        let mut md = Metadata::new();
        md.merge(&items);
        md
    }

    #[test]
    fn container_source_overrides_service_type() {
        let md = metadata(json!([
            {"tag": "service", "attr": {"provision": "docker"}, "content": [
                {"tag": "prop", "attr": {"name": "docker.src", "type": "python"}, "content": ["x = 1"]}
            ]}
        ]));
        assert_eq!(
            select_strategy(&md),
            Some(Strategy::Script {
                source: CONTAINER_SOURCE
            })
        );
    }

    #[test]
    fn unknown_provision_has_no_strategy() {
        let md = metadata(json!([{"tag": "service", "attr": {"provision": "rest"}}]));
        assert_eq!(select_strategy(&md), None);
        assert_eq!(select_strategy(&Metadata::new()), None);
    }

    #[test]
    fn file_properties_strip_the_source_prefix() {
        let md = metadata(json!([
            {"tag": "service", "attr": {"provision": "script"}, "content": [
                {"tag": "prop", "attr": {"name": "script.src", "type": "ansible"}, "content": ["---"]},
                {"tag": "prop", "attr": {"name": "script.src.hosts.ini"}, "content": ["[all]"]},
                {"tag": "prop", "attr": {"name": "other"}, "content": ["x"]}
            ]}
        ]));
        assert_eq!(
            file_properties(&md, SCRIPT_SOURCE),
            vec![("hosts.ini".to_string(), "[all]".to_string())]
        );
    }

    #[test]
    fn work_area_is_removed_on_drop() {
        let root = tempfile::TempDir::new().unwrap();
        let path = {
            let area = WorkArea::create(root.path()).unwrap();
            area.write_files(&[("conf.txt".into(), "hello".into())]).unwrap();
            assert_eq!(
                fs::read_to_string(area.files_dir().join("conf.txt")).unwrap(),
                "hello"
            );
            area.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn callbacks_route_by_kind() {
        let mut callbacks = Callbacks::default();
        callbacks.on_request(|_, _| Ok(Outcome::success("Yes", FieldMap::new())));
        assert!(callbacks.handler_for(OpKind::Request).is_some());
        assert!(callbacks.handler_for(OpKind::Consume).is_some());
        assert!(callbacks.handler_for(OpKind::OneWay).is_none());
        assert!(callbacks.handler_for(OpKind::Notify).is_none());
    }
}
