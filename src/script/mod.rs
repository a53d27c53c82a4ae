//! Script execution for script-backed services.
//!
//! A [`ScriptExecutor`] runs an operation's script body inside a scoped work
//! area prepared by the invocation layer. [`ScriptRunner`] is the default
//! executor: embedded python modules are loaded once per instance and kept in
//! a [`HandlerCache`]; logic programs and playbooks are materialized as files
//! and handed to their external command, which reports back through a result
//! file.

pub mod embedded;
pub mod logic;
pub mod playbook;
pub mod result;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runtime::codec::{FieldMap, FieldSchema};
use crate::runtime::error::{InvocationError, InvocationResult, ScriptError, ScriptResult};
use crate::runtime::invoke::Outcome;
use crate::runtime::registry::HandlerCache;
use embedded::{ModuleLoader, ModuleSource, PythonLoader, ScriptModule};

/// Name of the result file external scripts write into their work area.
pub const RESULT_FILE: &str = "result.json";

/// Callback a running script uses to emit a notification: `(op name, fields)`.
/// Returns whether the notification was delivered.
pub type NotifyFn<'a> = dyn FnMut(&str, FieldMap) -> bool + 'a;

/// Script language, taken from the type tag of the script source property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    /// Embedded python module exposing `mixops`.
    Python,
    /// Constraint logic program.
    EclipseClp,
    /// Ansible playbook. Also used for unrecognised tags.
    Ansible,
}

impl ScriptLanguage {
    /// Parse a type tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "python" => ScriptLanguage::Python,
            "eclipse-clp" => ScriptLanguage::EclipseClp,
            "ansible" => ScriptLanguage::Ansible,
            other => {
                debug!(tag = other, "unrecognised script language, using playbook");
                ScriptLanguage::Ansible
            }
        }
    }

    /// Canonical type tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptLanguage::Python => "python",
            ScriptLanguage::EclipseClp => "eclipse-clp",
            ScriptLanguage::Ansible => "ansible",
        }
    }
}

/// One script execution.
#[derive(Debug, Clone, Copy)]
pub struct ScriptRequest<'a> {
    /// Instance the operation belongs to.
    pub instance_id: &'a str,
    /// Operation name.
    pub operation: &'a str,
    /// Script language.
    pub language: ScriptLanguage,
    /// Script body.
    pub script: &'a str,
    /// Input fields by name.
    pub fields: &'a FieldMap,
    /// Field schema, including synthetic property entries.
    pub schema: &'a FieldSchema,
    /// File properties as `(file, contents)`, already materialized in `files_dir`.
    pub files: &'a [(String, String)],
    /// Scoped work area root.
    pub work_dir: &'a Path,
    /// Directory holding file properties; external commands run here.
    pub files_dir: &'a Path,
}

/// Runs scripts on behalf of the invocation layer.
pub trait ScriptExecutor {
    /// Execute `request.operation` of `request.script`.
    fn execute(
        &mut self,
        request: &ScriptRequest<'_>,
        notify: &mut NotifyFn<'_>,
    ) -> InvocationResult<Outcome>;

    /// Run `operation` of a module file outside any service instance.
    fn execute_module(
        &mut self,
        instance_id: &str,
        module: &Path,
        operation: &str,
        fields: &FieldMap,
    ) -> InvocationResult<Outcome> {
        let _ = (instance_id, fields);
        Err(InvocationError::Failed(format!(
            "cannot run '{operation}' from {}: executor does not load modules",
            module.display()
        )))
    }
}

/// External commands used by the script strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptCommands {
    /// Python interpreter hosting embedded modules.
    pub python: Vec<String>,
    /// Logic-programming system, invoked with `-f <file> -e do__it`.
    pub eclipse: Vec<String>,
    /// Playbook runner, invoked with the playbook path appended.
    pub ansible: Vec<String>,
    /// File prepended to every logic program.
    pub eclipse_preamble: Option<PathBuf>,
    /// `PATH` given to the playbook runner.
    pub playbook_path: String,
}

impl Default for ScriptCommands {
    fn default() -> Self {
        Self {
            python: vec!["python3".into()],
            eclipse: vec!["eclipse".into()],
            ansible: ["sudo", "ansible-playbook", "-i", "localhost,", "-c", "local"]
                .into_iter()
                .map(String::from)
                .collect(),
            eclipse_preamble: None,
            playbook_path: "/bin:/usr/bin".into(),
        }
    }
}

/// Build a command from an argv prefix, running in `cwd`.
fn command_for(argv: &[String], cwd: &Path) -> ScriptResult<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ScriptError::InvalidSource("empty command line".into()))?;
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    Ok(command)
}

/// Run a command to completion. The exit status is logged, not enforced:
/// external scripts report success through their result file.
fn run_to_completion(mut command: Command) -> ScriptResult<()> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!(command = ?command, "running script command");
    let output = command.output().map_err(|source| ScriptError::Spawn {
        command: program.clone(),
        source,
    })?;

    if output.status.success() {
        debug!(program, "script command finished");
    } else {
        warn!(
            program,
            status = output.status.code().unwrap_or(-1),
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "script command exited unsuccessfully"
        );
    }
    Ok(())
}

/// Default executor backed by external interpreters.
pub struct ScriptRunner {
    commands: ScriptCommands,
    loader: Arc<dyn ModuleLoader>,
    modules: HandlerCache<Arc<dyn ScriptModule>>,
}

impl ScriptRunner {
    /// Runner loading embedded modules into python workers.
    pub fn new(commands: ScriptCommands) -> Self {
        let loader = Arc::new(PythonLoader::new(commands.python.clone()));
        Self::with_loader(commands, loader)
    }

    /// Runner with a custom module loader.
    pub fn with_loader(commands: ScriptCommands, loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            commands,
            loader,
            modules: HandlerCache::new(),
        }
    }

    /// Commands in use.
    pub fn commands(&self) -> &ScriptCommands {
        &self.commands
    }

    /// Number of cached embedded modules.
    pub fn cached_modules(&self) -> usize {
        self.modules.len()
    }

    /// Drop the cached module of an instance. Returns whether one was cached.
    pub fn invalidate(&mut self, instance_id: &str) -> bool {
        self.modules.invalidate(instance_id).is_some()
    }

    fn module(
        &mut self,
        key: &str,
        source: ModuleSource<'_>,
    ) -> ScriptResult<Arc<dyn ScriptModule>> {
        let loader = Arc::clone(&self.loader);
        self.modules.get_or_try_load(key, || loader.load(key, source))
    }

    /// Call into the cached module under `key`. A module whose process broke
    /// is evicted so the next call loads it afresh.
    fn call_module(
        &mut self,
        key: &str,
        source: ModuleSource<'_>,
        operation: &str,
        fields: &FieldMap,
        cwd: &Path,
        notify: &mut NotifyFn<'_>,
    ) -> ScriptResult<Outcome> {
        let module = self.module(key, source)?;
        let result = module.call(operation, fields, cwd, notify);
        if let Err(err) = &result {
            if err.breaks_module() {
                warn!(module = key, %err, "discarding broken module");
                self.modules.invalidate(key);
            }
        }
        result
    }
}

impl ScriptExecutor for ScriptRunner {
    fn execute(
        &mut self,
        request: &ScriptRequest<'_>,
        notify: &mut NotifyFn<'_>,
    ) -> InvocationResult<Outcome> {
        debug!(
            instance = request.instance_id,
            op = request.operation,
            language = request.language.as_str(),
            "executing script"
        );
        let outcome = match request.language {
            ScriptLanguage::Python => {
                let source = ModuleSource::Inline {
                    body: request.script,
                    dir: request.work_dir,
                };
                self.call_module(
                    request.instance_id,
                    source,
                    request.operation,
                    request.fields,
                    request.files_dir,
                    notify,
                )?
            }
            ScriptLanguage::EclipseClp => logic::run(&self.commands, request)?,
            ScriptLanguage::Ansible => playbook::run(&self.commands, request)?,
        };
        debug!(ok = outcome.ok, output = %outcome.output_name, "script finished");
        Ok(outcome)
    }

    fn execute_module(
        &mut self,
        instance_id: &str,
        module: &Path,
        operation: &str,
        fields: &FieldMap,
    ) -> InvocationResult<Outcome> {
        debug!(instance = instance_id, op = operation, ?module, "executing module");
        // Keyed by path: one module serves every instance.
        let key = module.display().to_string();
        let cwd = module.parent().unwrap_or_else(|| Path::new("."));
        let mut discard = |op: &str, _: FieldMap| {
            debug!(op, "dropping notification from module outside an instance");
            false
        };
        let outcome = self.call_module(
            &key,
            ModuleSource::File(module),
            operation,
            fields,
            cwd,
            &mut discard,
        )?;
        Ok(outcome)
    }
}
