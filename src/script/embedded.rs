//! Embedded python modules.
//!
//! A module defines a `mixops` dictionary mapping operation names to
//! functions `f(collect, fields)`. Each loaded module lives in its own
//! interpreter process driven over a line-delimited JSON pipe, so the module
//! is imported once and reused for every later call on the same instance.
//! `collect(opname, fields)` calls made by the module arrive as notify
//! messages while a call is in flight.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::NotifyFn;
use super::result::ResultFile;
use crate::runtime::codec::FieldMap;
use crate::runtime::error::{ScriptError, ScriptResult};
use crate::runtime::invoke::Outcome;

/// Where a module's code comes from.
#[derive(Debug, Clone, Copy)]
pub enum ModuleSource<'a> {
    /// Script body to be written into `dir` before loading.
    Inline {
        /// Module source text.
        body: &'a str,
        /// Directory receiving the module file.
        dir: &'a Path,
    },
    /// Existing module file.
    File(&'a Path),
}

/// A loaded module.
pub trait ScriptModule: Send + Sync {
    /// Run `operation` with `fields`, with `work_dir` as the working directory.
    fn call(
        &self,
        operation: &str,
        fields: &FieldMap,
        work_dir: &Path,
        notify: &mut NotifyFn<'_>,
    ) -> ScriptResult<Outcome>;
}

/// Loads modules for the handler cache.
pub trait ModuleLoader: Send + Sync {
    /// Load the module for `instance_id`.
    fn load(&self, instance_id: &str, source: ModuleSource<'_>)
    -> ScriptResult<Arc<dyn ScriptModule>>;
}

/// Driver run by the interpreter. Reads one request per line and answers
/// with notify messages followed by exactly one result or error line.
pub const DRIVER: &str = r#"
import importlib.util
import json
import os
import sys

_out = sys.stdout
sys.stdout = sys.stderr


def _emit(message):
    _out.write(json.dumps(message) + "\n")
    _out.flush()


try:
    _spec = importlib.util.spec_from_file_location("mixscript", sys.argv[1])
    _module = importlib.util.module_from_spec(_spec)
    _spec.loader.exec_module(_module)
except Exception as exc:
    _emit({"error": "failed to load %s: %s" % (sys.argv[1], exc)})
    sys.exit(1)

_emit({"ready": True})


def _collect(opname, fields):
    _emit({"notify": opname, "fields": fields})
    return True


for _line in sys.stdin:
    _request = json.loads(_line)
    _ops = getattr(_module, "mixops", {})
    if _request["op"] not in _ops:
        _emit({"missing": _request["op"]})
        continue

    try:
        os.chdir(_request["workdir"])
        _result = _ops[_request["op"]](_collect, _request["fields"])
        if _result is False:
            _reply = {"result": False}
        elif _result is None:
            _reply = {"result": True, "outputName": "Ok", "fields": {}}
        elif isinstance(_result, dict):
            _reply = {"result": True, "outputName": "Ok", "fields": _result}
        else:
            _ok, _name, _fields = _result
            _reply = {"result": bool(_ok), "outputName": _name, "fields": _fields}
        _text = json.dumps(_reply)
    except Exception as exc:
        _emit({"error": "%s: %s" % (type(exc).__name__, exc)})
        continue

    _out.write(_text + "\n")
    _out.flush()
"#;

/// One line from the driver.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkerMessage {
    Ready {
        #[allow(dead_code)]
        ready: bool,
    },
    Notify {
        notify: String,
        #[serde(default)]
        fields: FieldMap,
    },
    Missing {
        missing: String,
    },
    Failed {
        error: String,
    },
    Finished(ResultFile),
}

/// File name for an inline module. Instance ids are reduced to characters
/// that are safe in a module file name.
pub fn module_file_name(instance_id: &str) -> String {
    let stem: String = instance_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("script{stem}.py")
}

/// Loads modules into python worker processes.
#[derive(Debug, Clone)]
pub struct PythonLoader {
    command: Vec<String>,
}

impl PythonLoader {
    /// Loader using the given interpreter command line.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl ModuleLoader for PythonLoader {
    fn load(
        &self,
        instance_id: &str,
        source: ModuleSource<'_>,
    ) -> ScriptResult<Arc<dyn ScriptModule>> {
        let path = match source {
            ModuleSource::Inline { body, dir } => {
                let path = dir.join(module_file_name(instance_id));
                fs::write(&path, body)?;
                path
            }
            ModuleSource::File(path) => path.to_path_buf(),
        };
        debug!(instance = instance_id, ?path, "loading embedded module");
        let worker = PythonWorker::spawn(&self.command, &path)?;
        Ok(Arc::new(worker))
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn read_message(&mut self) -> ScriptResult<WorkerMessage> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line)?;
        if read == 0 {
            return Err(ScriptError::WorkerExited);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if let Err(err) = self.child.kill() {
            debug!(%err, "worker already stopped");
        }
        let _ = self.child.wait();
    }
}

/// Module hosted by a long-lived interpreter process.
pub struct PythonWorker {
    path: PathBuf,
    process: Mutex<WorkerProcess>,
}

impl PythonWorker {
    /// Start an interpreter and import the module at `path`.
    pub fn spawn(command: &[String], path: &Path) -> ScriptResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| ScriptError::Worker("empty interpreter command".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .arg("-c")
            .arg(DRIVER)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ScriptError::Spawn {
                command: program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScriptError::Worker("interpreter stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::Worker("interpreter stdout unavailable".into()))?;
        let mut process = WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        match process.read_message()? {
            WorkerMessage::Ready { .. } => Ok(Self {
                path: path.to_path_buf(),
                process: Mutex::new(process),
            }),
            WorkerMessage::Failed { error } => Err(ScriptError::Worker(error)),
            other => Err(ScriptError::Worker(format!(
                "unexpected handshake: {other:?}"
            ))),
        }
    }

    /// Module file the worker imported.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScriptModule for PythonWorker {
    fn call(
        &self,
        operation: &str,
        fields: &FieldMap,
        work_dir: &Path,
        notify: &mut NotifyFn<'_>,
    ) -> ScriptResult<Outcome> {
        let mut process = self.process.lock();
        let request = json!({"op": operation, "fields": fields, "workdir": work_dir});
        writeln!(process.stdin, "{request}")?;
        process.stdin.flush()?;

        loop {
            match process.read_message()? {
                WorkerMessage::Notify { notify: op, fields } => {
                    if !notify(&op, fields) {
                        warn!(op, "notification from script was not delivered");
                    }
                }
                WorkerMessage::Finished(result) => return Ok(result.into_outcome()),
                WorkerMessage::Missing { missing } => {
                    return Err(ScriptError::MissingOperation(missing));
                }
                WorkerMessage::Failed { error } => return Err(ScriptError::Worker(error)),
                WorkerMessage::Ready { .. } => {
                    debug!(path = ?self.path, "ignoring repeated handshake");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names_are_sanitized() {
        assert_eq!(module_file_name("abc-12.x"), "scriptabc_12_x.py");
    }

    #[test]
    fn worker_messages_are_distinguished() {
        let notify: WorkerMessage =
            serde_json::from_str(r#"{"notify": "Tick", "fields": {"n": 1}}"#).unwrap();
        assert!(matches!(notify, WorkerMessage::Notify { ref notify, .. } if notify == "Tick"));

        let missing: WorkerMessage = serde_json::from_str(r#"{"missing": "Check"}"#).unwrap();
        assert!(matches!(missing, WorkerMessage::Missing { .. }));

        let done: WorkerMessage =
            serde_json::from_str(r#"{"result": true, "outputName": "Yes", "fields": {}}"#)
                .unwrap();
        match done {
            WorkerMessage::Finished(file) => assert!(file.into_outcome().ok),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn empty_interpreter_command_is_rejected() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = PythonWorker::spawn(&[], &temp.path().join("m.py")).err().unwrap();
        assert!(matches!(err, ScriptError::Worker(_)));
    }
}
