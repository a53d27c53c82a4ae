//! Ansible playbooks.
//!
//! The script body is a YAML mapping keyed by lowercased operation name.
//! Each entry supplies `tasks` and optional `vars`; the generated playbook is
//! a single play against all hosts with the script vars, the input fields and
//! `__resultfile` merged into its vars.

use std::fs;
use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::result::read_result_file;
use super::{RESULT_FILE, ScriptCommands, ScriptRequest, command_for, run_to_completion};
use crate::runtime::codec::FieldMap;
use crate::runtime::error::{ScriptError, ScriptResult};
use crate::runtime::invoke::Outcome;

/// Playbook file written into the work area.
pub const PLAYBOOK_FILE: &str = "playbook.yml";

/// Variable holding the result file path.
pub const RESULT_FILE_VAR: &str = "__resultfile";

/// Build the playbook for `operation`.
pub fn build_playbook(
    script: &str,
    operation: &str,
    fields: &FieldMap,
    result_file: &Path,
) -> ScriptResult<Value> {
    let config: Value = serde_yaml::from_str(script)?;
    let key = operation.to_lowercase();
    let entry = config
        .get(key.as_str())
        .ok_or_else(|| ScriptError::MissingOperation(operation.to_string()))?;

    let mut vars = Mapping::new();
    vars.insert(
        Value::from(RESULT_FILE_VAR),
        Value::from(result_file.display().to_string()),
    );
    if let Some(Value::Mapping(script_vars)) = entry.get("vars") {
        for (name, value) in script_vars {
            vars.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in fields {
        vars.insert(Value::from(name.as_str()), serde_yaml::to_value(value)?);
    }

    let mut play = Mapping::new();
    play.insert(Value::from("hosts"), Value::from("all"));
    play.insert(Value::from("vars"), Value::Mapping(vars));
    play.insert(
        Value::from("tasks"),
        entry
            .get("tasks")
            .cloned()
            .unwrap_or_else(|| Value::Sequence(Vec::new())),
    );
    Ok(Value::Sequence(vec![Value::Mapping(play)]))
}

/// Write the playbook and run it.
pub fn run(commands: &ScriptCommands, request: &ScriptRequest<'_>) -> ScriptResult<Outcome> {
    let result_file = request.work_dir.join(RESULT_FILE);
    let playbook_file = request.work_dir.join(PLAYBOOK_FILE);

    let playbook = build_playbook(request.script, request.operation, request.fields, &result_file)?;
    fs::write(&playbook_file, serde_yaml::to_string(&playbook)?)?;

    let mut command = command_for(&commands.ansible, request.files_dir)?;
    command
        .arg(&playbook_file)
        .env_clear()
        .env("PATH", &commands.playbook_path);
    run_to_completion(command)?;

    Ok(read_result_file(&result_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCRIPT: &str = r#"
check:
  vars:
    retries: 3
  tasks:
    - name: write result
      copy:
        dest: "{{ __resultfile }}"
        content: '{"result": true, "outputName": "Yes", "fields": {}}'
"#;

    #[test]
    fn playbook_merges_vars_and_fields() {
        let mut fields = FieldMap::new();
        fields.insert("n".into(), json!(10));
        let playbook = build_playbook(SCRIPT, "Check", &fields, Path::new("/w/result.json")).unwrap();

        let play = &playbook[0];
        assert_eq!(play["hosts"], Value::from("all"));
        assert_eq!(play["vars"][RESULT_FILE_VAR], Value::from("/w/result.json"));
        assert_eq!(play["vars"]["retries"], Value::from(3));
        assert_eq!(play["vars"]["n"], Value::from(10));
        assert_eq!(play["tasks"][0]["name"], Value::from("write result"));
    }

    #[test]
    fn unknown_operation_is_reported() {
        let err = build_playbook(SCRIPT, "Other", &FieldMap::new(), Path::new("r.json")).unwrap_err();
        assert!(matches!(err, ScriptError::MissingOperation(ref op) if op == "Other"));
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let err = build_playbook("check: [", "check", &FieldMap::new(), Path::new("r.json")).unwrap_err();
        assert!(matches!(err, ScriptError::Yaml(_)));
    }
}
