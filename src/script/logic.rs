//! Constraint logic programs.
//!
//! The program file is the optional preamble, a generated `do__it/0` goal
//! asserting the input fields, then the script body. The body is expected
//! to define `do__it/2`, which receives the result file path and the
//! lowercased operation name and writes `result.json`.

use std::fs;
use std::path::Path;

use super::result::read_result_file;
use super::{RESULT_FILE, ScriptCommands, ScriptRequest, command_for, run_to_completion};
use crate::runtime::codec::{FieldMap, FieldSchema};
use crate::runtime::error::{ScriptError, ScriptResult};
use crate::runtime::invoke::Outcome;
use crate::runtime::metadata::FieldType;
use crate::util::value::scalar_text;

/// Program file written into the work area.
pub const PROGRAM_FILE: &str = "eclipse.ecl";

/// Goal the system is asked to run.
pub const GOAL: &str = "do__it";

/// Generated goal clause asserting every plain scalar field.
pub fn goal_clause(
    fields: &FieldMap,
    schema: &FieldSchema,
    result_file: &Path,
    operation: &str,
) -> String {
    let assertions: String = fields
        .iter()
        .filter_map(|(name, value)| {
            let field_type = schema.get(name)?.field_type.as_ref()?;
            if !field_type.is_plain_scalar() {
                return None;
            }
            let text = scalar_text(value);
            Some(if *field_type == FieldType::String {
                format!("assert(ecl__field_in({name}, \"{text}\")), ")
            } else {
                format!("assert(ecl__field_in({name}, {text})), ")
            })
        })
        .collect();
    format!(
        "{GOAL} :- {assertions} {GOAL}(\"{}\", {}).\n",
        result_file.display(),
        operation.to_lowercase()
    )
}

/// Full program text.
pub fn program(preamble: Option<&str>, goal: &str, body: &str) -> String {
    let mut text = String::new();
    if let Some(preamble) = preamble {
        text.push_str(preamble);
        if !preamble.ends_with('\n') {
            text.push('\n');
        }
    }
    text.push_str(goal);
    text.push_str(body);
    text
}

/// Write the program and run it.
pub fn run(commands: &ScriptCommands, request: &ScriptRequest<'_>) -> ScriptResult<Outcome> {
    let result_file = request.work_dir.join(RESULT_FILE);
    let program_file = request.work_dir.join(PROGRAM_FILE);

    let preamble = match &commands.eclipse_preamble {
        Some(path) => {
            Some(fs::read_to_string(path).map_err(|_| ScriptError::Preamble(path.clone()))?)
        }
        None => None,
    };
    let goal = goal_clause(request.fields, request.schema, &result_file, request.operation);
    fs::write(
        &program_file,
        program(preamble.as_deref(), &goal, request.script),
    )?;

    let mut command = command_for(&commands.eclipse, request.files_dir)?;
    command.arg("-f").arg(&program_file).arg("-e").arg(GOAL);
    run_to_completion(command)?;

    Ok(read_result_file(&result_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::metadata::FieldDescriptor;
    use serde_json::json;

    fn typed(field_type: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            id: Some("B-1".into()),
            field_type: Some(field_type),
        }
    }

    #[test]
    fn goal_asserts_plain_scalars_only() {
        let mut fields = FieldMap::new();
        fields.insert("n".into(), json!(7));
        fields.insert("name".into(), json!("box"));
        fields.insert("when".into(), json!("12:00"));
        let mut schema = FieldSchema::new();
        schema.insert("n".into(), typed(FieldType::Integer));
        schema.insert("name".into(), typed(FieldType::String));
        schema.insert("when".into(), typed(FieldType::Time));

        let clause = goal_clause(&fields, &schema, Path::new("/w/result.json"), "Check");
        assert_eq!(
            clause,
            "do__it :- assert(ecl__field_in(n, 7)), assert(ecl__field_in(name, \"box\")),  do__it(\"/w/result.json\", check).\n"
        );
    }

    #[test]
    fn goal_without_fields_only_calls_the_body() {
        let clause = goal_clause(
            &FieldMap::new(),
            &FieldSchema::new(),
            Path::new("r.json"),
            "Run",
        );
        assert_eq!(clause, "do__it :-  do__it(\"r.json\", run).\n");
    }

    #[test]
    fn preamble_precedes_goal_and_body() {
        let text = program(Some(":- lib(ic)."), "goal.\n", "body.");
        assert_eq!(text, ":- lib(ic).\ngoal.\nbody.");
        assert_eq!(program(None, "goal.\n", "body."), "goal.\nbody.");
    }
}
