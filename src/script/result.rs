//! Result file written by external scripts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runtime::codec::FieldMap;
use crate::runtime::invoke::{ERROR_OUTPUT, Outcome};

/// Contents of `result.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultFile {
    /// `false` marks failure; anything else is success.
    #[serde(default)]
    pub result: Option<bool>,
    /// Chosen reply name.
    #[serde(default, rename = "outputName", alias = "outputname")]
    pub output_name: Option<String>,
    /// Output fields.
    #[serde(default)]
    pub fields: Option<FieldMap>,
}

impl ResultFile {
    /// Interpret the file. A successful result must name its output and
    /// carry fields; otherwise it counts as failed.
    pub fn into_outcome(self) -> Outcome {
        if self.result == Some(false) {
            return Outcome::failure(ERROR_OUTPUT);
        }
        match (self.output_name, self.fields) {
            (Some(output_name), Some(fields)) => Outcome::success(output_name, fields),
            _ => {
                debug!("result file lacks output name or fields");
                Outcome::failure(ERROR_OUTPUT)
            }
        }
    }
}

/// Parse result file text.
pub fn parse_result(text: &str) -> Outcome {
    match serde_json::from_str::<ResultFile>(text) {
        Ok(file) => file.into_outcome(),
        Err(err) => {
            debug!(%err, "malformed result file");
            Outcome::failure(ERROR_OUTPUT)
        }
    }
}

/// Read and parse a result file. A missing file counts as failure.
pub fn read_result_file(path: &Path) -> Outcome {
    match fs::read_to_string(path) {
        Ok(text) => parse_result(&text),
        Err(err) => {
            debug!(?path, %err, "result file not readable");
            Outcome::failure(ERROR_OUTPUT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_output_name_spellings_parse() {
        let camel = parse_result(r#"{"result": true, "outputName": "Yes", "fields": {"n": 1}}"#);
        let lower = parse_result(r#"{"result": true, "outputname": "Yes", "fields": {"n": 1}}"#);
        assert_eq!(camel, lower);
        assert!(camel.ok);
        assert_eq!(camel.output_name, "Yes");
        assert_eq!(camel.fields.get("n"), Some(&json!(1)));
    }

    #[test]
    fn false_result_fails() {
        let outcome = parse_result(r#"{"result": false}"#);
        assert!(!outcome.ok);
        assert_eq!(outcome.output_name, ERROR_OUTPUT);
    }

    #[test]
    fn incomplete_or_garbled_files_fail() {
        assert!(!parse_result(r#"{"result": true, "fields": {}}"#).ok);
        assert!(!parse_result("not json").ok);
    }

    #[test]
    fn missing_file_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let outcome = read_result_file(&temp.path().join("result.json"));
        assert_eq!(outcome, Outcome::failure(ERROR_OUTPUT));
    }
}
