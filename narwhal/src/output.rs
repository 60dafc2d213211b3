//! Runner log format.
//!
//! Runners print one JSON object per line. Anything that is not JSON is kept
//! as a plain log line. The last `result` or `error` entry decides the
//! outcome of the run.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OutputError;
use crate::execution::ExecutionResult;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Line,
    Event,
    Error,
    Result,
}

/// One structured log entry produced by a runner.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "type")]
    pub kind: OutputKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub result: Option<ExecutionResult>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

impl Output {
    pub fn line(content: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Line,
            content: content.into(),
            time: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn error(content: impl Display) -> Self {
        Self {
            kind: OutputKind::Error,
            content: content.to_string(),
            time: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == OutputKind::Error
    }
}

impl Display for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.result) {
            (OutputKind::Result, Some(result)) => write!(f, "result: {}", result.status),
            (kind, _) => write!(f, "{kind:?}: {}", self.content),
        }
    }
}

/// Turns raw runner logs into structured entries and results.
pub trait OutputParser: Send + Sync {
    /// Parse a single log line.
    fn parse_line(&self, line: &[u8]) -> Result<Output, OutputError>;

    /// Parse a complete log into the final execution result.
    ///
    /// An `error` entry yields a failed result; missing or empty results are
    /// errors.
    fn parse_result(&self, raw: &[u8]) -> Result<ExecutionResult, OutputError>;
}

/// Parser for the JSON-lines runner protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLinesParser;

impl OutputParser for JsonLinesParser {
    fn parse_line(&self, line: &[u8]) -> Result<Output, OutputError> {
        let text = std::str::from_utf8(line)
            .map_err(|e| OutputError::Malformed(format!("invalid utf-8: {e}")))?
            .trim_end_matches(['\r', '\n']);

        if !text.trim_start().starts_with('{') {
            return Ok(Output {
                kind: OutputKind::Line,
                content: text.to_string(),
                ..Default::default()
            });
        }

        match serde_json::from_str::<Output>(text) {
            Ok(entry) => Ok(entry),
            Err(_) if serde_json::from_str::<serde_json::Value>(text).is_ok() => {
                Err(OutputError::Malformed(text.to_string()))
            }
            // text that merely starts with a brace is still a log line
            Err(_) => Ok(Output {
                kind: OutputKind::Line,
                content: text.to_string(),
                ..Default::default()
            }),
        }
    }

    fn parse_result(&self, raw: &[u8]) -> Result<ExecutionResult, OutputError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(OutputError::NoLogs);
        }

        let mut entries = Vec::new();
        for line in raw.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry = self.parse_line(line).unwrap_or_else(|_| Output {
                kind: OutputKind::Line,
                content: String::from_utf8_lossy(line).trim_end().to_string(),
                ..Default::default()
            });
            entries.push(entry);
        }

        let deciding = entries
            .iter()
            .rev()
            .find(|e| matches!(e.kind, OutputKind::Result | OutputKind::Error))
            .ok_or(OutputError::NoResult)?;

        let mut result = match deciding.kind {
            OutputKind::Result => deciding.result.clone().ok_or(OutputError::EmptyResult)?,
            _ => ExecutionResult::default().err(&deciding.content),
        };

        let lines: Vec<&str> = entries
            .iter()
            .filter(|e| e.kind == OutputKind::Line)
            .map(|e| e.content.as_str())
            .collect();
        if !lines.is_empty() {
            result.output = lines.join("\n");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;

    #[test]
    fn test_plain_text_is_a_line() {
        let entry = JsonLinesParser.parse_line(b"running k6 script\n").unwrap();
        assert_eq!(entry.kind, OutputKind::Line);
        assert_eq!(entry.content, "running k6 script");
    }

    #[test]
    fn test_json_entries_parse() {
        let entry = JsonLinesParser
            .parse_line(br#"{"type":"event","content":"fetching repo"}"#)
            .unwrap();
        assert_eq!(entry.kind, OutputKind::Event);
        assert_eq!(entry.content, "fetching repo");
    }

    #[test]
    fn test_foreign_json_is_malformed() {
        let err = JsonLinesParser.parse_line(br#"{"type":"bogus"}"#).unwrap_err();
        assert!(matches!(err, OutputError::Malformed(_)));
    }

    #[test]
    fn test_result_entry_decides() {
        let raw = concat!(
            "{\"type\":\"line\",\"content\":\"step 1\"}\n",
            "plain output\n",
            "{\"type\":\"result\",\"result\":{\"status\":\"passed\"}}\n",
        );
        let result = JsonLinesParser.parse_result(raw.as_bytes()).unwrap();
        assert_eq!(result.status, ExecutionStatus::Passed);
        assert_eq!(result.output, "step 1\nplain output");
    }

    #[test]
    fn test_last_deciding_entry_wins() {
        let raw = concat!(
            "{\"type\":\"result\",\"result\":{\"status\":\"passed\"}}\n",
            "{\"type\":\"error\",\"content\":\"upload failed\"}\n",
        );
        let result = JsonLinesParser.parse_result(raw.as_bytes()).unwrap();
        assert!(result.is_failed());
        assert_eq!(result.error_message, "upload failed");
    }

    #[test]
    fn test_empty_log_is_no_logs() {
        assert_eq!(JsonLinesParser.parse_result(b""), Err(OutputError::NoLogs));
        assert_eq!(JsonLinesParser.parse_result(b"\n \n"), Err(OutputError::NoLogs));
    }

    #[test]
    fn test_missing_result_is_no_result() {
        assert_eq!(
            JsonLinesParser.parse_result(b"just text\n"),
            Err(OutputError::NoResult)
        );
    }

    #[test]
    fn test_result_without_body_is_empty_result() {
        assert_eq!(
            JsonLinesParser.parse_result(b"{\"type\":\"result\"}\n"),
            Err(OutputError::EmptyResult)
        );
    }

    #[test]
    fn test_long_lines_are_kept_whole() {
        let long = "x".repeat(256 * 1024);
        let entry = JsonLinesParser.parse_line(long.as_bytes()).unwrap();
        assert_eq!(entry.content.len(), long.len());
    }
}
