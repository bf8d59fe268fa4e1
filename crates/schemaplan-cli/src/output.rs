//! How `splan` writes results and failures.
//!
//! Results go to stdout, failures to stderr, each in one of three
//! [`OutputMode`]s. The mode comes from `--format` (or the hidden `--json`),
//! then the `FORMAT` environment variable, and otherwise depends on whether
//! stdout is a terminal: pretty when it is, text when piped.

use clap::ValueEnum;
use schemaplan_core::{ErrorCode, PlanError};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

/// Width of the rule under pretty section headings.
pub const PRETTY_RULE_WIDTH: usize = 72;

/// Write a heading with a rule underneath.
pub fn pretty_section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    writeln!(w, "{}", "-".repeat(PRETTY_RULE_WIDTH))
}

/// Write an aligned `key: value` line.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Headed sections and numbered steps.
    Pretty,
    /// One record per line, for scripts.
    Text,
    /// A single JSON document.
    Json,
}

fn pick_output_mode(
    format_flag: Option<OutputMode>,
    json_flag: bool,
    format_env: Option<&str>,
    stdout_is_tty: bool,
) -> OutputMode {
    format_flag
        .or_else(|| json_flag.then_some(OutputMode::Json))
        .or_else(|| format_env.and_then(|value| OutputMode::from_str(value, true).ok()))
        .unwrap_or(if stdout_is_tty {
            OutputMode::Pretty
        } else {
            OutputMode::Text
        })
}

/// The output mode for this invocation.
pub fn resolve_output_mode(format_flag: Option<OutputMode>, json_flag: bool) -> OutputMode {
    let format_env = std::env::var("FORMAT").ok();
    pick_output_mode(
        format_flag,
        json_flag,
        format_env.as_deref(),
        io::stdout().is_terminal(),
    )
}

fn write_payload<T: Serialize>(
    w: &mut dyn Write,
    mode: OutputMode,
    payload: &T,
    text: impl Fn(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl Fn(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *w, payload)?;
            writeln!(w)?;
        }
        OutputMode::Text => text(payload, w)?,
        OutputMode::Pretty => pretty(payload, w)?,
    }
    Ok(())
}

/// Write `payload` to stdout with separate text and pretty renderers.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    payload: &T,
    text: impl Fn(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl Fn(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    write_payload(&mut io::stdout().lock(), mode, payload, &text, &pretty)
}

/// Write `payload` to stdout, using `human` for both text and pretty modes.
pub fn render<T: Serialize>(
    mode: OutputMode,
    payload: &T,
    human: impl Fn(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    write_payload(&mut io::stdout().lock(), mode, payload, &human, &human)
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// A failure as reported on stderr.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub error_code: &'static str,
}

impl CliError {
    /// A descriptor document or resolver config that could not be read.
    pub fn load(code: ErrorCode, err: &anyhow::Error) -> Self {
        Self {
            message: format!("{}: {err:#}", code.code()),
            suggestion: code.hint().map(ToString::to_string),
            error_code: code.code(),
        }
    }
}

impl From<&PlanError> for CliError {
    fn from(err: &PlanError) -> Self {
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(ToString::to_string),
            error_code: err.code().code(),
        }
    }
}

fn write_error(w: &mut dyn Write, mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut *w, &serde_json::json!({ "error": error }))?;
        writeln!(w)?;
        return Ok(());
    }
    writeln!(w, "error: {}", error.message)?;
    if let Some(suggestion) = &error.suggestion {
        writeln!(w, "  suggestion: {suggestion}")?;
    }
    Ok(())
}

/// Write `error` to stderr.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    write_error(&mut io::stderr().lock(), mode, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_error() -> CliError {
        CliError::from(&PlanError::CyclicDependency {
            cycle: vec!["view.v1".into(), "view.v2".into()],
        })
    }

    #[test]
    fn explicit_format_beats_every_other_source() {
        let mode = pick_output_mode(Some(OutputMode::Text), true, Some("json"), true);
        assert_eq!(mode, OutputMode::Text);
        assert_eq!(pick_output_mode(None, true, Some("pretty"), true), OutputMode::Json);
    }

    #[test]
    fn format_env_is_case_insensitive_and_ignores_junk() {
        assert_eq!(pick_output_mode(None, false, Some("Json"), true), OutputMode::Json);
        assert_eq!(pick_output_mode(None, false, Some("yaml"), true), OutputMode::Pretty);
        assert_eq!(pick_output_mode(None, false, Some("yaml"), false), OutputMode::Text);
    }

    #[test]
    fn piped_output_defaults_to_text() {
        assert_eq!(pick_output_mode(None, false, None, false), OutputMode::Text);
    }

    #[derive(Serialize)]
    struct Steps {
        steps: Vec<&'static str>,
    }

    fn steps() -> Steps {
        Steps {
            steps: vec!["build:table.t", "build:view.v"],
        }
    }

    fn write_steps(mode: OutputMode) -> String {
        let mut buf = Vec::new();
        write_payload(
            &mut buf,
            mode,
            &steps(),
            |p, w| writeln!(w, "{}", p.steps.join("\n")),
            |p, w| pretty_section(w, &format!("{} steps", p.steps.len())),
        )
        .expect("write");
        String::from_utf8(buf).expect("utf8")
    }

    #[test]
    fn payload_goes_through_the_renderer_for_its_mode() {
        assert_eq!(write_steps(OutputMode::Text), "build:table.t\nbuild:view.v\n");
        assert!(write_steps(OutputMode::Pretty).starts_with("2 steps\n---"));

        let json: serde_json::Value =
            serde_json::from_str(&write_steps(OutputMode::Json)).expect("json");
        assert_eq!(json["steps"][1], "build:view.v");
    }

    #[test]
    fn plan_errors_keep_their_code_and_hint() {
        let error = cycle_error();
        assert_eq!(error.error_code, "E3001");
        assert!(error.message.contains("view.v1 -> view.v2"));
        assert_eq!(
            error.suggestion.as_deref(),
            ErrorCode::CyclicDependency.hint()
        );
    }

    #[test]
    fn load_errors_carry_the_whole_context_chain() {
        let cause = anyhow::anyhow!("expected `=`").context("Failed to load schema.toml");
        let error = CliError::load(ErrorCode::DocumentParseError, &cause);
        assert_eq!(error.error_code, "E1002");
        assert_eq!(
            error.message,
            "E1002: Failed to load schema.toml: expected `=`"
        );
        assert!(error.suggestion.is_some());
    }

    #[test]
    fn json_errors_are_wrapped() {
        let mut buf = Vec::new();
        write_error(&mut buf, OutputMode::Json, &cycle_error()).expect("write");
        let json: serde_json::Value = serde_json::from_slice(&buf).expect("json");
        assert_eq!(json["error"]["error_code"], "E3001");
    }

    #[test]
    fn human_errors_show_the_suggestion_on_its_own_line() {
        let mut buf = Vec::new();
        write_error(&mut buf, OutputMode::Text, &cycle_error()).expect("write");
        let rendered = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].starts_with("error: E3001: cyclic dependency"));
        assert!(lines[1].starts_with("  suggestion: Add a dependency-set alternative"));
    }
}
