//! `splan plan`: print the ordered build/drop steps for a descriptor document.

use std::io::Write;
use std::path::Path;

use clap::Args;
use schemaplan_core::graph::BreakRecord;
use schemaplan_core::{Mode, Plan, Step};
use serde::Serialize;

use crate::input::SourceArgs;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `splan plan`.
#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Serialize)]
struct PlanOutput<'a> {
    mode: Mode,
    fingerprint: String,
    steps: &'a [Step],
    breaks: &'a [BreakRecord],
}

impl<'a> PlanOutput<'a> {
    fn new(plan: &'a Plan) -> Self {
        Self {
            mode: plan.mode,
            fingerprint: plan.fingerprint(),
            steps: &plan.steps,
            breaks: &plan.breaks,
        }
    }
}

/// Execute `splan plan`.
pub fn run_plan(
    args: &PlanArgs,
    config_path: Option<&Path>,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let source = super::load_source(&args.source, output)?;
    let plan = super::resolve_source(&source, config_path, project_root, output)?;
    let payload = PlanOutput::new(&plan);
    render_mode(output, &payload, render_plan_text, render_plan_pretty)
}

fn render_plan_text(payload: &PlanOutput<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    for step in payload.steps {
        writeln!(w, "{}", step.key)?;
    }
    Ok(())
}

fn render_plan_pretty(payload: &PlanOutput<'_>, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Plan ({} steps)", payload.steps.len()))?;
    pretty_kv(w, "mode", payload.mode.as_str())?;
    pretty_kv(w, "fingerprint", &payload.fingerprint)?;

    if payload.steps.is_empty() {
        writeln!(w, "\nNothing to do.")?;
    } else {
        writeln!(w)?;
        let width = payload.steps.len().to_string().len();
        for (idx, step) in payload.steps.iter().enumerate() {
            let marker = if step.is_fallback() { "*" } else { " " };
            writeln!(w, "{:>width$}.{marker} {step}", idx + 1)?;
        }
    }

    if !payload.breaks.is_empty() {
        writeln!(w)?;
        pretty_section(w, &format!("Cycle breaks ({})", payload.breaks.len()))?;
        for record in payload.breaks {
            writeln!(w, "  - [{}] {}", record.strategy, record.detail)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaplan_core::{FallbackScope, FlagSet, ObjectDescriptor, ResolverConfig, resolve};

    fn fallback_plan() -> Plan {
        resolve(
            &[
                ObjectDescriptor::new("table.t", "table")
                    .depends_on("grant.g")
                    .with_fallback("superuser", FallbackScope::Shared),
                ObjectDescriptor::new("grant.g", "grant").depends_on("table.t"),
            ],
            Mode::Build,
            &ResolverConfig::default(),
            &FlagSet::new(),
        )
        .expect("plan")
    }

    #[test]
    fn plan_args_parse_mode_and_flags() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: PlanArgs,
        }

        let parsed =
            Wrapper::parse_from(["test", "schema.toml", "--mode", "both", "--flag", "audit"]);
        assert_eq!(parsed.args.source.file, Path::new("schema.toml"));
        assert_eq!(parsed.args.source.mode, crate::input::ModeArg::Both);
        assert_eq!(parsed.args.source.flags, vec!["audit".to_string()]);
    }

    #[test]
    fn text_output_is_one_key_per_line() {
        let plan = fallback_plan();
        let mut out = Vec::new();
        render_plan_text(&PlanOutput::new(&plan), &mut out).expect("render");
        let rendered = String::from_utf8(out).expect("utf8");
        assert_eq!(
            rendered.lines().collect::<Vec<_>>(),
            vec![
                "fallback:superuser",
                "build:table.t",
                "build:grant.g",
                "endfallback:superuser"
            ]
        );
    }

    #[test]
    fn pretty_output_marks_fallbacks_and_breaks() {
        let plan = fallback_plan();
        let mut out = Vec::new();
        render_plan_pretty(&PlanOutput::new(&plan), &mut out).expect("render");
        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.contains("Plan (4 steps)"));
        assert!(rendered.contains("1.* fallback superuser"));
        assert!(rendered.contains("2.  build table.t"));
        assert!(rendered.contains("[fallback_pair]"));
    }
}
