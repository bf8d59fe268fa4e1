//! `splan cycles`: list dependency cycles before any are broken.

use std::io::Write;

use clap::Args;
use schemaplan_core::find_cycles;
use serde::Serialize;

use crate::input::SourceArgs;
use crate::output::{CliError, OutputMode, render};

/// Arguments for `splan cycles`.
#[derive(Args, Debug, Clone)]
pub struct CyclesArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Debug, Serialize)]
struct CyclesOutput {
    cycles: Vec<Vec<String>>,
}

/// Execute `splan cycles`.
pub fn run_cycles(args: &CyclesArgs, output: OutputMode) -> anyhow::Result<()> {
    let source = super::load_source(&args.source, output)?;
    let cycles = find_cycles(&source.descriptors, source.mode, &source.flags)
        .map_err(|err| super::report(output, &CliError::from(&err)))?;

    render(output, &CyclesOutput { cycles }, render_cycles_human)
}

fn render_cycles_human(payload: &CyclesOutput, w: &mut dyn Write) -> std::io::Result<()> {
    if payload.cycles.is_empty() {
        writeln!(w, "No dependency cycles found.")?;
        return Ok(());
    }

    writeln!(w, "Dependency cycles ({})", payload.cycles.len())?;

    for (idx, cycle) in payload.cycles.iter().enumerate() {
        writeln!(w, "\nCycle {}:", idx + 1)?;
        for key in cycle {
            writeln!(w, "  - {key}")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_cycles_human_no_cycles() {
        let payload = CyclesOutput { cycles: Vec::new() };
        let mut out = Vec::new();

        render_cycles_human(&payload, &mut out).expect("render");

        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.contains("No dependency cycles found."));
    }

    #[test]
    fn render_cycles_human_lists_groups() {
        let payload = CyclesOutput {
            cycles: vec![
                vec!["build:view.v1".to_string(), "build:view.v2".to_string()],
                vec!["drop:role.a".to_string(), "drop:role.b".to_string()],
            ],
        };
        let mut out = Vec::new();

        render_cycles_human(&payload, &mut out).expect("render");

        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.contains("Dependency cycles (2)"));
        assert!(rendered.contains("Cycle 1:"));
        assert!(rendered.contains("  - build:view.v2"));
        assert!(rendered.contains("Cycle 2:"));
    }
}
