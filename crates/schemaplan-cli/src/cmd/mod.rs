pub mod cycles;
pub mod graph;
pub mod plan;

use std::path::Path;

use schemaplan_core::{ErrorCode, Plan, resolve};

use crate::input::{Source, SourceArgs, resolver_config};
use crate::output::{CliError, OutputMode, render_error};

/// Report a failure in the requested format, then fail the command.
fn report(output: OutputMode, error: &CliError) -> anyhow::Error {
    if let Err(render_err) = render_error(output, error) {
        return render_err;
    }
    anyhow::anyhow!("{} failed", error.error_code)
}

/// Read the descriptor document, reporting parse failures as `E1002`.
fn load_source(args: &SourceArgs, output: OutputMode) -> anyhow::Result<Source> {
    args.load()
        .map_err(|err| report(output, &CliError::load(ErrorCode::DocumentParseError, &err)))
}

/// Resolve `source` with the active config, reporting failures to stderr.
fn resolve_source(
    source: &Source,
    config_path: Option<&Path>,
    project_root: &Path,
    output: OutputMode,
) -> anyhow::Result<Plan> {
    let config = resolver_config(config_path, project_root)
        .map_err(|err| report(output, &CliError::load(ErrorCode::ConfigParseError, &err)))?;
    resolve(&source.descriptors, source.mode, &config, &source.flags)
        .map_err(|err| report(output, &CliError::from(&err)))
}
