#![forbid(unsafe_code)]

mod cmd;
mod input;
mod output;

use clap::{Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "splan",
    author,
    version,
    about = "splan: order schema build and drop steps",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (defaults to pretty on a TTY, text when piped).
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Resolver config file (defaults to `.schemaplan/config.toml`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Print the ordered steps for a descriptor document",
        long_about = "Resolve every dependency in a descriptor document, break any \
                      dependency cycles, and print the resulting steps in the order \
                      they must run.",
        after_help = "EXAMPLES:\n    # Build everything in schema.toml\n    splan plan schema.toml\n\n    # Drop and rebuild, with the `audit` guard enabled\n    splan plan schema.toml --mode both --flag audit\n\n    # Machine-readable output\n    splan plan schema.toml --format json"
    )]
    Plan(cmd::plan::PlanArgs),

    #[command(
        about = "Show the resolved plan as a dependency graph",
        long_about = "Print the dependency edges between resolved steps, dependency \
                      first. Use --dot to emit Graphviz DOT.",
        after_help = "EXAMPLES:\n    # List edges\n    splan graph schema.toml\n\n    # Render with Graphviz\n    splan graph schema.toml --dot | dot -Tsvg > plan.svg"
    )]
    Graph(cmd::graph::GraphArgs),

    #[command(
        about = "List dependency cycles before they are broken",
        long_about = "Report every group of steps that depend on each other in a \
                      cycle, before any cycle-breaking strategy runs.",
        after_help = "EXAMPLES:\n    # Show cycles on the build side\n    splan cycles schema.toml\n\n    # Include the drop side\n    splan cycles schema.toml --mode both --format json"
    )]
    Cycles(cmd::cycles::CyclesArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SPLAN_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "schemaplan=debug,info"
        } else {
            "schemaplan=info,warn"
        })
    });

    let format = env::var("SPLAN_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let output = cli.output_mode();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Plan(ref args) => cmd::plan::run_plan(args, config, output, &project_root),
        Commands::Graph(ref args) => cmd::graph::run_graph(args, config, output, &project_root),
        Commands::Cycles(ref args) => cmd::cycles::run_cycles(args, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ModeArg;
    use std::path::Path;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["splan", "plan", "schema.toml", "--format", "json", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.format, Some(OutputMode::Json));
        assert!(matches!(cli.command, Commands::Plan(_)));
    }

    #[test]
    fn json_flag_is_accepted() {
        let cli = Cli::parse_from(["splan", "--json", "cycles", "schema.toml"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Cycles(_)));
    }

    #[test]
    fn config_flag_parses_path() {
        let cli = Cli::parse_from(["splan", "--config", "custom.toml", "plan", "schema.toml"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("custom.toml")));
    }

    #[test]
    fn graph_dot_flag_parses() {
        let cli = Cli::parse_from(["splan", "graph", "schema.toml", "--dot", "--mode", "drop"]);
        let Commands::Graph(args) = cli.command else {
            panic!("expected graph command");
        };
        assert!(args.dot);
        assert_eq!(args.source.mode, ModeArg::Drop);
    }

    #[test]
    fn mode_defaults_to_build() {
        let cli = Cli::parse_from(["splan", "plan", "schema.toml"]);
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan command");
        };
        assert_eq!(args.source.mode, ModeArg::Build);
        assert!(args.source.flags.is_empty());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
