//! `splan graph`: show the resolved plan as a dependency graph.

use std::io::Write;
use std::path::Path;

use clap::Args;
use petgraph::dot::{Config, Dot};
use schemaplan_core::Plan;
use serde::Serialize;

use crate::input::SourceArgs;
use crate::output::{OutputMode, pretty_section, render, render_mode};

/// Arguments for `splan graph`.
#[derive(Args, Debug, Clone)]
pub struct GraphArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Emit Graphviz DOT instead of an edge list.
    #[arg(long)]
    pub dot: bool,
}

#[derive(Debug, Serialize)]
struct GraphEdge {
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
struct GraphOutput {
    nodes: Vec<String>,
    /// Dependency first, dependent second.
    edges: Vec<GraphEdge>,
}

impl GraphOutput {
    fn new(plan: &Plan) -> Self {
        let key = |pos: usize| plan.steps[pos].key.clone();
        Self {
            nodes: plan.steps.iter().map(|step| step.key.clone()).collect(),
            edges: plan
                .edges
                .iter()
                .map(|&(dependent, dependency)| GraphEdge {
                    from: key(dependency),
                    to: key(dependent),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DotOutput {
    dot: String,
}

/// Execute `splan graph`.
pub fn run_graph(
    args: &GraphArgs,
    config_path: Option<&Path>,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let source = super::load_source(&args.source, output)?;
    let plan = super::resolve_source(&source, config_path, project_root, output)?;

    if args.dot {
        let payload = DotOutput {
            dot: render_dot(&plan),
        };
        return render(output, &payload, |p, w| write!(w, "{}", p.dot));
    }

    let payload = GraphOutput::new(&plan);
    render_mode(output, &payload, render_edges_text, render_edges_pretty)
}

fn render_dot(plan: &Plan) -> String {
    // `Dot: Display` requires displayable edge weights; labels are suppressed.
    let graph = plan.to_graph().map(|_, node| node.clone(), |_, ()| "");
    Dot::with_config(&graph, &[Config::EdgeNoLabel]).to_string()
}

fn render_edges_text(payload: &GraphOutput, w: &mut dyn Write) -> std::io::Result<()> {
    for edge in &payload.edges {
        writeln!(w, "{} -> {}", edge.from, edge.to)?;
    }
    Ok(())
}

fn render_edges_pretty(payload: &GraphOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(
        w,
        &format!(
            "Dependency graph ({} nodes, {} edges)",
            payload.nodes.len(),
            payload.edges.len()
        ),
    )?;
    if payload.edges.is_empty() {
        writeln!(w, "No dependencies.")?;
        return Ok(());
    }
    for edge in &payload.edges {
        writeln!(w, "  {} -> {}", edge.from, edge.to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemaplan_core::{FlagSet, Mode, ObjectDescriptor, ResolverConfig, resolve};

    fn chain() -> Plan {
        resolve(
            &[
                ObjectDescriptor::new("view.v", "view").depends_on("table.t"),
                ObjectDescriptor::new("table.t", "table"),
            ],
            Mode::Build,
            &ResolverConfig::default(),
            &FlagSet::new(),
        )
        .expect("plan")
    }

    #[test]
    fn edges_run_from_dependency_to_dependent() {
        let payload = GraphOutput::new(&chain());
        assert_eq!(payload.nodes, vec!["build:table.t", "build:view.v"]);
        assert_eq!(payload.edges.len(), 1);
        assert_eq!(payload.edges[0].from, "build:table.t");
        assert_eq!(payload.edges[0].to, "build:view.v");
    }

    #[test]
    fn dot_output_is_a_digraph_without_edge_labels() {
        let dot = render_dot(&chain());
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("label = \"build table.t\""));
        assert!(dot.contains("0 -> 1 [ ]"));
    }

    #[test]
    fn text_output_lists_edges() {
        let mut out = Vec::new();
        render_edges_text(&GraphOutput::new(&chain()), &mut out).expect("render");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "build:table.t -> build:view.v\n"
        );
    }
}
