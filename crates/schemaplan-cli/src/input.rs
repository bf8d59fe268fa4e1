//! Descriptor document arguments shared by every command.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, ValueEnum};
use schemaplan_core::{DescriptorDocument, FlagSet, Mode, ObjectDescriptor, ResolverConfig};
use schemaplan_core::config::{load_config, load_project_config};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Create every object.
    #[default]
    Build,
    /// Remove every object.
    Drop,
    /// Drop everything, then rebuild it.
    Both,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Build => Self::Build,
            ModeArg::Drop => Self::Drop,
            ModeArg::Both => Self::Both,
        }
    }
}

/// Where to read object descriptors from and how to resolve them.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Descriptor document (`.toml`, or `.json`).
    pub file: PathBuf,

    /// Which steps to plan.
    #[arg(long, value_enum, default_value_t = ModeArg::Build)]
    pub mode: ModeArg,

    /// Enable a guard flag (repeatable). Guards written as `!flag` hold
    /// when the flag is not enabled.
    #[arg(long = "flag", value_name = "FLAG")]
    pub flags: Vec<String>,
}

/// A loaded descriptor document plus the guard flags to evaluate it with.
#[derive(Debug)]
pub struct Source {
    pub descriptors: Vec<ObjectDescriptor>,
    pub mode: Mode,
    pub flags: FlagSet,
}

impl SourceArgs {
    /// Read the descriptor document named on the command line.
    pub fn load(&self) -> anyhow::Result<Source> {
        let document = DescriptorDocument::load(&self.file)?;
        debug!(
            file = %self.file.display(),
            objects = document.object.len(),
            "loaded descriptor document"
        );
        Ok(Source {
            descriptors: document.object,
            mode: self.mode.into(),
            flags: self.flags.iter().cloned().collect(),
        })
    }
}

/// Resolver settings from `--config`, or the project config under `project_root`.
pub fn resolver_config(
    explicit: Option<&Path>,
    project_root: &Path,
) -> anyhow::Result<ResolverConfig> {
    match explicit {
        Some(path) => {
            anyhow::ensure!(path.exists(), "config file {} not found", path.display());
            load_config(path)
        }
        None => load_project_config(project_root)
            .with_context(|| format!("Failed to load config under {}", project_root.display())),
    }
}
