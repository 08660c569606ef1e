//! CLI command handlers
//!
//! # Modules
//!
//! - `discover`: Cluster a scene file and report the discovered categories
//! - `assess`: Score one scene of a file against the rest of the fleet
//! - `stats`: Fleet statistics over a whole scene file
//!
//! Every command reads a JSON array of scenes and writes one JSON document
//! to stdout. Diagnostics go to stderr.

pub mod assess;
pub mod discover;
pub mod stats;

use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::ValueEnum;
use serde::Serialize;
use tracing::{error, info};

use fleet_discovery_core::{EmbeddingSpace, SceneEmbedding};

use crate::error::{exit_code_for_error, CliExitCode};

/// Embedding space selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpaceArg {
    Behavioral,
    Visual,
    Legacy,
}

impl From<SpaceArg> for EmbeddingSpace {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Behavioral => EmbeddingSpace::Behavioral,
            SpaceArg::Visual => EmbeddingSpace::Visual,
            SpaceArg::Legacy => EmbeddingSpace::Legacy,
        }
    }
}

/// Read a JSON array of scenes.
pub fn load_scenes(path: &Path) -> anyhow::Result<Vec<SceneEmbedding>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scene file {}", path.display()))?;
    let scenes: Vec<SceneEmbedding> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse scene file {}", path.display()))?;

    info!(path = %path.display(), scenes = scenes.len(), "Scene file loaded");
    Ok(scenes)
}

/// Pretty-print a response to stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON output")?;
    println!("{}", rendered);
    Ok(())
}

/// Turn a command result into a process exit code, reporting failures on stderr.
pub fn finish(command: &str, result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => CliExitCode::Success.into(),
        Err(e) => {
            let code = exit_code_for_error(&e);
            error!(command, exit_code = ?code, "Command failed: {:#}", e);
            eprintln!("{} failed: {:#}", command, e);
            code.into()
        }
    }
}
