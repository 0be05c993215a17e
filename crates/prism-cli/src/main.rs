// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Prism CLI entrypoint.
//!
//! Loads a decoded capture (JSON, or CBOR for any other extension) into a
//! fresh analysis service and answers one request about it.
//!
//! # Usage
//! ```text
//! prism [--config-dir DIR] <command> <capture> [options]
//! ```
//!
//! Capture identifiers are content hashes, so the identifier printed by
//! `prism info` stays valid for `prism get` across runs.
//!
//! Logging goes to stderr and is filtered by `PRISM_LOG` (default `info`).

// The CLI is expected to print to stdout/stderr.
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod load;
mod render;

use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use prism_config_fs::FsConfigStore;
use prism_core::path::{CapturePath, CommandTreeNodePath};
use prism_core::{
    wire, CommandFilter, CommandTreeOptions, ConfigService, FindRequest, Path, ResolveConfig,
    Resolved, Service, ServiceConfig,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prism", author, version, about = "Prism GPU capture analysis")]
struct Cli {
    /// Directory holding `service.json`; defaults to the platform config dir.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the capture identifier and summary statistics
    Info {
        /// Capture file
        capture: PathBuf,
    },
    /// Print the command tree
    Tree {
        /// Capture file
        capture: PathBuf,
        #[command(flatten)]
        grouping: Grouping,
        /// Deepest level to print (0 prints everything)
        #[arg(long, default_value_t = 0)]
        depth: usize,
    },
    /// Print the diagnostics report
    Report {
        /// Capture file
        capture: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print every resource the capture creates
    Resources {
        /// Capture file
        capture: PathBuf,
    },
    /// Search the command tree
    Find {
        /// Capture file
        capture: PathBuf,
        /// Text to look for
        text: String,
        /// Treat TEXT as a regular expression
        #[arg(long)]
        regex: bool,
        /// Match case exactly
        #[arg(long)]
        case_sensitive: bool,
        /// Stop after this many matches (0 uses the configured default)
        #[arg(long, default_value_t = 0)]
        max: u32,
        #[command(flatten)]
        grouping: Grouping,
    },
    /// Resolve a path given as JSON and print the result
    Get {
        /// Capture file
        capture: PathBuf,
        /// Path, e.g. '{"kind":"commands","path":{"capture":{"id":"<id>"}}}'
        path: String,
    },
    /// Print the effective service configuration
    Config,
}

/// Command-tree grouping switches.
#[derive(Args, Debug, Clone, Default)]
struct Grouping {
    /// Group by frame
    #[arg(long)]
    frames: bool,
    /// Group by draw call
    #[arg(long)]
    draws: bool,
    /// Group by debug markers
    #[arg(long)]
    markers: bool,
    /// Group by submission
    #[arg(long)]
    submissions: bool,
    /// Group by API
    #[arg(long)]
    apis: bool,
    /// Group by thread
    #[arg(long)]
    threads: bool,
    /// Children per group before clustering (defaults to the configured value)
    #[arg(long)]
    max_children: Option<u64>,
}

impl Grouping {
    fn options(&self) -> CommandTreeOptions {
        CommandTreeOptions {
            group_by_api: self.apis,
            group_by_thread: self.threads,
            group_by_user_markers: self.markers,
            group_by_frame: self.frames,
            group_by_draw_call: self.draws,
            group_by_submission: self.submissions,
            max_children: self.max_children,
            ..CommandTreeOptions::default()
        }
    }
}

fn service_config(dir: Option<&PathBuf>) -> Result<ServiceConfig> {
    let store = match dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    match store {
        Ok(store) => {
            debug!(dir = %store.base().display(), "config store");
            ConfigService::new(store)
                .service_config()
                .context("failed to load service config")
        }
        // No home directory: fall back to defaults unless a directory was given.
        Err(err) if dir.is_none() => {
            warn!(error = %err, "config dir unavailable, using defaults");
            Ok(ServiceConfig::default())
        }
        Err(err) => Err(err).context("failed to open config dir"),
    }
}

async fn command_tree(
    svc: &Service,
    capture: CapturePath,
    grouping: &Grouping,
) -> Result<(prism_db::Id, std::sync::Arc<prism_core::CommandTree>)> {
    let ctx = svc.context(&ResolveConfig::default())?;
    let path = capture.command_tree(CommandFilter::default(), grouping.options());
    match prism_core::resolve(&ctx, &path).await? {
        Resolved::CommandTree { id, tree } => Ok((id, tree)),
        other => bail!("unexpected result for a command tree: {other:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PRISM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = service_config(cli.config_dir.as_ref())?;
    if let Commands::Config = cli.command {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let svc = Service::new(config);
    let rc = ResolveConfig::default();

    match cli.command {
        Commands::Info { capture } => {
            let c = svc.import_capture(load::capture(&capture)?)?;
            let wire::Value::Stats(stats) = svc.get(&c.stats(CommandFilter::default()), &rc).await?
            else {
                bail!("unexpected result for stats");
            };
            println!("capture   {}", c.id);
            println!("commands  {}", stats.commands);
            println!("sub-cmds  {}", stats.sub_commands);
            println!("frames    {}", stats.frames);
            println!("draws     {}", stats.draw_calls.iter().sum::<u64>());
        }
        Commands::Tree {
            capture,
            grouping,
            depth,
        } => {
            let decoded = load::capture(&capture)?;
            let c = svc.import_capture(decoded.clone())?;
            let (_, tree) = command_tree(&svc, c, &grouping).await?;
            print!("{}", render::tree(&tree, &decoded, depth));
        }
        Commands::Report { capture, json } => {
            let c = svc.import_capture(load::capture(&capture)?)?;
            let path = c.report(None, CommandFilter::default());
            let wire::Value::Report(report) = svc.get(&path, &rc).await? else {
                bail!("unexpected result for a report");
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render::report(&report));
            }
        }
        Commands::Resources { capture } => {
            let c = svc.import_capture(load::capture(&capture)?)?;
            let wire::Value::Resources(list) = svc.get(&c.resources(), &rc).await? else {
                bail!("unexpected result for resources");
            };
            print!("{}", render::resources(&list));
        }
        Commands::Find {
            capture,
            text,
            regex,
            case_sensitive,
            max,
            grouping,
        } => {
            let c = svc.import_capture(load::capture(&capture)?)?;
            let (tree, _) = command_tree(&svc, c, &grouping).await?;
            let req = FindRequest {
                from: CommandTreeNodePath {
                    tree,
                    indices: vec![],
                }
                .into(),
                text,
                is_regex: regex,
                is_case_sensitive: case_sensitive,
                backwards: false,
                wrap: false,
                max_items: max,
            };
            let found = svc
                .find(&req, &rc, |r| {
                    if let Path::CommandTreeNode(node) = &r.path {
                        println!("{:<16} {}", render::indices(&node.indices), r.label);
                    }
                    ControlFlow::Continue(())
                })
                .await?;
            debug!(found, "find finished");
        }
        Commands::Get { capture, path } => {
            svc.import_capture(load::capture(&capture)?)?;
            let path: Path = serde_json::from_str(&path).context("failed to parse path")?;
            match svc.get(&path, &rc).await? {
                wire::Value::Blob(bytes) => println!("{}", hex::encode(bytes)),
                value => println!("{}", serde_json::to_string_pretty(&value)?),
            }
        }
        Commands::Config => {}
    }
    Ok(())
}
