//! Flowcraft CLI - compile typed flows into a blueprint manifest.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;

use flowcraft::compiler::compile_project;
use flowcraft::config::FlowcraftConfig;
use flowcraft::diagnostics::Severity;
use flowcraft::error::FlowcraftError;

#[derive(Parser)]
#[command(name = "flowcraft")]
#[command(about = "Durable-workflow compiler: typed flows in, blueprints out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the project and write the manifest
    Compile {
        /// Project root (defaults to the current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Config file (defaults to flowcraft.config.json in the root)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Compile without writing the manifest
    Check {
        /// Project root (defaults to the current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Config file (defaults to flowcraft.config.json in the root)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print per-flow node and edge counts
        #[arg(long)]
        summary: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Compile { project, config } => run(project, config, true, false),
        Commands::Check {
            project,
            config,
            summary,
        } => run(project, config, false, summary),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("{} {}", "error:".red().bold(), error);
            ExitCode::FAILURE
        }
    }
}

fn run(
    project: Option<PathBuf>,
    config_path: Option<PathBuf>,
    write_manifest: bool,
    summary: bool,
) -> Result<bool, FlowcraftError> {
    let root = match project {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = match config_path {
        Some(path) => FlowcraftConfig::load_file(&path)?,
        None => FlowcraftConfig::load(&root)?,
    };

    let entries = config.entry_files(&root);
    let manifest_path = config.manifest_file(&root);
    let manifest_dir = manifest_path.parent().map(Path::to_path_buf);
    let ts_config = config.ts_config_file(&root);

    let output = compile_project(&entries, Some(&ts_config), manifest_dir.as_deref())?;

    for diagnostic in output.diagnostics.records() {
        let line = diagnostic.display_relative_to(&root);
        match diagnostic.severity {
            Severity::Error => eprintln!("{}", line.red()),
            Severity::Warning => eprintln!("{}", line.yellow()),
            Severity::Info => eprintln!("{}", line),
        }
    }

    if summary {
        for (id, blueprint) in &output.blueprints {
            println!(
                "{}: {} nodes, {} edges, start {}",
                id.bold(),
                blueprint.nodes.len(),
                blueprint.edges.len(),
                blueprint.start_node_id
            );
        }
    }

    if !output.is_success() {
        eprintln!(
            "{} compilation failed with {} error(s)",
            "error:".red().bold(),
            output.diagnostics.error_count()
        );
        return Ok(false);
    }

    if write_manifest {
        if let Some(dir) = &manifest_dir {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&manifest_path, &output.manifest_source)?;
        println!(
            "{} {} flow(s), {} step(s) -> {}",
            "compiled".green().bold(),
            output.blueprints.len(),
            output.registry.len(),
            manifest_path.display()
        );
    } else {
        println!(
            "{} {} flow(s), {} step(s)",
            "checked".green().bold(),
            output.blueprints.len(),
            output.registry.len()
        );
    }

    Ok(true)
}
