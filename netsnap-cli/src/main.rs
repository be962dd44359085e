//! Netsnap CLI - component and net snapshots of KiCad schematics from the command line.

mod render;
mod settings;
mod update;
mod watch;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use netsnap::store::write_atomic;
use netsnap::{Snapshot, SnapshotDiffer, SnapshotStore};
use render::{render_diff, render_snapshot, DiffFormat, OutputFormat};
use settings::Settings;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;
use update::Updater;

#[derive(Parser)]
#[command(name = "netsnap")]
#[command(about = "Deterministic component and net snapshots from KiCad schematics", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a snapshot from a project directory or root schematic
    Extract {
        /// Project directory or root .kicad_sch file
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Root schematic, relative to the project directory
        #[arg(long)]
        root: Option<String>,

        /// External symbol library as NICKNAME=FILE (repeatable)
        #[arg(long = "library", value_name = "NICK=FILE", value_parser = parse_library)]
        libraries: Vec<(String, PathBuf)>,

        /// Exit with error code if extraction produced warnings
        #[arg(long)]
        strict: bool,
    },

    /// Compare two stored snapshots
    Diff {
        /// Older snapshot (JSON)
        #[arg(value_name = "OLD")]
        old: PathBuf,

        /// Newer snapshot (JSON)
        #[arg(value_name = "NEW")]
        new: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: DiffFormat,
    },

    /// Extract, diff against the stored baseline and publish
    Update {
        /// Path to project directory
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// Re-run update whenever project files change
    Watch {
        /// Path to project directory
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

fn parse_library(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((nick, file)) if !nick.is_empty() && !file.is_empty() => {
            Ok((nick.to_string(), PathBuf::from(file)))
        }
        _ => Err(format!("expected NICKNAME=FILE, got '{}'", arg)),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Extract {
            path,
            format,
            output,
            root,
            libraries,
            strict,
        } => handle_extract(&path, format, output.as_deref(), root, libraries, strict),
        Commands::Diff { old, new, format } => handle_diff(&old, &new, format),
        Commands::Update { dir } => handle_update(&dir),
        Commands::Watch { dir } => handle_watch(&dir),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(exit_code);
}

/// A `.kicad_sch` path selects its directory as the project and itself as root.
fn split_target(path: &Path) -> Result<(PathBuf, Option<String>)> {
    if path.is_dir() {
        return Ok((path.to_path_buf(), None));
    }
    if path.extension().and_then(|e| e.to_str()) != Some("kicad_sch") {
        bail!("{} is neither a directory nor a .kicad_sch file", path.display());
    }
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .context("Missing file name")?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, Some(file)))
}

fn handle_extract(
    path: &Path,
    format: Option<OutputFormat>,
    output: Option<&Path>,
    root: Option<String>,
    libraries: Vec<(String, PathBuf)>,
    strict: bool,
) -> Result<i32> {
    let (dir, file_root) = split_target(path)?;
    let mut settings = Settings::load(&dir)?;
    if let Some(root) = root.or(file_root) {
        settings.root = Some(root);
    }
    let format = format.unwrap_or(settings.format);
    // Command-line library paths are relative to the working directory.
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    settings
        .libraries
        .extend(libraries.into_iter().map(|(nick, file)| (nick, cwd.join(file))));

    let options = settings.extract_options();
    let extraction = Updater::extract(&dir, &settings, &options)?;
    let warnings = extraction.warnings.len();
    let (snapshot, warnings_list) = extraction.into_parts(0);

    let rendered = render_snapshot(&snapshot, &warnings_list, format)?;
    match output {
        Some(file) => write_atomic(file, rendered.as_bytes())
            .with_context(|| format!("Failed to write {}", file.display()))?,
        None => print!("{}", rendered),
    }

    if strict && warnings > 0 {
        eprintln!("{} warning(s) in strict mode", warnings);
        return Ok(1);
    }
    Ok(0)
}

fn load_snapshot(path: &Path) -> Result<Snapshot> {
    SnapshotStore::new(path)
        .load()?
        .with_context(|| format!("Snapshot not found: {}", path.display()))
}

fn handle_diff(old: &Path, new: &Path, format: DiffFormat) -> Result<i32> {
    let old = load_snapshot(old)?;
    let new = load_snapshot(new)?;
    let diff = SnapshotDiffer::default().diff(Some(&old), &new);
    print!("{}", render_diff(&diff, format)?);
    Ok(0)
}

fn handle_update(dir: &Path) -> Result<i32> {
    let settings = Settings::load(dir)?;
    let updater = Updater::open(dir, settings)?;
    let publication = updater.run("update")?;

    println!(
        "Generation {}: {} components, {} nets",
        publication.snapshot.generation,
        publication.snapshot.components.len(),
        publication.snapshot.nets.len()
    );
    print!("{}", render_diff(&publication.diff, DiffFormat::Human)?);
    Ok(0)
}

fn handle_watch(dir: &Path) -> Result<i32> {
    let settings = Settings::load(dir)?;
    let updater = Updater::open(dir, settings)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(watch::run(updater))?;
    Ok(0)
}
