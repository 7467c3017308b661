use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use splitload::manifest::ENV_MANIFEST;
use splitload::{
    EmitterKind, FragmentManifest, JsonLinesEmitter, MetricsEmitter, ReplayScript, TracingEmitter,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "splitload")]
#[command(about = "Inspect fragment numbering and replay loader event scripts.", long_about = None)]
#[command(version)]
struct Cli {
    /// Log loader transitions to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the fragment numbers derived for every split point.
    Numbering(NumberingArgs),
    /// Run an event script against a fresh loader and report what it requested.
    Replay(ReplayArgs),
}

#[derive(Debug, Args)]
struct ManifestSource {
    /// Fragment manifest JSON (defaults to $SPLITLOAD_MANIFEST).
    #[arg(long, value_name = "PATH", conflicts_with = "num_entries")]
    manifest: Option<PathBuf>,

    /// Use an inline manifest with this many entries.
    #[arg(long, value_name = "N")]
    num_entries: Option<u32>,

    /// Module name for an inline manifest.
    #[arg(long, value_name = "NAME", requires = "num_entries")]
    module_name: Option<String>,
}

#[derive(Debug, Args)]
struct NumberingArgs {
    #[command(flatten)]
    source: ManifestSource,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    #[command(flatten)]
    source: ManifestSource,

    #[arg(long, value_name = "PATH")]
    script: PathBuf,

    /// Where to mirror stats events while replaying.
    #[arg(long, value_enum, default_value_t = EmitterKind::None)]
    events: EmitterKind,

    /// Write the report here instead of stdout.
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Numbering(args) => cmd_numbering(args),
        Command::Replay(args) => cmd_replay(args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_manifest(source: &ManifestSource) -> Result<FragmentManifest> {
    if let Some(n) = source.num_entries {
        let mut manifest = FragmentManifest::new(n);
        if let Some(name) = &source.module_name {
            manifest = manifest.with_module_name(name.clone());
        }
        manifest.validate().context("inline manifest")?;
        return Ok(manifest);
    }

    let path = match &source.manifest {
        Some(path) => path.clone(),
        None => match std::env::var_os(ENV_MANIFEST) {
            Some(raw) if !raw.is_empty() => PathBuf::from(raw),
            _ => anyhow::bail!("missing manifest: pass --manifest, --num-entries or set {ENV_MANIFEST}"),
        },
    };
    FragmentManifest::load(&path)
}

fn cmd_numbering(args: NumberingArgs) -> Result<std::process::ExitCode> {
    let manifest = resolve_manifest(&args.source)?;
    let table = manifest.numbering().table(&manifest.module_name);
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(std::process::ExitCode::SUCCESS)
}

fn cmd_replay(args: ReplayArgs) -> Result<std::process::ExitCode> {
    let manifest = resolve_manifest(&args.source)?;
    let script = ReplayScript::load(&args.script)?;

    let mut extra: Vec<Box<dyn MetricsEmitter + Send>> = Vec::new();
    match args.events {
        EmitterKind::None => {}
        EmitterKind::Jsonl => extra.push(Box::new(JsonLinesEmitter::new(std::io::stderr()))),
        EmitterKind::Log => extra.push(Box::new(TracingEmitter)),
    }

    let report = splitload::replay_with(&manifest, &script, extra)?;
    tracing::debug!(
        steps = report.steps.len(),
        requests = report.requests.len(),
        state = %report.final_state.state,
        "replay finished"
    );

    let mut bytes = serde_json::to_vec_pretty(&report)?;
    bytes.push(b'\n');
    match &args.out {
        Some(path) => write_report(path, &bytes)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes).context("write report to stdout")?;
            stdout.flush().context("flush stdout")?;
        }
    }
    Ok(std::process::ExitCode::SUCCESS)
}

fn write_report(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create report dir: {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write report: {}", path.display()))
}
