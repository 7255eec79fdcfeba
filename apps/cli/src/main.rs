use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use multiboot_content::{default_search_paths, partition_by_usability, scan_for_installers};
use multiboot_core::{InstallerDescriptor, InstallerStatus, BYTES_PER_MB};
use multiboot_host_macos::{
    check_dependencies, download_installer, host_info, installer_size_bytes, list_external_drives,
    mist_available, read_drive_structure, require_root, DEFAULT_DOWNLOAD_DIR,
};
use multiboot_layout::{plan_fresh_layout, volume_version, FreshLayout, UpdatePlan};
use multiboot_safety::require_confirmation_token;
use multiboot_sizing::{required_size_mb_with, resolve_os_name};
use multiboot_workflow_engine::{
    default_preferences_path, run_create, run_update, CreateParams, InstallerOutcome, MacDisk,
    Preferences, UpdateParams, WorkflowMode,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Plan and build multi-installer macOS USB drives.
#[derive(Parser, Debug)]
#[command(name = "multiboot", version)]
struct Cli {
    /// Log debug output.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Preferences file (defaults to <config dir>/multiboot/prefs.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory that receives the `reports/<run id>` bundles.
    #[arg(long, global = true)]
    report_base: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installer applications and partial downloads.
    Scan {
        /// Directory to search instead of the defaults (repeatable).
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },
    /// List external drives that can be targeted.
    Drives,
    /// Show the partition structure of a disk.
    Inspect { disk: String },
    /// Compute the partition size for one payload.
    Size {
        #[arg(long)]
        size_kb: u64,
        #[arg(long)]
        version: String,
        /// Safety buffer in GB, overrides the catalog default.
        #[arg(long)]
        buffer: Option<f64>,
    },
    /// Plan a fresh layout for a drive of the given size.
    Plan {
        #[arg(long)]
        disk_gb: f64,
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },
    /// Erase a drive and install every usable installer onto it.
    Create {
        disk: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Add or refresh installers on a drive created earlier.
    Update {
        disk: String,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Download a full installer with mist.
    Download {
        /// macOS name or version, e.g. `Sonoma` or `14.6`.
        name: String,
        #[arg(long)]
        version: Option<String>,
        #[arg(long, default_value = DEFAULT_DOWNLOAD_DIR)]
        output_dir: PathBuf,
        /// Only report the size mist lists for the installer.
        #[arg(long)]
        size_only: bool,
    },
    /// Print a fresh confirmation token.
    Token,
    /// Show or change stored preferences.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    #[arg(long = "path")]
    paths: Vec<PathBuf>,
    /// Perform the operations instead of only printing the plan.
    #[arg(long)]
    execute: bool,
    #[arg(long)]
    force: bool,
    /// Confirmation token from `multiboot token`.
    #[arg(long)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    /// Buffer in GB for versions missing from the catalog.
    SetBuffer { gb: f64 },
    /// Buffer in GB for one OS version.
    SetOverride { version: String, gb: f64 },
    ClearOverride { version: String },
}

fn init_logging(verbose: bool) {
    let filter = match std::env::var("MULTIBOOT_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("info"),
    };
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .event_format(format)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let prefs_path = cli
        .config
        .clone()
        .or_else(default_preferences_path)
        .ok_or_else(|| anyhow!("no config directory, pass --config"))?;
    let mut prefs = Preferences::load(&prefs_path);
    let report_base = cli
        .report_base
        .clone()
        .or_else(|| prefs.report_base.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Command::Scan { paths } => {
            let (installers, partial) = split_partial_downloads(scan_for_installers(&search_roots(paths)));
            for stub in installers.iter().filter(|i| i.status == InstallerStatus::Stub) {
                info!(
                    installer = %stub.name,
                    "stub installer, fetch the full one with `multiboot download {}`",
                    resolve_os_name(&stub.version, Some(&stub.name))
                );
            }
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                "installers": installers,
                "partial_downloads": partial,
            }))?);
            Ok(())
        }
        Command::Drives => {
            let drives = list_external_drives()?;
            if drives.is_empty() {
                println!("no external drives found");
            }
            for drive in drives {
                println!(
                    "{}  {:.1} GB  {}  {}",
                    drive.id,
                    drive.size_gb(),
                    drive.protocol,
                    drive.media_name
                );
            }
            Ok(())
        }
        Command::Inspect { disk } => {
            let structure = read_drive_structure(&disk)?;
            println!("{}", serde_json::to_string_pretty(&structure)?);
            for partition in &structure.existing_partitions {
                let version = partition
                    .clean_name
                    .as_deref()
                    .and_then(volume_version)
                    .unwrap_or_else(|| "unknown".to_string());
                println!(
                    "{:<10} {:<28} {:>8} MB  version {}",
                    partition.id,
                    partition.volume_name,
                    partition.size_mb(),
                    version
                );
            }
            Ok(())
        }
        Command::Size {
            size_kb,
            version,
            buffer,
        } => {
            let config = prefs.sizing_config();
            let size_mb = required_size_mb_with(&config, size_kb, &version, buffer);
            println!("os: {}", resolve_os_name(&version, None));
            println!("buffer_gb: {}", config.effective_buffer_gb(&version, buffer));
            println!("size_mb: {}", size_mb);
            Ok(())
        }
        Command::Plan { disk_gb, paths } => {
            let installers = usable_installers(paths);
            let layout = plan_fresh_layout(&installers, disk_gb, &prefs.sizing_config())?;
            print_layout(&layout);
            Ok(())
        }
        Command::Create { disk, run } => {
            let mut ops = prepare_device(&run)?;
            let params = CreateParams {
                disk_id: disk,
                installers: scan_for_installers(&search_roots(run.paths.clone())),
                total_device_gb: None,
                sizing: prefs.sizing_config(),
                report_base,
                host: Some(host_info()),
                force: run.force,
                confirmation_token: run.token.clone(),
                dry_run: !run.execute,
            };
            let result = run_create(&params, &mut ops)?;
            print_layout(&result.layout);
            println!("report: {}", result.report.root.display());
            remember_mode(&mut prefs, &prefs_path, WorkflowMode::Create);
            finish_batch(&result.outcomes, result.dry_run)
        }
        Command::Update { disk, run } => {
            let mut ops = prepare_device(&run)?;
            let params = UpdateParams {
                disk_id: disk,
                installers: scan_for_installers(&search_roots(run.paths.clone())),
                sizing: prefs.sizing_config(),
                report_base,
                host: Some(host_info()),
                force: run.force,
                confirmation_token: run.token.clone(),
                dry_run: !run.execute,
            };
            let result = run_update(&params, &mut ops)?;
            print_update_plan(&result.plan);
            println!("report: {}", result.report.root.display());
            remember_mode(&mut prefs, &prefs_path, WorkflowMode::Update);
            finish_batch(&result.outcomes, result.dry_run)
        }
        Command::Download {
            name,
            version,
            output_dir,
            size_only,
        } => {
            if !mist_available() {
                return Err(anyhow!("mist not found, install it with `brew install mist`"));
            }
            let search = version.as_deref().unwrap_or(&name);
            match installer_size_bytes(search) {
                Ok(Some(bytes)) => println!("size: {:.1} GB", bytes as f64 / (1024.0 * BYTES_PER_MB as f64)),
                Ok(None) => println!("size: unknown"),
                Err(err) => warn!(error = %err, "could not query installer size"),
            }
            if size_only {
                return Ok(());
            }
            info!(name = %name, "download started, this usually takes 20 to 40 minutes");
            download_installer(&name, version.as_deref(), &output_dir)?;
            println!("downloaded {} into {}", name, output_dir.display());
            Ok(())
        }
        Command::Token => {
            println!("{}", require_confirmation_token());
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => {}
                ConfigAction::SetBuffer { gb } => {
                    prefs.set_default_buffer(gb)?;
                    prefs.save(&prefs_path)?;
                }
                ConfigAction::SetOverride { version, gb } => {
                    let key = prefs.set_override(&version, gb)?;
                    prefs.save(&prefs_path)?;
                    info!(key = %key, gb, "override stored");
                }
                ConfigAction::ClearOverride { version } => {
                    if prefs.clear_override(&version).is_none() {
                        warn!(version = %version, "no override stored");
                    }
                    prefs.save(&prefs_path)?;
                }
            }
            println!("path: {}", prefs_path.display());
            println!("{}", serde_json::to_string_pretty(&prefs)?);
            Ok(())
        }
    }
}

fn search_roots(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.is_empty() {
        default_search_paths()
    } else {
        paths
    }
}

/// Bundles first, then `.app.download` and Mist folders.
fn split_partial_downloads(
    scanned: Vec<InstallerDescriptor>,
) -> (Vec<InstallerDescriptor>, Vec<InstallerDescriptor>) {
    scanned.into_iter().partition(|installer| {
        !matches!(
            installer.status,
            InstallerStatus::Partial | InstallerStatus::Downloading
        )
    })
}

fn usable_installers(paths: Vec<PathBuf>) -> Vec<InstallerDescriptor> {
    let (usable, excluded) = partition_by_usability(scan_for_installers(&search_roots(paths)));
    for entry in excluded {
        warn!(installer = %entry.installer.name, reason = %entry.reason, "skipping");
    }
    usable
}

/// Read-only runs only need `diskutil`; executing also needs root.
fn prepare_device(run: &RunArgs) -> Result<MacDisk> {
    let dependencies = check_dependencies();
    dependencies.ensure_required()?;
    if run.execute {
        require_root()?;
        for tool in dependencies.missing_optional() {
            warn!(tool, "optional tool not found");
        }
    }
    Ok(MacDisk::new(&dependencies))
}

fn remember_mode(prefs: &mut Preferences, path: &Path, mode: WorkflowMode) {
    prefs.last_mode = Some(mode);
    if let Err(err) = prefs.save(path) {
        warn!(path = %path.display(), error = %err, "could not save preferences");
    }
}

fn print_layout(layout: &FreshLayout) {
    for entry in &layout.entries {
        let [fs, name, size] = entry.diskutil_triple();
        println!("{:<8} {:<28} {}", fs, name, size);
    }
    println!(
        "capacity_mb: {}  consumed_mb: {}  remainder_mb: {}",
        layout.capacity_mb, layout.consumed_mb, layout.remainder_mb
    );
}

fn print_update_plan(plan: &UpdatePlan) {
    for step in &plan.steps {
        match &step.result {
            Ok(action) => println!(
                "{:<28} {:<22} {} MB",
                step.volume_name,
                action.kind(),
                step.required_mb
            ),
            Err(err) => println!("{:<28} rejected: {}", step.volume_name, err),
        }
    }
}

fn finish_batch(outcomes: &[InstallerOutcome], dry_run: bool) -> Result<()> {
    if dry_run {
        println!("dry run, pass --execute --force --token <token> to apply");
        return Ok(());
    }
    for outcome in outcomes {
        println!("{}", outcome.log_line());
    }
    let failed = outcomes.iter().filter(|outcome| !outcome.succeeded()).count();
    if failed > 0 {
        return Err(anyhow!("{} of {} installers failed", failed, outcomes.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn create_defaults_to_dry_run() {
        let cli = Cli::parse_from(["multiboot", "create", "disk4", "--path", "/tmp/apps"]);
        match cli.command {
            Command::Create { disk, run } => {
                assert_eq!(disk, "disk4");
                assert!(!run.execute);
                assert_eq!(run.paths, vec![PathBuf::from("/tmp/apps")]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn partial_downloads_listed_once() {
        let scanned = vec![
            InstallerDescriptor::new("Install macOS Sonoma.app", "14.6.1", 13_000_000)
                .with_status(InstallerStatus::Full),
            InstallerDescriptor::new("Install macOS Sequoia.app", "Partial", 0)
                .with_status(InstallerStatus::Partial),
            InstallerDescriptor::new("Mist Download: abc", "In Progress", 0)
                .with_status(InstallerStatus::Downloading),
            InstallerDescriptor::new("Install macOS Ventura.app", "13.6.7", 0)
                .with_status(InstallerStatus::Stub),
        ];
        let (installers, partial) = split_partial_downloads(scanned);
        let names: Vec<&str> = installers.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Install macOS Sonoma.app", "Install macOS Ventura.app"]);
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn download_defaults_to_applications() {
        let cli = Cli::parse_from(["multiboot", "download", "Sonoma", "--version", "14.6.1"]);
        match cli.command {
            Command::Download {
                name,
                version,
                output_dir,
                size_only,
            } => {
                assert_eq!(name, "Sonoma");
                assert_eq!(version.as_deref(), Some("14.6.1"));
                assert_eq!(output_dir, PathBuf::from("/Applications"));
                assert!(!size_only);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["multiboot", "token", "--verbose", "--report-base", "/tmp/r"]);
        assert!(cli.verbose);
        assert_eq!(cli.report_base, Some(PathBuf::from("/tmp/r")));
    }
}
