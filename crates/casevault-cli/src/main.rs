//! CaseVault - forensic-grade backup of case files
//!
//! Backs up case directories with per-file copy counts, verifies every copy by
//! checksum and resumes interrupted transfers from the last persisted chunk.

mod display;
mod json_output;
mod progress;

use anyhow::{Context, Result};
use casevault_config::{Config, ConfigLoader};
use casevault_engine::{
    BackupService, BroadcastSink, FanoutSink, PolicyKey, ServiceBuilder, TracingSink,
};
use casevault_store::{MemoryStore, SharedStore};
use casevault_types::{BackupMode, BackupTask, TaskId};
use clap::{Parser, Subcommand};
use console::style;
use json_output::OutputMode;
use progress::TaskProgressBar;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for waiting on a backup in the foreground
const WAIT_LIMIT: Duration = Duration::from_secs(30 * 24 * 3600);

/// CaseVault - forensic-grade backup of case files
#[derive(Parser)]
#[command(
    name = "casevault",
    version = env!("CARGO_PKG_VERSION"),
    about = "Forensic-grade backup of case files",
    long_about = "CaseVault copies case files to managed disks, two copies for sensitive files\n\
                  and one for cold data, verifies every copy by SHA-256 and resumes\n\
                  interrupted transfers where they stopped."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a file or directory
    Backup {
        /// Source path
        source: PathBuf,
        /// Destination disk id
        #[arg(long)]
        disk: String,
        /// Directory below the disk mount point
        #[arg(long, default_value = "")]
        target: String,
        /// Delete each source file once all its copies verify
        #[arg(long = "move")]
        move_source: bool,
    },
    /// Continue a paused backup
    Resume {
        /// Task id
        task_id: TaskId,
    },
    /// Stop a backup and delete what it wrote
    Cancel {
        /// Task id
        task_id: TaskId,
    },
    /// Show progress of one task, or list all tasks
    Progress {
        /// Task id
        task_id: Option<TaskId>,
    },
    /// Report how a path would be backed up
    Classify {
        /// File or directory
        path: PathBuf,
    },
    /// Find copies by file name or target path
    Search {
        /// Substring to look for
        keyword: String,
    },
    /// Manage backup disks
    Disk {
        #[command(subcommand)]
        command: DiskCommand,
    },
    /// Read or change policy settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum DiskCommand {
    /// Register a local disk
    InitLocal {
        /// Serial number
        #[arg(long)]
        serial: String,
        /// Capacity, e.g. 4T or 500G
        #[arg(long, value_parser = display::parse_size)]
        capacity: u64,
    },
    /// Register an SMB share
    InitRemote {
        /// Share URL, e.g. smb://nas/evidence
        #[arg(long)]
        url: String,
        /// User name, optionally DOMAIN\user
        #[arg(long)]
        username: String,
        /// Serial number to track the share by
        #[arg(long)]
        serial: String,
        /// Password; prompted for when omitted
        #[arg(long, env = "CASEVAULT_SMB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Detect local volumes and refresh SMB shares
    Scan,
    /// List known disks
    List,
    /// Flag disks below the migration threshold
    Check,
    /// Move one disk's data onto another
    Migrate {
        /// Disk to retire
        #[arg(long)]
        from: String,
        /// Disk receiving the data
        #[arg(long)]
        to: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Show policy values
    Get {
        /// Keys to show; all policy keys when empty
        keys: Vec<String>,
    },
    /// Set a policy value
    Set {
        /// Key
        key: String,
        /// Value
        value: String,
    },
    /// Show the engine configuration
    Show,
    /// Write a default engine configuration file
    Init {
        /// Destination, format chosen by extension
        #[arg(default_value = "casevault.yaml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = ConfigLoader::load(cli.config.as_deref()).context("cannot load configuration")?;
    init_logging(&config, cli.debug, cli.quiet, cli.verbose)?;
    info!("CaseVault v{} starting", env!("CARGO_PKG_VERSION"));

    if let Commands::Config {
        command: ConfigCommand::Show,
    } = &cli.command
    {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(true);
    }
    if let Commands::Config {
        command: ConfigCommand::Init { path },
    } = &cli.command
    {
        ConfigLoader::generate_default_config(path)?;
        println!("{} Wrote {}", style("✓").green(), path.display());
        return Ok(true);
    }

    let state_file = config.storage.state_file.clone();
    let store = Arc::new(MemoryStore::load(&state_file).await?);
    let events = BroadcastSink::default();
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(events.clone()));
    let service = ServiceBuilder::new()
        .with_config(config)
        .with_store(Arc::clone(&store) as SharedStore)
        .with_sink(Arc::new(sink))
        .build()?;

    for task_id in service.recover_interrupted().await? {
        warn!("Task {} can be resumed with `casevault resume {}`", task_id, task_id);
    }

    let context = CommandContext {
        service: &service,
        events: &events,
        output: OutputMode::from_flag(cli.json),
        quiet: cli.quiet,
    };
    let outcome = context.execute(cli.command).await;

    store
        .save(&state_file)
        .await
        .with_context(|| format!("cannot save state to {}", state_file.display()))?;
    outcome
}

fn init_logging(config: &Config, debug: bool, quiet: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        config.logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);
    if config.logging.json_format {
        builder.json().init();
    } else {
        builder.with_ansi(config.logging.colored_output).init();
    }

    Ok(())
}

struct CommandContext<'a> {
    service: &'a BackupService,
    events: &'a BroadcastSink,
    output: OutputMode,
    quiet: bool,
}

impl CommandContext<'_> {
    async fn execute(&self, command: Commands) -> Result<bool> {
        let service = self.service;
        match command {
            Commands::Backup {
                source,
                disk,
                target,
                move_source,
            } => {
                let mode = if move_source {
                    BackupMode::Move
                } else {
                    BackupMode::Copy
                };
                if self.output.is_human() && !self.quiet {
                    println!(
                        "{} Backing up {} to {}",
                        style("→").green().bold(),
                        style(source.display()).cyan(),
                        style(&disk).cyan()
                    );
                }
                let result = match service.start_backup(&source, &disk, &target, mode).await {
                    Ok(task_id) => self.attach(task_id).await,
                    Err(e) => Err(e),
                };
                self.output
                    .emit(result, "backup finished", display::print_task)
            }
            Commands::Resume { task_id } => {
                let result = match service.resume(task_id).await {
                    Ok(_) => self.attach(task_id).await,
                    Err(e) => Err(e),
                };
                self.output
                    .emit(result, "backup finished", display::print_task)
            }
            Commands::Cancel { task_id } => self.output.emit(
                service.cancel(task_id).await,
                "task canceled",
                display::print_task,
            ),
            Commands::Progress { task_id: Some(task_id) } => self.output.emit(
                service.get_progress(task_id).await,
                "progress",
                display::print_progress,
            ),
            Commands::Progress { task_id: None } => self.output.emit(
                service.list_tasks().await,
                "tasks",
                |tasks| display::print_tasks(tasks),
            ),
            Commands::Classify { path } => {
                let result = service.classify(&path).await;
                let auto_task = result.as_ref().ok().and_then(|r| r.auto_backup_task);
                let ok = self.output.emit(
                    result,
                    "classified",
                    display::print_classification,
                )?;
                if let Some(task_id) = auto_task {
                    let task = self.attach(task_id).await?;
                    if self.output.is_human() {
                        display::print_task(&task);
                    }
                }
                Ok(ok)
            }
            Commands::Search { keyword } => self.output.emit(
                service.search(&keyword).await,
                "search results",
                |logs| display::print_logs(logs),
            ),
            Commands::Disk { command } => self.execute_disk(command).await,
            Commands::Config { command } => self.execute_config(command).await,
        }
    }

    async fn execute_disk(&self, command: DiskCommand) -> Result<bool> {
        let service = self.service;
        match command {
            DiskCommand::InitLocal { serial, capacity } => self.output.emit(
                service.initialize_local_disk(&serial, capacity).await,
                "disk initialized",
                |disk| display::print_disks(std::slice::from_ref(disk)),
            ),
            DiskCommand::InitRemote {
                url,
                username,
                serial,
                password,
            } => {
                let password = match password {
                    Some(password) => password,
                    None => dialoguer::Password::new()
                        .with_prompt(format!("Password for {} on {}", username, url))
                        .interact()
                        .context("cannot read password")?,
                };
                self.output.emit(
                    service
                        .initialize_remote_disk(&url, &username, &password, &serial)
                        .await,
                    "share registered",
                    |disk| display::print_disks(std::slice::from_ref(disk)),
                )
            }
            DiskCommand::Scan => self.output.emit(
                service.scan_disks().await,
                "disks scanned",
                |disks| display::print_disks(disks),
            ),
            DiskCommand::List => self.output.emit(
                service.list_disks().await,
                "disks",
                |disks| display::print_disks(disks),
            ),
            DiskCommand::Check => self.output.emit(
                service.check_disks().await,
                "disks below the migration threshold",
                |disks| {
                    if disks.is_empty() {
                        println!(
                            "{} Every disk is above the migration threshold",
                            style("✓").green()
                        );
                    } else {
                        display::print_disks(disks);
                    }
                },
            ),
            DiskCommand::Migrate { from, to } => self.output.emit(
                service.migrate(&from, &to).await,
                "migration finished",
                display::print_migration,
            ),
        }
    }

    async fn execute_config(&self, command: ConfigCommand) -> Result<bool> {
        let service = self.service;
        match command {
            ConfigCommand::Get { keys } => {
                let keys = if keys.is_empty() {
                    PolicyKey::ALL.iter().map(|k| k.as_str().to_string()).collect()
                } else {
                    keys
                };
                self.output.emit(
                    service.get_config(&keys).await,
                    "config values",
                    display::print_config_values,
                )
            }
            ConfigCommand::Set { key, value } => self.output.emit(
                service.update_config(&key, &value).await,
                "config updated",
                |entry| println!("{} {} = {}", style("✓").green(), entry.key, entry.value),
            ),
            ConfigCommand::Show | ConfigCommand::Init { .. } => Ok(true),
        }
    }

    /// Follow a task in the foreground; Ctrl-C pauses it
    async fn attach(&self, task_id: TaskId) -> casevault_types::Result<BackupTask> {
        let tracker = TaskProgressBar::new(self.quiet || !self.output.is_human());
        let watcher = tracker.watch(task_id, self.events.subscribe());

        let task = tokio::select! {
            task = self.service.wait_for_task(task_id, WAIT_LIMIT) => task,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} Pausing task {}...", style("⏸").yellow(), task_id);
                if let Err(e) = self.service.pause(task_id).await {
                    warn!("Cannot pause task {}: {}", task_id, e);
                }
                self.service.wait_for_task(task_id, WAIT_LIMIT).await
            }
        };

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Ok(task) = &task {
            tracker.finish(task);
        }
        task
    }
}
