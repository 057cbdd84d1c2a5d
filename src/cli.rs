// XBake CLI binary

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use xbake_lib::config::{self, Config};
use xbake_lib::coordinator::{self, Coordinator, SubmitStatus};
use xbake_lib::db;
use xbake_lib::jobs::worker::run_worker_process;
use xbake_lib::queue::sqlite::SqliteListStore;
use xbake_lib::queue::{Envelope, JobQueue, QueueName};
use xbake_lib::store::sqlite::SqliteMetadataStore;
use xbake_lib::supervisor::{ProcessSupervisor, Supervisor};
use xbake_lib::tools;

const SUPERVISE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "xbake")]
#[command(about = "XBake - transfer and transcode queue runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ./xbake.toml, ~/.xbake/xbake.toml, /etc/xbake.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master: start one queue runner per queue and supervise them
    Serve,

    /// Run a single queue runner (started by `serve`)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        queue: QueueName,
        /// Process to watch; the runner exits once it is gone
        #[arg(long)]
        parent_pid: u32,
    },

    /// Submit a scan result (JSON file, or - for stdin)
    Submit {
        payload: PathBuf,
    },

    /// Queue a single file id
    Enqueue {
        #[arg(long)]
        fid: String,
        #[arg(long, default_value = "transfer")]
        queue: QueueName,
    },

    /// Show pending and in-progress list lengths
    Queues,

    /// Move abandoned in-progress jobs back to pending
    Recover {
        #[arg(long)]
        queue: QueueName,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config_path, config) = config::load(cli.config.as_deref())?;
    init_logging(&config, cli.verbose);
    log::debug!("Using {}", config::source_description(config_path.as_deref()));

    match cli.command {
        Commands::Serve => cmd_serve(config_path, &config, cli.verbose),
        Commands::Worker { queue, parent_pid } => {
            run_worker_process(&config, queue, parent_pid)?;
            Ok(())
        }
        Commands::Submit { payload } => cmd_submit(&config, &payload),
        Commands::Enqueue { fid, queue } => cmd_enqueue(&config, &fid, queue),
        Commands::Queues => cmd_queues(&config),
        Commands::Recover { queue } => cmd_recover(&config, queue),
    }
}

/// Level comes from the config unless -v is given; RUST_LOG overrides both
fn init_logging(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => config.log_level(),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn open_stores(config: &Config) -> Result<(JobQueue, Arc<SqliteMetadataStore>)> {
    let db_path = config::expand_tilde(&config.database.path);
    let conn = db::open_shared(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let lists = Arc::new(SqliteListStore::new(conn.clone()));
    let queue = JobQueue::new(lists, config.database.prefix.clone());
    Ok((queue, Arc::new(SqliteMetadataStore::new(conn))))
}

fn cmd_serve(config_path: Option<PathBuf>, config: &Config, verbose: u8) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    log::info!("XBake master starting on {} (pid {})", host, std::process::id());
    for tool in ["scp", "ffmpeg"] {
        if !tools::is_tool_available(tool) {
            log::warn!("{} not found; jobs that need it will fail", tool);
        }
    }

    let pidfile = config::expand_tilde(&config.srv.pidfile);
    write_pidfile(&pidfile)?;

    let (queue, store) = open_stores(config)?;
    let supervisor = ProcessSupervisor::new(config_path, verbose)?;
    let mut coord = Coordinator::new(supervisor, queue, store);
    coord.start_workers()?;

    let result = supervise(&mut coord);
    if let Err(e) = &result {
        log::error!("Supervisor stopped: {:#}", e);
    }
    coord.shutdown()?;
    if let Err(e) = std::fs::remove_file(&pidfile) {
        log::warn!("Failed to remove pidfile {}: {}", pidfile.display(), e);
    }
    result
}

/// Restart any queue runner that has exited
fn supervise<S: Supervisor>(coord: &mut Coordinator<S>) -> Result<()> {
    loop {
        std::thread::sleep(SUPERVISE_INTERVAL);
        let running = coord.supervisor_mut().running();
        for queue in QueueName::ALL {
            if !running.contains(&queue) {
                log::warn!("Queue runner for {} is gone, restarting", queue);
                coord.supervisor_mut().spawn(queue)?;
            }
        }
    }
}

fn write_pidfile(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("Failed to write pidfile {}", path.display()))?;
    log::debug!("Wrote pidfile {}", path.display());
    Ok(())
}

fn cmd_submit(config: &Config, payload_path: &Path) -> Result<()> {
    let raw = if payload_path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(payload_path)
            .with_context(|| format!("Failed to read {}", payload_path.display()))?
    };
    let payload: serde_json::Value = serde_json::from_str(&raw).context("Payload is not valid JSON")?;

    let (queue, store) = open_stores(config)?;
    let result = coordinator::submit_scan_result(&queue, store.as_ref(), &payload);

    log::info!("{}", result.http_line());
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.status == SubmitStatus::Error {
        bail!("{}", result.message);
    }
    Ok(())
}

fn cmd_enqueue(config: &Config, fid: &str, queue_name: QueueName) -> Result<()> {
    let (queue, _) = open_stores(config)?;
    let job = Envelope::new(fid);
    queue.enqueue(queue_name, &job)?;
    println!("Queued job {} for file {} on {}", job.id, fid, queue_name);
    Ok(())
}

fn cmd_queues(config: &Config) -> Result<()> {
    let (queue, _) = open_stores(config)?;

    println!("{:<12}  {:>8}  {:>8}", "Queue", "Pending", "Working");
    println!("{}", "-".repeat(32));
    for name in QueueName::ALL {
        println!(
            "{:<12}  {:>8}  {:>8}",
            name.as_str(),
            queue.pending_len(name)?,
            queue.work_len(name)?
        );
    }
    Ok(())
}

fn cmd_recover(config: &Config, queue_name: QueueName) -> Result<()> {
    let (queue, _) = open_stores(config)?;
    let report = queue.recover_abandoned(queue_name)?;
    println!(
        "{}: {} job(s) requeued, {} discarded",
        queue_name, report.requeued, report.discarded
    );
    Ok(())
}
