use anyhow::{bail, Context};
use clap::Parser;
use pitstop_core::checklist::ChecklistDefinition;
use pitstop_inspection::InspectionService;
use pitstop_storage::EventStores;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

mod routes;

const DEFAULT_ADDR: &str = "127.0.0.1:42080";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_LOG_DIR: &str = ".pitstop/logs";
const LOG_FILE_NAME: &str = "pitstop-hub.log";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    data_dir: PathBuf,
    checklist: Option<PathBuf>,
    debug: bool,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "pitstop-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    data_dir: String,
    /// Checklist definition (JSON). The embedded robot checklist is used
    /// when omitted.
    #[arg(long, default_value = "")]
    checklist: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    if let Err(err) = run(config).await {
        error!(event = "hub_error", error = %format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.addr))?;
    if !addr.ip().is_loopback() {
        bail!("listen address {} is not a loopback address", config.addr);
    }

    let checklist = load_checklist(&config)?;
    if !config.data_dir.is_dir() {
        warn!(event = "data_dir_missing", data_dir = %config.data_dir.display());
    }

    let service = InspectionService::new(EventStores::new(&config.data_dir), Arc::new(checklist));
    let state = routes::AppState::new(service).context("fingerprint checklist")?;
    info!(
        event = "checklist_loaded",
        version = %state.service.checklist().version,
        items = state.service.checklist().items.len(),
        fingerprint = %state.checklist_etag,
    );
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        event = "hub_start",
        addr = %config.addr,
        data_dir = %config.data_dir.display(),
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;
    Ok(())
}

fn load_checklist(config: &Config) -> anyhow::Result<ChecklistDefinition> {
    let Some(path) = &config.checklist else {
        return ChecklistDefinition::builtin().context("embedded checklist");
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read checklist {}", path.display()))?;
    ChecklistDefinition::from_json(&raw).with_context(|| format!("checklist {}", path.display()))
}

fn load_config() -> Config {
    let args = Args::parse();
    let addr = resolve_setting(&args.addr, "PITSTOP_HUB_ADDR")
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let data_dir = resolve_setting(&args.data_dir, "PITSTOP_DATA_DIR")
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let checklist = resolve_setting(&args.checklist, "PITSTOP_CHECKLIST").map(PathBuf::from);
    let log_dir = resolve_setting(&args.log_dir, "PITSTOP_LOG_DIR")
        .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string());
    Config {
        addr,
        data_dir: PathBuf::from(data_dir),
        checklist,
        debug: args.debug || env_true("PITSTOP_HUB_DEBUG"),
        log_dir,
    }
}

/// Flag value first, then the environment; blank counts as unset.
fn resolve_setting(flag: &str, env_key: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    match std::env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("PITSTOP_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

/// Copies every log line to stdout and, when available, the log file.
struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(Ok(mut file)) = self.file.as_ref().map(|file| file.lock()) {
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}
