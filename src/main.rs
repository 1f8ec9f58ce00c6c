use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::error;

use axwatch::config::RunConfig;
use axwatch::orchestrator;

#[derive(Parser, Debug)]
#[command(
    name = "axwatch",
    version,
    about = "Log accessibility-tree text and structure changes to SQLite"
)]
struct Cli {
    /// Database file to record captures into
    #[arg(long)]
    db: Option<PathBuf>,

    /// Perform a single tree scan and exit
    #[arg(long)]
    once: bool,

    /// Persist text bodies; without this flag only hashes and metadata are
    /// stored
    #[arg(long)]
    capture_content: bool,

    /// Rescan interval in seconds
    #[arg(long, default_value_t = 0.5)]
    interval: f64,

    /// Seconds to wait for the accessibility bus before giving up
    #[arg(long, default_value_t = 10.0)]
    wait_for_bus: f64,

    /// Limit capture to these application names (repeatable)
    #[arg(long = "include", value_name = "APP")]
    include_apps: Vec<String>,

    /// Skip these application names (repeatable)
    #[arg(long = "exclude", value_name = "APP")]
    exclude_apps: Vec<String>,

    /// Limit capture to these widget roles (repeatable)
    #[arg(long = "include-role", value_name = "ROLE")]
    include_roles: Vec<String>,

    /// Skip these widget roles (repeatable)
    #[arg(long = "exclude-role", value_name = "ROLE")]
    exclude_roles: Vec<String>,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            db_path: self.db.unwrap_or_else(default_db_path),
            once: self.once,
            capture_content: self.capture_content,
            include_apps: self.include_apps,
            exclude_apps: self.exclude_apps,
            include_roles: self.include_roles,
            exclude_roles: self.exclude_roles,
            scan_interval: Duration::from_secs_f64(self.interval.max(0.0)),
            bus_timeout: Duration::from_secs_f64(self.wait_for_bus.max(0.0)),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("axwatch").join("axwatch.sqlite3"))
        .unwrap_or_else(|| PathBuf::from("axwatch.sqlite3"))
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Cli::parse().into_config();

    if let Err(err) = orchestrator::run(config).await {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}
