use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use godocs::config::{self, Config};
use godocs::store::{Repository, SqliteStore};

#[derive(Parser)]
#[command(name = "godocs")]
#[command(version, about = "Documentation server for Go packages")]
struct Cli {
    /// JSON config file
    #[arg(long, env = "GODOCS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "GODOCS_LISTEN")]
    listen: Option<String>,

    /// SQLite database; without one, packages are parsed on every request
    #[arg(long, env = "GODOCS_DATABASE")]
    database: Option<PathBuf>,

    /// Module proxy URL
    #[arg(long, env = "GODOCS_PROXY")]
    proxy: Option<String>,

    /// Default platform, as goos/goarch
    #[arg(long)]
    platform: Option<String>,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, env = "GODOCS_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Block a module or package path prefix from being fetched or served
    Block {
        /// Import path prefix
        path: String,
    },
}

impl Cli {
    fn into_config(self) -> anyhow::Result<(Config, Option<Command>)> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(database) = self.database {
            config.database = Some(database);
        }
        if let Some(proxy) = self.proxy {
            config.proxy_url = Some(proxy);
        }
        if let Some(platform) = self.platform {
            config.default_platform = platform;
        }
        if let Some(log_file) = self.log_file {
            config.log_file = Some(log_file);
        }
        Ok((config, self.command))
    }
}

fn block(config: &Config, path: &str) -> anyhow::Result<()> {
    let db_path = config.database.clone().unwrap_or_else(config::db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    store.block(path)?;
    tracing::info!("Blocked {}", path);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let (config, command) = Cli::parse().into_config()?;

    let _guard = godocs::logging::init(config.log_file.as_deref())?;
    godocs::logging::install_panic_hook();

    match command {
        Some(Command::Block { path }) => block(&config, &path),
        None => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(godocs::server::run(config))
            .context("server failed"),
    }
}
