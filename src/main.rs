use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "interna-review")]
#[command(version, about = "Sandboxed code review with live progress streaming")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write daily-rolling JSON logs into this directory
    #[arg(long, global = true, env = "REVIEW_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the review server
    Serve {
        /// Port to serve on
        #[arg(short, long, env = "REVIEW_PORT")]
        port: Option<u16>,

        /// Address to bind
        #[arg(long, env = "REVIEW_HOST")]
        host: Option<String>,

        /// Database path
        #[arg(long, env = "REVIEW_DB_PATH")]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a local frontend)
        #[arg(long)]
        dev: bool,
    },
    /// Create the review database and exit
    InitDb {
        /// Database path
        #[arg(long, env = "REVIEW_DB_PATH")]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = interna_review::logging::init_logging(
        cli.verbose,
        cli.log_json,
        cli.log_dir.as_deref(),
    );

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            let overrides = cmd::ServeOverrides {
                port: *port,
                host: host.clone(),
                db_path: db_path.clone(),
            };
            cmd::cmd_serve(&project_dir, overrides, *dev).await?;
        }
        Commands::InitDb { db_path } => {
            cmd::cmd_init_db(&project_dir, db_path.as_deref())?;
        }
    }

    Ok(())
}
