//! Review server commands: `interna-review serve` and `interna-review init-db`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use interna_review::config::ReviewConfig;
use interna_review::review::db::ReviewDb;

/// Flags that take precedence over file and environment configuration.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
}

/// Layer CLI flags on top of the loaded config. Relative paths resolve
/// against the project directory.
fn resolve_config(project_dir: &Path, overrides: ServeOverrides) -> Result<ReviewConfig> {
    let mut config = ReviewConfig::load(project_dir)?;
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(host) = overrides.host {
        config.server.host = host;
    }
    if let Some(path) = overrides.db_path {
        config.database.path = path;
    }

    if config.database.path.is_relative() {
        config.database.path = project_dir.join(&config.database.path);
    }
    if let Some(dir) = config.review.report_dir.as_mut() {
        if dir.is_relative() {
            *dir = project_dir.join(&*dir);
        }
    }
    Ok(config)
}

pub async fn cmd_serve(project_dir: &Path, overrides: ServeOverrides, dev: bool) -> Result<()> {
    let config = resolve_config(project_dir, overrides)?;
    interna_review::review::server::start_server(config, dev).await
}

pub fn cmd_init_db(project_dir: &Path, db_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(
        project_dir,
        ServeOverrides {
            db_path: db_path.map(Path::to_path_buf),
            ..ServeOverrides::default()
        },
    )?;
    ReviewDb::new(&config.database.path)?;
    println!(
        "Review database initialized at {}",
        config.database.path.display()
    );
    Ok(())
}
