use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod cli;
mod config;
mod eid;
mod lock;
mod reconcile;
mod storage;
mod tags;
#[cfg(test)]
mod tests;
mod web;

use app::{AppBackend, AppFactory};
use config::Config;

/// Splits comma-separated tag lists. Case and inner whitespace are kept,
/// blank entries dropped.
pub fn parse_tags<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.as_ref().split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let paths = AppFactory::get_paths()?;

    match args.command {
        cli::Command::Daemon { addr } => {
            let config = Config::load_with(&paths.base_path)?;
            let addr = addr.unwrap_or_else(|| config.listen_addr.clone());
            let app = AppFactory::create_local_app(&paths, &config)?;
            web::start_daemon(app, &addr)
        }

        cli::Command::Reconcile { tags } => {
            let backend = AppFactory::create_backend(&paths)?;
            let result = backend.reconcile(parse_tags(&tags))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        cli::Command::Tags {} => {
            let tags = AppFactory::list_tags(&paths)?;
            println!("{}", serde_json::to_string_pretty(&tags)?);
            Ok(())
        }

        cli::Command::Similarity { a, b } => {
            let config = Config::load_with(&paths.base_path)?;
            let app = AppFactory::create_local_app(&paths, &config)?;
            let score = app.similarity(&a, &b)?;
            let verdict = if score >= app.threshold() {
                "merge"
            } else {
                "distinct"
            };
            println!("{score:.4} ({verdict} at threshold {})", app.threshold());
            Ok(())
        }
    }
}
