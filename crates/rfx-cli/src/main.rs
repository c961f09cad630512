//! 🚀 rfx — the front door of refill.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! Parse the flags, set up logging, load the config, hand it to the library,
//! print the summary, pick an exit code. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rfx::errors::FatalError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 🚰 Replace a target collection with a fresh, complete copy of the source.
#[derive(Parser, Debug)]
#[command(name = "rfx", version)]
#[command(about = "Full-replace bulk loader: page the source, transform, refill the target", long_about = None)]
struct Args {
    /// TOML config file. Skipped if it doesn't exist, so env vars (RFX_*) can do all the work.
    #[arg(default_value = "rfx.toml", env = "RFX_CONFIG")]
    config: PathBuf,

    /// Records per source page.
    #[arg(long)]
    page_size: Option<usize>,

    /// Target collection to replace (Valkey hash key, Elasticsearch index).
    #[arg(long, visible_aliases = ["index", "hash-key"])]
    collection: Option<String>,

    /// Keep the terminal quiet: no progress bar, just logs.
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG wins; otherwise info, because a refill with no logs is a leap of faith
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match refill(args).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("💀 error: {err}");
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut smells_like_a_network_problem = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {cause}");
                let cause = cause.to_string();
                if cause.contains("error sending request")
                    || cause.contains("onnection refused")
                    || cause.contains("tcp connect error")
                    || cause.contains("dns error")
                {
                    smells_like_a_network_problem = true;
                }
            }

            let fatal = FatalError::classify(&err);
            if smells_like_a_network_problem || matches!(fatal, Some(FatalError::Connectivity(_))) {
                error!(
                    "🔧 hint: looks like a service isn't reachable. \
                    Double-check that PostgreSQL / Valkey / Elasticsearch is actually running. \
                    If you're using Docker, `docker ps` to see what's up, or \
                    `docker compose up -d` to resurrect it. ☕"
                );
            }

            // 🚪 2 config, 3 unreachable, 4 couldn't clear, 1 everything else
            std::process::exit(fatal.map(FatalError::exit_code).unwrap_or(1));
        }
    }
}

async fn refill(args: Args) -> Result<()> {
    // 🔒 a missing file is fine (env-only runs); a file we can't even stat is not
    let config_file = match args.config.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the config file exists: '{}'. \
             If it's a relative path, try an absolute one.",
            args.config.display()
        )
    })? {
        true => Some(args.config.as_path()),
        false => {
            info!(
                "📭 No config file at '{}'; reading RFX_* environment variables only",
                args.config.display()
            );
            None
        }
    };

    let mut app_config = rfx::app_config::load_config(config_file)
        .context("💀 rfx couldn't load its configuration. Check the file and the RFX_* variables.")?;

    if let Some(page_size) = args.page_size {
        app_config.runtime.page_size = page_size;
    }
    if let Some(collection) = args.collection {
        app_config.sink_config.set_collection_name(collection);
    }
    if args.no_progress {
        app_config.runtime.show_progress_bar = false;
    }

    let report = rfx::run(app_config).await?;

    println!("{}", report.render());
    if !report.verification.matched() {
        // ⚠️ still exit 0: the data landed, the numbers just don't agree
        warn!("⚠️ The target count doesn't match what we wrote; see the summary above");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn the_one_where_the_config_path_env_var_shares_the_rfx_prefix() {
        let command = Args::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .expect("💀 the config arg went missing");
        assert_eq!(config.get_env().and_then(|env| env.to_str()), Some("RFX_CONFIG"));
    }

    #[test]
    fn the_one_where_no_flags_means_rfx_toml_and_no_overrides() {
        let args = Args::try_parse_from(["rfx"]).expect("💀 bare rfx should parse");
        assert_eq!(args.page_size, None);
        assert_eq!(args.collection, None);
        assert!(!args.no_progress);

        let args = Args::try_parse_from(["rfx", "custom.toml", "--hash-key", "users:auth:v3"])
            .expect("💀 the hash-key alias should parse");
        assert_eq!(args.config, PathBuf::from("custom.toml"));
        assert_eq!(args.collection.as_deref(), Some("users:auth:v3"));
    }
}
