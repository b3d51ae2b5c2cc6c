//! clipper-merge
//!
//! Runs one account merge against the platform database and prints the
//! result as JSON.
//!
//! ```text
//! clipper-merge [--env dev] --source <uuid> --destination <uuid>
//! clipper-merge [--env dev] --check
//! ```

use anyhow::{Context, bail};

use clipper_merge::config::AppConfig;
use clipper_merge::db::Database;
use clipper_merge::logging::init_logging;
use clipper_merge::{AccountId, AccountMergeService, MergeResult};

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.iter().any(|n| *n == args[i]) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn check_only() -> bool {
    std::env::args().any(|a| a == "--check")
}

fn account_arg(name: &str) -> anyhow::Result<AccountId> {
    let Some(value) = get_arg(&[name]) else {
        bail!("missing required argument {} <uuid>", name);
    };
    value
        .parse()
        .with_context(|| format!("invalid account id for {}: {}", name, value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let log_guard = init_logging(&config);

    tracing::info!("Starting clipper-merge in {} mode", env);

    let url = config
        .postgres_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("postgres_url is not configured and DATABASE_URL is not set")?;
    let db = Database::connect(&url, &config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if check_only() {
        db.health_check().await.context("Database health check failed")?;
        println!("ok");
        return Ok(());
    }

    let source = account_arg("--source")?;
    let destination = account_arg("--destination")?;

    let service = AccountMergeService::postgres(&db, config.merge.clone());
    match service.merge_accounts(source, destination).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&MergeResult::failed(&e))?);
            eprintln!("merge failed [{}]: {}", e.code(), e);
            drop(log_guard);
            std::process::exit(1);
        }
    }
}
