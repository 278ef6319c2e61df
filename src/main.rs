use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod config;
mod db;
mod mailer;
mod models;
mod reminder;

use crate::config::Config;
use crate::mailer::RelayMailer;
use crate::reminder::{ReminderOutcome, ReminderWorkflow};

#[derive(Parser)]
#[command(name = "procedure-control")]
#[command(about = "Procedure log with a daily missing-entry reminder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Insert the default procedure types
    Seed,
    /// Create a login
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Send today's reminder if nothing was logged and none was sent yet
    Remind,
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let database_url = config::database_url()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} procedure types.");
        }
        Commands::AddUser {
            name,
            email,
            password,
        } => {
            let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password))
                .await
                .context("password hashing task failed")?;
            let user = db::insert_user(&pool, name.trim(), email.trim(), &hash).await?;
            println!("Created user {} <{}> ({}).", user.name, user.email, user.id);
        }
        Commands::Remind => {
            let workflow = build_workflow(&pool, &Config::from_env()?)?;
            let outcome = workflow.decide_and_send(chrono::Utc::now()).await;
            let report = outcome.report();
            println!("{}", serde_json::to_string(&report)?);
            if outcome == ReminderOutcome::InternalError {
                anyhow::bail!("reminder check failed; see logs");
            }
        }
        Commands::Serve { bind } => {
            let app_config = Config::from_env()?;
            if app_config.cron_secret.is_none() {
                tracing::warn!("CRON_SECRET is not set; scheduled reminder calls will be rejected");
            }
            let workflow = build_workflow(&pool, &app_config)?;
            let state = api::AppState::new(pool, Arc::new(workflow), app_config.cron_secret);
            let app = api::api_router(state);

            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            tracing::info!(%bind, version = config::APP_VERSION, "procedure-control listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("server error")?;
        }
    }

    Ok(())
}

fn build_workflow(pool: &PgPool, config: &Config) -> anyhow::Result<ReminderWorkflow> {
    let mailer = RelayMailer::new(config.relay.clone()).context("failed to build mail client")?;
    Ok(ReminderWorkflow::new(
        Arc::new(db::PgReminderStore::new(pool.clone())),
        Arc::new(mailer),
        config.reminder.clone(),
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
