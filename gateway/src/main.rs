use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rust_decimal::Decimal;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metergate::cli::{self, Commands, KeyCommands};
use metergate::config::{self, Config, StoreBackend};
use metergate::middleware::session;
use metergate::models::api_key::{generate_token, to_ledger_scale, MAX_BALANCE};
use metergate::store::memory::MemoryStore;
use metergate::store::postgres::PgStore;
use metergate::store::LedgerStore;
use metergate::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(Commands::Serve { port }) => run_server(cfg, port).await,
        None => run_server(cfg, None).await,
        Some(Commands::Migrate) => {
            let db = PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?;
            db.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Some(Commands::Key { command }) => {
            let db = PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?;
            handle_key_command(&db, &cfg, command).await
        }
        Some(Commands::Session { user }) => {
            println!("{}", session::sign(&cfg.session_secret, &user));
            Ok(())
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "metergate=debug,tower_http=debug".into()),
    );
    let json = std::env::var("METERGATE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run_server(cfg: Config, port: Option<u16>) -> anyhow::Result<()> {
    let store: Arc<dyn LedgerStore> = match cfg.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Arc::new(db)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory ledger: balances are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let port = port.unwrap_or(cfg.port);
    let dashboard_origin = cfg.dashboard_origin.clone();
    tracing::info!(unit_price = %cfg.unit_price, trial_balance = %cfg.trial_balance, "pricing loaded");
    let state = Arc::new(AppState::new(cfg, store));

    let app = api::router(state)
        // Restrict CORS to the dashboard origin (plus localhost for dev)
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-payment-token"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metergate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn handle_key_command(db: &PgStore, cfg: &Config, cmd: KeyCommands) -> anyhow::Result<()> {
    match cmd {
        KeyCommands::Create { user, name } => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("key name must not be empty");
            }
            let key = db
                .create_key(&user, name, &generate_token(), cfg.trial_balance)
                .await?;
            println!(
                "Key created:\n  ID:      {}\n  Name:    {}\n  Balance: {}\n  Use:     X-Payment-Token: {}",
                key.id, key.name, key.balance, key.token
            );
        }
        KeyCommands::List { user } => {
            let keys = db.list_by_user(&user).await?;
            if keys.is_empty() {
                println!("No keys found.");
            } else {
                println!("{:<8} {:<24} {:>14} CREATED", "ID", "NAME", "BALANCE");
                for k in keys {
                    println!(
                        "{:<8} {:<24} {:>14} {}",
                        k.id,
                        k.name,
                        k.balance,
                        k.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }
        KeyCommands::Topup { id, amount } => {
            let amount = Decimal::from_str(amount.trim())
                .with_context(|| format!("invalid amount: {}", amount))?;
            let amount = to_ledger_scale(amount);
            if amount <= Decimal::ZERO {
                anyhow::bail!("amount must be positive");
            }
            if amount > MAX_BALANCE {
                anyhow::bail!("amount must not exceed {}", MAX_BALANCE);
            }
            let key = db.debit(id, amount).await?;
            println!("Key {} balance: {}", key.id, key.balance);
        }
        KeyCommands::Revoke { id } => {
            if db.delete(id).await? {
                println!("Key revoked.");
            } else {
                println!("Key not found or already revoked.");
            }
        }
    }
    Ok(())
}
