//! Sigil attestation service.
//!
//! Main entry point. Initializes tracing, configuration, the database
//! pool and schema, the crypto material, the HTTP server, and the Merkle
//! batcher, then coordinates graceful shutdown. Missing or invalid key
//! material degrades the service to read-only instead of failing
//! startup.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sigil_api::{AppState, Config};
use sigil_attestation::{
    BatchService, CryptoMaterials, EnvelopeCipher, HttpLedger, IssuerService, ProofSigner,
};
use sigil_core::{storage, storage::Storage, time::SystemClock, Clock};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Sigil attestation service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    storage::migrate(&db_pool).await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone()));

    let crypto = load_crypto_materials(&config);
    let issuer =
        Arc::new(IssuerService::new(Storage::new(db_pool.clone()), clock.clone(), crypto));

    let batcher_handle = spawn_batcher(&config, db_pool.clone(), clock.clone());

    let state = AppState::new(storage, clock, issuer, config.public_base_url.clone());
    let addr = config.parse_server_addr()?;

    info!(%addr, "Sigil is ready to issue attestations");

    // start_server returns once the shutdown signal has been handled and
    // in-flight requests have drained.
    sigil_api::start_server(state, &config, addr).await.context("HTTP server failed")?;

    if let Some(handle) = batcher_handle {
        handle.abort();
        info!("Merkle batcher stopped");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Sigil shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sigil=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Loads signing and envelope keys, degrading instead of failing.
///
/// A missing key is an expected deployment mode (read-only instance); an
/// invalid key is logged as an error, and the signing component still
/// refuses to start while the rest of the service serves reads.
fn load_crypto_materials(config: &Config) -> Option<CryptoMaterials> {
    let (Some(signing_hex), Some(envelope_hex)) =
        (config.signing_key.as_deref(), config.envelope_key.as_deref())
    else {
        warn!("SIGNING_KEY or ENVELOPE_KEY not configured, issuance disabled");
        return None;
    };

    let signer = match ProofSigner::from_hex(signing_hex) {
        Ok(signer) => signer,
        Err(e) => {
            error!(error = %e, "signing key rejected, issuance disabled");
            return None;
        },
    };

    let envelope = match EnvelopeCipher::from_hex(envelope_hex) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, "envelope key rejected, issuance disabled");
            return None;
        },
    };

    Some(CryptoMaterials { signer, envelope })
}

/// Starts the Merkle batcher when a ledger is configured.
fn spawn_batcher(
    config: &Config,
    db_pool: sqlx::PgPool,
    clock: Arc<dyn Clock>,
) -> Option<tokio::task::JoinHandle<()>> {
    let (Some(endpoint), Some(deployer_key)) =
        (config.ledger_endpoint.as_deref(), config.ledger_deployer_key.as_deref())
    else {
        info!("LEDGER_ENDPOINT not configured, merkle batcher disabled");
        return None;
    };

    let ledger = Arc::new(HttpLedger::new(endpoint, deployer_key));
    let batcher =
        BatchService::new(Storage::new(db_pool), ledger, clock, config.to_batch_config());

    Some(tokio::spawn(batcher.run()))
}
