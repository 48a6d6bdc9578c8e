//! Wiring: turns a [`Config`] into a running admission stack.

use crate::config::{Config, LedgerBackend};
use admission_core::ledger::AdmissionLedger;
use admission_core::types::AdmissionPolicy;
use admission_postgres::PostgresLedger;
use admission_runtime::{
    AdmissionEnvironment, AdmissionService, ConsoleNotificationDispatcher, IdentitySeed,
    InMemoryClaimsStore, InMemoryLedger, ReclaimSweeper, SweepConfig,
};
use admission_web::AppState;
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the shared application state described by `config`.
///
/// Connects the selected ledger, loads the identity seed, and seeds the spot
/// counter when the ledger has none yet.
///
/// # Errors
///
/// Fails if the ledger cannot be reached or migrated, the identity seed
/// cannot be read, or seeding the counter fails.
pub async fn build_state(
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<AppState> {
    let claims = load_identity(config).await?;
    let ledger = connect_ledger(config).await?;

    let env = AdmissionEnvironment::new(
        ledger,
        Arc::new(claims.clone()),
        Arc::new(ConsoleNotificationDispatcher),
    )
    .with_policy(AdmissionPolicy::with_ttl_millis(
        config.admission.reservation_ttl_ms,
    ))
    .with_promote_on_withdraw(config.admission.promote_on_withdraw);
    let service = AdmissionService::new(env);

    let seeded = service
        .seed_capacity(config.admission.initial_spots)
        .await
        .context("Failed to seed spot counter")?;
    if seeded {
        info!(spots = config.admission.initial_spots, "Spot counter initialized");
    } else {
        info!("Spot counter already present, keeping stored capacity");
    }

    let state = AppState::new(service, Arc::new(claims));
    Ok(match metrics {
        Some(handle) => state.with_metrics(handle),
        None => state,
    })
}

/// Background reclaim sweeper for `state`, when enabled.
#[must_use]
pub fn sweeper(config: &Config, state: &AppState) -> Option<ReclaimSweeper> {
    if !config.sweep.enabled {
        info!("Reclaim sweep disabled; expired spots are reclaimed on verification only");
        return None;
    }
    Some(ReclaimSweeper::new(
        state.service.clone(),
        SweepConfig {
            interval: config.sweep_interval(),
            batch_size: config.sweep.batch_size,
        },
    ))
}

async fn connect_ledger(config: &Config) -> anyhow::Result<Arc<dyn AdmissionLedger>> {
    match config.ledger.backend {
        LedgerBackend::Memory => {
            warn!("Using in-memory ledger; admission state is lost on restart");
            Ok(Arc::new(InMemoryLedger::new()))
        },
        LedgerBackend::Postgres => {
            info!("Connecting to ledger database...");
            let ledger =
                PostgresLedger::connect(&config.ledger.url, config.ledger.max_connections)
                    .await
                    .context("Failed to connect to ledger database")?;
            if config.ledger.run_migrations {
                ledger.migrate().await.context("Failed to migrate ledger")?;
            }
            info!("Ledger database connected");
            Ok(Arc::new(ledger))
        },
    }
}

async fn load_identity(config: &Config) -> anyhow::Result<InMemoryClaimsStore> {
    let Some(path) = &config.identity.seed_file else {
        warn!("No IDENTITY_SEED_FILE configured; every bearer token will be rejected");
        return Ok(InMemoryClaimsStore::new());
    };

    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read identity seed {path}"))?;
    let seed = IdentitySeed::from_json(&json)
        .with_context(|| format!("Invalid identity seed {path}"))?;
    let users = seed.users.len();
    let store = InMemoryClaimsStore::from_seed(seed).context("Failed to load identity seed")?;

    info!(users, "Identity seed loaded");
    Ok(store)
}
