//! Wiring from a [`ServerConfig`] to a running router: store handles are
//! opened once here and injected everywhere else.

use std::sync::Arc;

use tracing::info;

use crate::auth::Authenticator;
use crate::clinic::{ClinicService, ClinicStore, Dispatcher, LogNotifier, MemoryClinicStore};
use crate::clinic::{Notifier, WebhookNotifier};
use crate::config::{ClinicStoreConfig, ConfigError, NotifierConfig, ServerConfig, StoreConfig};
use crate::finance::{FinanceStore, MemoryFinanceStore, RollupEngine};
use crate::http::{AppState, router};
use crate::{ImsError, Result};

pub async fn open_finance_store(config: &StoreConfig) -> Result<Arc<dyn FinanceStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryFinanceStore::new())),
        #[cfg(feature = "store-sqlite")]
        StoreConfig::Sqlite { path } => {
            let store = crate::sqlite_store::SqliteStore::new(path);
            store
                .init()
                .await
                .map_err(|err| ImsError::store_init("sqlite", err))?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "store-redis")]
        StoreConfig::Redis { url, prefix } => {
            let mut store = crate::finance::RedisStore::new(url)
                .map_err(|err| ImsError::store_init("redis", err))?;
            if let Some(prefix) = prefix {
                store = store.with_prefix(prefix.clone());
            }
            store
                .ping()
                .await
                .map_err(|err| ImsError::store_init("redis", err))?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "store-postgres")]
        StoreConfig::Postgres {
            url,
            max_connections,
        } => {
            let store = crate::finance::PostgresStore::connect(url, *max_connections)
                .await
                .map_err(|err| ImsError::store_init("postgres", err))?;
            store
                .init()
                .await
                .map_err(|err| ImsError::store_init("postgres", err))?;
            Ok(Arc::new(store))
        }
        #[allow(unreachable_patterns)]
        other => Err(ConfigError::FeatureDisabled {
            feature: feature_for(other),
        }
        .into()),
    }
}

fn feature_for(config: &StoreConfig) -> &'static str {
    match config {
        StoreConfig::Memory | StoreConfig::Sqlite { .. } => "store-sqlite",
        StoreConfig::Redis { .. } => "store-redis",
        StoreConfig::Postgres { .. } => "store-postgres",
    }
}

pub async fn open_clinic_store(config: &ClinicStoreConfig) -> Result<Arc<dyn ClinicStore>> {
    match config {
        ClinicStoreConfig::Memory => Ok(Arc::new(MemoryClinicStore::new())),
        #[cfg(feature = "store-sqlite")]
        ClinicStoreConfig::Sqlite { path } => {
            let store = crate::sqlite_store::SqliteStore::new(path);
            store
                .init()
                .await
                .map_err(|err| ImsError::store_init("sqlite", err))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "store-sqlite"))]
        ClinicStoreConfig::Sqlite { .. } => Err(ConfigError::FeatureDisabled {
            feature: "store-sqlite",
        }
        .into()),
    }
}

pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match config {
        NotifierConfig::Log => Arc::new(LogNotifier),
        NotifierConfig::Webhook { url } => Arc::new(WebhookNotifier::new(url.clone())?),
    };
    Ok(notifier)
}

/// Validates the config and opens every store it names.
pub async fn build_state(config: &ServerConfig) -> Result<AppState> {
    config.validate()?;

    let finance = open_finance_store(&config.finance_store).await?;
    let clinic_store = open_clinic_store(&config.clinic_store).await?;
    let notifier = build_notifier(&config.notifications)?;
    info!(
        finance_store = finance.backend(),
        clinic_store = clinic_store.backend(),
        "stores opened"
    );

    let dispatcher = Dispatcher::new(RollupEngine::new(finance), notifier);
    let clinic = ClinicService::new(clinic_store, dispatcher);
    let auth = Authenticator::new(config.access_tokens()?);
    Ok(AppState::new(clinic).with_authenticator(auth))
}

/// Serves until Ctrl-C or SIGTERM, then waits for in-flight side effects.
pub async fn run(config: &ServerConfig) -> Result<()> {
    let state = build_state(config).await?;
    let dispatcher = state.clinic().dispatcher().clone();

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "ims-server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(in_flight = dispatcher.in_flight(), "draining side effects");
    dispatcher.drain().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
