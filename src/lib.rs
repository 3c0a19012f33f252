//! Clinical task backend with a financial rollup engine: every billable task
//! is folded into monthly and daily revenue buckets per consultation type.

pub mod auth;
pub mod clinic;
pub mod config;
mod error;
pub mod finance;
pub mod http;
pub mod server;
pub mod telemetry;

#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;

pub use auth::{AccessToken, AuthError, Authenticator, Principal, Role};
pub use clinic::{ClinicError, ClinicService, ClinicStore, Dispatcher};
pub use config::{ClinicStoreConfig, ConfigError, NotifierConfig, ServerConfig, StoreConfig};
pub use error::{ImsError, Result};
pub use finance::{
    Amount, BillableEvent, DurationKey, FinanceError, FinanceStore, FinancialRecord, Period,
    ReportService, ReportSummary, RollupEngine,
};
pub use http::{AppState, router};

#[cfg(feature = "store-sqlite")]
pub use sqlite_store::{SqliteStore, SqliteStoreError};
