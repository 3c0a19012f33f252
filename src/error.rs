use thiserror::Error;

use crate::clinic::ClinicError;
use crate::clinic::notify::NotifyError;
use crate::config::ConfigError;
use crate::finance::FinanceError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ImsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("finance error: {0}")]
    Finance(#[from] FinanceError),
    #[error("clinic error: {0}")]
    Clinic(#[from] ClinicError),
    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),
    #[error("failed to open {backend} store: {source}")]
    StoreInit {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
}

impl ImsError {
    pub fn store_init(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::StoreInit {
            backend,
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImsError>;
