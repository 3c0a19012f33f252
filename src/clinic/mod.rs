//! Tasks, users, consultation types and doctor competencies: validation plus
//! one or two store calls per operation, with rollups and notifications
//! handed off as fire-and-forget side effects.

pub mod dispatch;
pub mod memory_store;
pub mod model;
pub mod notify;
pub mod service;

use async_trait::async_trait;
use thiserror::Error;

pub use dispatch::Dispatcher;
pub use memory_store::MemoryClinicStore;
pub use model::{ConsultationType, DoctorCompetency, Task, TaskFilter, TaskStatus, User, UserRole};
pub use notify::{LogNotifier, Notification, NotificationTemplate, Notifier, WebhookNotifier};
pub use service::{
    ClinicService, CompetencyItem, ConsultationTypeUpdate, NewConsultationType, NewTask, NewUser,
    UserUpdate,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClinicError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{backend} store error: {source}")]
    Store {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
}

impl ClinicError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn store(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Store {
            backend,
            source: source.into(),
        }
    }
}

/// Persistence port for the clinic entities.
///
/// `update_*` and `delete_*` return `false` when the row does not exist.
/// Inserting a consultation type whose `type` is taken yields
/// [`ClinicError::Conflict`].
#[async_trait]
pub trait ClinicStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn insert_user(&self, user: &User) -> Result<(), ClinicError>;
    async fn get_user(&self, id: &str) -> Result<Option<User>, ClinicError>;
    async fn list_users(&self, role: Option<UserRole>) -> Result<Vec<User>, ClinicError>;
    async fn update_user(&self, user: &User) -> Result<bool, ClinicError>;
    /// Removes the user and any competencies held by them.
    async fn delete_user(&self, id: &str) -> Result<bool, ClinicError>;

    async fn insert_consultation_type(&self, kind: &ConsultationType) -> Result<(), ClinicError>;
    async fn get_consultation_type(&self, id: &str)
    -> Result<Option<ConsultationType>, ClinicError>;
    async fn find_consultation_type(
        &self,
        kind: &str,
    ) -> Result<Option<ConsultationType>, ClinicError>;
    async fn list_consultation_types(&self) -> Result<Vec<ConsultationType>, ClinicError>;
    async fn update_consultation_type(&self, kind: &ConsultationType)
    -> Result<bool, ClinicError>;

    async fn insert_task(&self, task: &Task) -> Result<(), ClinicError>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, ClinicError>;
    async fn update_task(&self, task: &Task) -> Result<bool, ClinicError>;
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClinicError>;

    async fn list_competencies(
        &self,
        doctor_id: Option<&str>,
    ) -> Result<Vec<DoctorCompetency>, ClinicError>;
    /// Deletes `remove` (by id) and inserts `add` as one atomic change.
    async fn apply_competency_changes(
        &self,
        remove: &[String],
        add: &[DoctorCompetency],
    ) -> Result<(), ClinicError>;
}
