use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, instrument, warn};

use super::dispatch::Dispatcher;
use super::notify::{Notification, NotificationTemplate};
use super::{
    ClinicError, ClinicStore, ConsultationType, DoctorCompetency, Task, TaskFilter, TaskStatus,
    User, UserRole,
};
use crate::finance::store_types::generate_id;
use crate::finance::{Amount, BillableEvent};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsultationType {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationTypeUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetencyItem {
    #[serde(default)]
    pub doctor_id: String,
    #[serde(default)]
    pub consultation_type_id: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub price: Option<serde_json::Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct ClinicService {
    store: Arc<dyn ClinicStore>,
    dispatcher: Dispatcher,
}

fn required(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_blank(value: Option<String>) -> Option<String> {
    required(value.as_deref())
}

fn parse_price(value: serde_json::Value) -> Result<Amount, ClinicError> {
    serde_json::from_value(value).map_err(|err| ClinicError::invalid(format!("price: {err}")))
}

fn validate_email(email: &str) -> Result<(), ClinicError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ClinicError::invalid(format!("invalid email: {email}"))),
    }
}

fn calendar_date(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default()
}

impl ClinicService {
    pub fn new(store: Arc<dyn ClinicStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // Users

    #[instrument(skip(self, request))]
    pub async fn create_user(&self, request: NewUser) -> Result<User, ClinicError> {
        let (Some(role), Some(name), Some(email)) = (
            required(request.role.as_deref()),
            non_blank(request.name),
            non_blank(request.email),
        ) else {
            return Err(ClinicError::invalid("role, name and email are required"));
        };
        let role = UserRole::parse(&role)
            .ok_or_else(|| ClinicError::invalid(format!("unknown role: {role}")))?;
        validate_email(&email)?;

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: generate_id(),
            role,
            name,
            email,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user).await?;
        info!(user_id = %user.id, role = role.as_str(), "user created");
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, ClinicError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("user", id))
    }

    pub async fn list_users(&self, role: Option<UserRole>) -> Result<Vec<User>, ClinicError> {
        self.store.list_users(role).await
    }

    pub async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User, ClinicError> {
        let mut user = self.get_user(id).await?;
        if let Some(name) = non_blank(update.name) {
            user.name = name;
        }
        if let Some(email) = non_blank(update.email) {
            validate_email(&email)?;
            user.email = email;
        }
        user.updated_at = OffsetDateTime::now_utc();

        if !self.store.update_user(&user).await? {
            return Err(ClinicError::not_found("user", id));
        }
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ClinicError> {
        if !self.store.delete_user(id).await? {
            return Err(ClinicError::not_found("user", id));
        }
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    async fn user_with_role(&self, id: &str, role: UserRole) -> Result<User, ClinicError> {
        let user = self
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| ClinicError::not_found(role.as_str(), id))?;
        if user.role != role {
            return Err(ClinicError::invalid(format!(
                "user {id} is not a {}",
                role.as_str()
            )));
        }
        Ok(user)
    }

    // Consultation types

    pub async fn create_consultation_type(
        &self,
        request: NewConsultationType,
    ) -> Result<ConsultationType, ClinicError> {
        let (Some(kind), Some(price)) = (non_blank(request.kind), request.price) else {
            return Err(ClinicError::invalid("type and price are required"));
        };
        let price = parse_price(price)?;

        if self.store.find_consultation_type(&kind).await?.is_some() {
            return Err(ClinicError::Conflict(format!(
                "consultation type {kind} already exists"
            )));
        }

        let now = OffsetDateTime::now_utc();
        let consultation_type = ConsultationType {
            id: generate_id(),
            kind,
            description: non_blank(request.description),
            price,
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_consultation_type(&consultation_type)
            .await?;
        Ok(consultation_type)
    }

    pub async fn list_consultation_types(&self) -> Result<Vec<ConsultationType>, ClinicError> {
        self.store.list_consultation_types().await
    }

    pub async fn update_consultation_type(
        &self,
        id: &str,
        update: ConsultationTypeUpdate,
    ) -> Result<ConsultationType, ClinicError> {
        let mut consultation_type = self
            .store
            .get_consultation_type(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("consultation type", id))?;

        if let Some(description) = update.description {
            consultation_type.description = non_blank(Some(description));
        }
        if let Some(price) = update.price {
            consultation_type.price = parse_price(price)?;
        }
        consultation_type.updated_at = OffsetDateTime::now_utc();

        if !self
            .store
            .update_consultation_type(&consultation_type)
            .await?
        {
            return Err(ClinicError::not_found("consultation type", id));
        }
        Ok(consultation_type)
    }

    // Doctor competencies

    /// Makes the listed pairs the complete competency set of every doctor they
    /// mention. Returns the competencies that were newly created.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn sync_doctor_competencies(
        &self,
        items: Vec<CompetencyItem>,
    ) -> Result<Vec<DoctorCompetency>, ClinicError> {
        let mut wanted = BTreeSet::<(String, String)>::new();
        for item in &items {
            let (Some(doctor_id), Some(type_id)) = (
                required(Some(&item.doctor_id)),
                required(Some(&item.consultation_type_id)),
            ) else {
                return Err(ClinicError::invalid(
                    "doctorId and consultationTypeId are required",
                ));
            };
            wanted.insert((doctor_id, type_id));
        }

        let doctors: BTreeSet<&str> = wanted.iter().map(|(doctor, _)| doctor.as_str()).collect();
        for doctor_id in &doctors {
            self.user_with_role(doctor_id, UserRole::Doctor).await?;
        }
        let type_ids: BTreeSet<&str> = wanted.iter().map(|(_, kind)| kind.as_str()).collect();
        for type_id in type_ids {
            if self.store.get_consultation_type(type_id).await?.is_none() {
                return Err(ClinicError::not_found("consultation type", type_id));
            }
        }

        let mut existing = Vec::new();
        for doctor_id in &doctors {
            existing.extend(self.store.list_competencies(Some(doctor_id)).await?);
        }
        let existing_keys: HashSet<(&str, &str)> = existing
            .iter()
            .map(|c| (c.doctor_id.as_str(), c.consultation_type_id.as_str()))
            .collect();

        let remove: Vec<String> = existing
            .iter()
            .filter(|c| !wanted.contains(&(c.doctor_id.clone(), c.consultation_type_id.clone())))
            .map(|c| c.id.clone())
            .collect();
        let add: Vec<DoctorCompetency> = wanted
            .iter()
            .filter(|(doctor, kind)| !existing_keys.contains(&(doctor.as_str(), kind.as_str())))
            .map(|(doctor, kind)| DoctorCompetency {
                id: generate_id(),
                doctor_id: doctor.clone(),
                consultation_type_id: kind.clone(),
            })
            .collect();

        self.store.apply_competency_changes(&remove, &add).await?;
        info!(
            removed = remove.len(),
            added = add.len(),
            "doctor competencies synced"
        );
        Ok(add)
    }

    pub async fn list_doctor_competencies(
        &self,
        doctor_id: &str,
    ) -> Result<Vec<DoctorCompetency>, ClinicError> {
        self.user_with_role(doctor_id, UserRole::Doctor).await?;
        self.store.list_competencies(Some(doctor_id)).await
    }

    async fn ensure_competent(
        &self,
        doctor_id: &str,
        consultation_type: &ConsultationType,
    ) -> Result<User, ClinicError> {
        let doctor = self.user_with_role(doctor_id, UserRole::Doctor).await?;
        let competent = self
            .store
            .list_competencies(Some(doctor_id))
            .await?
            .iter()
            .any(|c| c.consultation_type_id == consultation_type.id);
        if !competent {
            return Err(ClinicError::Conflict(format!(
                "doctor {doctor_id} is not competent for {}",
                consultation_type.kind
            )));
        }
        Ok(doctor)
    }

    // Tasks

    /// Persists a new open task, then hands its billable event to the rollup
    /// engine and, when a doctor is already assigned, notifies them.
    #[instrument(skip(self, request))]
    pub async fn create_task(&self, request: NewTask) -> Result<Task, ClinicError> {
        let (Some(kind), Some(patient_id)) = (non_blank(request.kind), non_blank(request.patient_id))
        else {
            return Err(ClinicError::invalid("type and patientId are required"));
        };
        if let Some(status) = non_blank(request.status) {
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Open) => {}
                _ => {
                    return Err(ClinicError::invalid(format!(
                        "new tasks must be Open, got {status}"
                    )));
                }
            }
        }

        let patient = self.user_with_role(&patient_id, UserRole::Patient).await?;
        let consultation_type = self
            .store
            .find_consultation_type(&kind)
            .await?
            .ok_or_else(|| ClinicError::invalid(format!("unknown consultation type: {kind}")))?;
        let doctor = match non_blank(request.doctor_id) {
            Some(doctor_id) => Some(self.ensure_competent(&doctor_id, &consultation_type).await?),
            None => None,
        };
        let price = match request.price {
            Some(price) => parse_price(price)?,
            None => consultation_type.price,
        };

        let now = OffsetDateTime::now_utc();
        let task = Task {
            id: generate_id(),
            kind,
            status: TaskStatus::Open,
            patient_id: patient.id.clone(),
            doctor_id: doctor.as_ref().map(|doctor| doctor.id.clone()),
            price: Some(price),
            notes: non_blank(request.notes),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(&task).await?;
        info!(task_id = %task.id, consultation_type = %task.kind, price = %price, "task created");

        self.dispatcher.billable(
            BillableEvent::new(task.kind.clone(), price, task.created_at)
                .with_patient_id(patient.id.clone())
                .with_task_id(task.id.clone()),
        );
        if let Some(doctor) = doctor.as_ref() {
            self.dispatcher
                .notify(assignment_notification(&task, &patient, doctor));
        }
        Ok(task)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, ClinicError> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| ClinicError::not_found("task", id))
    }

    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClinicError> {
        self.store.list_tasks(filter).await
    }

    pub async fn tasks_for_patient(&self, patient_id: &str) -> Result<Vec<Task>, ClinicError> {
        self.list_tasks(&TaskFilter::patient(patient_id)).await
    }

    pub async fn tasks_for_doctor(&self, doctor_id: &str) -> Result<Vec<Task>, ClinicError> {
        self.list_tasks(&TaskFilter::doctor(doctor_id)).await
    }

    #[instrument(skip(self))]
    pub async fn assign_task(&self, task_id: &str, doctor_id: &str) -> Result<Task, ClinicError> {
        let mut task = self.get_task(task_id).await?;
        if task.status == TaskStatus::Closed {
            return Err(ClinicError::Conflict(format!("task {task_id} is closed")));
        }
        let consultation_type = self
            .store
            .find_consultation_type(&task.kind)
            .await?
            .ok_or_else(|| ClinicError::not_found("consultation type", task.kind.clone()))?;
        let doctor = self.ensure_competent(doctor_id, &consultation_type).await?;
        let patient = self.get_user(&task.patient_id).await?;

        task.doctor_id = Some(doctor.id.clone());
        task.updated_at = OffsetDateTime::now_utc();
        if !self.store.update_task(&task).await? {
            return Err(ClinicError::not_found("task", task_id));
        }

        self.dispatcher
            .notify(assignment_notification(&task, &patient, &doctor));
        Ok(task)
    }

    /// Closes a task with the assigned doctor's notes and tells the patient.
    #[instrument(skip(self, notes))]
    pub async fn close_task(
        &self,
        task_id: &str,
        doctor_id: &str,
        notes: Option<String>,
    ) -> Result<Task, ClinicError> {
        let Some(notes) = non_blank(notes) else {
            return Err(ClinicError::invalid("notes are required to close a task"));
        };

        let mut task = self.get_task(task_id).await?;
        if task.doctor_id.as_deref() != Some(doctor_id) {
            return Err(ClinicError::Forbidden(format!(
                "task {task_id} is not assigned to {doctor_id}"
            )));
        }
        if task.status == TaskStatus::Closed {
            return Err(ClinicError::Conflict(format!(
                "task {task_id} is already closed"
            )));
        }

        // Resolved before the write. A deleted recipient only skips the email.
        let patient = self.store.get_user(&task.patient_id).await?;
        let doctor = self.store.get_user(doctor_id).await?;

        task.status = TaskStatus::Closed;
        task.notes = Some(notes);
        task.updated_at = OffsetDateTime::now_utc();
        if !self.store.update_task(&task).await? {
            return Err(ClinicError::not_found("task", task_id));
        }
        info!(task_id = %task.id, "task closed");

        match (patient, doctor) {
            (Some(patient), Some(doctor)) => self.dispatcher.notify(
                Notification::new(NotificationTemplate::TaskCompleted, patient.email.clone())
                    .with("patientName", patient.name)
                    .with("doctorName", doctor.name)
                    .with("reportId", task.id.clone())
                    .with("completedDate", calendar_date(task.updated_at)),
            ),
            (patient, doctor) => warn!(
                task_id = %task.id,
                patient_missing = patient.is_none(),
                doctor_missing = doctor.is_none(),
                "completion email skipped"
            ),
        }
        Ok(task)
    }
}

fn assignment_notification(task: &Task, patient: &User, doctor: &User) -> Notification {
    Notification::new(NotificationTemplate::TaskAssigned, doctor.email.clone())
        .with("doctorName", doctor.name.clone())
        .with("patientName", patient.name.clone())
        .with("reportId", task.id.clone())
        .with("assignedDate", calendar_date(task.updated_at))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::clinic::MemoryClinicStore;
    use crate::clinic::notify::{Notifier, NotifyError};
    use crate::finance::{
        DurationKey, FinanceStore, MemoryFinanceStore, RecordQuery, RollupEngine,
    };

    #[derive(Default)]
    struct RecordingNotifier {
        sent: StdMutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        service: ClinicService,
        finance: Arc<MemoryFinanceStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let finance = Arc::new(MemoryFinanceStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = Dispatcher::new(RollupEngine::new(finance.clone()), notifier.clone());
        let service = ClinicService::new(Arc::new(MemoryClinicStore::new()), dispatcher);
        Fixture {
            service,
            finance,
            notifier,
        }
    }

    async fn user(service: &ClinicService, role: &str, name: &str) -> User {
        service
            .create_user(NewUser {
                role: Some(role.to_string()),
                name: Some(name.to_string()),
                email: Some(format!("{}@clinic.test", name.to_lowercase())),
            })
            .await
            .unwrap()
    }

    async fn consultation_type(service: &ClinicService, kind: &str, price: u64) -> ConsultationType {
        service
            .create_consultation_type(NewConsultationType {
                kind: Some(kind.to_string()),
                description: None,
                price: Some(serde_json::json!(price)),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_task_records_rollup_with_type_price() {
        let fx = fixture();
        let patient = user(&fx.service, "patient", "Pat").await;
        consultation_type(&fx.service, "MRI", 120).await;

        let task = fx
            .service
            .create_task(NewTask {
                kind: Some("MRI".to_string()),
                patient_id: Some(patient.id.clone()),
                ..NewTask::default()
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.price, Some(Amount::from_cents(12_000)));

        fx.service.dispatcher().drain().await;

        let (monthly, _) = DurationKey::for_timestamp(task.created_at);
        let records = fx
            .finance
            .list_records(&RecordQuery::for_duration(monthly))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].consultation_type, "MRI");
        assert_eq!(records[0].task_count, 1);
        assert_eq!(records[0].total_revenue, Amount::from_cents(12_000));
        assert!(fx.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_task_rejects_unknown_type_and_non_patient() {
        let fx = fixture();
        let patient = user(&fx.service, "patient", "Pat").await;
        let doctor = user(&fx.service, "doctor", "Doc").await;
        consultation_type(&fx.service, "MRI", 120).await;

        let err = fx
            .service
            .create_task(NewTask {
                kind: Some("CT".to_string()),
                patient_id: Some(patient.id.clone()),
                ..NewTask::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Invalid(_)));

        let err = fx
            .service
            .create_task(NewTask {
                kind: Some("MRI".to_string()),
                patient_id: Some(doctor.id.clone()),
                ..NewTask::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Invalid(_)));

        let err = fx.service.create_task(NewTask::default()).await.unwrap_err();
        assert!(matches!(err, ClinicError::Invalid(_)));
    }

    #[tokio::test]
    async fn assign_requires_competency_and_close_notifies_patient() {
        let fx = fixture();
        let patient = user(&fx.service, "patient", "Pat").await;
        let doctor = user(&fx.service, "doctor", "Doc").await;
        let mri = consultation_type(&fx.service, "MRI", 120).await;

        let task = fx
            .service
            .create_task(NewTask {
                kind: Some("MRI".to_string()),
                patient_id: Some(patient.id.clone()),
                ..NewTask::default()
            })
            .await
            .unwrap();

        let err = fx.service.assign_task(&task.id, &doctor.id).await.unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));

        fx.service
            .sync_doctor_competencies(vec![CompetencyItem {
                doctor_id: doctor.id.clone(),
                consultation_type_id: mri.id.clone(),
            }])
            .await
            .unwrap();
        let task = fx.service.assign_task(&task.id, &doctor.id).await.unwrap();
        assert_eq!(task.doctor_id.as_deref(), Some(doctor.id.as_str()));

        let err = fx
            .service
            .close_task(&task.id, "someone-else", Some("fine".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Forbidden(_)));

        let closed = fx
            .service
            .close_task(&task.id, &doctor.id, Some("no findings".to_string()))
            .await
            .unwrap();
        assert_eq!(closed.status, TaskStatus::Closed);
        assert_eq!(closed.notes.as_deref(), Some("no findings"));

        let err = fx
            .service
            .close_task(&task.id, &doctor.id, Some("again".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));

        fx.service.dispatcher().drain().await;
        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].template, NotificationTemplate::TaskAssigned);
        assert_eq!(sent[0].recipient, doctor.email);
        assert_eq!(sent[1].template, NotificationTemplate::TaskCompleted);
        assert_eq!(sent[1].recipient, patient.email);
        assert_eq!(sent[1].data["reportId"], task.id);
    }

    #[tokio::test]
    async fn close_succeeds_when_patient_was_deleted() {
        let fx = fixture();
        let patient = user(&fx.service, "patient", "Pat").await;
        let doctor = user(&fx.service, "doctor", "Doc").await;
        let mri = consultation_type(&fx.service, "MRI", 120).await;
        fx.service
            .sync_doctor_competencies(vec![CompetencyItem {
                doctor_id: doctor.id.clone(),
                consultation_type_id: mri.id.clone(),
            }])
            .await
            .unwrap();
        let task = fx
            .service
            .create_task(NewTask {
                kind: Some("MRI".to_string()),
                patient_id: Some(patient.id.clone()),
                doctor_id: Some(doctor.id.clone()),
                ..NewTask::default()
            })
            .await
            .unwrap();
        fx.service.delete_user(&patient.id).await.unwrap();

        let closed = fx
            .service
            .close_task(&task.id, &doctor.id, Some("no findings".to_string()))
            .await
            .unwrap();
        assert_eq!(closed.status, TaskStatus::Closed);
        let stored = fx.service.get_task(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Closed);

        fx.service.dispatcher().drain().await;
        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, NotificationTemplate::TaskAssigned);
    }

    #[tokio::test]
    async fn competency_sync_replaces_doctor_set() {
        let fx = fixture();
        let doctor = user(&fx.service, "doctor", "Doc").await;
        let mri = consultation_type(&fx.service, "MRI", 120).await;
        let ct = consultation_type(&fx.service, "CT", 80).await;

        let created = fx
            .service
            .sync_doctor_competencies(vec![
                CompetencyItem {
                    doctor_id: doctor.id.clone(),
                    consultation_type_id: mri.id.clone(),
                },
                CompetencyItem {
                    doctor_id: doctor.id.clone(),
                    consultation_type_id: mri.id.clone(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(created.len(), 1);

        let created = fx
            .service
            .sync_doctor_competencies(vec![CompetencyItem {
                doctor_id: doctor.id.clone(),
                consultation_type_id: ct.id.clone(),
            }])
            .await
            .unwrap();
        assert_eq!(created.len(), 1);

        let held = fx
            .service
            .list_doctor_competencies(&doctor.id)
            .await
            .unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].consultation_type_id, ct.id);
    }

    #[tokio::test]
    async fn duplicate_consultation_type_conflicts() {
        let fx = fixture();
        consultation_type(&fx.service, "MRI", 120).await;
        let err = fx
            .service
            .create_consultation_type(NewConsultationType {
                kind: Some("MRI".to_string()),
                description: None,
                price: Some(serde_json::json!(10)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClinicError::Conflict(_)));
    }
}
