use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    ClinicError, ClinicStore, ConsultationType, DoctorCompetency, Task, TaskFilter, User, UserRole,
};

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    consultation_types: Vec<ConsultationType>,
    tasks: Vec<Task>,
    competencies: Vec<DoctorCompetency>,
}

#[derive(Debug, Default)]
pub struct MemoryClinicStore {
    tables: Mutex<Tables>,
}

impl MemoryClinicStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn replace<T>(rows: &mut [T], row: &T, same: impl Fn(&T) -> bool) -> bool
where
    T: Clone,
{
    match rows.iter_mut().find(|existing| same(existing)) {
        Some(slot) => {
            *slot = row.clone();
            true
        }
        None => false,
    }
}

#[async_trait]
impl ClinicStore for MemoryClinicStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_user(&self, user: &User) -> Result<(), ClinicError> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|existing| existing.id == user.id) {
            return Err(ClinicError::Conflict(format!("user {} exists", user.id)));
        }
        tables.users.push(user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|user| user.id == id).cloned())
    }

    async fn list_users(&self, role: Option<UserRole>) -> Result<Vec<User>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .filter(|user| role.is_none_or(|role| user.role == role))
            .cloned()
            .collect())
    }

    async fn update_user(&self, user: &User) -> Result<bool, ClinicError> {
        let mut tables = self.tables.lock().await;
        Ok(replace(&mut tables.users, user, |existing| {
            existing.id == user.id
        }))
    }

    async fn delete_user(&self, id: &str) -> Result<bool, ClinicError> {
        let mut tables = self.tables.lock().await;
        let before = tables.users.len();
        tables.users.retain(|user| user.id != id);
        if tables.users.len() == before {
            return Ok(false);
        }
        tables
            .competencies
            .retain(|competency| competency.doctor_id != id);
        Ok(true)
    }

    async fn insert_consultation_type(&self, kind: &ConsultationType) -> Result<(), ClinicError> {
        let mut tables = self.tables.lock().await;
        if tables
            .consultation_types
            .iter()
            .any(|existing| existing.kind == kind.kind || existing.id == kind.id)
        {
            return Err(ClinicError::Conflict(format!(
                "consultation type {} exists",
                kind.kind
            )));
        }
        tables.consultation_types.push(kind.clone());
        Ok(())
    }

    async fn get_consultation_type(
        &self,
        id: &str,
    ) -> Result<Option<ConsultationType>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .consultation_types
            .iter()
            .find(|kind| kind.id == id)
            .cloned())
    }

    async fn find_consultation_type(
        &self,
        kind: &str,
    ) -> Result<Option<ConsultationType>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .consultation_types
            .iter()
            .find(|existing| existing.kind == kind)
            .cloned())
    }

    async fn list_consultation_types(&self) -> Result<Vec<ConsultationType>, ClinicError> {
        Ok(self.tables.lock().await.consultation_types.clone())
    }

    async fn update_consultation_type(
        &self,
        kind: &ConsultationType,
    ) -> Result<bool, ClinicError> {
        let mut tables = self.tables.lock().await;
        Ok(replace(&mut tables.consultation_types, kind, |existing| {
            existing.id == kind.id
        }))
    }

    async fn insert_task(&self, task: &Task) -> Result<(), ClinicError> {
        let mut tables = self.tables.lock().await;
        if tables.tasks.iter().any(|existing| existing.id == task.id) {
            return Err(ClinicError::Conflict(format!("task {} exists", task.id)));
        }
        tables.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables.tasks.iter().find(|task| task.id == id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<bool, ClinicError> {
        let mut tables = self.tables.lock().await;
        Ok(replace(&mut tables.tasks, task, |existing| {
            existing.id == task.id
        }))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tasks
            .iter()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect())
    }

    async fn list_competencies(
        &self,
        doctor_id: Option<&str>,
    ) -> Result<Vec<DoctorCompetency>, ClinicError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .competencies
            .iter()
            .filter(|competency| doctor_id.is_none_or(|id| competency.doctor_id == id))
            .cloned()
            .collect())
    }

    async fn apply_competency_changes(
        &self,
        remove: &[String],
        add: &[DoctorCompetency],
    ) -> Result<(), ClinicError> {
        let mut tables = self.tables.lock().await;
        tables
            .competencies
            .retain(|competency| !remove.contains(&competency.id));
        for competency in add {
            let duplicate = tables.competencies.iter().any(|existing| {
                existing.doctor_id == competency.doctor_id
                    && existing.consultation_type_id == competency.consultation_type_id
            });
            if !duplicate {
                tables.competencies.push(competency.clone());
            }
        }
        Ok(())
    }
}
