use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{ErrorCode, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::clinic::{
    ClinicError, ClinicStore, ConsultationType, DoctorCompetency, Task, TaskFilter, TaskStatus,
    User, UserRole,
};
use crate::finance::store_types::{datetime_to_millis, generate_id, millis_to_datetime};
use crate::finance::{
    Amount, BucketIncrement, BucketKey, DurationKey, FinanceError, FinanceStore, FinancialRecord,
    RecordQuery,
};

/// File-backed store for both rollup rows and clinic entities. Every call
/// opens its own connection on the blocking pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} does not fit in a sqlite integer")]
    Overflow(&'static str),
}

impl From<SqliteStoreError> for FinanceError {
    fn from(err: SqliteStoreError) -> Self {
        FinanceError::store("sqlite", err)
    }
}

impl From<SqliteStoreError> for ClinicError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::Conflict(message) => ClinicError::Conflict(message),
            other => ClinicError::store("sqlite", other),
        }
    }
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<(), SqliteStoreError> {
        self.run(|_| Ok(())).await
    }

    async fn run<T, F>(&self, f: F) -> Result<T, SqliteStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, SqliteStoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<T, SqliteStoreError> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl FinanceStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn find_bucket(&self, key: &BucketKey) -> Result<Option<FinancialRecord>, FinanceError> {
        let key = key.clone();
        let record = self
            .run(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT id, consultation_type, duration, task_count, patient_count,
                                total_revenue_cents, updated_at_ms
                         FROM financial_records
                         WHERE consultation_type = ?1 AND duration = ?2",
                        rusqlite::params![key.consultation_type, key.duration.as_str()],
                        read_record,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn upsert_buckets(&self, increments: &[BucketIncrement]) -> Result<(), FinanceError> {
        let increments = increments.to_vec();
        self.run(move |conn| {
            // IMMEDIATE takes the write lock up front so concurrent writers
            // queue on busy_timeout instead of failing on lock upgrade.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            for increment in &increments {
                tx.execute(
                    "INSERT INTO financial_records
                        (id, consultation_type, duration, task_count, patient_count,
                         total_revenue_cents, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(consultation_type, duration) DO UPDATE SET
                        task_count = task_count + excluded.task_count,
                        patient_count = patient_count + excluded.patient_count,
                        total_revenue_cents = total_revenue_cents + excluded.total_revenue_cents,
                        updated_at_ms = excluded.updated_at_ms",
                    rusqlite::params![
                        generate_id(),
                        increment.key.consultation_type,
                        increment.key.duration.as_str(),
                        u64_to_i64(increment.tasks, "taskCount")?,
                        u64_to_i64(increment.patients, "patientCount")?,
                        u64_to_i64(increment.revenue.cents(), "totalRevenue")?,
                        datetime_to_millis(increment.at),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn list_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, FinanceError> {
        let duration = query.duration.as_ref().map(|d| d.as_str().to_string());
        let consultation_type = query.consultation_type.clone();
        let records = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, consultation_type, duration, task_count, patient_count,
                            total_revenue_cents, updated_at_ms
                     FROM financial_records
                     WHERE (?1 IS NULL OR duration = ?1)
                       AND (?2 IS NULL OR consultation_type = ?2)
                     ORDER BY consultation_type, duration",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![duration, consultation_type], read_record)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(records)
    }
}

#[async_trait]
impl ClinicStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_user(&self, user: &User) -> Result<(), ClinicError> {
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (id, role, name, email, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id,
                    user.role.as_str(),
                    user.name,
                    user.email,
                    datetime_to_millis(user.created_at),
                    datetime_to_millis(user.updated_at),
                ],
            )
            .map_err(|err| conflict_on_constraint(err, || format!("user {} exists", user.id)))?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, ClinicError> {
        let id = id.to_string();
        let user = self
            .run(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, role, name, email, created_at_ms, updated_at_ms
                         FROM users WHERE id = ?1",
                        rusqlite::params![id],
                        read_user,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    async fn list_users(&self, role: Option<UserRole>) -> Result<Vec<User>, ClinicError> {
        let role = role.map(UserRole::as_str);
        let users = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, role, name, email, created_at_ms, updated_at_ms
                     FROM users
                     WHERE (?1 IS NULL OR role = ?1)
                     ORDER BY created_at_ms, id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![role], read_user)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<bool, ClinicError> {
        let user = user.clone();
        let changed = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE users SET role = ?2, name = ?3, email = ?4, updated_at_ms = ?5
                     WHERE id = ?1",
                    rusqlite::params![
                        user.id,
                        user.role.as_str(),
                        user.name,
                        user.email,
                        datetime_to_millis(user.updated_at),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    async fn delete_user(&self, id: &str) -> Result<bool, ClinicError> {
        let id = id.to_string();
        let deleted = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Ok(false);
                }
                tx.execute(
                    "DELETE FROM doctor_competencies WHERE doctor_id = ?1",
                    rusqlite::params![id],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(deleted)
    }

    async fn insert_consultation_type(&self, kind: &ConsultationType) -> Result<(), ClinicError> {
        let kind = kind.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO consultation_types
                    (id, type, description, price_cents, created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    kind.id,
                    kind.kind,
                    kind.description,
                    u64_to_i64(kind.price.cents(), "price")?,
                    datetime_to_millis(kind.created_at),
                    datetime_to_millis(kind.updated_at),
                ],
            )
            .map_err(|err| {
                conflict_on_constraint(err, || format!("consultation type {} exists", kind.kind))
            })?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_consultation_type(
        &self,
        id: &str,
    ) -> Result<Option<ConsultationType>, ClinicError> {
        let id = id.to_string();
        let found = self
            .run(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT id, type, description, price_cents, created_at_ms, updated_at_ms
                         FROM consultation_types WHERE id = ?1",
                        rusqlite::params![id],
                        read_consultation_type,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    async fn find_consultation_type(
        &self,
        kind: &str,
    ) -> Result<Option<ConsultationType>, ClinicError> {
        let kind = kind.to_string();
        let found = self
            .run(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT id, type, description, price_cents, created_at_ms, updated_at_ms
                         FROM consultation_types WHERE type = ?1",
                        rusqlite::params![kind],
                        read_consultation_type,
                    )
                    .optional()?;
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    async fn list_consultation_types(&self) -> Result<Vec<ConsultationType>, ClinicError> {
        let kinds = self
            .run(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, type, description, price_cents, created_at_ms, updated_at_ms
                     FROM consultation_types
                     ORDER BY type",
                )?;
                let rows = stmt
                    .query_map([], read_consultation_type)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(kinds)
    }

    async fn update_consultation_type(
        &self,
        kind: &ConsultationType,
    ) -> Result<bool, ClinicError> {
        let kind = kind.clone();
        let changed = self
            .run(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE consultation_types
                         SET type = ?2, description = ?3, price_cents = ?4, updated_at_ms = ?5
                         WHERE id = ?1",
                        rusqlite::params![
                            kind.id,
                            kind.kind,
                            kind.description,
                            u64_to_i64(kind.price.cents(), "price")?,
                            datetime_to_millis(kind.updated_at),
                        ],
                    )
                    .map_err(|err| {
                        conflict_on_constraint(err, || {
                            format!("consultation type {} exists", kind.kind)
                        })
                    })?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), ClinicError> {
        let task = task.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tasks
                    (id, type, status, patient_id, doctor_id, price_cents, notes,
                     created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    task.id,
                    task.kind,
                    task.status.as_str(),
                    task.patient_id,
                    task.doctor_id,
                    task.price
                        .map(|price| u64_to_i64(price.cents(), "price"))
                        .transpose()?,
                    task.notes,
                    datetime_to_millis(task.created_at),
                    datetime_to_millis(task.updated_at),
                ],
            )
            .map_err(|err| conflict_on_constraint(err, || format!("task {} exists", task.id)))?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, ClinicError> {
        let id = id.to_string();
        let task = self
            .run(move |conn| {
                let task = conn
                    .query_row(
                        "SELECT id, type, status, patient_id, doctor_id, price_cents, notes,
                                created_at_ms, updated_at_ms
                         FROM tasks WHERE id = ?1",
                        rusqlite::params![id],
                        read_task,
                    )
                    .optional()?;
                Ok(task)
            })
            .await?;
        Ok(task)
    }

    async fn update_task(&self, task: &Task) -> Result<bool, ClinicError> {
        let task = task.clone();
        let changed = self
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE tasks
                     SET type = ?2, status = ?3, patient_id = ?4, doctor_id = ?5,
                         price_cents = ?6, notes = ?7, updated_at_ms = ?8
                     WHERE id = ?1",
                    rusqlite::params![
                        task.id,
                        task.kind,
                        task.status.as_str(),
                        task.patient_id,
                        task.doctor_id,
                        task.price
                            .map(|price| u64_to_i64(price.cents(), "price"))
                            .transpose()?,
                        task.notes,
                        datetime_to_millis(task.updated_at),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(changed)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ClinicError> {
        let filter = filter.clone();
        let tasks = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, type, status, patient_id, doctor_id, price_cents, notes,
                            created_at_ms, updated_at_ms
                     FROM tasks
                     WHERE (?1 IS NULL OR patient_id = ?1)
                       AND (?2 IS NULL OR doctor_id = ?2)
                     ORDER BY created_at_ms, id",
                )?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![filter.patient_id, filter.doctor_id],
                        read_task,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(tasks)
    }

    async fn list_competencies(
        &self,
        doctor_id: Option<&str>,
    ) -> Result<Vec<DoctorCompetency>, ClinicError> {
        let doctor_id = doctor_id.map(str::to_string);
        let competencies = self
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, doctor_id, consultation_type_id
                     FROM doctor_competencies
                     WHERE (?1 IS NULL OR doctor_id = ?1)
                     ORDER BY doctor_id, consultation_type_id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![doctor_id], |row| {
                        Ok(DoctorCompetency {
                            id: row.get(0)?,
                            doctor_id: row.get(1)?,
                            consultation_type_id: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(competencies)
    }

    async fn apply_competency_changes(
        &self,
        remove: &[String],
        add: &[DoctorCompetency],
    ) -> Result<(), ClinicError> {
        let remove = remove.to_vec();
        let add = add.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            for id in &remove {
                tx.execute(
                    "DELETE FROM doctor_competencies WHERE id = ?1",
                    rusqlite::params![id],
                )?;
            }
            for competency in &add {
                tx.execute(
                    "INSERT OR IGNORE INTO doctor_competencies (id, doctor_id, consultation_type_id)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![
                        competency.id,
                        competency.doctor_id,
                        competency.consultation_type_id,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn read_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FinancialRecord> {
    let duration: String = row.get(2)?;
    let duration = DurationKey::parse(&duration)
        .map_err(|_| corrupt(2, format!("bad duration key {duration:?}")))?;
    Ok(FinancialRecord {
        id: row.get(0)?,
        consultation_type: row.get(1)?,
        duration,
        task_count: i64_to_u64(row.get(3)?),
        patient_count: i64_to_u64(row.get(4)?),
        total_revenue: Amount::from_cents(i64_to_u64(row.get(5)?)),
        updated_at: millis_to_datetime(row.get(6)?),
    })
}

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(1)?;
    let role = UserRole::parse(&role).ok_or_else(|| corrupt(1, format!("bad role {role:?}")))?;
    Ok(User {
        id: row.get(0)?,
        role,
        name: row.get(2)?,
        email: row.get(3)?,
        created_at: millis_to_datetime(row.get(4)?),
        updated_at: millis_to_datetime(row.get(5)?),
    })
}

fn read_consultation_type(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConsultationType> {
    Ok(ConsultationType {
        id: row.get(0)?,
        kind: row.get(1)?,
        description: row.get(2)?,
        price: Amount::from_cents(i64_to_u64(row.get(3)?)),
        created_at: millis_to_datetime(row.get(4)?),
        updated_at: millis_to_datetime(row.get(5)?),
    })
}

fn read_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(2)?;
    let status =
        TaskStatus::parse(&status).ok_or_else(|| corrupt(2, format!("bad status {status:?}")))?;
    let price: Option<i64> = row.get(5)?;
    Ok(Task {
        id: row.get(0)?,
        kind: row.get(1)?,
        status,
        patient_id: row.get(3)?,
        doctor_id: row.get(4)?,
        price: price.map(|cents| Amount::from_cents(i64_to_u64(cents))),
        notes: row.get(6)?,
        created_at: millis_to_datetime(row.get(7)?),
        updated_at: millis_to_datetime(row.get(8)?),
    })
}

fn corrupt(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(SqliteStoreError::Corrupt(message)),
    )
}

fn conflict_on_constraint(err: rusqlite::Error, message: impl FnOnce() -> String) -> SqliteStoreError {
    match err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            SqliteStoreError::Conflict(message())
        }
        other => SqliteStoreError::Sqlite(other),
    }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS financial_records (
            id TEXT PRIMARY KEY NOT NULL,
            consultation_type TEXT NOT NULL,
            duration TEXT NOT NULL,
            task_count INTEGER NOT NULL DEFAULT 0,
            patient_count INTEGER NOT NULL DEFAULT 0,
            total_revenue_cents INTEGER NOT NULL DEFAULT 0,
            updated_at_ms INTEGER NOT NULL,
            UNIQUE (consultation_type, duration)
        );
        CREATE INDEX IF NOT EXISTS idx_financial_records_duration
            ON financial_records(duration);

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            role TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS consultation_types (
            id TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL UNIQUE,
            description TEXT,
            price_cents INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            doctor_id TEXT,
            price_cents INTEGER,
            notes TEXT,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_patient_id ON tasks(patient_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_doctor_id ON tasks(doctor_id);

        CREATE TABLE IF NOT EXISTS doctor_competencies (
            id TEXT PRIMARY KEY NOT NULL,
            doctor_id TEXT NOT NULL,
            consultation_type_id TEXT NOT NULL,
            UNIQUE (doctor_id, consultation_type_id)
        );",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}

fn u64_to_i64(value: u64, field: &'static str) -> Result<i64, SqliteStoreError> {
    i64::try_from(value).map_err(|_| SqliteStoreError::Overflow(field))
}

fn i64_to_u64(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}

#[cfg(test)]
mod tests;
