use std::sync::Arc;

use time::OffsetDateTime;
use time::macros::datetime;

use super::*;
use crate::finance::{BillableEvent, RollupEngine};

fn store_in(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(dir.path().join("ims.sqlite"))
}

fn event(kind: &str, cents: u64, at: OffsetDateTime) -> BillableEvent {
    BillableEvent::new(kind, Amount::from_cents(cents), at)
}

fn bucket(kind: &str, duration: &str) -> BucketKey {
    BucketKey::new(kind, DurationKey::parse(duration).expect("duration"))
}

#[tokio::test]
async fn sqlite_store_rolls_up_monthly_and_daily_buckets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(store_in(&dir));
    store.init().await.expect("init");
    let engine = RollupEngine::new(store.clone());

    engine
        .record(&event("X-Ray", 10_000, datetime!(2024-12-21 10:00 UTC)))
        .await
        .expect("first");
    engine
        .record(&event("X-Ray", 5_000, datetime!(2024-12-22 09:00 UTC)))
        .await
        .expect("second");

    let monthly = store
        .find_bucket(&bucket("X-Ray", "12-2024"))
        .await
        .expect("find")
        .expect("monthly row");
    assert_eq!(monthly.task_count, 2);
    assert_eq!(monthly.patient_count, 2);
    assert_eq!(monthly.total_revenue, Amount::from_cents(15_000));

    let day = store
        .find_bucket(&bucket("X-Ray", "22-12-2024"))
        .await
        .expect("find")
        .expect("daily row");
    assert_eq!(day.task_count, 1);
    assert_eq!(day.total_revenue, Amount::from_cents(5_000));

    let all = store
        .list_records(&RecordQuery::default())
        .await
        .expect("list");
    assert_eq!(all.len(), 3);

    let december = store
        .list_records(&RecordQuery::for_duration(
            DurationKey::parse("12-2024").expect("duration"),
        ))
        .await
        .expect("list");
    assert_eq!(december.len(), 1);
    assert_eq!(december[0].id, monthly.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_store_concurrent_rollups_lose_no_updates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(store_in(&dir));
    store.init().await.expect("init");
    let engine = RollupEngine::new(store.clone());

    let mut handles = Vec::new();
    for _ in 0..40 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .record(&event("MRI", 250, datetime!(2024-12-21 10:00 UTC)))
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("record");
    }

    for duration in ["12-2024", "21-12-2024"] {
        let record = store
            .find_bucket(&bucket("MRI", duration))
            .await
            .expect("find")
            .expect("row");
        assert_eq!(record.task_count, 40, "{duration}");
        assert_eq!(record.patient_count, 40, "{duration}");
        assert_eq!(record.total_revenue, Amount::from_cents(10_000), "{duration}");
    }
}

#[tokio::test]
async fn sqlite_store_rolls_back_monthly_when_daily_upsert_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store.init().await.expect("init");

    let conn = rusqlite::Connection::open(store.path()).expect("open");
    conn.execute_batch(
        "CREATE TRIGGER reject_daily BEFORE INSERT ON financial_records
         WHEN NEW.duration LIKE '__-__-____'
         BEGIN SELECT RAISE(ABORT, 'daily rejected'); END;",
    )
    .expect("trigger");
    drop(conn);

    let engine = RollupEngine::new(Arc::new(store.clone()));
    let err = engine
        .record(&event("CT", 8_000, datetime!(2024-12-21 10:00 UTC)))
        .await;
    assert!(matches!(err, Err(FinanceError::Store { backend: "sqlite", .. })));

    let monthly = store
        .find_bucket(&bucket("CT", "12-2024"))
        .await
        .expect("find");
    assert!(monthly.is_none());
}

#[tokio::test]
async fn sqlite_store_rejects_counters_beyond_i64() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store.init().await.expect("init");

    let [monthly, mut daily] =
        RollupEngine::increments_for(&event("PET", 100, datetime!(2024-06-01 09:00 UTC)));
    daily.revenue = Amount::from_cents(u64::MAX);

    let err = store.upsert_buckets(&[monthly, daily]).await;
    match err {
        Err(FinanceError::Store { backend, source }) => {
            assert_eq!(backend, "sqlite");
            assert!(source.to_string().contains("totalRevenue"));
        }
        other => panic!("expected overflow error, got {other:?}"),
    }

    let monthly = store
        .find_bucket(&bucket("PET", "06-2024"))
        .await
        .expect("find");
    assert!(monthly.is_none());
}

#[tokio::test]
async fn sqlite_store_replayed_event_counts_twice() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(store_in(&dir));
    let engine = RollupEngine::new(store.clone());
    let replayed = event("MRI", 100, datetime!(2024-01-05 08:00 UTC)).with_task_id("task-1");

    engine.record(&replayed).await.expect("first");
    engine.record(&replayed).await.expect("replay");

    let record = store
        .find_bucket(&bucket("MRI", "05-01-2024"))
        .await
        .expect("find")
        .expect("row");
    assert_eq!(record.task_count, 2);
    assert_eq!(record.total_revenue, Amount::from_cents(200));
}

#[tokio::test]
async fn sqlite_store_round_trips_clinic_entities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = store_in(&dir);
    store.init().await.expect("init");
    let now = millis_to_datetime(datetime_to_millis(OffsetDateTime::now_utc()));

    let doctor = User {
        id: "doc-1".to_string(),
        role: UserRole::Doctor,
        name: "Dr. Grey".to_string(),
        email: "grey@clinic.test".to_string(),
        created_at: now,
        updated_at: now,
    };
    store.insert_user(&doctor).await.expect("insert user");
    assert_eq!(store.get_user("doc-1").await.expect("get"), Some(doctor.clone()));
    assert!(
        store
            .list_users(Some(UserRole::Patient))
            .await
            .expect("list")
            .is_empty()
    );

    let mri = ConsultationType {
        id: "ct-1".to_string(),
        kind: "MRI".to_string(),
        description: Some("magnetic".to_string()),
        price: Amount::from_cents(12_050),
        created_at: now,
        updated_at: now,
    };
    store.insert_consultation_type(&mri).await.expect("insert type");
    let duplicate = ConsultationType {
        id: "ct-2".to_string(),
        ..mri.clone()
    };
    let err = store.insert_consultation_type(&duplicate).await;
    assert!(matches!(err, Err(ClinicError::Conflict(_))));
    assert_eq!(
        store.find_consultation_type("MRI").await.expect("find"),
        Some(mri.clone())
    );

    let mut task = Task {
        id: "task-1".to_string(),
        kind: "MRI".to_string(),
        status: TaskStatus::Open,
        patient_id: "pat-1".to_string(),
        doctor_id: None,
        price: Some(mri.price),
        notes: None,
        created_at: now,
        updated_at: now,
    };
    store.insert_task(&task).await.expect("insert task");
    task.doctor_id = Some("doc-1".to_string());
    task.status = TaskStatus::Closed;
    task.notes = Some("clear".to_string());
    assert!(store.update_task(&task).await.expect("update"));

    let for_doctor = store
        .list_tasks(&TaskFilter::doctor("doc-1"))
        .await
        .expect("list tasks");
    assert_eq!(for_doctor, vec![task.clone()]);

    store
        .apply_competency_changes(
            &[],
            &[DoctorCompetency {
                id: "comp-1".to_string(),
                doctor_id: "doc-1".to_string(),
                consultation_type_id: "ct-1".to_string(),
            }],
        )
        .await
        .expect("competencies");
    assert_eq!(
        store
            .list_competencies(Some("doc-1"))
            .await
            .expect("list")
            .len(),
        1
    );

    assert!(store.delete_user("doc-1").await.expect("delete"));
    assert!(!store.delete_user("doc-1").await.expect("delete again"));
    assert!(
        store
            .list_competencies(Some("doc-1"))
            .await
            .expect("list")
            .is_empty()
    );
}
