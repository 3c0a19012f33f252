use std::sync::Arc;

use httpmock::{Method::POST, MockServer};
use ims_backend::clinic::notify::NotifyError;
use ims_backend::clinic::{
    ClinicService, CompetencyItem, Dispatcher, MemoryClinicStore, NewConsultationType, NewTask,
    NewUser, Notification, NotificationTemplate, Notifier, WebhookNotifier,
};
use ims_backend::finance::{MemoryFinanceStore, RollupEngine};

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

#[tokio::test]
async fn webhook_posts_the_email_request() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/send-email")
                .header("content-type", "application/json")
                .body_includes(r#""templateName":"task_completed""#)
                .body_includes(r#""recipientEmail":"pat@example.com""#)
                .body_includes(r#""reportId":"task-1""#);
            then.status(202);
        })
        .await;

    let notifier = WebhookNotifier::new(server.url("/send-email")).unwrap();
    let notification = Notification::new(NotificationTemplate::TaskCompleted, "pat@example.com")
        .with("reportId", "task-1");
    notifier.send(&notification).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn webhook_reports_non_success_status() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/send-email");
            then.status(503).body("mailer down");
        })
        .await;

    let notifier = WebhookNotifier::new(server.url("/send-email")).unwrap();
    let notification = Notification::new(NotificationTemplate::TaskAssigned, "doc@example.com");
    match notifier.send(&notification).await {
        Err(NotifyError::Status { status, body }) => {
            assert_eq!(status.as_u16(), 503);
            assert_eq!(body, "mailer down");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn task_lifecycle_notifies_doctor_then_patient() {
    if !can_bind_localhost() {
        return;
    }
    let server = MockServer::start_async().await;
    let assigned = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/send-email")
                .body_includes(r#""templateName":"task_assigned""#)
                .body_includes(r#""recipientEmail":"grey@example.com""#);
            then.status(200);
        })
        .await;
    let completed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/send-email")
                .body_includes(r#""templateName":"task_completed""#)
                .body_includes(r#""recipientEmail":"pat@example.com""#)
                .body_includes(r#""doctorName":"Dr. Grey""#);
            then.status(200);
        })
        .await;

    let dispatcher = Dispatcher::new(
        RollupEngine::new(Arc::new(MemoryFinanceStore::new())),
        Arc::new(WebhookNotifier::new(server.url("/send-email")).unwrap()),
    );
    let clinic = ClinicService::new(Arc::new(MemoryClinicStore::new()), dispatcher);

    let user = |role: &str, name: &str, email: &str| NewUser {
        role: Some(role.to_string()),
        name: Some(name.to_string()),
        email: Some(email.to_string()),
    };
    let patient = clinic
        .create_user(user("patient", "Pat", "pat@example.com"))
        .await
        .unwrap();
    let doctor = clinic
        .create_user(user("doctor", "Dr. Grey", "grey@example.com"))
        .await
        .unwrap();
    let kind = clinic
        .create_consultation_type(NewConsultationType {
            kind: Some("MRI".to_string()),
            description: None,
            price: Some(serde_json::json!(300)),
        })
        .await
        .unwrap();
    clinic
        .sync_doctor_competencies(vec![CompetencyItem {
            doctor_id: doctor.id.clone(),
            consultation_type_id: kind.id.clone(),
        }])
        .await
        .unwrap();

    let task = clinic
        .create_task(NewTask {
            kind: Some("MRI".to_string()),
            patient_id: Some(patient.id.clone()),
            ..NewTask::default()
        })
        .await
        .unwrap();
    clinic.assign_task(&task.id, &doctor.id).await.unwrap();
    clinic
        .close_task(&task.id, &doctor.id, Some("All clear.".to_string()))
        .await
        .unwrap();
    clinic.dispatcher().drain().await;

    assigned.assert_async().await;
    completed.assert_async().await;
}
