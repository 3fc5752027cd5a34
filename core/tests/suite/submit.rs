use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use survey_core::{
    DeliveryError, DeliveryErrorKind, KeyValueStore, SESSION_KEY, SessionStatus, SubmitError,
    SubmitOutcome, SurveyAnswers,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{HangingTransport, Harness, SUBMIT_PATH, ScriptedTransport, mount_accept};

#[tokio::test]
async fn delivered_submission_clears_session_and_returns_sink_id() {
    let server = MockServer::start().await;
    mount_accept(&server, "female", 101).await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("female").await;

    let outcome = harness.pipeline.submit().await.unwrap();

    match outcome {
        SubmitOutcome::Delivered { record } => {
            assert_eq!(record.id, "101");
            assert_eq!(record.timestamp.as_deref(), Some("2025-06-01T10:00:00.000Z"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(harness.storage.load(SESSION_KEY).unwrap(), None);
    assert!(harness.queue().is_empty().unwrap());
    assert_eq!(harness.reopen_session().status(), SessionStatus::Inactive);
    assert!(harness.pipeline.session().lock().await.answers().is_empty());
}

#[tokio::test]
async fn request_body_follows_the_wire_rules() {
    let server = MockServer::start().await;
    mount_accept(&server, "female", 7).await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("female").await;

    harness.pipeline.submit().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(
        request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["name"], json!("Sana"));
    assert_eq!(body["suggestions"], Value::Null);
    assert_eq!(body["interestedInAmbassador"], Value::Null);
    assert_eq!(body["ambassadorStrengths"], json!([]));
    assert_eq!(body["socialMediaPlatforms"], json!(["instagram", "tiktok"]));
    assert_eq!(
        body["featureRatings"],
        json!({
            "intelligentCamera": 5,
            "longBattery": 4,
            "fastCharging": 3,
            "slimDesign": 2,
            "durable": 1,
            "highDisplay": 2,
            "highPerformance": 3,
            "aiFeatures": 4
        })
    );
}

#[tokio::test]
async fn connection_refused_defers_into_pending_queue() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let harness = Harness::over_http(&format!("http://127.0.0.1:{port}"));
    harness.fill("male").await;
    let before: SurveyAnswers = harness.pipeline.session().lock().await.answers().clone();

    let outcome = harness.pipeline.submit().await.unwrap();

    match &outcome {
        SubmitOutcome::Deferred { kind, .. } => assert_eq!(*kind, DeliveryErrorKind::Connect),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let pending = harness.queue().load().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].answers, before);
    if let SubmitOutcome::Deferred { pending_id, .. } = outcome {
        assert_eq!(pending[0].id, pending_id);
    }

    assert_eq!(harness.storage.load(SESSION_KEY).unwrap(), None);
    assert!(harness.reopen_session().answers().is_empty());
}

#[tokio::test]
async fn missing_route_is_treated_as_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .expect(1)
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("male").await;

    let outcome = harness.pipeline.submit().await.unwrap();

    assert!(outcome.is_deferred());
    assert_eq!(harness.queue().len().unwrap(), 1);
}

#[tokio::test]
async fn gateway_outage_is_treated_as_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("male").await;

    let outcome = harness.pipeline.submit().await.unwrap();

    match outcome {
        SubmitOutcome::Deferred { kind, .. } => assert_eq!(kind, DeliveryErrorKind::Unavailable),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn application_rejection_keeps_session_and_skips_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "error": "bad data" })),
        )
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("male").await;
    let before = harness.pipeline.session().lock().await.session().clone();

    let err = harness.pipeline.submit().await.unwrap_err();

    assert!(matches!(err, SubmitError::Rejected(_)));
    assert_eq!(err.to_string(), "bad data");
    assert!(harness.queue().is_empty().unwrap());
    assert_eq!(harness.pipeline.session().lock().await.session(), &before);
    assert_eq!(harness.reopen_session().session(), &before);
}

#[tokio::test]
async fn validation_rejection_names_missing_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "error": "Validation failed",
            "details": {
                "missingFields": ["province"],
                "message": "Missing required fields: province"
            }
        })))
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("male").await;

    let err = harness.pipeline.submit().await.unwrap_err();

    assert_eq!(err.to_string(), "Validation failed");
    assert_eq!(err.rejected_fields(), ["province".to_string()]);
    assert_eq!(harness.reopen_session().status(), SessionStatus::Active);
}

#[tokio::test]
async fn incomplete_form_reports_fields_without_calling_sink() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    harness.fill("male").await;
    harness
        .pipeline
        .session()
        .lock()
        .await
        .update_answers(survey_core::AnswersPatch {
            contact_number: Some(String::new()),
            top_phone_functions: Some(Default::default()),
            ..Default::default()
        })
        .unwrap();

    let err = harness.pipeline.submit().await.unwrap_err();

    match err {
        SubmitError::Incomplete { missing_fields } => {
            assert_eq!(missing_fields, vec!["topPhoneFunctions", "contactNumber"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn hung_sink_times_out_and_defers() {
    let harness = Harness::new(Arc::new(HangingTransport));
    harness.fill("male").await;

    let outcome = harness.pipeline.submit().await.unwrap();

    match outcome {
        SubmitOutcome::Deferred { kind, .. } => assert_eq!(kind, DeliveryErrorKind::Timeout),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(harness.queue().len().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn deferred_submission_is_retried_after_a_delay() {
    let transport = ScriptedTransport::new(vec![Err(DeliveryError::Connect(
        "connection refused".to_string(),
    ))]);
    let mut harness = Harness::new(transport.clone());
    harness.pipeline = harness
        .pipeline
        .clone()
        .with_deferred_drain_delay(Some(Duration::from_secs(1)));
    harness.fill("female").await;

    let outcome = harness.pipeline.submit().await.unwrap();
    assert!(outcome.is_deferred());
    assert_eq!(harness.queue().len().unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(harness.queue().is_empty().unwrap());
    let delivered = transport.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].gender.as_deref(), Some("female"));
}
