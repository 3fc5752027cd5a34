use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use survey_core::{
    DeliveryError, DeliveryErrorKind, DeliveryTransport, DrainItemOutcome, DrainOutcome,
    PendingItem, PendingQueue, SinkRecord, SurveyAnswers, WirePayload,
};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{Harness, ScriptedTransport, complete_patch, mount_accept};

fn answers_for(gender: &str) -> SurveyAnswers {
    let mut answers = SurveyAnswers::default();
    answers.merge(complete_patch(gender));
    answers
}

fn queue_items(queue: &PendingQueue, genders: &[&str]) -> Vec<PendingItem> {
    genders
        .iter()
        .map(|gender| {
            let item = PendingItem::capture(answers_for(gender));
            queue.append(item.clone()).unwrap();
            item
        })
        .collect()
}

fn drained(outcome: DrainOutcome) -> survey_core::DrainReport {
    match outcome {
        DrainOutcome::Drained(report) => report,
        other => panic!("expected a drain report, got {other:?}"),
    }
}

#[tokio::test]
async fn one_failing_item_does_not_block_the_others() {
    let server = MockServer::start().await;
    mount_accept(&server, "first", 1).await;
    mount_accept(&server, "third", 3).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "gender": "second" })))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    let items = queue_items(harness.queue(), &["first", "second", "third"]);

    let report = drained(harness.pipeline.retry_pending().await.unwrap());

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    let ids: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![items[0].id.as_str(), items[1].id.as_str(), items[2].id.as_str()]);
    match &report.results[1].outcome {
        DrainItemOutcome::Failed { error } => {
            assert_eq!(error.kind(), DeliveryErrorKind::Unavailable)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    match &report.results[2].outcome {
        DrainItemOutcome::Delivered { record } => assert_eq!(record.id, "3"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(harness.queue().load().unwrap(), vec![items[1].clone()]);
}

#[tokio::test]
async fn rejected_items_stay_queued() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": false, "error": "duplicate" })),
        )
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());
    let items = queue_items(harness.queue(), &["only"]);

    for _ in 0..3 {
        let report = drained(harness.pipeline.drain_once().await.unwrap());
        assert_eq!((report.succeeded, report.failed), (0, 1));
    }

    assert_eq!(harness.queue().load().unwrap(), items);
}

#[tokio::test]
async fn empty_queue_makes_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let harness = Harness::over_http(&server.uri());

    assert_eq!(harness.pipeline.drain_once().await.unwrap(), DrainOutcome::Idle);
}

#[tokio::test]
async fn recovered_sink_empties_the_queue() {
    let transport = ScriptedTransport::new(vec![
        Err(DeliveryError::RouteNotFound),
        Err(DeliveryError::RouteNotFound),
    ]);
    let harness = Harness::new(transport.clone());
    queue_items(harness.queue(), &["a", "b"]);

    let first = drained(harness.pipeline.drain_once().await.unwrap());
    assert_eq!((first.succeeded, first.failed), (0, 2));
    assert_eq!(harness.queue().len().unwrap(), 2);

    let second = drained(harness.pipeline.drain_once().await.unwrap());
    assert_eq!((second.succeeded, second.failed), (2, 0));
    assert!(harness.queue().is_empty().unwrap());

    let delivered = transport.delivered.lock().unwrap();
    let genders: Vec<_> = delivered.iter().map(|p| p.gender.clone()).collect();
    assert_eq!(genders, vec![Some("a".to_string()), Some("b".to_string())]);
}

/// Accepts every payload, queueing a new item during the first call.
struct AppendingTransport {
    queue: PendingQueue,
    appended: std::sync::Mutex<Option<PendingItem>>,
}

#[async_trait]
impl DeliveryTransport for AppendingTransport {
    async fn deliver(&self, _payload: &WirePayload) -> Result<SinkRecord, DeliveryError> {
        let mut appended = self.appended.lock().unwrap();
        if appended.is_none() {
            let item = PendingItem::capture(answers_for("late"));
            self.queue.append(item.clone()).unwrap();
            *appended = Some(item);
        }
        Ok(SinkRecord {
            id: "ok".to_string(),
            timestamp: None,
        })
    }
}

#[tokio::test]
async fn items_queued_mid_drain_survive_removal() {
    let placeholder = ScriptedTransport::new(Vec::new());
    let seed = Harness::new(placeholder);
    let transport = Arc::new(AppendingTransport {
        queue: seed.queue().clone(),
        appended: std::sync::Mutex::new(None),
    });
    let pipeline = survey_core::SubmissionPipeline::new(
        seed.pipeline.session().clone(),
        seed.queue().clone(),
        transport.clone(),
    );
    queue_items(seed.queue(), &["early"]);

    let report = drained(pipeline.drain_once().await.unwrap());

    assert_eq!(report.succeeded, 1);
    let late = transport.appended.lock().unwrap().clone().unwrap();
    assert_eq!(seed.queue().load().unwrap(), vec![late]);
}
