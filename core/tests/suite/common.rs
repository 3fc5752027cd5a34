use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use survey_core::{
    AnswersPatch, DeliveryError, DeliveryTransport, FeatureKey, FileStore, HttpTransport,
    KeyValueStore, PendingQueue, SessionStore, SinkRecord, SubmissionPipeline, WirePayload,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SUBMIT_PATH: &str = "/.netlify/functions/submit-survey";

fn tokens(values: &[&str]) -> Option<BTreeSet<String>> {
    Some(values.iter().map(|v| (*v).to_string()).collect())
}

/// Answers that satisfy every page, tagged by `gender` so sink mocks can
/// tell submissions apart.
pub fn complete_patch(gender: &str) -> AnswersPatch {
    AnswersPatch {
        gender: Some(gender.to_string()),
        age: Some("18-24".to_string()),
        province: Some("punjab".to_string()),
        social_media_platforms: tokens(&["instagram", "tiktok"]),
        time_spent_on_social_media: Some("2-3-hours".to_string()),
        follows_tech_content: Some("yes".to_string()),
        tech_update_sources: tokens(&["youtube"]),
        current_phone_brand: Some("tecno".to_string()),
        top_phone_functions: tokens(&["camera", "gaming"]),
        phone_change_frequency: Some("every-2-years".to_string()),
        tecno_experience: Some("yes-used".to_string()),
        tecno_experience_rating: Some("good".to_string()),
        phone_budget: Some("30k-50k".to_string()),
        preferred_phone_colors: tokens(&["black"]),
        preferred_phone_colors_secondary: tokens(&["green"]),
        feature_ratings: Some(
            FeatureKey::ALL
                .into_iter()
                .zip([5, 4, 3, 2, 1, 2, 3, 4])
                .collect(),
        ),
        name: Some("  Sana  ".to_string()),
        contact_number: Some("03001234567".to_string()),
        suggestions: Some("   ".to_string()),
        ..Default::default()
    }
}

/// File-backed storage plus a pipeline over it.
pub struct Harness {
    _home: TempDir,
    pub storage: Arc<dyn KeyValueStore>,
    pub pipeline: SubmissionPipeline,
}

impl Harness {
    pub fn new(transport: Arc<dyn DeliveryTransport>) -> Self {
        let home = TempDir::new().unwrap();
        let storage: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::with_base_dir(home.path().join("state")).unwrap());
        let session = SessionStore::open(storage.clone()).unwrap();
        let pipeline = SubmissionPipeline::new(
            Arc::new(Mutex::new(session)),
            PendingQueue::new(storage.clone()),
            transport,
        )
        .with_deferred_drain_delay(None);
        Self {
            _home: home,
            storage,
            pipeline,
        }
    }

    pub fn over_http(server_uri: &str) -> Self {
        Self::new(Arc::new(http_transport(server_uri)))
    }

    pub async fn fill(&self, gender: &str) {
        self.pipeline
            .session()
            .lock()
            .await
            .update_answers(complete_patch(gender))
            .unwrap();
    }

    pub fn queue(&self) -> &PendingQueue {
        self.pipeline.queue()
    }

    /// What a freshly started process would load.
    pub fn reopen_session(&self) -> SessionStore {
        SessionStore::open(self.storage.clone()).unwrap()
    }
}

pub fn http_transport(base: &str) -> HttpTransport {
    let endpoint = url::Url::parse(&format!("{base}{SUBMIT_PATH}")).unwrap();
    HttpTransport::new(endpoint, Duration::from_secs(5)).unwrap()
}

pub async fn mount_accept(server: &MockServer, gender: &str, id: u64) {
    Mock::given(method("POST"))
        .and(path(SUBMIT_PATH))
        .and(body_partial_json(json!({ "gender": gender })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Survey submitted successfully and saved to database",
            "data": { "id": id, "timestamp": "2025-06-01T10:00:00.000Z" }
        })))
        .mount(server)
        .await;
}

/// Transport that replays a script of results, then accepts everything.
pub struct ScriptedTransport {
    script: StdMutex<VecDeque<Result<SinkRecord, DeliveryError>>>,
    pub delivered: StdMutex<Vec<WirePayload>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<SinkRecord, DeliveryError>>) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(script.into()),
            delivered: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn deliver(&self, payload: &WirePayload) -> Result<SinkRecord, DeliveryError> {
        let next = self.script.lock().unwrap().pop_front();
        let result = next.unwrap_or_else(|| {
            Ok(SinkRecord {
                id: "accepted".to_string(),
                timestamp: None,
            })
        });
        if result.is_ok() {
            self.delivered.lock().unwrap().push(payload.clone());
        }
        result
    }
}

/// Transport whose calls never complete.
pub struct HangingTransport;

#[async_trait]
impl DeliveryTransport for HangingTransport {
    async fn deliver(&self, _payload: &WirePayload) -> Result<SinkRecord, DeliveryError> {
        std::future::pending().await
    }
}
