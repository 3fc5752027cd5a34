//! JSON documents exchanged with the delivery sink.
//!
//! The request body is [`WirePayload`]; responses are decoded by
//! [`parse_sink_response`] into either an accepted [`SinkRecord`] or an
//! application rejection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::answers::{FeatureRatings, SurveyAnswers};

/// Request body for one survey submission.
///
/// Multi-choice fields are always arrays, choices are `null` when unset and
/// free text is trimmed (`null` when blank).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub gender: Option<String>,
    pub age: Option<String>,
    pub province: Option<String>,

    pub social_media_platforms: Vec<String>,
    pub social_media_platforms_other: Option<String>,
    pub time_spent_on_social_media: Option<String>,
    pub follows_tech_content: Option<String>,
    pub tech_update_sources: Vec<String>,
    pub tech_update_sources_other: Option<String>,

    pub current_phone_brand: Option<String>,
    pub current_phone_brand_other: Option<String>,
    pub top_phone_functions: Vec<String>,
    pub top_phone_functions_other: Option<String>,
    pub phone_change_frequency: Option<String>,
    pub tecno_experience: Option<String>,
    pub tecno_experience_rating: Option<String>,

    pub phone_features_ranking: Vec<String>,
    pub phone_budget: Option<String>,
    pub preferred_phone_colors: Vec<String>,
    pub preferred_phone_colors_secondary: Vec<String>,

    pub feature_ratings: FeatureRatings,

    pub interested_in_ambassador: Option<String>,
    pub ambassador_strengths: Vec<String>,
    pub ambassador_strengths_other: Option<String>,
    pub ambassador_benefits: Vec<String>,
    pub ambassador_benefits_other: Option<String>,
    pub name: Option<String>,
    pub contact_number: Option<String>,
    pub social_media_link: Option<String>,
    pub follower_count: Option<String>,

    pub suggestions: Option<String>,
}

fn choice(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn free_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn tokens<'a>(values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    values.into_iter().cloned().collect()
}

impl From<&SurveyAnswers> for WirePayload {
    fn from(a: &SurveyAnswers) -> Self {
        Self {
            gender: choice(&a.gender),
            age: choice(&a.age),
            province: choice(&a.province),
            social_media_platforms: tokens(&a.social_media_platforms),
            social_media_platforms_other: free_text(&a.social_media_platforms_other),
            time_spent_on_social_media: choice(&a.time_spent_on_social_media),
            follows_tech_content: choice(&a.follows_tech_content),
            tech_update_sources: tokens(&a.tech_update_sources),
            tech_update_sources_other: free_text(&a.tech_update_sources_other),
            current_phone_brand: choice(&a.current_phone_brand),
            current_phone_brand_other: free_text(&a.current_phone_brand_other),
            top_phone_functions: tokens(&a.top_phone_functions),
            top_phone_functions_other: free_text(&a.top_phone_functions_other),
            phone_change_frequency: choice(&a.phone_change_frequency),
            tecno_experience: choice(&a.tecno_experience),
            tecno_experience_rating: choice(&a.tecno_experience_rating),
            phone_features_ranking: a.phone_features_ranking.clone(),
            phone_budget: choice(&a.phone_budget),
            preferred_phone_colors: tokens(&a.preferred_phone_colors),
            preferred_phone_colors_secondary: tokens(&a.preferred_phone_colors_secondary),
            feature_ratings: a.feature_ratings.clone(),
            interested_in_ambassador: choice(&a.interested_in_ambassador),
            ambassador_strengths: tokens(&a.ambassador_strengths),
            ambassador_strengths_other: free_text(&a.ambassador_strengths_other),
            ambassador_benefits: tokens(&a.ambassador_benefits),
            ambassador_benefits_other: free_text(&a.ambassador_benefits_other),
            name: free_text(&a.name),
            contact_number: free_text(&a.contact_number),
            social_media_link: free_text(&a.social_media_link),
            follower_count: free_text(&a.follower_count),
            suggestions: free_text(&a.suggestions),
        }
    }
}

/// Durable record identifier returned by the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Decoded sink response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkResponse {
    Accepted(SinkRecord),
    Rejected {
        error: String,
        missing_fields: Vec<String>,
    },
}

#[derive(Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<AcceptedData>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    details: Option<Value>,
}

#[derive(Deserialize)]
struct AcceptedData {
    id: Value,
    #[serde(default)]
    timestamp: Option<Value>,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

const DEFAULT_REJECTION: &str = "submission rejected";

/// Decode a sink response body.
///
/// Returns `None` when the body is not a sink document at all, or claims
/// success without a usable record id.
pub fn parse_sink_response(body: &str) -> Option<SinkResponse> {
    let envelope: Envelope = serde_json::from_str(body).ok()?;

    if envelope.success {
        let data = envelope.data?;
        let id = scalar_to_string(&data.id)?;
        let timestamp = data.timestamp.as_ref().and_then(scalar_to_string);
        return Some(SinkResponse::Accepted(SinkRecord { id, timestamp }));
    }

    let error = envelope
        .error
        .as_ref()
        .and_then(scalar_to_string)
        .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
    let missing_fields = envelope
        .details
        .as_ref()
        .and_then(|details| details.get("missingFields"))
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    Some(SinkResponse::Rejected {
        error,
        missing_fields,
    })
}
