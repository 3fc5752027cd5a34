//! The answer record a respondent fills in, page by page.
//!
//! Field names follow the persisted/wire camelCase names. Single-choice and
//! free-text fields use the empty string for "unset"; multi-choice fields
//! use an empty set.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `tecnoExperience` token meaning the respondent has used the brand before.
pub const TECNO_PREVIOUSLY_USED: &str = "yes-used";

/// The closed set of features rated on the feature-ratings page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureKey {
    IntelligentCamera,
    LongBattery,
    FastCharging,
    SlimDesign,
    Durable,
    HighDisplay,
    HighPerformance,
    AiFeatures,
}

impl FeatureKey {
    /// Every feature, in display order.
    pub const ALL: [FeatureKey; 8] = [
        FeatureKey::IntelligentCamera,
        FeatureKey::LongBattery,
        FeatureKey::FastCharging,
        FeatureKey::SlimDesign,
        FeatureKey::Durable,
        FeatureKey::HighDisplay,
        FeatureKey::HighPerformance,
        FeatureKey::AiFeatures,
    ];

    /// Wire identifier of the feature.
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureKey::IntelligentCamera => "intelligentCamera",
            FeatureKey::LongBattery => "longBattery",
            FeatureKey::FastCharging => "fastCharging",
            FeatureKey::SlimDesign => "slimDesign",
            FeatureKey::Durable => "durable",
            FeatureKey::HighDisplay => "highDisplay",
            FeatureKey::HighPerformance => "highPerformance",
            FeatureKey::AiFeatures => "aiFeatures",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureKey {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

/// Ratings keyed by feature. Values are only meaningful in `1..=5`.
pub type FeatureRatings = BTreeMap<FeatureKey, u8>;

/// Lowest accepted feature rating.
pub const MIN_RATING: u8 = 1;

/// Highest accepted feature rating.
pub const MAX_RATING: u8 = 5;

/// Flat record of everything the respondent has answered so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SurveyAnswers {
    // Basic information
    pub gender: String,
    pub age: String,
    pub province: String,

    // Social media habits
    pub social_media_platforms: BTreeSet<String>,
    pub social_media_platforms_other: String,
    pub time_spent_on_social_media: String,
    pub follows_tech_content: String,
    pub tech_update_sources: BTreeSet<String>,
    pub tech_update_sources_other: String,

    // Mobile phone usage
    pub current_phone_brand: String,
    pub current_phone_brand_other: String,
    pub top_phone_functions: BTreeSet<String>,
    pub top_phone_functions_other: String,
    pub phone_change_frequency: String,
    pub tecno_experience: String,
    pub tecno_experience_rating: String,

    // Preferences
    pub phone_features_ranking: Vec<String>,
    pub phone_budget: String,
    pub preferred_phone_colors: BTreeSet<String>,
    pub preferred_phone_colors_secondary: BTreeSet<String>,

    pub feature_ratings: FeatureRatings,

    // Contact and ambassador program
    pub interested_in_ambassador: String,
    pub ambassador_strengths: BTreeSet<String>,
    pub ambassador_strengths_other: String,
    pub ambassador_benefits: BTreeSet<String>,
    pub ambassador_benefits_other: String,
    pub name: String,
    pub contact_number: String,
    pub social_media_link: String,
    pub follower_count: String,

    pub suggestions: String,
}

/// A partial update. Present fields replace the stored value wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnswersPatch {
    pub gender: Option<String>,
    pub age: Option<String>,
    pub province: Option<String>,
    pub social_media_platforms: Option<BTreeSet<String>>,
    pub social_media_platforms_other: Option<String>,
    pub time_spent_on_social_media: Option<String>,
    pub follows_tech_content: Option<String>,
    pub tech_update_sources: Option<BTreeSet<String>>,
    pub tech_update_sources_other: Option<String>,
    pub current_phone_brand: Option<String>,
    pub current_phone_brand_other: Option<String>,
    pub top_phone_functions: Option<BTreeSet<String>>,
    pub top_phone_functions_other: Option<String>,
    pub phone_change_frequency: Option<String>,
    pub tecno_experience: Option<String>,
    pub tecno_experience_rating: Option<String>,
    pub phone_features_ranking: Option<Vec<String>>,
    pub phone_budget: Option<String>,
    pub preferred_phone_colors: Option<BTreeSet<String>>,
    pub preferred_phone_colors_secondary: Option<BTreeSet<String>>,
    pub feature_ratings: Option<FeatureRatings>,
    pub interested_in_ambassador: Option<String>,
    pub ambassador_strengths: Option<BTreeSet<String>>,
    pub ambassador_strengths_other: Option<String>,
    pub ambassador_benefits: Option<BTreeSet<String>>,
    pub ambassador_benefits_other: Option<String>,
    pub name: Option<String>,
    pub contact_number: Option<String>,
    pub social_media_link: Option<String>,
    pub follower_count: Option<String>,
    pub suggestions: Option<String>,
}

macro_rules! merge_fields {
    ($target:expr, $patch:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $patch.$field {
                $target.$field = value;
            }
        )+
    };
}

impl SurveyAnswers {
    /// Shallow-merge `patch` into these answers.
    pub fn merge(&mut self, patch: AnswersPatch) {
        merge_fields!(self, patch;
            gender,
            age,
            province,
            social_media_platforms,
            social_media_platforms_other,
            time_spent_on_social_media,
            follows_tech_content,
            tech_update_sources,
            tech_update_sources_other,
            current_phone_brand,
            current_phone_brand_other,
            top_phone_functions,
            top_phone_functions_other,
            phone_change_frequency,
            tecno_experience,
            tecno_experience_rating,
            phone_features_ranking,
            phone_budget,
            preferred_phone_colors,
            preferred_phone_colors_secondary,
            feature_ratings,
            interested_in_ambassador,
            ambassador_strengths,
            ambassador_strengths_other,
            ambassador_benefits,
            ambassador_benefits_other,
            name,
            contact_number,
            social_media_link,
            follower_count,
            suggestions,
        );
    }

    /// True when nothing has been answered yet.
    pub fn is_empty(&self) -> bool {
        *self == SurveyAnswers::default()
    }
}

impl AnswersPatch {
    /// Patch that sets only the feature ratings map.
    pub fn with_feature_ratings(ratings: FeatureRatings) -> Self {
        Self {
            feature_ratings: Some(ratings),
            ..Default::default()
        }
    }
}
