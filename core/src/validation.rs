//! Required-field rules for the six survey pages.
//!
//! Every predicate is pure over a [`SurveyAnswers`] snapshot. Missing
//! fields are reported by their wire names so the same list can be shown to
//! a user or compared against a sink rejection.

use serde::{Deserialize, Serialize};

use crate::answers::{FeatureKey, MAX_RATING, MIN_RATING, SurveyAnswers, TECNO_PREVIOUSLY_USED};

/// Number of pages in the survey.
pub const PAGE_COUNT: usize = 6;

/// Index of the last page; also where invalid page requests land.
pub const LAST_PAGE: usize = PAGE_COUNT - 1;

/// Upper bound on selected top phone functions.
pub const MAX_TOP_FUNCTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyPage {
    BasicInfo,
    SocialMedia,
    MobileUsage,
    Preferences,
    FeatureRatings,
    Contact,
}

impl SurveyPage {
    pub const ALL: [SurveyPage; PAGE_COUNT] = [
        SurveyPage::BasicInfo,
        SurveyPage::SocialMedia,
        SurveyPage::MobileUsage,
        SurveyPage::Preferences,
        SurveyPage::FeatureRatings,
        SurveyPage::Contact,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn title(self) -> &'static str {
        match self {
            SurveyPage::BasicInfo => "Basic Information",
            SurveyPage::SocialMedia => "Social Media Habits",
            SurveyPage::MobileUsage => "Mobile Phone Usage",
            SurveyPage::Preferences => "What Matters Most in a New Phone",
            SurveyPage::FeatureRatings => "Feature Ratings",
            SurveyPage::Contact => "Stay Connected",
        }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Wire names of the required fields `page` is still missing.
pub fn missing_fields_for_page(page: SurveyPage, answers: &SurveyAnswers) -> Vec<&'static str> {
    let mut missing = Vec::new();
    let mut require = |ok: bool, field: &'static str| {
        if !ok {
            missing.push(field);
        }
    };

    match page {
        SurveyPage::BasicInfo => {
            require(!blank(&answers.gender), "gender");
            require(!blank(&answers.age), "age");
            require(!blank(&answers.province), "province");
        }
        SurveyPage::SocialMedia => {
            require(
                !answers.social_media_platforms.is_empty(),
                "socialMediaPlatforms",
            );
            require(
                !blank(&answers.time_spent_on_social_media),
                "timeSpentOnSocialMedia",
            );
            require(!blank(&answers.follows_tech_content), "followsTechContent");
            require(!answers.tech_update_sources.is_empty(), "techUpdateSources");
        }
        SurveyPage::MobileUsage => {
            require(!blank(&answers.current_phone_brand), "currentPhoneBrand");
            require(
                (1..=MAX_TOP_FUNCTIONS).contains(&answers.top_phone_functions.len()),
                "topPhoneFunctions",
            );
            require(
                !blank(&answers.phone_change_frequency),
                "phoneChangeFrequency",
            );
            require(!blank(&answers.tecno_experience), "tecnoExperience");
            require(
                answers.tecno_experience != TECNO_PREVIOUSLY_USED
                    || !blank(&answers.tecno_experience_rating),
                "tecnoExperienceRating",
            );
        }
        SurveyPage::Preferences => {
            require(!blank(&answers.phone_budget), "phoneBudget");
            require(
                !answers.preferred_phone_colors.is_empty(),
                "preferredPhoneColors",
            );
            require(
                !answers.preferred_phone_colors_secondary.is_empty(),
                "preferredPhoneColorsSecondary",
            );
        }
        SurveyPage::FeatureRatings => {
            require(ratings_complete(answers), "featureRatings");
        }
        SurveyPage::Contact => {
            require(!blank(&answers.contact_number), "contactNumber");
        }
    }

    missing
}

/// True when all eight features carry a rating in `1..=5`.
pub fn ratings_complete(answers: &SurveyAnswers) -> bool {
    FeatureKey::ALL.iter().all(|key| {
        answers
            .feature_ratings
            .get(key)
            .is_some_and(|rating| (MIN_RATING..=MAX_RATING).contains(rating))
    })
}

pub fn is_page_valid(page: SurveyPage, answers: &SurveyAnswers) -> bool {
    missing_fields_for_page(page, answers).is_empty()
}

/// Missing fields across the whole form, in page order.
pub fn missing_fields(answers: &SurveyAnswers) -> Vec<&'static str> {
    SurveyPage::ALL
        .into_iter()
        .flat_map(|page| missing_fields_for_page(page, answers))
        .collect()
}

pub fn is_form_complete(answers: &SurveyAnswers) -> bool {
    SurveyPage::ALL
        .into_iter()
        .all(|page| is_page_valid(page, answers))
}

/// Normalise a numeric page request; out-of-range lands on the last page.
pub fn resolve_page_index(index: i64) -> usize {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < PAGE_COUNT)
        .unwrap_or(LAST_PAGE)
}

/// Normalise a raw page request from the host (e.g. a route segment).
pub fn resolve_page_request(raw: &str) -> usize {
    raw.trim()
        .parse::<i64>()
        .map(resolve_page_index)
        .unwrap_or(LAST_PAGE)
}
