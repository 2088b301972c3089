pub mod submission;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub use submission::*;

pub type OptionId = String;

/// Display order given to options materialized from a voter's custom entry.
pub const CUSTOM_OPTION_ORDER: i32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    Rating,
    Scale,
    OpenText,
    Date,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Rating => "rating",
            QuestionType::Scale => "scale",
            QuestionType::OpenText => "open_text",
            QuestionType::Date => "date",
        }
    }

    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::SingleChoice | QuestionType::MultipleChoice)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, QuestionType::Rating | QuestionType::Scale)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_choice" => Ok(QuestionType::SingleChoice),
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "rating" => Ok(QuestionType::Rating),
            "scale" => Ok(QuestionType::Scale),
            "open_text" => Ok(QuestionType::OpenText),
            "date" => Ok(QuestionType::Date),
            _ => Err(format!("Unknown question type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingIcon {
    Star,
    Heart,
    Number,
}

impl RatingIcon {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingIcon::Star => "star",
            RatingIcon::Heart => "heart",
            RatingIcon::Number => "number",
        }
    }
}

impl FromStr for RatingIcon {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "star" => Ok(RatingIcon::Star),
            "heart" => Ok(RatingIcon::Heart),
            "number" => Ok(RatingIcon::Number),
            _ => Err(format!("Unknown rating icon: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureType {
    Permanent,
    Scheduled,
    Manual,
}

impl ClosureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClosureType::Permanent => "permanent",
            ClosureType::Scheduled => "scheduled",
            ClosureType::Manual => "manual",
        }
    }
}

impl FromStr for ClosureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanent" => Ok(ClosureType::Permanent),
            "scheduled" => Ok(ClosureType::Scheduled),
            "manual" => Ok(ClosureType::Manual),
            _ => Err(format!("Unknown closure type: {}", s)),
        }
    }
}

/// Whether a viewer may see the raw results or is sent to the statistics page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsAccess {
    Full,
    StatisticsOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyOption {
    pub id: OptionId,
    pub text: String,
    pub order: i32,
}

impl SurveyOption {
    pub fn new(text: impl Into<String>, order: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            order,
        }
    }

    /// An option created at vote time from a voter's custom entry.
    pub fn custom(text: &str) -> Self {
        Self::new(text.trim(), CUSTOM_OPTION_ORDER)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub question_type: QuestionType,
    pub options: Vec<SurveyOption>,
    pub allow_custom_options: bool,
    pub allow_multiple_responses: bool,
    pub min_value: i32,
    pub max_value: i32,
    pub scale_min_label: Option<String>,
    pub scale_max_label: Option<String>,
    pub rating_icon: RatingIcon,
    pub closure_type: ClosureType,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_anonymous: bool,
    pub show_results_on_close: bool,
    pub require_comment: bool,
    pub created_at: DateTime<Utc>,
}

/// Everything an organizer fills in before publishing a survey.
#[derive(Debug, Clone)]
pub struct SurveyDraft {
    pub title: String,
    pub description: Option<String>,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub allow_custom_options: bool,
    pub allow_multiple_responses: bool,
    pub min_value: i32,
    pub max_value: i32,
    pub scale_min_label: Option<String>,
    pub scale_max_label: Option<String>,
    pub rating_icon: RatingIcon,
    pub closure_type: ClosureType,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_anonymous: bool,
    pub show_results_on_close: bool,
    pub require_comment: bool,
}

impl SurveyDraft {
    pub fn new(title: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            title: title.into(),
            question_type,
            ..Self::default()
        }
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for SurveyDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: None,
            question_type: QuestionType::SingleChoice,
            options: Vec::new(),
            allow_custom_options: false,
            allow_multiple_responses: false,
            min_value: 1,
            max_value: 5,
            scale_min_label: None,
            scale_max_label: None,
            rating_icon: RatingIcon::Star,
            closure_type: ClosureType::Permanent,
            expires_at: None,
            is_active: true,
            is_anonymous: false,
            show_results_on_close: false,
            require_comment: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSurveyDefinition {
    #[error("survey title must not be empty")]
    EmptyTitle,
    #[error("{question_type} survey needs at least {required} options, got {found}")]
    NotEnoughOptions {
        question_type: QuestionType,
        required: usize,
        found: usize,
    },
    #[error("min_value ({min}) must be lower than max_value ({max})")]
    InvalidRange { min: i32, max: i32 },
    #[error("scheduled surveys require an expiry date")]
    MissingExpiry,
}

impl Survey {
    /// Validates a draft and publishes it with freshly generated ids.
    pub fn create(draft: SurveyDraft) -> Result<Self, InvalidSurveyDefinition> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(InvalidSurveyDefinition::EmptyTitle);
        }

        let option_texts: Vec<&str> = draft
            .options
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .collect();

        let qt = draft.question_type;
        let enough = if qt.is_choice() {
            option_texts.len() >= 2
        } else if qt == QuestionType::Date {
            // Either the legacy free-date mode or a real pick list.
            option_texts.len() != 1
        } else {
            true
        };
        if !enough {
            return Err(InvalidSurveyDefinition::NotEnoughOptions {
                question_type: qt,
                required: 2,
                found: option_texts.len(),
            });
        }

        if qt.is_numeric() && draft.min_value >= draft.max_value {
            return Err(InvalidSurveyDefinition::InvalidRange {
                min: draft.min_value,
                max: draft.max_value,
            });
        }

        if draft.closure_type == ClosureType::Scheduled && draft.expires_at.is_none() {
            return Err(InvalidSurveyDefinition::MissingExpiry);
        }

        let options = option_texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| SurveyOption::new(text, i as i32))
            .collect();

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: draft.description,
            question_type: qt,
            options,
            allow_custom_options: draft.allow_custom_options,
            allow_multiple_responses: draft.allow_multiple_responses,
            min_value: draft.min_value,
            max_value: draft.max_value,
            scale_min_label: draft.scale_min_label,
            scale_max_label: draft.scale_max_label,
            rating_icon: draft.rating_icon,
            closure_type: draft.closure_type,
            expires_at: draft.expires_at,
            is_active: draft.is_active,
            is_anonymous: draft.is_anonymous,
            show_results_on_close: draft.show_results_on_close,
            require_comment: draft.require_comment,
            created_at: Utc::now(),
        })
    }

    /// Checked against the wall clock on every call.
    pub fn is_closed(&self) -> bool {
        self.is_closed_at(Utc::now())
    }

    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_expired_at(now) || !self.is_active
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }

    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    pub fn min_options_required(&self) -> usize {
        match self.question_type {
            QuestionType::SingleChoice | QuestionType::MultipleChoice => 2,
            QuestionType::Rating | QuestionType::Scale | QuestionType::OpenText => {
                if self.has_options() {
                    1
                } else {
                    0
                }
            }
            QuestionType::Date => 0,
        }
    }

    pub fn results_access(&self, now: DateTime<Utc>) -> ResultsAccess {
        if self.show_results_on_close && !self.is_closed_at(now) {
            ResultsAccess::StatisticsOnly
        } else {
            ResultsAccess::Full
        }
    }

    pub fn option(&self, option_id: &str) -> Option<&SurveyOption> {
        self.options.iter().find(|option| option.id == option_id)
    }

    pub fn has_option(&self, option_id: &str) -> bool {
        self.option(option_id).is_some()
    }

    /// Options in display order. Ties on `order` keep insertion order.
    pub fn sorted_options(&self) -> Vec<&SurveyOption> {
        let mut options: Vec<&SurveyOption> = self.options.iter().collect();
        options.sort_by_key(|option| option.order);
        options
    }
}

/// An authenticated voter, as resolved by the calling layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a fact or like belongs to. Anonymous surveys only ever see session ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Voter {
    Identified(Identity),
    Anonymous(String),
}

impl Voter {
    pub fn anonymous_session() -> Self {
        Voter::Anonymous(Uuid::new_v4().to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Voter::Identified(_) => "identity",
            Voter::Anonymous(_) => "anonymous",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Voter::Identified(identity) => identity.as_str(),
            Voter::Anonymous(session) => session,
        }
    }

    pub fn from_parts(kind: &str, key: String) -> Option<Self> {
        match kind {
            "identity" => Some(Voter::Identified(Identity(key))),
            "anonymous" => Some(Voter::Anonymous(key)),
            _ => None,
        }
    }

    pub fn is(&self, identity: &Identity) -> bool {
        matches!(self, Voter::Identified(own) if own == identity)
    }
}

/// One persisted atom of a vote: one per touched option, or one per scalar answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteFact {
    pub id: String,
    pub survey_id: String,
    pub option_id: Option<OptionId>,
    pub voter: Voter,
    pub numeric_value: Option<f64>,
    pub date_value: Option<NaiveDate>,
    pub text_value: Option<String>,
    /// Label of the option the store must create for this fact.
    pub custom_option_text: Option<String>,
    pub is_custom_option: bool,
    pub voted_at: DateTime<Utc>,
}

impl VoteFact {
    pub fn new(survey_id: &str, voter: Voter, voted_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            survey_id: survey_id.to_string(),
            option_id: None,
            voter,
            numeric_value: None,
            date_value: None,
            text_value: None,
            custom_option_text: None,
            is_custom_option: false,
            voted_at,
        }
    }

    pub fn for_option(mut self, option_id: &str) -> Self {
        self.option_id = Some(option_id.to_string());
        self
    }

    pub fn for_custom_option(mut self, label: &str) -> Self {
        self.custom_option_text = Some(label.to_string());
        self.is_custom_option = true;
        self
    }

    pub fn with_numeric(mut self, value: f64) -> Self {
        self.numeric_value = Some(value);
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date_value = Some(date);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text_value = Some(text.to_string());
        self
    }

    /// A custom fact whose option has not been created yet.
    pub fn needs_materializing(&self) -> bool {
        self.is_custom_option && self.option_id.is_none() && self.custom_option_text.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyLike {
    pub survey_id: String,
    pub voter: Voter,
    /// `None` when the voter left only a comment.
    pub rating: Option<LikeRating>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SurveyLike {
    /// Applies a newer submission on top of the stored like.
    /// Fields left out of the newer one keep their stored value.
    pub fn merged_into(&self, existing: &SurveyLike) -> SurveyLike {
        SurveyLike {
            survey_id: existing.survey_id.clone(),
            voter: existing.voter.clone(),
            rating: self.rating.or(existing.rating),
            comment: self.comment.clone().or_else(|| existing.comment.clone()),
            created_at: existing.created_at,
        }
    }
}
