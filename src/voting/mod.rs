pub mod choice;
pub mod date;
pub mod numeric;
pub mod open_text;
pub mod stats;

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::likes::{self, LikeStats};
use crate::models::{
    Identity, OptionId, QuestionType, RatingIcon, RawVoteInput, Survey, SurveyLike, VoteContent,
    VoteFact, VoteSubmission,
};
pub use stats::{DateBucket, NumericStats, ValueBucket};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationReason {
    #[error("select at least one option or provide an answer")]
    EmptySelection,
    #[error("only one option can be selected")]
    TooManySelections,
    #[error("value {value} must be between {min} and {max}")]
    OutOfRange { value: f64, min: i32, max: i32 },
    #[error("'{0}' is not a valid date")]
    InvalidDate(String),
    #[error("a new option needs a rating")]
    MissingCustomRating,
    #[error("a new option needs a response")]
    MissingCustomResponse,
    #[error("like rating {0} must be between 1 and 5")]
    InvalidLikeRating(i64),
    #[error("option {0} does not belong to this survey")]
    UnknownOption(OptionId),
    #[error("custom options are not allowed for this survey")]
    CustomOptionsNotAllowed,
}

/// A rejected vote. The voter fixes `field` and submits again.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: ValidationReason) -> Self {
        Self { field, reason }
    }
}

/// Turns raw input into vote content for one survey mode.
pub trait VoteStrategy {
    fn compose(&self, survey: &Survey, input: &RawVoteInput)
    -> Result<VoteContent, ValidationError>;
}

/// Legacy mode: a single answer for surveys without options.
pub struct ScalarVoteStrategy;

/// One answer per option, plus an optional custom option.
pub struct PerOptionVoteStrategy;

impl VoteStrategy for ScalarVoteStrategy {
    fn compose(
        &self,
        survey: &Survey,
        input: &RawVoteInput,
    ) -> Result<VoteContent, ValidationError> {
        match survey.question_type {
            QuestionType::SingleChoice | QuestionType::MultipleChoice => {
                choice::compose(survey, input)
            }
            QuestionType::Rating | QuestionType::Scale => numeric::compose_scalar(survey, input),
            QuestionType::Date => date::compose_scalar(input),
            QuestionType::OpenText => open_text::compose_scalar(input),
        }
    }
}

impl VoteStrategy for PerOptionVoteStrategy {
    fn compose(
        &self,
        survey: &Survey,
        input: &RawVoteInput,
    ) -> Result<VoteContent, ValidationError> {
        match survey.question_type {
            QuestionType::SingleChoice | QuestionType::MultipleChoice => {
                choice::compose(survey, input)
            }
            QuestionType::Rating | QuestionType::Scale => {
                numeric::compose_per_option(survey, input)
            }
            QuestionType::Date => date::compose_per_option(survey, input),
            QuestionType::OpenText => open_text::compose_per_option(survey, input),
        }
    }
}

pub fn strategy_for(survey: &Survey) -> &'static dyn VoteStrategy {
    if survey.has_options() {
        &PerOptionVoteStrategy
    } else {
        &ScalarVoteStrategy
    }
}

/// Checks raw input against the survey and builds the canonical submission.
/// Either the whole submission is valid or nothing is returned.
pub fn validate_vote(
    survey: &Survey,
    input: &RawVoteInput,
) -> Result<VoteSubmission, ValidationError> {
    let content = strategy_for(survey).compose(survey, input)?;
    let feedback = likes::compose_feedback(input)?;

    // Advisory only: the form shows the comment box, nobody is blocked.
    if survey.require_comment && feedback.comment.is_none() {
        debug!("Survey {} suggests a comment, vote submitted without one", survey.id);
    }

    Ok(VoteSubmission { content, feedback })
}

// Trimmed text, or None when nothing is left.
pub(crate) fn clean_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

pub(crate) fn ensure_known_option(
    survey: &Survey,
    option_id: &str,
    field: &'static str,
) -> Result<(), ValidationError> {
    if survey.has_option(option_id) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            ValidationReason::UnknownOption(option_id.to_string()),
        ))
    }
}

pub(crate) fn custom_label(
    survey: &Survey,
    input: &RawVoteInput,
) -> Result<Option<String>, ValidationError> {
    match clean_text(input.custom_option_text.as_deref()) {
        Some(_) if !survey.allow_custom_options => Err(ValidationError::new(
            "custom_option_text",
            ValidationReason::CustomOptionsNotAllowed,
        )),
        label => Ok(label),
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).date_naive())
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionResult {
    pub option_id: OptionId,
    pub text: String,
    pub vote_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub value_distribution: Vec<ValueBucket>,
}

impl OptionResult {
    pub(crate) fn counted(option_id: &str, text: &str, vote_count: u64) -> Self {
        Self {
            option_id: option_id.to_string(),
            text: text.to_string(),
            vote_count,
            percentage: None,
            numeric: None,
            value_distribution: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_id: Option<OptionId>,
    pub text: String,
}

/// What the rating widgets need to draw a numeric survey.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleInfo {
    pub rating_icon: RatingIcon,
    pub min_value: i32,
    pub max_value: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_label: Option<String>,
}

/// The viewer's own answers, for "your vote" highlighting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserVotes {
    pub option_ids: BTreeSet<OptionId>,
    pub numeric_votes: BTreeMap<OptionId, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_value: Option<NaiveDate>,
    pub response_ids: BTreeSet<String>,
}

/// Question-type specific part of the results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub per_option: Vec<OptionResult>,
    pub top_result_ids: BTreeSet<OptionId>,
    pub value_distribution: Vec<ValueBucket>,
    pub numeric_stats: Option<NumericStats>,
    pub date_distribution: Vec<DateBucket>,
    pub top_dates: BTreeSet<NaiveDate>,
    pub responses: Vec<TextResponse>,
    pub total_votes: u64,
    pub total_responses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsView {
    pub survey_id: String,
    pub survey_title: String,
    pub question_type: QuestionType,
    pub total_votes: u64,
    pub total_responses: u64,
    pub per_option: Vec<OptionResult>,
    pub top_result_ids: BTreeSet<OptionId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub value_distribution: Vec<ValueBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_stats: Option<NumericStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub date_distribution: Vec<DateBucket>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub top_dates: BTreeSet<NaiveDate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub responses: Vec<TextResponse>,
    pub comments: Vec<String>,
    pub like_stats: LikeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_votes: Option<UserVotes>,
}

/// Folds the stored facts and likes of one survey into its results page.
/// Pure: the same inputs always give the same view.
pub fn aggregate_results(
    survey: &Survey,
    facts: &[VoteFact],
    likes: &[SurveyLike],
    viewer: Option<&Identity>,
) -> ResultsView {
    let facts: Vec<&VoteFact> = facts
        .iter()
        .filter(|fact| fact.survey_id == survey.id)
        .collect();

    let tally = match survey.question_type {
        QuestionType::SingleChoice | QuestionType::MultipleChoice => {
            choice::calculate_results(survey, &facts)
        }
        QuestionType::Rating | QuestionType::Scale => numeric::calculate_results(survey, &facts),
        QuestionType::Date => date::calculate_results(survey, &facts),
        QuestionType::OpenText => open_text::calculate_results(survey, &facts),
    };

    let scale = survey.question_type.is_numeric().then(|| ScaleInfo {
        rating_icon: survey.rating_icon,
        min_value: survey.min_value,
        max_value: survey.max_value,
        min_label: survey.scale_min_label.clone(),
        max_label: survey.scale_max_label.clone(),
    });

    let user_votes = match viewer {
        Some(identity) if !survey.is_anonymous => Some(user_votes(survey, &facts, identity)),
        _ => None,
    };

    ResultsView {
        survey_id: survey.id.clone(),
        survey_title: survey.title.clone(),
        question_type: survey.question_type,
        total_votes: tally.total_votes,
        total_responses: tally.total_responses,
        per_option: tally.per_option,
        top_result_ids: tally.top_result_ids,
        value_distribution: tally.value_distribution,
        numeric_stats: tally.numeric_stats,
        date_distribution: tally.date_distribution,
        top_dates: tally.top_dates,
        responses: tally.responses,
        comments: likes::feedback_comments(survey, likes),
        like_stats: likes::like_stats(survey, likes),
        scale,
        user_votes,
    }
}

fn user_votes(survey: &Survey, facts: &[&VoteFact], identity: &Identity) -> UserVotes {
    let mut own = UserVotes::default();
    for fact in facts.iter().filter(|fact| fact.voter.is(identity)) {
        match &fact.option_id {
            Some(option_id) if survey.has_option(option_id) => {
                own.option_ids.insert(option_id.clone());
                if let Some(value) = fact.numeric_value {
                    own.numeric_votes.insert(option_id.clone(), value);
                }
            }
            Some(_) => continue,
            None => {
                if fact.numeric_value.is_some() {
                    own.scalar_value = fact.numeric_value;
                }
                if fact.date_value.is_some() {
                    own.date_value = fact.date_value;
                }
            }
        }
        if fact.text_value.is_some() {
            own.response_ids.insert(fact.id.clone());
        }
    }
    own
}

/// Participation summary shown on the statistics page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyStats {
    pub survey_id: String,
    pub question_type: QuestionType,
    pub is_closed: bool,
    pub total_participants: u64,
    pub total_votes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_vote_at: Option<DateTime<Utc>>,
    pub options_count: usize,
    pub like_stats: LikeStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_user_voted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_like_rating: Option<u8>,
}

pub fn survey_stats(
    survey: &Survey,
    facts: &[VoteFact],
    likes: &[SurveyLike],
    viewer: Option<&Identity>,
    now: DateTime<Utc>,
) -> SurveyStats {
    let facts: Vec<&VoteFact> = facts
        .iter()
        .filter(|fact| fact.survey_id == survey.id)
        .collect();

    let viewer = viewer.filter(|_| !survey.is_anonymous);

    SurveyStats {
        survey_id: survey.id.clone(),
        question_type: survey.question_type,
        is_closed: survey.is_closed_at(now),
        total_participants: stats::distinct_voters(facts.iter().copied()),
        total_votes: facts.len() as u64,
        last_vote_at: facts.iter().map(|fact| fact.voted_at).max(),
        options_count: survey.options.len(),
        like_stats: likes::like_stats(survey, likes),
        has_user_voted: viewer.map(|identity| facts.iter().any(|fact| fact.voter.is(identity))),
        user_like_rating: viewer
            .and_then(|identity| likes::user_like(survey, likes, identity))
            .and_then(|like| like.rating)
            .map(|rating| rating.get()),
    }
}
