use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::OptionId;

/// The form bag a voter submits, before any validation.
///
/// Every field is optional; which ones matter depends on the survey's
/// question type and on whether it has options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawVoteInput {
    pub option_ids: Vec<OptionId>,
    pub custom_option_text: Option<String>,
    pub numeric_value: Option<f64>,
    pub date_value: Option<String>,
    pub comment: Option<String>,
    pub option_votes: Vec<RawOptionVote>,
    pub option_responses: Vec<RawOptionResponse>,
    pub like_rating: Option<i64>,
    pub survey_comment: Option<String>,
}

impl RawVoteInput {
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOptionVote {
    pub option_id: OptionId,
    #[serde(default)]
    pub numeric_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOptionResponse {
    pub option_id: OptionId,
    #[serde(default)]
    pub response_text: String,
}

/// A survey quality rating, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct LikeRating(u8);

impl LikeRating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Option<Self> {
        if (Self::MIN as i64..=Self::MAX as i64).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for LikeRating {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        LikeRating::new(value).ok_or_else(|| format!("like rating {} is outside 1..=5", value))
    }
}

impl From<LikeRating> for u8 {
    fn from(rating: LikeRating) -> u8 {
        rating.0
    }
}

/// Rating plus comment about the survey itself, orthogonal to the vote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feedback {
    pub like_rating: Option<LikeRating>,
    pub comment: Option<String>,
}

impl Feedback {
    pub fn is_empty(&self) -> bool {
        self.like_rating.is_none() && self.comment.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomRating {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomResponse {
    pub label: String,
    pub response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumericVote {
    /// Legacy single value for surveys without options.
    Scalar(f64),
    PerOption {
        option_votes: BTreeMap<OptionId, f64>,
        custom: Option<CustomRating>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateVote {
    Scalar(NaiveDate),
    /// Available dates picked from the list, plus an optional new proposal.
    PerOption {
        option_ids: BTreeSet<OptionId>,
        proposed: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextVote {
    Scalar(String),
    PerOption {
        responses: BTreeMap<OptionId, String>,
        custom: Option<CustomResponse>,
    },
}

/// The answer part of a submission, one variant per question shape.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteContent {
    SingleChoice {
        option_id: Option<OptionId>,
        custom_option: Option<String>,
    },
    MultipleChoice {
        option_ids: BTreeSet<OptionId>,
        custom_option: Option<String>,
    },
    Numeric(NumericVote),
    Date(DateVote),
    OpenText(TextVote),
}

/// A validated, canonical vote ready for the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteSubmission {
    pub content: VoteContent,
    pub feedback: Feedback,
}

impl VoteSubmission {
    /// Existing options this vote touches, whatever its shape.
    pub fn option_ids(&self) -> BTreeSet<&OptionId> {
        match &self.content {
            VoteContent::SingleChoice { option_id, .. } => option_id.iter().collect(),
            VoteContent::MultipleChoice { option_ids, .. } => option_ids.iter().collect(),
            VoteContent::Numeric(NumericVote::PerOption { option_votes, .. }) => {
                option_votes.keys().collect()
            }
            VoteContent::Date(DateVote::PerOption { option_ids, .. }) => option_ids.iter().collect(),
            VoteContent::OpenText(TextVote::PerOption { responses, .. }) => {
                responses.keys().collect()
            }
            _ => BTreeSet::new(),
        }
    }

    /// Label of the option this vote asks to create, if any.
    pub fn custom_option_text(&self) -> Option<String> {
        match &self.content {
            VoteContent::SingleChoice { custom_option, .. }
            | VoteContent::MultipleChoice { custom_option, .. } => custom_option.clone(),
            VoteContent::Numeric(NumericVote::PerOption { custom, .. }) => {
                custom.as_ref().map(|c| c.label.clone())
            }
            VoteContent::Date(DateVote::PerOption { proposed, .. }) => {
                proposed.map(|date| date.format("%Y-%m-%d").to_string())
            }
            VoteContent::OpenText(TextVote::PerOption { custom, .. }) => {
                custom.as_ref().map(|c| c.label.clone())
            }
            _ => None,
        }
    }
}
