use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::models::{DateVote, RawVoteInput, Survey, VoteContent, VoteFact};
use crate::voting::choice;
use crate::voting::stats;
use crate::voting::{
    Tally, ValidationError, ValidationReason, clean_text, ensure_known_option, parse_date,
};

fn proposed_date(input: &RawVoteInput) -> Result<Option<NaiveDate>, ValidationError> {
    match clean_text(input.date_value.as_deref()) {
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| ValidationError::new("date_value", ValidationReason::InvalidDate(raw))),
        None => Ok(None),
    }
}

pub fn compose_scalar(input: &RawVoteInput) -> Result<VoteContent, ValidationError> {
    match proposed_date(input)? {
        Some(date) => Ok(VoteContent::Date(DateVote::Scalar(date))),
        None => Err(ValidationError::new(
            "date_value",
            ValidationReason::EmptySelection,
        )),
    }
}

pub fn compose_per_option(
    survey: &Survey,
    input: &RawVoteInput,
) -> Result<VoteContent, ValidationError> {
    let mut option_ids = BTreeSet::new();
    for option_id in &input.option_ids {
        ensure_known_option(survey, option_id, "option_ids")?;
        option_ids.insert(option_id.clone());
    }

    let proposed = proposed_date(input)?;
    if proposed.is_some() && !survey.allow_custom_options {
        return Err(ValidationError::new(
            "date_value",
            ValidationReason::CustomOptionsNotAllowed,
        ));
    }

    // Picking dates and proposing a new one can go together.
    if option_ids.is_empty() && proposed.is_none() {
        return Err(ValidationError::new(
            "option_ids",
            ValidationReason::EmptySelection,
        ));
    }

    Ok(VoteContent::Date(DateVote::PerOption {
        option_ids,
        proposed,
    }))
}

pub fn calculate_results(survey: &Survey, facts: &[&VoteFact]) -> Tally {
    if survey.has_options() {
        return choice::tally_options(survey, facts, |_| true);
    }

    let dated: Vec<&VoteFact> = facts
        .iter()
        .copied()
        .filter(|fact| fact.option_id.is_none() && fact.date_value.is_some())
        .collect();
    let date_distribution = stats::date_distribution(dated.iter().filter_map(|fact| fact.date_value));
    let top_dates =
        stats::top_by_count(date_distribution.iter().map(|bucket| (&bucket.date, bucket.count)));

    Tally {
        total_votes: dated.len() as u64,
        total_responses: stats::distinct_voters(dated),
        date_distribution,
        top_dates,
        ..Tally::default()
    }
}
