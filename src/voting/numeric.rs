use std::collections::{BTreeMap, BTreeSet};

use crate::models::{CustomRating, NumericVote, RawVoteInput, Survey, VoteContent, VoteFact};
use crate::voting::stats::{self, NumericStats};
use crate::voting::{
    OptionResult, Tally, ValidationError, ValidationReason, custom_label, ensure_known_option,
};

fn check_range(survey: &Survey, value: f64, field: &'static str) -> Result<f64, ValidationError> {
    let (min, max) = (survey.min_value, survey.max_value);
    if value.is_finite() && value >= min as f64 && value <= max as f64 {
        Ok(value)
    } else {
        Err(ValidationError::new(
            field,
            ValidationReason::OutOfRange { value, min, max },
        ))
    }
}

pub fn compose_scalar(survey: &Survey, input: &RawVoteInput) -> Result<VoteContent, ValidationError> {
    let value = input.numeric_value.ok_or_else(|| {
        ValidationError::new("numeric_value", ValidationReason::EmptySelection)
    })?;
    let value = check_range(survey, value, "numeric_value")?;
    Ok(VoteContent::Numeric(NumericVote::Scalar(value)))
}

pub fn compose_per_option(
    survey: &Survey,
    input: &RawVoteInput,
) -> Result<VoteContent, ValidationError> {
    let mut option_votes = BTreeMap::new();
    for vote in &input.option_votes {
        ensure_known_option(survey, &vote.option_id, "option_votes")?;
        // Options the voter skipped come through without a value.
        if let Some(value) = vote.numeric_value {
            let value = check_range(survey, value, "option_votes")?;
            option_votes.insert(vote.option_id.clone(), value);
        }
    }

    let custom = match custom_label(survey, input)? {
        Some(label) => {
            let value = input.numeric_value.ok_or_else(|| {
                ValidationError::new("numeric_value", ValidationReason::MissingCustomRating)
            })?;
            let value = check_range(survey, value, "numeric_value")?;
            Some(CustomRating { label, value })
        }
        None => None,
    };

    if option_votes.is_empty() && custom.is_none() {
        return Err(ValidationError::new(
            "option_votes",
            ValidationReason::EmptySelection,
        ));
    }

    Ok(VoteContent::Numeric(NumericVote::PerOption {
        option_votes,
        custom,
    }))
}

pub fn calculate_results(survey: &Survey, facts: &[&VoteFact]) -> Tally {
    if survey.has_options() {
        per_option_results(survey, facts)
    } else {
        scalar_results(facts)
    }
}

fn scalar_results(facts: &[&VoteFact]) -> Tally {
    let rated: Vec<&VoteFact> = facts
        .iter()
        .copied()
        .filter(|fact| fact.option_id.is_none() && fact.numeric_value.is_some())
        .collect();
    let values: Vec<f64> = rated.iter().filter_map(|fact| fact.numeric_value).collect();

    Tally {
        total_votes: values.len() as u64,
        total_responses: stats::distinct_voters(rated),
        numeric_stats: NumericStats::from_values(&values),
        value_distribution: stats::value_distribution(&values),
        ..Tally::default()
    }
}

fn per_option_results(survey: &Survey, facts: &[&VoteFact]) -> Tally {
    let grouped = stats::facts_by_option(survey, facts);

    let mut per_option = Vec::new();
    let mut counted: Vec<&VoteFact> = Vec::new();
    for option in survey.sorted_options() {
        let rated: Vec<&VoteFact> = grouped
            .get(&option.id)
            .map(|list| {
                list.iter()
                    .copied()
                    .filter(|fact| fact.numeric_value.is_some())
                    .collect()
            })
            .unwrap_or_default();
        let values: Vec<f64> = rated.iter().filter_map(|fact| fact.numeric_value).collect();

        let mut row = OptionResult::counted(&option.id, &option.text, values.len() as u64);
        row.numeric = NumericStats::from_values(&values);
        row.value_distribution = stats::value_distribution(&values);
        per_option.push(row);
        counted.extend(rated);
    }

    Tally {
        total_votes: counted.len() as u64,
        total_responses: stats::distinct_voters(counted),
        top_result_ids: top_by_average(&per_option),
        per_option,
        ..Tally::default()
    }
}

/// Options sharing the highest average rating.
fn top_by_average(rows: &[OptionResult]) -> BTreeSet<String> {
    let best = rows
        .iter()
        .filter_map(|row| row.numeric.as_ref().map(|n| n.average))
        .max_by(f64::total_cmp);
    match best {
        Some(best) => rows
            .iter()
            .filter(|row| row.numeric.as_ref().is_some_and(|n| n.average == best))
            .map(|row| row.option_id.clone())
            .collect(),
        None => BTreeSet::new(),
    }
}
