use std::collections::BTreeSet;

use crate::models::{QuestionType, RawVoteInput, Survey, VoteContent, VoteFact};
use crate::voting::stats;
use crate::voting::{
    OptionResult, Tally, ValidationError, ValidationReason, custom_label, ensure_known_option,
};

pub fn compose(survey: &Survey, input: &RawVoteInput) -> Result<VoteContent, ValidationError> {
    let mut option_ids = BTreeSet::new();
    for option_id in &input.option_ids {
        ensure_known_option(survey, option_id, "option_ids")?;
        option_ids.insert(option_id.clone());
    }

    if survey.question_type == QuestionType::SingleChoice && option_ids.len() > 1 {
        return Err(ValidationError::new(
            "option_ids",
            ValidationReason::TooManySelections,
        ));
    }

    let custom_option = custom_label(survey, input)?;
    if option_ids.is_empty() && custom_option.is_none() {
        return Err(ValidationError::new(
            "option_ids",
            ValidationReason::EmptySelection,
        ));
    }

    Ok(match survey.question_type {
        QuestionType::SingleChoice => VoteContent::SingleChoice {
            option_id: option_ids.into_iter().next(),
            custom_option,
        },
        _ => VoteContent::MultipleChoice {
            option_ids,
            custom_option,
        },
    })
}

pub fn calculate_results(survey: &Survey, facts: &[&VoteFact]) -> Tally {
    tally_options(survey, facts, |_| true)
}

/// Counts the facts of each option in display order, with percentages and
/// the set of options sharing the highest count.
pub(crate) fn tally_options<F>(survey: &Survey, facts: &[&VoteFact], counts: F) -> Tally
where
    F: Fn(&VoteFact) -> bool,
{
    let grouped = stats::facts_by_option(survey, facts);

    let mut per_option: Vec<OptionResult> = Vec::new();
    let mut counted: Vec<&VoteFact> = Vec::new();
    for option in survey.sorted_options() {
        let option_facts: Vec<&VoteFact> = grouped
            .get(&option.id)
            .map(|list| list.iter().copied().filter(|fact| counts(*fact)).collect())
            .unwrap_or_default();
        per_option.push(OptionResult::counted(
            &option.id,
            &option.text,
            option_facts.len() as u64,
        ));
        counted.extend(option_facts);
    }

    let total_votes: u64 = per_option.iter().map(|row| row.vote_count).sum();
    for row in &mut per_option {
        row.percentage = Some(stats::percentage(row.vote_count, total_votes));
    }
    let top_result_ids =
        stats::top_by_count(per_option.iter().map(|row| (&row.option_id, row.vote_count)));

    Tally {
        total_responses: stats::distinct_voters(counted),
        total_votes,
        per_option,
        top_result_ids,
        ..Tally::default()
    }
}
