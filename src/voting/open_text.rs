use std::collections::BTreeMap;

use crate::models::{CustomResponse, RawVoteInput, Survey, TextVote, VoteContent, VoteFact};
use crate::voting::choice;
use crate::voting::stats;
use crate::voting::{
    Tally, TextResponse, ValidationError, ValidationReason, clean_text, custom_label,
    ensure_known_option,
};

pub fn compose_scalar(input: &RawVoteInput) -> Result<VoteContent, ValidationError> {
    match clean_text(input.comment.as_deref()) {
        Some(text) => Ok(VoteContent::OpenText(TextVote::Scalar(text))),
        None => Err(ValidationError::new(
            "comment",
            ValidationReason::EmptySelection,
        )),
    }
}

pub fn compose_per_option(
    survey: &Survey,
    input: &RawVoteInput,
) -> Result<VoteContent, ValidationError> {
    let mut responses = BTreeMap::new();
    for response in &input.option_responses {
        ensure_known_option(survey, &response.option_id, "option_responses")?;
        if let Some(text) = clean_text(Some(&response.response_text)) {
            responses.insert(response.option_id.clone(), text);
        }
    }

    let custom = match custom_label(survey, input)? {
        Some(label) => {
            let response = clean_text(input.comment.as_deref()).ok_or_else(|| {
                ValidationError::new("comment", ValidationReason::MissingCustomResponse)
            })?;
            Some(CustomResponse { label, response })
        }
        None => None,
    };

    if responses.is_empty() && custom.is_none() {
        return Err(ValidationError::new(
            "option_responses",
            ValidationReason::EmptySelection,
        ));
    }

    Ok(VoteContent::OpenText(TextVote::PerOption { responses, custom }))
}

pub fn calculate_results(survey: &Survey, facts: &[&VoteFact]) -> Tally {
    let answered: Vec<&VoteFact> = facts
        .iter()
        .copied()
        .filter(|fact| fact.text_value.is_some())
        .filter(|fact| {
            fact.option_id
                .as_deref()
                .is_none_or(|option_id| survey.has_option(option_id))
        })
        .collect();
    let responses: Vec<TextResponse> = answered
        .iter()
        .filter_map(|fact| {
            fact.text_value.as_ref().map(|text| TextResponse {
                id: fact.id.clone(),
                option_id: fact.option_id.clone(),
                text: text.clone(),
            })
        })
        .collect();

    if survey.has_options() {
        let mut tally = choice::tally_options(survey, facts, |fact| fact.text_value.is_some());
        tally.responses = responses;
        return tally;
    }

    Tally {
        total_votes: answered.len() as u64,
        total_responses: stats::distinct_voters(answered),
        responses,
        ..Tally::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QuestionType, RawOptionResponse};
    use crate::voting::test_support::*;
    use crate::voting::validate_vote;

    fn responses(pairs: &[(&str, &str)]) -> Vec<RawOptionResponse> {
        pairs
            .iter()
            .map(|(id, text)| RawOptionResponse {
                option_id: id.to_string(),
                response_text: text.to_string(),
            })
            .collect()
    }

    #[test]
    fn scalar_text_must_not_be_blank() {
        let s = survey(QuestionType::OpenText, &[]);
        let blank = RawVoteInput {
            comment: Some("   ".into()),
            ..Default::default()
        };
        let err = validate_vote(&s, &blank).unwrap_err();
        assert_eq!(err.field, "comment");
        assert_eq!(err.reason, ValidationReason::EmptySelection);

        let answer = RawVoteInput {
            comment: Some(" More benches ".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_vote(&s, &answer).unwrap().content,
            VoteContent::OpenText(TextVote::Scalar("More benches".into()))
        );
    }

    #[test]
    fn per_option_drops_blank_responses() {
        let s = survey(QuestionType::OpenText, &["Park", "Library"]);
        let park = option_id(&s, "Park");
        let library = option_id(&s, "Library");

        let all_blank = RawVoteInput {
            option_responses: responses(&[(park.as_str(), ""), (library.as_str(), "  ")]),
            ..Default::default()
        };
        assert_eq!(
            validate_vote(&s, &all_blank).unwrap_err().reason,
            ValidationReason::EmptySelection
        );

        let one = RawVoteInput {
            option_responses: responses(&[(park.as_str(), "Needs lights"), (library.as_str(), "")]),
            ..Default::default()
        };
        let vote = validate_vote(&s, &one).unwrap();
        assert_eq!(vote.option_ids().into_iter().collect::<Vec<_>>(), vec![&park]);
    }

    #[test]
    fn custom_label_needs_a_response() {
        let mut s = survey(QuestionType::OpenText, &["Park"]);
        s.allow_custom_options = true;

        let missing = RawVoteInput {
            custom_option_text: Some("Pool".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_vote(&s, &missing).unwrap_err().reason,
            ValidationReason::MissingCustomResponse
        );

        let complete = RawVoteInput {
            custom_option_text: Some("Pool".into()),
            comment: Some("Open it in winter".into()),
            ..Default::default()
        };
        match validate_vote(&s, &complete).unwrap().content {
            VoteContent::OpenText(TextVote::PerOption { responses, custom }) => {
                assert!(responses.is_empty());
                let custom = custom.unwrap();
                assert_eq!(custom.label, "Pool");
                assert_eq!(custom.response, "Open it in winter");
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn per_option_results_count_answers() {
        let s = survey(QuestionType::OpenText, &["Park", "Library"]);
        let park = option_id(&s, "Park");
        let facts = vec![
            fact(&s, "u1").for_option(&park).with_text("Lights"),
            fact(&s, "u2").for_option(&park).with_text("Dogs"),
            fact(&s, "u3").for_option("removed").with_text("Gone"),
        ];
        let refs: Vec<&VoteFact> = facts.iter().collect();
        let tally = calculate_results(&s, &refs);

        assert_eq!(tally.total_votes, 2);
        assert_eq!(tally.per_option[0].percentage, Some(100));
        assert_eq!(tally.responses.len(), 2);
        assert!(tally.responses.iter().all(|r| r.option_id.as_ref() == Some(&park)));
    }

    #[test]
    fn scalar_results_list_every_response() {
        let s = survey(QuestionType::OpenText, &[]);
        let facts = vec![
            fact(&s, "u1").with_text("First"),
            fact(&s, "u2").with_text("Second"),
            fact(&s, "u2"),
        ];
        let refs: Vec<&VoteFact> = facts.iter().collect();
        let tally = calculate_results(&s, &refs);
        assert_eq!(tally.total_votes, 2);
        assert_eq!(tally.total_responses, 2);
        let texts: Vec<&str> = tally.responses.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["First", "Second"]);
    }
}
