use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;

use crate::db::{StoreError, SurveyStore};
use crate::likes;
use crate::models::{
    DateVote, Feedback, Identity, NumericVote, Survey, SurveyLike, TextVote, VoteContent,
    VoteFact, VoteSubmission, Voter,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("survey is closed")]
    SurveyClosed,
    #[error("survey only accepts identified voters")]
    IdentityRequired,
    #[error("already voted on this survey")]
    AlreadyVoted { feedback: FeedbackOutcome },
    /// The store failed. Feedback sent along with a vote is still attempted.
    #[error("store error: {source}")]
    Store {
        source: StoreError,
        feedback: FeedbackOutcome,
    },
}

impl From<StoreError> for LedgerError {
    fn from(source: StoreError) -> Self {
        LedgerError::Store {
            source,
            feedback: FeedbackOutcome::NotProvided,
        }
    }
}

/// What happened to the like and comment that came with a vote.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    NotProvided,
    Recorded(SurveyLike),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoteReceipt {
    pub voter: Voter,
    pub facts: Vec<VoteFact>,
    pub feedback: FeedbackOutcome,
}

/// Anonymous surveys get a fresh session and never see the identity.
pub fn resolve_voter(survey: &Survey, identity: Option<&Identity>) -> Result<Voter, LedgerError> {
    if survey.is_anonymous {
        return Ok(Voter::anonymous_session());
    }
    identity
        .map(|identity| Voter::Identified(identity.clone()))
        .ok_or(LedgerError::IdentityRequired)
}

/// Splits a submission into the facts that get stored.
pub fn decompose(
    survey_id: &str,
    content: &VoteContent,
    voter: &Voter,
    now: DateTime<Utc>,
) -> Vec<VoteFact> {
    let fact = || VoteFact::new(survey_id, voter.clone(), now);
    let mut facts = Vec::new();

    match content {
        VoteContent::SingleChoice {
            option_id,
            custom_option,
        } => {
            facts.extend(option_id.iter().map(|id| fact().for_option(id)));
            facts.extend(custom_option.iter().map(|label| fact().for_custom_option(label)));
        }
        VoteContent::MultipleChoice {
            option_ids,
            custom_option,
        } => {
            facts.extend(option_ids.iter().map(|id| fact().for_option(id)));
            facts.extend(custom_option.iter().map(|label| fact().for_custom_option(label)));
        }
        VoteContent::Numeric(NumericVote::Scalar(value)) => {
            facts.push(fact().with_numeric(*value));
        }
        VoteContent::Numeric(NumericVote::PerOption {
            option_votes,
            custom,
        }) => {
            facts.extend(
                option_votes
                    .iter()
                    .map(|(id, value)| fact().for_option(id).with_numeric(*value)),
            );
            if let Some(custom) = custom {
                facts.push(fact().for_custom_option(&custom.label).with_numeric(custom.value));
            }
        }
        VoteContent::Date(DateVote::Scalar(date)) => {
            facts.push(fact().with_date(*date));
        }
        VoteContent::Date(DateVote::PerOption {
            option_ids,
            proposed,
        }) => {
            facts.extend(option_ids.iter().map(|id| fact().for_option(id)));
            if let Some(date) = proposed {
                let label = date.format("%Y-%m-%d").to_string();
                facts.push(fact().for_custom_option(&label).with_date(*date));
            }
        }
        VoteContent::OpenText(TextVote::Scalar(text)) => {
            facts.push(fact().with_text(text));
        }
        VoteContent::OpenText(TextVote::PerOption { responses, custom }) => {
            facts.extend(
                responses
                    .iter()
                    .map(|(id, text)| fact().for_option(id).with_text(text)),
            );
            if let Some(custom) = custom {
                facts.push(fact().for_custom_option(&custom.label).with_text(&custom.response));
            }
        }
    }

    facts
}

pub async fn record_vote(
    store: &dyn SurveyStore,
    survey: &Survey,
    submission: &VoteSubmission,
    identity: Option<&Identity>,
) -> Result<VoteReceipt, LedgerError> {
    record_vote_at(store, survey, submission, identity, Utc::now()).await
}

/// Records a validated vote. Closure and identity are checked before the
/// store is touched.
pub async fn record_vote_at(
    store: &dyn SurveyStore,
    survey: &Survey,
    submission: &VoteSubmission,
    identity: Option<&Identity>,
    now: DateTime<Utc>,
) -> Result<VoteReceipt, LedgerError> {
    if survey.is_closed_at(now) {
        return Err(LedgerError::SurveyClosed);
    }
    let voter = resolve_voter(survey, identity)?;
    let unique_voter = !survey.is_anonymous && !survey.allow_multiple_responses;

    if unique_voter {
        match store.has_existing_vote(&survey.id, &voter).await {
            Ok(false) => {}
            Ok(true) => {
                let feedback = save_feedback(store, survey, &voter, &submission.feedback, now).await;
                return Err(LedgerError::AlreadyVoted { feedback });
            }
            Err(source) => {
                let feedback = save_feedback(store, survey, &voter, &submission.feedback, now).await;
                return Err(LedgerError::Store { source, feedback });
            }
        }
    }

    let facts = decompose(&survey.id, &submission.content, &voter, now);
    let facts = match store.append_facts(&facts, unique_voter).await {
        Ok(stored) => stored,
        Err(StoreError::DuplicateVoter) => {
            let feedback = save_feedback(store, survey, &voter, &submission.feedback, now).await;
            return Err(LedgerError::AlreadyVoted { feedback });
        }
        Err(source) => {
            warn!("Failed to append vote on survey {}: {}", survey.id, source);
            let feedback = save_feedback(store, survey, &voter, &submission.feedback, now).await;
            return Err(LedgerError::Store { source, feedback });
        }
    };

    let feedback = save_feedback(store, survey, &voter, &submission.feedback, now).await;

    info!(
        "Recorded {} fact(s) on survey {} ({})",
        facts.len(),
        survey.id,
        survey.question_type
    );

    Ok(VoteReceipt {
        voter,
        facts,
        feedback,
    })
}

// Feedback never fails the vote it came with.
async fn save_feedback(
    store: &dyn SurveyStore,
    survey: &Survey,
    voter: &Voter,
    feedback: &Feedback,
    now: DateTime<Utc>,
) -> FeedbackOutcome {
    if feedback.is_empty() {
        return FeedbackOutcome::NotProvided;
    }
    match store
        .upsert_like(&likes::feedback_like(survey, voter, feedback, now))
        .await
    {
        Ok(like) => FeedbackOutcome::Recorded(like),
        Err(e) => {
            warn!("Failed to save feedback for survey {}: {}", survey.id, e);
            FeedbackOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MemoryStore};
    use crate::models::{LikeRating, QuestionType, RawVoteInput, SurveyDraft};
    use crate::voting::{aggregate_results, validate_vote};
    use chrono::Duration;
    use std::sync::Arc;

    async fn published(store: &MemoryStore, draft: SurveyDraft) -> Survey {
        let survey = Survey::create(draft).unwrap();
        store.create_survey(&survey).await.unwrap();
        survey
    }

    fn choose(survey: &Survey, text: &str) -> VoteSubmission {
        let id = survey
            .options
            .iter()
            .find(|o| o.text == text)
            .map(|o| o.id.clone())
            .unwrap();
        validate_vote(
            survey,
            &RawVoteInput {
                option_ids: vec![id],
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn lunch() -> SurveyDraft {
        SurveyDraft::new("Lunch", QuestionType::SingleChoice).with_options(["A", "B"])
    }

    #[tokio::test]
    async fn closed_survey_fails_before_touching_the_store() {
        let store = MemoryStore::new();
        let mut survey = Survey::create(lunch()).unwrap();
        survey.is_active = false;
        let vote = choose(&survey, "A");

        let err = record_vote(&store, &survey, &vote, Some(&Identity::new("u1")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SurveyClosed));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn expired_survey_is_closed() {
        let store = MemoryStore::new();
        let mut survey = Survey::create(lunch()).unwrap();
        let now = Utc::now();
        survey.expires_at = Some(now - Duration::seconds(1));
        let vote = choose(&survey, "A");

        let err = record_vote_at(&store, &survey, &vote, Some(&Identity::new("u1")), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SurveyClosed));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn identity_is_required_unless_anonymous() {
        let store = MemoryStore::new();
        let survey = published(&store, lunch()).await;
        let before = store.calls();
        let err = record_vote(&store, &survey, &choose(&survey, "A"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdentityRequired));
        assert_eq!(store.calls(), before);
    }

    #[tokio::test]
    async fn second_vote_is_rejected_but_keeps_feedback() {
        let store = MemoryStore::new();
        let survey = published(&store, lunch()).await;
        let voter = Identity::new("u1");

        record_vote(&store, &survey, &choose(&survey, "A"), Some(&voter))
            .await
            .unwrap();

        let mut again = choose(&survey, "B");
        again.feedback.like_rating = LikeRating::new(5);
        let err = record_vote(&store, &survey, &again, Some(&voter))
            .await
            .unwrap_err();
        match err {
            LedgerError::AlreadyVoted {
                feedback: FeedbackOutcome::Recorded(like),
            } => assert_eq!(like.rating, LikeRating::new(5)),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(store.facts_for_survey(&survey.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn multiple_responses_skip_the_uniqueness_check() {
        let store = MemoryStore::new();
        let mut draft = lunch();
        draft.allow_multiple_responses = true;
        let survey = published(&store, draft).await;
        let voter = Identity::new("u1");

        for text in ["A", "B"] {
            record_vote(&store, &survey, &choose(&survey, text), Some(&voter))
                .await
                .unwrap();
        }
        assert_eq!(store.facts_for_survey(&survey.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn anonymous_votes_never_store_the_identity() {
        let store = MemoryStore::new();
        let mut draft = lunch();
        draft.is_anonymous = true;
        let survey = published(&store, draft).await;
        let identity = Identity::new("u1");

        let first = record_vote(&store, &survey, &choose(&survey, "A"), Some(&identity))
            .await
            .unwrap();
        let second = record_vote(&store, &survey, &choose(&survey, "B"), Some(&identity))
            .await
            .unwrap();

        assert!(!first.voter.is(&identity));
        assert_ne!(first.voter, second.voter);
        let facts = store.facts_for_survey(&survey.id).await.unwrap();
        assert!(facts.iter().all(|f| matches!(f.voter, Voter::Anonymous(_))));
    }

    #[tokio::test]
    async fn date_pick_and_proposal_store_two_facts() {
        let store = MemoryStore::new();
        let mut draft = SurveyDraft::new("When?", QuestionType::Date)
            .with_options(["2025-01-01", "2025-01-02"]);
        draft.allow_custom_options = true;
        let survey = published(&store, draft).await;
        let first_day = survey.options[0].id.clone();

        let vote = validate_vote(
            &survey,
            &RawVoteInput {
                option_ids: vec![first_day.clone()],
                date_value: Some("2025-03-01".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let receipt = record_vote(&store, &survey, &vote, Some(&Identity::new("u1")))
            .await
            .unwrap();

        assert_eq!(receipt.facts.len(), 2);
        assert_eq!(receipt.facts[0].option_id.as_ref(), Some(&first_day));
        let proposal = &receipt.facts[1];
        assert!(proposal.is_custom_option);
        assert_eq!(proposal.custom_option_text.as_deref(), Some("2025-03-01"));

        let reloaded = store.get_survey(&survey.id).await.unwrap();
        let new_option = reloaded.option(proposal.option_id.as_deref().unwrap()).unwrap();
        assert_eq!(new_option.text, "2025-03-01");
    }

    #[tokio::test]
    async fn store_failure_still_keeps_feedback() {
        let store = MemoryStore::new();
        // Never published, so appending the facts fails.
        let survey = Survey::create(lunch()).unwrap();
        let mut vote = choose(&survey, "A");
        vote.feedback.like_rating = LikeRating::new(5);

        let err = record_vote(&store, &survey, &vote, Some(&Identity::new("u1")))
            .await
            .unwrap_err();
        match err {
            LedgerError::Store {
                source: StoreError::SurveyNotFound(id),
                feedback: FeedbackOutcome::Recorded(like),
            } => {
                assert_eq!(id, survey.id);
                assert_eq!(like.rating, LikeRating::new(5));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(store.likes_for_survey(&survey.id).await.unwrap().len(), 1);
        assert!(store.facts_for_survey(&survey.id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_by_one_voter_store_one_vote() {
        let path = std::env::temp_dir().join(format!("survey-ballot-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite:{}", path.display());
        let db = Arc::new(Database::new(&url).await.unwrap());
        let survey = Survey::create(lunch()).unwrap();
        db.create_survey(&survey).await.unwrap();
        let vote = choose(&survey, "A");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let db = Arc::clone(&db);
            let survey = survey.clone();
            let vote = vote.clone();
            handles.push(tokio::spawn(async move {
                record_vote(db.as_ref(), &survey, &vote, Some(&Identity::new("u1"))).await
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => recorded += 1,
                Err(LedgerError::AlreadyVoted { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(recorded, 1);
        assert_eq!(db.facts_for_survey(&survey.id).await.unwrap().len(), 1);
        drop(db);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn feedback_failure_does_not_fail_the_vote() {
        let store = MemoryStore::new().failing_likes();
        let survey = published(&store, lunch()).await;
        let mut vote = choose(&survey, "A");
        vote.feedback.comment = Some("Great idea".into());

        let receipt = record_vote(&store, &survey, &vote, Some(&Identity::new("u1")))
            .await
            .unwrap();
        assert!(matches!(receipt.feedback, FeedbackOutcome::Failed(_)));
        assert_eq!(receipt.facts.len(), 1);
    }

    #[tokio::test]
    async fn recorded_votes_show_up_in_results() {
        let store = MemoryStore::new();
        let mut draft =
            SurveyDraft::new("Lunch", QuestionType::MultipleChoice).with_options(["A", "B"]);
        draft.allow_custom_options = true;
        let survey = published(&store, draft).await;

        let vote = validate_vote(
            &survey,
            &RawVoteInput {
                option_ids: vec![survey.options[0].id.clone()],
                custom_option_text: Some("Tacos".into()),
                like_rating: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
        let viewer = Identity::new("u1");
        let receipt = record_vote(&store, &survey, &vote, Some(&viewer)).await.unwrap();
        assert!(matches!(receipt.feedback, FeedbackOutcome::Recorded(_)));

        let survey = store.get_survey(&survey.id).await.unwrap();
        let facts = store.facts_for_survey(&survey.id).await.unwrap();
        let likes = store.likes_for_survey(&survey.id).await.unwrap();
        let view = aggregate_results(&survey, &facts, &likes, Some(&viewer));

        assert_eq!(view.per_option.len(), 3);
        assert_eq!(view.per_option[2].text, "Tacos");
        assert_eq!(view.total_votes, 2);
        assert_eq!(view.top_result_ids.len(), 2);
        assert_eq!(view.like_stats.total_likes, 1);
        assert_eq!(view.user_votes.unwrap().option_ids.len(), 2);
    }
}
