use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use crate::db::SurveyStore;
use crate::ledger::{self, LedgerError};
use crate::models::{Feedback, Identity, LikeRating, RawVoteInput, Survey, SurveyLike, Voter};
use crate::voting::stats::{self, ValueBucket};
use crate::voting::{ValidationError, ValidationReason, clean_text};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LikeStats {
    pub average_rating: f64,
    pub total_likes: u64,
    /// Always five buckets, one per rating from 1 to 5.
    pub rating_distribution: Vec<ValueBucket>,
}

/// Reads the optional like rating and survey comment out of a vote form.
pub fn compose_feedback(input: &RawVoteInput) -> Result<Feedback, ValidationError> {
    let like_rating = match input.like_rating {
        Some(value) => Some(LikeRating::new(value).ok_or_else(|| {
            ValidationError::new("like_rating", ValidationReason::InvalidLikeRating(value))
        })?),
        None => None,
    };

    Ok(Feedback {
        like_rating,
        comment: clean_text(input.survey_comment.as_deref()),
    })
}

pub fn like_stats(survey: &Survey, likes: &[SurveyLike]) -> LikeStats {
    let ratings: Vec<u8> = likes
        .iter()
        .filter(|like| like.survey_id == survey.id)
        .filter_map(|like| like.rating.map(LikeRating::get))
        .collect();

    let rating_distribution = (LikeRating::MIN..=LikeRating::MAX)
        .map(|value| ValueBucket {
            value: f64::from(value),
            count: ratings.iter().filter(|&&rating| rating == value).count() as u64,
        })
        .collect();

    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        let sum: u64 = ratings.iter().map(|&rating| u64::from(rating)).sum();
        stats::round2(sum as f64 / ratings.len() as f64)
    };

    LikeStats {
        average_rating,
        total_likes: ratings.len() as u64,
        rating_distribution,
    }
}

/// Non-blank like comments, newest first.
pub fn feedback_comments(survey: &Survey, likes: &[SurveyLike]) -> Vec<String> {
    let mut commented: Vec<&SurveyLike> = likes
        .iter()
        .filter(|like| like.survey_id == survey.id)
        .filter(|like| like.comment.as_deref().is_some_and(|c| !c.trim().is_empty()))
        .collect();
    commented.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    commented
        .into_iter()
        .filter_map(|like| like.comment.as_deref().map(str::trim).map(str::to_string))
        .collect()
}

pub fn user_like<'a>(
    survey: &Survey,
    likes: &'a [SurveyLike],
    identity: &Identity,
) -> Option<&'a SurveyLike> {
    likes
        .iter()
        .find(|like| like.survey_id == survey.id && like.voter.is(identity))
}

pub(crate) fn feedback_like(
    survey: &Survey,
    voter: &Voter,
    feedback: &Feedback,
    now: DateTime<Utc>,
) -> SurveyLike {
    SurveyLike {
        survey_id: survey.id.clone(),
        voter: voter.clone(),
        rating: feedback.like_rating,
        comment: feedback.comment.clone(),
        created_at: now,
    }
}

/// Rates a survey without voting on it.
///
/// Likes are accepted on closed surveys too; only the identity rules of the
/// ledger apply.
pub async fn record_feedback(
    store: &dyn SurveyStore,
    survey: &Survey,
    rating: LikeRating,
    comment: Option<String>,
    identity: Option<&Identity>,
) -> Result<SurveyLike, LedgerError> {
    let voter = ledger::resolve_voter(survey, identity)?;
    let feedback = Feedback {
        like_rating: Some(rating),
        comment: clean_text(comment.as_deref()),
    };
    let like = store
        .upsert_like(&feedback_like(survey, &voter, &feedback, Utc::now()))
        .await?;
    info!(
        "Recorded like {} for survey {} by {}",
        rating.get(),
        survey.id,
        voter.kind()
    );
    Ok(like)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{QuestionType, SurveyDraft};
    use chrono::{Duration, TimeZone};

    fn survey() -> Survey {
        Survey::create(SurveyDraft::new("Feedback", QuestionType::OpenText)).unwrap()
    }

    fn like(survey: &Survey, who: &str, rating: Option<i64>, comment: Option<&str>) -> SurveyLike {
        SurveyLike {
            survey_id: survey.id.clone(),
            voter: Voter::Identified(Identity::new(who)),
            rating: rating.and_then(LikeRating::new),
            comment: comment.map(str::to_string),
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn out_of_range_like_is_rejected() {
        for value in [0, 6, -1] {
            let input = RawVoteInput {
                like_rating: Some(value),
                ..Default::default()
            };
            let err = compose_feedback(&input).unwrap_err();
            assert_eq!(err.reason, ValidationReason::InvalidLikeRating(value));
        }
    }

    #[test]
    fn stats_ignore_comment_only_likes() {
        let s = survey();
        let likes = vec![
            like(&s, "u1", Some(5), None),
            like(&s, "u2", Some(4), Some("good")),
            like(&s, "u3", Some(4), None),
            like(&s, "u4", None, Some("just a note")),
        ];
        let stats = like_stats(&s, &likes);
        assert_eq!(stats.total_likes, 3);
        assert_eq!(stats.average_rating, 4.33);
        let counts: Vec<u64> = stats.rating_distribution.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![0, 0, 0, 2, 1]);
    }

    #[test]
    fn no_likes_means_zero_average() {
        let stats = like_stats(&survey(), &[]);
        assert_eq!(stats.average_rating, 0.0);
        assert_eq!(stats.total_likes, 0);
        assert_eq!(stats.rating_distribution.len(), 5);
    }

    #[test]
    fn comments_are_newest_first_and_non_blank() {
        let s = survey();
        let mut older = like(&s, "u1", Some(3), Some("first"));
        older.created_at -= Duration::hours(1);
        let likes = vec![
            older,
            like(&s, "u2", Some(3), Some("  ")),
            like(&s, "u3", None, Some(" second ")),
        ];
        assert_eq!(feedback_comments(&s, &likes), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn standalone_feedback_is_merged() {
        let store = MemoryStore::new();
        let s = survey();
        store.create_survey(&s).await.unwrap();
        let viewer = Identity::new("u1");

        record_feedback(&store, &s, LikeRating::new(2).unwrap(), Some("meh".into()), Some(&viewer))
            .await
            .unwrap();
        let updated = record_feedback(&store, &s, LikeRating::new(5).unwrap(), None, Some(&viewer))
            .await
            .unwrap();
        assert_eq!(updated.rating, LikeRating::new(5));
        assert_eq!(updated.comment.as_deref(), Some("meh"));

        let likes = store.likes_for_survey(&s.id).await.unwrap();
        assert_eq!(likes.len(), 1);
        assert_eq!(user_like(&s, &likes, &viewer), Some(&updated));
    }

    #[tokio::test]
    async fn identified_survey_needs_identity_for_feedback() {
        let store = MemoryStore::new();
        let s = survey();
        let err = record_feedback(&store, &s, LikeRating::new(4).unwrap(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdentityRequired));
        assert_eq!(store.calls(), 0);
    }
}
