use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::db::{StoreError, SurveyStore};

/// Deactivates every active survey whose expiry passed before `now`.
/// Returns how many surveys were closed.
pub async fn close_expired_surveys(
    store: &dyn SurveyStore,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let expired = store.expired_surveys(now).await?;
    if expired.is_empty() {
        return Ok(0);
    }
    info!("Found {} expired survey(s).", expired.len());

    let mut closed = 0;
    for survey_id in expired {
        match store.set_active(&survey_id, false).await {
            Ok(true) => {
                info!("Closed expired survey {}", survey_id);
                closed += 1;
            }
            Ok(false) => debug!("Survey {} was already closed", survey_id),
            Err(e) => warn!("Failed to close expired survey {}: {}", survey_id, e),
        }
    }
    Ok(closed)
}

pub async fn close_expired_surveys_task(store: Arc<dyn SurveyStore>, check_interval: Duration) {
    info!(
        "Starting background task to close expired surveys every {}s...",
        check_interval.as_secs()
    );
    let mut interval = interval(check_interval);

    loop {
        interval.tick().await;
        let now = Utc::now();
        debug!("Checking for expired surveys at {}", now.to_rfc3339());

        if let Err(e) = close_expired_surveys(store.as_ref(), now).await {
            error!("Failed to query for expired surveys: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{ClosureType, QuestionType, Survey, SurveyDraft};
    use chrono::Duration as ChronoDuration;

    fn scheduled(expires_in: ChronoDuration) -> Survey {
        let mut draft = SurveyDraft::new("Timed", QuestionType::OpenText);
        draft.closure_type = ClosureType::Scheduled;
        draft.expires_at = Some(Utc::now() + expires_in);
        Survey::create(draft).unwrap()
    }

    #[tokio::test]
    async fn only_expired_surveys_are_closed() {
        let store = MemoryStore::new();
        let expired = scheduled(ChronoDuration::minutes(-1));
        let running = scheduled(ChronoDuration::hours(1));
        store.create_survey(&expired).await.unwrap();
        store.create_survey(&running).await.unwrap();

        let now = Utc::now();
        assert_eq!(close_expired_surveys(&store, now).await.unwrap(), 1);
        assert!(!store.get_survey(&expired.id).await.unwrap().is_active);
        assert!(store.get_survey(&running.id).await.unwrap().is_active);

        assert_eq!(close_expired_surveys(&store, now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn task_sweeps_on_each_tick() {
        let store = Arc::new(MemoryStore::new());
        let expired = scheduled(ChronoDuration::minutes(-1));
        store.create_survey(&expired).await.unwrap();

        let handle = tokio::spawn(close_expired_surveys_task(
            store.clone(),
            Duration::from_secs(60),
        ));
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert!(!store.get_survey(&expired.id).await.unwrap().is_active);
    }
}
