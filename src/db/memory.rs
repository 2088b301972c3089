use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::db::{StoreError, SurveyStore};
use crate::models::{Survey, SurveyLike, SurveyOption, VoteFact, Voter};

#[derive(Default)]
struct State {
    surveys: HashMap<String, Survey>,
    facts: Vec<VoteFact>,
    likes: Vec<SurveyLike>,
}

/// Process-local store. Every operation runs under one lock, which is what
/// makes the unique-voter check and the append atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    calls: AtomicUsize,
    fail_likes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `upsert_like` fail, to exercise feedback failures.
    pub fn failing_likes(self) -> Self {
        self.fail_likes.store(true, Ordering::SeqCst);
        self
    }

    /// Number of store operations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl SurveyStore for MemoryStore {
    async fn create_survey(&self, survey: &Survey) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state.surveys.insert(survey.id.clone(), survey.clone());
        Ok(())
    }

    async fn get_survey(&self, survey_id: &str) -> Result<Survey, StoreError> {
        let state = self.state()?;
        state
            .surveys
            .get(survey_id)
            .cloned()
            .ok_or_else(|| StoreError::SurveyNotFound(survey_id.to_string()))
    }

    async fn set_active(&self, survey_id: &str, active: bool) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let survey = state
            .surveys
            .get_mut(survey_id)
            .ok_or_else(|| StoreError::SurveyNotFound(survey_id.to_string()))?;
        let changed = survey.is_active != active;
        survey.is_active = active;
        Ok(changed)
    }

    async fn expired_surveys(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let state = self.state()?;
        let mut ids: Vec<String> = state
            .surveys
            .values()
            .filter(|survey| survey.is_active && survey.is_expired_at(now))
            .map(|survey| survey.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn has_existing_vote(&self, survey_id: &str, voter: &Voter) -> Result<bool, StoreError> {
        let state = self.state()?;
        Ok(state
            .facts
            .iter()
            .any(|fact| fact.survey_id == survey_id && &fact.voter == voter))
    }

    async fn append_facts(
        &self,
        facts: &[VoteFact],
        unique_voter: bool,
    ) -> Result<Vec<VoteFact>, StoreError> {
        let Some(first) = facts.first() else {
            return Ok(Vec::new());
        };

        let mut state = self.state()?;
        let State {
            surveys,
            facts: stored_facts,
            ..
        } = &mut *state;

        let survey = surveys
            .get_mut(&first.survey_id)
            .ok_or_else(|| StoreError::SurveyNotFound(first.survey_id.clone()))?;

        if unique_voter
            && stored_facts
                .iter()
                .any(|fact| fact.survey_id == first.survey_id && fact.voter == first.voter)
        {
            return Err(StoreError::DuplicateVoter);
        }

        let mut stored = Vec::with_capacity(facts.len());
        for fact in facts {
            let mut fact = fact.clone();
            if let (true, Some(label)) = (fact.needs_materializing(), &fact.custom_option_text) {
                let option = SurveyOption::custom(label);
                fact.option_id = Some(option.id.clone());
                survey.options.push(option);
            }
            stored.push(fact);
        }

        stored_facts.extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn facts_for_survey(&self, survey_id: &str) -> Result<Vec<VoteFact>, StoreError> {
        let state = self.state()?;
        let mut facts: Vec<VoteFact> = state
            .facts
            .iter()
            .filter(|fact| fact.survey_id == survey_id)
            .cloned()
            .collect();
        facts.sort_by_key(|fact| fact.voted_at);
        Ok(facts)
    }

    async fn upsert_like(&self, like: &SurveyLike) -> Result<SurveyLike, StoreError> {
        let mut state = self.state()?;
        if self.fail_likes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("likes are switched off".to_string()));
        }

        let existing = state
            .likes
            .iter_mut()
            .find(|stored| stored.survey_id == like.survey_id && stored.voter == like.voter);
        let merged = match existing {
            Some(stored) => {
                *stored = like.merged_into(stored);
                stored.clone()
            }
            None => {
                state.likes.push(like.clone());
                like.clone()
            }
        };
        Ok(merged)
    }

    async fn likes_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyLike>, StoreError> {
        let state = self.state()?;
        Ok(state
            .likes
            .iter()
            .filter(|like| like.survey_id == survey_id)
            .cloned()
            .collect())
    }
}
