pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    Row, Sqlite,
    migrate::MigrateDatabase,
    sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow},
};
use std::str::FromStr;
use thiserror::Error;

use crate::models::{
    ClosureType, LikeRating, QuestionType, RatingIcon, Survey, SurveyLike, SurveyOption, VoteFact,
    Voter,
};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("voter already has a vote on this survey")]
    DuplicateVoter,
    #[error("survey {0} not found")]
    SurveyNotFound(String),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port for surveys, vote facts and likes.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn create_survey(&self, survey: &Survey) -> Result<(), StoreError>;

    async fn get_survey(&self, survey_id: &str) -> Result<Survey, StoreError>;

    /// Returns whether the flag actually changed.
    async fn set_active(&self, survey_id: &str, active: bool) -> Result<bool, StoreError>;

    /// Ids of active surveys whose expiry is before `now`.
    async fn expired_surveys(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;

    async fn has_existing_vote(&self, survey_id: &str, voter: &Voter) -> Result<bool, StoreError>;

    /// Appends the facts of one vote atomically.
    ///
    /// With `unique_voter` the store re-checks that the voter has no facts yet
    /// and fails with [`StoreError::DuplicateVoter`] otherwise. Custom facts get
    /// a freshly created option; the stored facts are returned.
    async fn append_facts(
        &self,
        facts: &[VoteFact],
        unique_voter: bool,
    ) -> Result<Vec<VoteFact>, StoreError>;

    /// Facts of one survey, oldest first.
    async fn facts_for_survey(&self, survey_id: &str) -> Result<Vec<VoteFact>, StoreError>;

    /// Inserts or merges the like of (survey, voter) and returns the stored row.
    async fn upsert_like(&self, like: &SurveyLike) -> Result<SurveyLike, StoreError>;

    async fn likes_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyLike>, StoreError>;
}

fn timestamp(at: DateTime<Utc>) -> String {
    // Fixed width so TEXT comparison in SQL orders like time does.
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("failed to parse {}: {}", column, e)))
}

fn parse_column<T: FromStr<Err = String>>(raw: &str) -> Result<T, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (and creates if needed) the SQLite database at `db_url`.
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// A private database that lives as long as the returned value.
    pub async fn connect_in_memory() -> Result<Self, StoreError> {
        // Every SQLite connection to :memory: is its own database, so keep one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS surveys (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                question_type TEXT NOT NULL,
                allow_custom_options BOOLEAN NOT NULL DEFAULT FALSE,
                allow_multiple_responses BOOLEAN NOT NULL DEFAULT FALSE,
                min_value INTEGER NOT NULL,
                max_value INTEGER NOT NULL,
                scale_min_label TEXT,
                scale_max_label TEXT,
                rating_icon TEXT NOT NULL,
                closure_type TEXT NOT NULL,
                expires_at TEXT,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_anonymous BOOLEAN NOT NULL DEFAULT FALSE,
                show_results_on_close BOOLEAN NOT NULL DEFAULT FALSE,
                require_comment BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_options (
                id TEXT PRIMARY KEY,
                survey_id TEXT NOT NULL,
                text TEXT NOT NULL,
                option_order INTEGER NOT NULL,
                FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vote_facts (
                id TEXT PRIMARY KEY,
                survey_id TEXT NOT NULL,
                option_id TEXT,
                voter_kind TEXT NOT NULL,
                voter_key TEXT NOT NULL,
                numeric_value REAL,
                date_value TEXT,
                text_value TEXT,
                custom_option_text TEXT,
                is_custom_option BOOLEAN NOT NULL DEFAULT FALSE,
                voted_at TEXT NOT NULL,
                FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_vote_facts_voter
            ON vote_facts (survey_id, voter_kind, voter_key);
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_likes (
                survey_id TEXT NOT NULL,
                voter_kind TEXT NOT NULL,
                voter_key TEXT NOT NULL,
                rating INTEGER,
                comment TEXT,
                created_at TEXT NOT NULL,
                PRIMARY KEY (survey_id, voter_kind, voter_key),
                FOREIGN KEY (survey_id) REFERENCES surveys(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn insert_option(
        conn: &mut SqliteConnection,
        survey_id: &str,
        option: &SurveyOption,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO survey_options (id, survey_id, text, option_order)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&option.id)
        .bind(survey_id)
        .bind(&option.text)
        .bind(option.order)
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn voter_has_facts(
        conn: &mut SqliteConnection,
        survey_id: &str,
        voter: &Voter,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM vote_facts WHERE survey_id = ? AND voter_kind = ? AND voter_key = ? LIMIT 1",
        )
        .bind(survey_id)
        .bind(voter.kind())
        .bind(voter.key())
        .fetch_optional(conn)
        .await?;
        Ok(row.is_some())
    }

    async fn find_like(
        conn: &mut SqliteConnection,
        survey_id: &str,
        voter: &Voter,
    ) -> Result<Option<SurveyLike>, StoreError> {
        sqlx::query(
            r#"
            SELECT survey_id, voter_kind, voter_key, rating, comment, created_at
            FROM survey_likes
            WHERE survey_id = ? AND voter_kind = ? AND voter_key = ?
            "#,
        )
        .bind(survey_id)
        .bind(voter.kind())
        .bind(voter.key())
        .fetch_optional(conn)
        .await?
        .map(|row| like_from_row(&row))
        .transpose()
    }
}

fn voter_from_row(row: &SqliteRow) -> Result<Voter, StoreError> {
    let kind: String = row.try_get("voter_kind")?;
    let key: String = row.try_get("voter_key")?;
    Voter::from_parts(&kind, key)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown voter kind: {}", kind)))
}

fn survey_from_row(row: &SqliteRow, options: Vec<SurveyOption>) -> Result<Survey, StoreError> {
    let question_type: String = row.try_get("question_type")?;
    let rating_icon: String = row.try_get("rating_icon")?;
    let closure_type: String = row.try_get("closure_type")?;
    let expires_at: Option<String> = row.try_get("expires_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Survey {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        question_type: parse_column::<QuestionType>(&question_type)?,
        options,
        allow_custom_options: row.try_get("allow_custom_options")?,
        allow_multiple_responses: row.try_get("allow_multiple_responses")?,
        min_value: row.try_get("min_value")?,
        max_value: row.try_get("max_value")?,
        scale_min_label: row.try_get("scale_min_label")?,
        scale_max_label: row.try_get("scale_max_label")?,
        rating_icon: parse_column::<RatingIcon>(&rating_icon)?,
        closure_type: parse_column::<ClosureType>(&closure_type)?,
        expires_at: expires_at
            .as_deref()
            .map(|raw| parse_timestamp(raw, "expires_at"))
            .transpose()?,
        is_active: row.try_get("is_active")?,
        is_anonymous: row.try_get("is_anonymous")?,
        show_results_on_close: row.try_get("show_results_on_close")?,
        require_comment: row.try_get("require_comment")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

fn fact_from_row(row: &SqliteRow) -> Result<VoteFact, StoreError> {
    let date_value: Option<String> = row.try_get("date_value")?;
    let voted_at: String = row.try_get("voted_at")?;

    Ok(VoteFact {
        id: row.try_get("id")?,
        survey_id: row.try_get("survey_id")?,
        option_id: row.try_get("option_id")?,
        voter: voter_from_row(row)?,
        numeric_value: row.try_get("numeric_value")?,
        date_value: date_value
            .as_deref()
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|e| StoreError::Corrupt(format!("failed to parse date_value: {}", e)))
            })
            .transpose()?,
        text_value: row.try_get("text_value")?,
        custom_option_text: row.try_get("custom_option_text")?,
        is_custom_option: row.try_get("is_custom_option")?,
        voted_at: parse_timestamp(&voted_at, "voted_at")?,
    })
}

fn like_from_row(row: &SqliteRow) -> Result<SurveyLike, StoreError> {
    let rating: Option<i64> = row.try_get("rating")?;
    let created_at: String = row.try_get("created_at")?;

    let rating = match rating {
        Some(value) => Some(
            LikeRating::new(value)
                .ok_or_else(|| StoreError::Corrupt(format!("like rating {} out of range", value)))?,
        ),
        None => None,
    };

    Ok(SurveyLike {
        survey_id: row.try_get("survey_id")?,
        voter: voter_from_row(row)?,
        rating,
        comment: row.try_get("comment")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}

#[async_trait]
impl SurveyStore for Database {
    async fn create_survey(&self, survey: &Survey) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO surveys (
                id, title, description, question_type, allow_custom_options,
                allow_multiple_responses, min_value, max_value, scale_min_label,
                scale_max_label, rating_icon, closure_type, expires_at, is_active,
                is_anonymous, show_results_on_close, require_comment, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&survey.id)
        .bind(&survey.title)
        .bind(&survey.description)
        .bind(survey.question_type.as_str())
        .bind(survey.allow_custom_options)
        .bind(survey.allow_multiple_responses)
        .bind(survey.min_value)
        .bind(survey.max_value)
        .bind(&survey.scale_min_label)
        .bind(&survey.scale_max_label)
        .bind(survey.rating_icon.as_str())
        .bind(survey.closure_type.as_str())
        .bind(survey.expires_at.map(timestamp))
        .bind(survey.is_active)
        .bind(survey.is_anonymous)
        .bind(survey.show_results_on_close)
        .bind(survey.require_comment)
        .bind(timestamp(survey.created_at))
        .execute(&mut *tx)
        .await?;

        for option in &survey.options {
            Self::insert_option(&mut tx, &survey.id, option).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_survey(&self, survey_id: &str) -> Result<Survey, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, question_type, allow_custom_options,
                   allow_multiple_responses, min_value, max_value, scale_min_label,
                   scale_max_label, rating_icon, closure_type, expires_at, is_active,
                   is_anonymous, show_results_on_close, require_comment, created_at
            FROM surveys
            WHERE id = ?
            "#,
        )
        .bind(survey_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::SurveyNotFound(survey_id.to_string()))?;

        // Insertion order; display order is applied by the model.
        let options = sqlx::query(
            r#"
            SELECT id, text, option_order
            FROM survey_options
            WHERE survey_id = ?
            ORDER BY rowid
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| -> Result<SurveyOption, StoreError> {
            Ok(SurveyOption {
                id: row.try_get("id")?,
                text: row.try_get("text")?,
                order: row.try_get("option_order")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        survey_from_row(&row, options)
    }

    async fn set_active(&self, survey_id: &str, active: bool) -> Result<bool, StoreError> {
        let exists = sqlx::query("SELECT 1 FROM surveys WHERE id = ?")
            .bind(survey_id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::SurveyNotFound(survey_id.to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE surveys
            SET is_active = ?
            WHERE id = ? AND is_active != ?
            "#,
        )
        .bind(active)
        .bind(survey_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expired_surveys(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query(
            r#"
            SELECT id
            FROM surveys
            WHERE expires_at IS NOT NULL AND expires_at < ? AND is_active = TRUE
            "#,
        )
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| row.try_get::<String, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn has_existing_vote(&self, survey_id: &str, voter: &Voter) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::voter_has_facts(&mut conn, survey_id, voter).await
    }

    async fn append_facts(
        &self,
        facts: &[VoteFact],
        unique_voter: bool,
    ) -> Result<Vec<VoteFact>, StoreError> {
        let Some(first) = facts.first() else {
            return Ok(Vec::new());
        };

        // Take the write lock before the voter re-check so concurrent votes
        // queue on the busy timeout instead of failing the lock upgrade.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let exists = sqlx::query("SELECT 1 FROM surveys WHERE id = ?")
            .bind(&first.survey_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(StoreError::SurveyNotFound(first.survey_id.clone()));
        }

        if unique_voter && Self::voter_has_facts(&mut tx, &first.survey_id, &first.voter).await? {
            return Err(StoreError::DuplicateVoter);
        }

        let mut stored = Vec::with_capacity(facts.len());
        for fact in facts {
            let mut fact = fact.clone();
            if let (true, Some(label)) = (fact.needs_materializing(), &fact.custom_option_text) {
                let option = SurveyOption::custom(label);
                Self::insert_option(&mut tx, &fact.survey_id, &option).await?;
                fact.option_id = Some(option.id);
            }

            sqlx::query(
                r#"
                INSERT INTO vote_facts (
                    id, survey_id, option_id, voter_kind, voter_key, numeric_value,
                    date_value, text_value, custom_option_text, is_custom_option, voted_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&fact.id)
            .bind(&fact.survey_id)
            .bind(&fact.option_id)
            .bind(fact.voter.kind())
            .bind(fact.voter.key())
            .bind(fact.numeric_value)
            .bind(fact.date_value.map(|date| date.format("%Y-%m-%d").to_string()))
            .bind(&fact.text_value)
            .bind(&fact.custom_option_text)
            .bind(fact.is_custom_option)
            .bind(timestamp(fact.voted_at))
            .execute(&mut *tx)
            .await?;

            stored.push(fact);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn facts_for_survey(&self, survey_id: &str) -> Result<Vec<VoteFact>, StoreError> {
        sqlx::query(
            r#"
            SELECT id, survey_id, option_id, voter_kind, voter_key, numeric_value,
                   date_value, text_value, custom_option_text, is_custom_option, voted_at
            FROM vote_facts
            WHERE survey_id = ?
            ORDER BY voted_at, rowid
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(fact_from_row)
        .collect()
    }

    async fn upsert_like(&self, like: &SurveyLike) -> Result<SurveyLike, StoreError> {
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let merged = match Self::find_like(&mut tx, &like.survey_id, &like.voter).await? {
            Some(existing) => like.merged_into(&existing),
            None => like.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO survey_likes (survey_id, voter_kind, voter_key, rating, comment, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(survey_id, voter_kind, voter_key)
            DO UPDATE SET rating = excluded.rating, comment = excluded.comment
            "#,
        )
        .bind(&merged.survey_id)
        .bind(merged.voter.kind())
        .bind(merged.voter.key())
        .bind(merged.rating.map(|rating| i64::from(rating.get())))
        .bind(&merged.comment)
        .bind(timestamp(merged.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(merged)
    }

    async fn likes_for_survey(&self, survey_id: &str) -> Result<Vec<SurveyLike>, StoreError> {
        sqlx::query(
            r#"
            SELECT survey_id, voter_kind, voter_key, rating, comment, created_at
            FROM survey_likes
            WHERE survey_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(like_from_row)
        .collect()
    }
}
