pub mod config;
pub mod db;
pub mod ledger;
pub mod likes;
pub mod models;
pub mod tasks;
pub mod voting;

pub use db::{Database, MemoryStore, StoreError, SurveyStore};
pub use ledger::{FeedbackOutcome, LedgerError, VoteReceipt, record_vote};
pub use likes::{LikeStats, like_stats, record_feedback};
pub use voting::{
    ResultsView, SurveyStats, ValidationError, ValidationReason, aggregate_results, survey_stats,
    validate_vote,
};
