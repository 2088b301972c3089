use log::{error, info};
use std::sync::Arc;

use survey_ballot::config::Config;
use survey_ballot::db::{Database, SurveyStore};
use survey_ballot::tasks::survey_closer;

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let database: Arc<dyn SurveyStore> = match Database::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Opened survey database at {}", config.database_url);

    let closer = tokio::spawn(survey_closer::close_expired_surveys_task(
        Arc::clone(&database),
        config.closure_check_interval,
    ));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    closer.abort();
}
