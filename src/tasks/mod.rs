pub mod survey_closer;
