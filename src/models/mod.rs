pub mod content_run;
pub mod run_stage;
