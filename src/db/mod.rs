#[cfg(test)]
pub mod mock_db;
pub mod postgres_run_repository;
pub mod run_repository;
