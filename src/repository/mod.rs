mod connection;
mod execution_repository;
mod log_repository;

pub use connection::establish_connection;
pub use execution_repository::ExecutionRepository;
pub use log_repository::LogRepository;

pub type DbPool = sqlx::SqlitePool;
