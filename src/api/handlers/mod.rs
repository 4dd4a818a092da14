pub mod execution;
pub mod health;
pub mod ws;
