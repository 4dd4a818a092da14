pub mod execution;
pub mod execution_log;

pub use execution::{Execution, ExecutionStatus};
pub use execution_log::{ExecutionLog, LogKind};
