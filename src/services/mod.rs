pub mod execution_service;
pub mod notification_hub;
pub mod output_recorder;
pub mod progress_parser;
pub mod script_execution_service;

pub use execution_service::ExecutionService;
pub use notification_hub::NotificationHub;
pub use output_recorder::OutputRecorder;
pub use script_execution_service::{RunSettings, ScriptExecutionService};
