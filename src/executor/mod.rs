pub mod command;
pub mod process;
pub mod stream_drain;

pub use command::build_command;
pub use process::{CommandSpec, ProcessHandle, ProcessHost, TokioProcessHost};
pub use stream_drain::StreamDrain;
