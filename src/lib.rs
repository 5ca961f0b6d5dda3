pub mod agent;
pub mod finder;
pub mod parser;
pub mod protocol;
pub mod recorder;
pub mod report;
pub mod runner;
pub mod utils;
pub mod verify;

// Re-export common items
pub use parser::{parse, parse_line, Command};
pub use protocol::Response;
pub use runner::{run_scripts, PlaybackResult, ScriptProcessor};
