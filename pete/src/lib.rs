//! Command-line front end: questions from stdin, answers through the speakers.

pub mod cli;
pub mod logging;
pub mod session;

pub use cli::{Cli, DeviceKind, TtsEngine};
pub use logging::init_logging;
pub use session::{run_session, SessionSummary};
