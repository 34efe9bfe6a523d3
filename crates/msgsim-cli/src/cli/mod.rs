pub mod config;
pub mod protocol;
pub mod session;

pub use config::CliConfig;
pub use protocol::{CliCommand, Response};
pub use session::Session;
