//! CLI command implementations

pub mod check_config;
pub mod replay;
pub mod run;

pub use check_config::CheckConfigCommand;
pub use replay::ReplayCommand;
pub use run::RunCommand;
