//! Check-config command

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use txn_stream_config::AppConfig;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigCommand {
    /// Do not print the effective configuration
    #[arg(short, long)]
    pub quiet: bool,
}

impl CheckConfigCommand {
    pub fn execute(&self, config: AppConfig) -> anyhow::Result<()> {
        config.validate()?;

        if !self.quiet {
            let rendered =
                serde_yaml::to_string(&config).context("rendering effective configuration")?;
            println!("{}", rendered);
        }
        eprintln!("{}", "Configuration is valid".green().bold());
        Ok(())
    }
}
