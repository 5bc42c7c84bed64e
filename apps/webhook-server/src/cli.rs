//! Command-line argument parsing

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "webhook-server",
    about = "Webhook Delivery Server",
    version,
    long_about = "A multi-replica-safe webhook delivery pipeline: signed intake, \
                  durable event storage, rate-limited delivery with exponential backoff."
)]
pub struct Args {
    /// HTTP server port
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Environment (dev, staging, prod)
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "dev",
        value_parser = ["dev", "staging", "prod"]
    )]
    pub env: String,

    /// Enable JSON log format (useful for production)
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert()
    }
}
