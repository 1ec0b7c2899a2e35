//! Warden - multi-tenant identity provider engine
//!
//! Operator tool for checking configuration, authenticating principals,
//! resolving group membership and validating client certificates.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use warden_core::config::LoggingConfig;
use warden_core::WardenConfig;

use commands::CommandContext;

#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Warden Team")]
#[command(version = warden_core::VERSION)]
#[command(about = "Multi-tenant identity provider engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate the configuration
    CheckConfig,

    /// Authenticate a principal with a password
    Authenticate {
        #[arg(long)]
        tenant: String,

        /// Principal as name@domain or DOMAIN\name
        #[arg(long)]
        user: String,

        #[arg(long, env = "WARDEN_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Look up a user
    User {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        user: String,
    },

    /// List the groups a principal belongs to
    Groups {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        user: String,

        /// Include groups reached through nesting
        #[arg(long)]
        nested: bool,
    },

    /// Read claim values for a principal
    Attributes {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        user: String,

        /// Claim names to read
        #[arg(required = true)]
        claims: Vec<String>,
    },

    /// Validate a client certificate against the tenant's policy
    ValidateCert {
        #[arg(long)]
        tenant: String,

        /// PEM file with the leaf certificate, optionally followed by intermediates
        cert: PathBuf,

        /// Additional PEM files holding intermediates
        #[arg(long)]
        chain: Vec<PathBuf>,
    },
}

fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::from_env()?,
    };

    init_logging(&config.logging, cli.log_level.as_deref());

    let ctx = CommandContext::new(config, cli.output);

    match cli.command {
        Commands::CheckConfig => commands::config::execute(&ctx),
        Commands::Authenticate {
            tenant,
            user,
            password,
        } => commands::directory::authenticate(&ctx, &tenant, &user, &password).await,
        Commands::User { tenant, user } => commands::directory::user(&ctx, &tenant, &user).await,
        Commands::Groups {
            tenant,
            user,
            nested,
        } => commands::directory::groups(&ctx, &tenant, &user, nested).await,
        Commands::Attributes {
            tenant,
            user,
            claims,
        } => commands::directory::attributes(&ctx, &tenant, &user, &claims).await,
        Commands::ValidateCert {
            tenant,
            cert,
            chain,
        } => commands::cert::execute(&ctx, &tenant, &cert, &chain).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_groups() {
        let cli = Cli::try_parse_from([
            "warden", "groups", "--tenant", "acme", "--user", "jdoe@acme.local", "--nested",
            "-o", "json",
        ])
        .unwrap();
        assert!(matches!(cli.output, OutputFormat::Json));
        match cli.command {
            Commands::Groups { tenant, user, nested } => {
                assert_eq!(tenant, "acme");
                assert_eq!(user, "jdoe@acme.local");
                assert!(nested);
            }
            _ => panic!("expected groups command"),
        }
    }

    #[test]
    fn test_attributes_require_claims() {
        assert!(Cli::try_parse_from(["warden", "attributes", "--tenant", "acme", "--user", "jdoe"]).is_err());
    }
}
