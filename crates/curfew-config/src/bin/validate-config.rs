//! Config validation CLI tool
//!
//! Validates a curfewd configuration file and reports any errors.

use curfew_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a curfewd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match curfew_config::load_config(&config_path) {
        Ok(policy) => {
            let engine = &policy.engine;
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", curfew_config::CURRENT_CONFIG_VERSION);
            println!("  Timezone: {}", engine.timezone);
            println!("  Grace period: {}", format_duration(engine.grace_period));
            println!("  Reminder lead: {}", format_duration(engine.reminder_lead));
            println!("  Exempt subjects: {}", engine.exempt.len());
            println!();
            println!("Appeals:");
            println!("  Open {} before start", format_duration(engine.appeals.lead));
            println!(
                "  {} attempts, {:.0}% grant odds, {} cooldown",
                engine.appeals.max_attempts,
                engine.appeals.grant_probability * 100.0,
                format_duration(engine.appeals.cooldown)
            );
            let schedule: Vec<String> = engine
                .appeals
                .extensions
                .iter()
                .map(|d| format_duration(*d))
                .collect();
            println!("  Extensions: {}", schedule.join(", "));
            println!();
            match &policy.narrative.endpoint {
                Some(endpoint) => println!(
                    "Narrative: {} ({}, {}/day)",
                    endpoint, policy.narrative.model, policy.narrative.daily_quota
                ),
                None => println!("Narrative: disabled (fallback lines only)"),
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                curfew_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                curfew_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                curfew_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                curfew_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        curfew_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
