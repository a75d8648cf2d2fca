//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat, SecretKind};
use crate::config;
use crate::error::CliError;
use crate::output;

/// Map an interactive prompt failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Keyring entry name for a `set-password` target.
fn keyring_key(
    cfg: &ispnet_config::Config,
    target: &str,
    kind: SecretKind,
) -> Result<(String, &'static str), CliError> {
    match target {
        "radius" => return Ok((ispnet_config::RADIUS_SECRET_KEY.to_owned(), "RADIUS secret")),
        "backup" => return Ok((ispnet_config::BACKUP_KEY.to_owned(), "backup encryption key")),
        _ => {}
    }
    cfg.device(target)?;
    Ok(match kind {
        SecretKind::Password => (ispnet_config::password_key(target), "password"),
        SecretKind::Community => (ispnet_config::community_key(target), "SNMP community"),
        SecretKind::Auth => (ispnet_config::auth_key(target), "SNMPv3 auth password"),
        SecretKind::Priv => (ispnet_config::priv_key(target), "SNMPv3 privacy password"),
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init { force } => {
            let path = config::config_path(global);
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists (use --force to overwrite)", path.display()),
                });
            }
            ispnet_config::save_config_to(&path, &ispnet_config::sample_config())?;
            if !global.quiet {
                eprintln!("Wrote starter config to {}", path.display());
                eprintln!("Store the router password with: ispnet config set-password core-1");
            }
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?.redacted();
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Serialization(e.to_string()))?,
                _ => output::render_single(&global.output, &cfg, |_| String::new(), |_| {
                    String::new()
                })?,
            };
            output::print_output(out.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path(global).display().to_string(), false);
            Ok(())
        }

        ConfigCommand::SetPassword { target, secret } => {
            let cfg = config::load(global)?;
            let (key, label) = keyring_key(&cfg, &target, secret)?;

            let secret = rpassword::prompt_password(format!("{target} {label}: "))
                .map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: label.into(),
                    reason: "cannot be empty".into(),
                });
            }

            ispnet_config::store_secret(&key, &secret)?;
            if !global.quiet {
                eprintln!("{label} for {target} stored in the system keyring");
            }
            Ok(())
        }
    }
}
