use capsule_core::config::ConfigOverrides;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Seal a new capsule
    ///
    /// Example: capsule add "See you in a year" --unlock-at 2027-01-01T09:00:00Z --to a@b.com
    Add {
        message: String,
        #[arg(long = "unlock-at", value_name = "RFC3339")]
        unlock_at: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "to", value_name = "EMAIL")]
        recipient: Option<String>,
        #[arg(long = "from", value_name = "NAME")]
        sender: Option<String>,
        #[arg(long = "attach", value_name = "URL")]
        attachments: Vec<String>,
    },
    /// Edit a capsule; moving the unlock time resets its notifications
    ///
    /// Example: capsule edit cap-1 --unlock-at 2027-02-01T09:00:00Z
    /// Example: capsule edit cap-1 --to ""
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        message: Option<String>,
        #[arg(long = "unlock-at", value_name = "RFC3339")]
        unlock_at: Option<String>,
        #[arg(long = "to", value_name = "EMAIL")]
        recipient: Option<String>,
        #[arg(long = "from", value_name = "NAME")]
        sender: Option<String>,
    },
    /// Delete a capsule
    ///
    /// Example: capsule delete cap-1
    Delete { id: String },
    /// Show details of a capsule
    ///
    /// Example: capsule show cap-1
    Show { id: String },
    /// List capsules, newest first
    ///
    /// Example: capsule list
    List,
    /// Show the reminder stage that would be sent right now
    ///
    /// Example: capsule stage cap-1
    Stage { id: String },
    /// Run one sweep by hand and print its counters
    ///
    /// Example: capsule sweep all
    Sweep {
        #[command(subcommand)]
        target: SweepTarget,
    },
    /// Run both sweeps on their intervals until Ctrl-C
    ///
    /// Example: capsule run
    Run,
    /// Tell the recipient a capsule is on its way
    ///
    /// Example: capsule announce cap-1
    Announce { id: String },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTarget {
    /// Notify recipients of unlocked capsules
    Unlock,
    /// Send due reminder stages
    Reminders,
    /// Unlock sweep, then reminder sweep
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    FrontendUrl,
    UnlockIntervalSecs,
    ReminderIntervalSecs,
    PreviewChars,
    Delivery,
    MailFrom,
    SpoolPath,
    LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let canonical_field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "frontend_url" | "frontend" => ConfigOverrideTarget::FrontendUrl,
        "unlock_interval_secs" | "unlock_interval" => ConfigOverrideTarget::UnlockIntervalSecs,
        "reminder_interval_secs" | "reminder_interval" => {
            ConfigOverrideTarget::ReminderIntervalSecs
        }
        "preview_chars" => ConfigOverrideTarget::PreviewChars,
        "delivery" => ConfigOverrideTarget::Delivery,
        "mail_from" => ConfigOverrideTarget::MailFrom,
        "spool_path" => ConfigOverrideTarget::SpoolPath,
        "log_level" => ConfigOverrideTarget::LogLevel,
        "resend_api_key" => {
            return Err("resend_api_key cannot be overridden on the command line".to_string());
        }
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride { target, value })
}

/// Folds every `--config-override` into one set; later entries win.
pub fn collect_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();

    for entry in raw {
        let parsed = parse_config_override(entry)?;
        let value = parsed.value;
        match parsed.target {
            ConfigOverrideTarget::FrontendUrl => overrides.frontend_url = Some(value),
            ConfigOverrideTarget::UnlockIntervalSecs => {
                overrides.unlock_interval_secs = Some(parse_number(&value, "unlock_interval_secs")?)
            }
            ConfigOverrideTarget::ReminderIntervalSecs => {
                overrides.reminder_interval_secs =
                    Some(parse_number(&value, "reminder_interval_secs")?)
            }
            ConfigOverrideTarget::PreviewChars => {
                overrides.preview_chars = Some(parse_number(&value, "preview_chars")?)
            }
            ConfigOverrideTarget::Delivery => overrides.delivery = Some(value),
            ConfigOverrideTarget::MailFrom => overrides.mail_from = Some(value),
            ConfigOverrideTarget::SpoolPath => overrides.spool_path = Some(value),
            ConfigOverrideTarget::LogLevel => overrides.log_level = Some(value),
        }
    }

    Ok(overrides)
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{field} override must be a whole number"))
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
