use capsule_cli::cli::{Cli, Command, SweepTarget, collect_config_overrides};
use capsule_core::capsule_api::{self, CapsuleEdit, NewCapsule};
use capsule_core::config::{
    Config, apply_env_overrides, load_config_with_fallback, merge_overrides,
};
use capsule_core::delivery::{DeliveryChannel, channel_from_config};
use capsule_core::error::AppError;
use capsule_core::model::{Capsule, CapsuleStatus};
use capsule_core::storage::{CapsuleStore, JsonCapsuleStore};
use capsule_core::sweep::{
    ReminderScheduler, SchedulingDriver, SweepReport, SweepSettings, UnlockNotifier,
};
use clap::Parser;
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::OffsetDateTime;

#[derive(Tabled)]
struct CapsuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "To")]
    recipient: String,
    #[tabled(rename = "Unlocks")]
    unlock_at: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Reminders")]
    reminders: String,
}

fn status_label(status: Option<CapsuleStatus>) -> &'static str {
    match status {
        Some(CapsuleStatus::Locked) => "locked",
        Some(CapsuleStatus::Due) => "due",
        Some(CapsuleStatus::Notified) => "notified",
        None => "invalid unlock time",
    }
}

fn reminders_label(capsule: &Capsule) -> String {
    if capsule.reminders_sent.is_empty() {
        return "-".to_string();
    }
    capsule
        .reminders_sent
        .iter()
        .map(|stage| stage.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn capsule_json(capsule: &Capsule, now: OffsetDateTime) -> serde_json::Value {
    serde_json::json!({
        "id": capsule.id,
        "title": capsule.title,
        "message": capsule.message,
        "recipient": capsule.recipient,
        "sender": capsule.sender,
        "unlock_at": capsule.unlock_at,
        "status": status_label(capsule_api::capsule_status(capsule, now)),
        "notified": capsule.notified,
        "notified_at": capsule.notified_at,
        "reminders_sent": capsule.reminders_sent,
        "attachments": capsule.attachments,
        "share_token": capsule.share_token,
        "created_at": capsule.created_at,
    })
}

fn print_capsule(label: &str, capsule: &Capsule, json: bool) {
    if json {
        println!("{}", capsule_json(capsule, OffsetDateTime::now_utc()));
    } else {
        println!("{label}: {} ({})", capsule.id, capsule.unlock_at);
    }
}

fn print_capsule_details(capsule: &Capsule) {
    let now = OffsetDateTime::now_utc();
    println!("ID:        {}", capsule.id);
    println!("Title:     {}", capsule.title.as_deref().unwrap_or("-"));
    println!("From:      {}", capsule.sender.as_deref().unwrap_or("-"));
    println!("To:        {}", capsule.recipient.as_deref().unwrap_or("-"));
    println!("Unlocks:   {}", capsule.unlock_at);
    println!("Status:    {}", status_label(capsule_api::capsule_status(capsule, now)));
    println!("Reminders: {}", reminders_label(capsule));
    if let Some(notified_at) = capsule.notified_at.as_deref() {
        println!("Notified:  {notified_at}");
    }
    for attachment in &capsule.attachments {
        println!("Attached:  {} ({})", attachment.file_name, attachment.file_url);
    }
    println!();
    println!("{}", capsule.message);
}

fn print_capsules(capsules: &[Capsule], json: bool) {
    let now = OffsetDateTime::now_utc();
    if json {
        let payload = capsules
            .iter()
            .map(|capsule| capsule_json(capsule, now))
            .collect();
        println!("{}", serde_json::Value::Array(payload));
        return;
    }

    if capsules.is_empty() {
        println!("No capsules.");
        return;
    }

    let rows = capsules.iter().map(|capsule| CapsuleRow {
        id: capsule.id.clone(),
        title: capsule.title.clone().unwrap_or_else(|| "-".to_string()),
        recipient: capsule.recipient.clone().unwrap_or_else(|| "-".to_string()),
        unlock_at: capsule.unlock_at.clone(),
        status: status_label(capsule_api::capsule_status(capsule, now)),
        reminders: reminders_label(capsule),
    });
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

fn print_report(name: &str, report: SweepReport, json: bool) {
    match (report.summary(), json) {
        (Some(summary), true) => {
            println!("{}", serde_json::json!({ "sweep": name, "summary": summary }))
        }
        (Some(summary), false) => println!(
            "{name}: scanned={} sent={} skipped={} failed={}",
            summary.scanned, summary.sent, summary.skipped, summary.failed
        ),
        (None, true) => println!("{}", serde_json::json!({ "sweep": name, "skipped": true })),
        (None, false) => println!("{name}: already running"),
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn init_logging(config: &Config) {
    let env = env_logger::Env::default().filter_or("CAPSULE_LOG", config.log_level());
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn load_config(cli: &Cli) -> Result<Config, AppError> {
    let load = load_config_with_fallback();
    let overrides =
        collect_config_overrides(&cli.config_override).map_err(AppError::invalid_input)?;
    let config = merge_overrides(&apply_env_overrides(&load.config), &overrides);

    init_logging(&config);
    if let Some(err) = load.error {
        log::warn!("event=config_load_failed error=\"{err}\" fallback=defaults");
    }

    Ok(config)
}

struct Services {
    store: Arc<dyn CapsuleStore>,
    channel: Arc<dyn DeliveryChannel>,
    settings: SweepSettings,
}

impl Services {
    fn from_config(config: &Config) -> Result<Self, AppError> {
        Ok(Self {
            store: Arc::new(JsonCapsuleStore::from_env()?),
            channel: channel_from_config(config)?,
            settings: SweepSettings::from_config(config),
        })
    }

    fn unlock_notifier(&self) -> UnlockNotifier {
        UnlockNotifier::new(
            Arc::clone(&self.store),
            Arc::clone(&self.channel),
            self.settings.clone(),
        )
    }

    fn reminder_scheduler(&self) -> ReminderScheduler {
        ReminderScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.channel),
            self.settings.clone(),
        )
    }
}

fn run_driver(config: &Config, services: Services) -> Result<(), AppError> {
    let driver = SchedulingDriver::new()
        .with_task(Arc::new(services.unlock_notifier()), config.unlock_interval())
        .with_task(
            Arc::new(services.reminder_scheduler()),
            config.reminder_interval(),
        );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::io(err.to_string()))?;

    runtime.block_on(driver.run_until(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("event=signal_listener_failed error=\"{err}\"");
        }
    }));
    log::info!("event=driver_stopped");
    Ok(())
}

fn run_command(cli: Cli) -> Result<(), AppError> {
    let config = load_config(&cli)?;
    let json = cli.json;

    match cli.command {
        Command::Add {
            message,
            unlock_at,
            title,
            recipient,
            sender,
            attachments,
        } => {
            let capsule = capsule_api::add_capsule(&NewCapsule {
                title,
                message,
                unlock_at,
                recipient,
                sender,
                attachment_urls: attachments,
            })?;
            print_capsule("Sealed capsule", &capsule, json);
        }
        Command::Edit {
            id,
            title,
            message,
            unlock_at,
            recipient,
            sender,
        } => {
            let capsule = capsule_api::edit_capsule(
                &id,
                &CapsuleEdit {
                    title,
                    message,
                    unlock_at,
                    recipient,
                    sender,
                },
            )?;
            print_capsule("Updated capsule", &capsule, json);
        }
        Command::Delete { id } => {
            let capsule = capsule_api::delete_capsule(&id)?;
            print_capsule("Deleted capsule", &capsule, json);
        }
        Command::Show { id } => {
            let capsule = capsule_api::get_capsule(&id)?;
            if json {
                println!("{}", capsule_json(&capsule, OffsetDateTime::now_utc()));
            } else {
                print_capsule_details(&capsule);
            }
        }
        Command::List => {
            let capsules = capsule_api::list_capsules()?;
            print_capsules(&capsules, json);
        }
        Command::Stage { id } => {
            let capsule = capsule_api::get_capsule(&id)?;
            let stage = capsule_api::next_stage(&capsule, OffsetDateTime::now_utc());
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "id": capsule.id, "stage": stage })
                );
            } else {
                let label = stage.map(|stage| stage.as_str()).unwrap_or("none");
                println!("{}: {label}", capsule.id);
            }
        }
        Command::Sweep { target } => {
            let services = Services::from_config(&config)?;
            if matches!(target, SweepTarget::Unlock | SweepTarget::All) {
                let report = services.unlock_notifier().run_sweep_once()?;
                print_report("unlock", report, json);
            }
            if matches!(target, SweepTarget::Reminders | SweepTarget::All) {
                let report = services.reminder_scheduler().run_sweep_once()?;
                print_report("reminders", report, json);
            }
        }
        Command::Run => {
            let services = Services::from_config(&config)?;
            run_driver(&config, services)?;
        }
        Command::Announce { id } => {
            let capsule = capsule_api::get_capsule(&id)?;
            let services = Services::from_config(&config)?;
            let delivery =
                capsule_api::announce_capsule(&capsule, services.channel.as_ref(), &services.settings)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "id": capsule.id, "delivery_id": delivery.0 })
                );
            } else {
                println!("Announced capsule: {} (delivery {})", capsule.id, delivery.0);
            }
        }
    }

    Ok(())
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            // --help and --version
            let _ = err.print();
            return;
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_command(cli) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
