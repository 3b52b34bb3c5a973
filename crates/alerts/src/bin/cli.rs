//! VeciSafe CLI - report incidents and follow nearby alerts from a terminal.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use alerts::{
    Alert, AlertAmendment, AlertError, AlertId, AlertService, Backends, Classification, Config,
    DeliveryStatus, DispatchReport, FileAlertStore, FileDeliveryStore, FileSessionStore, GeoIndex,
    GeoPoint, LogVerificationSender, MediaKind, MediaRef, RecencyFilter, Report, Session,
    SessionPhase, SubscriberRecord, SystemClock,
};

const SUBSCRIBERS_FILE: &str = "subscribers.json";

#[derive(Parser)]
#[command(name = "vecisafe")]
#[command(about = "Neighborhood-safety alerts: report incidents, get notified nearby", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the alert ledger, deliveries, sessions and subscribers
    #[arg(long, global = true, env = "VECISAFE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Device key the session is stored under
    #[arg(long, global = true, default_value = "default")]
    device: String,

    /// JSON config file (fields override the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage this device's session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Register this device's location for notifications
    Locate {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
    },

    /// Turn notifications off for this device
    Unsubscribe,

    /// Report an incident at a location
    Report {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Classification (general, robbery, assault, suspicious, other)
        #[arg(short = 't', long = "type", default_value = "general")]
        classification: String,

        /// Free-text details
        #[arg(short, long, default_value = "")]
        details: String,

        /// Photo reference (repeatable)
        #[arg(long)]
        photo: Vec<String>,

        /// Video reference (repeatable)
        #[arg(long)]
        video: Vec<String>,

        /// Return without waiting for notifications to go out
        #[arg(long)]
        no_wait: bool,
    },

    /// Change classification or details of one of your alerts
    Amend {
        /// Alert ID
        #[arg(short, long)]
        id: String,

        #[arg(short = 't', long = "type")]
        classification: Option<String>,

        #[arg(short, long)]
        details: Option<String>,
    },

    /// Show the most recent alerts
    Recent {
        #[arg(short = 'n', long, default_value_t = 3)]
        count: usize,
    },

    /// Show the alert feed
    Feed {
        /// 24h, week or all
        #[arg(short, long, default_value = "all")]
        filter: String,
    },

    /// Alerts near a point
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Radius in meters
        #[arg(short, long, default_value_t = 500.0)]
        radius: f64,

        /// 24h, week or all
        #[arg(short, long, default_value = "all")]
        filter: String,
    },

    /// Alert counters
    Stats,

    /// Finish notifications left pending by an interrupted run
    Resume,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the current session
    Show,

    /// Send a verification code to a phone number
    RequestCode {
        #[arg(short, long)]
        phone: String,
    },

    /// Confirm the verification code
    Verify {
        #[arg(short, long)]
        code: String,
    },

    /// Sign out and start a fresh anonymous session
    SignOut,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Err(e) = run(cli).await {
        print_error(&format!("{e:#}"));
        if let Some(field) = e.downcast_ref::<AlertError>().and_then(AlertError::field) {
            print_info(&format!("Check the '{field}' value"));
        }
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let mut filter = EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into());
    // Verification codes are only delivered through the log here.
    if let Ok(directive) = "alerts::session=info".parse() {
        filter = filter.add_directive(directive);
    }

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    let data_dir = config.data_dir.clone();

    let subscribers = load_subscribers(&data_dir).await?;
    let geo = Arc::new(GeoIndex::from_records(config.geo_cell_degrees, subscribers)?);
    let backends = Backends {
        alerts: Arc::new(FileAlertStore::open(&data_dir).await?),
        sessions: Arc::new(FileSessionStore::new(&data_dir)),
        verification: Arc::new(LogVerificationSender),
        push: push::from_env(),
        deliveries: Arc::new(FileDeliveryStore::open(&data_dir).await?),
        geo: geo.clone(),
        clock: Arc::new(SystemClock),
    };
    let service = AlertService::new(config, backends)?;
    let session = service.sessions().restore(&cli.device).await?;
    let session_id = session.session_id;

    match cli.command {
        Commands::Session { action } => match action {
            SessionAction::Show => {
                let subscription = geo.get(&session_id).await;
                print_session(&session, subscription.as_ref());
            }
            SessionAction::RequestCode { phone } => {
                service
                    .sessions()
                    .request_verification(&session_id, &phone)
                    .await?;
                print_success("Verification code sent");
            }
            SessionAction::Verify { code } => {
                let session = service
                    .sessions()
                    .confirm_verification(&session_id, &code)
                    .await?;
                print_success("Phone number verified");
                print_session(&session, geo.get(&session_id).await.as_ref());
            }
            SessionAction::SignOut => {
                let fresh = service.sessions().sign_out(&session_id).await?;
                save_subscribers(&data_dir, &geo).await?;
                print_success(&format!("Signed out, new session {}", fresh.session_id));
            }
        },

        Commands::Locate { lat, lon } => {
            service
                .update_location(&session_id, GeoPoint::new(lat, lon))
                .await?;
            save_subscribers(&data_dir, &geo).await?;
            print_success(&format!(
                "Notifications on for alerts within {} m of ({:.4}, {:.4})",
                service.config().notification_radius_m,
                lat,
                lon
            ));
        }

        Commands::Unsubscribe => {
            if service.unsubscribe(&session_id).await {
                save_subscribers(&data_dir, &geo).await?;
                print_success("Notifications off");
            } else {
                print_warning("Notifications were already off");
            }
        }

        Commands::Report {
            lat,
            lon,
            classification,
            details,
            photo,
            video,
            no_wait,
        } => {
            let classification: Classification = classification.parse()?;
            let media = photo
                .into_iter()
                .map(|uri| MediaRef {
                    kind: MediaKind::Photo,
                    uri,
                })
                .chain(video.into_iter().map(|uri| MediaRef {
                    kind: MediaKind::Video,
                    uri,
                }))
                .collect();

            let reported = service
                .report_alert(
                    &session_id,
                    Report::new(GeoPoint::new(lat, lon), classification, details).with_media(media),
                    &CancellationToken::new(),
                )
                .await?;
            save_subscribers(&data_dir, &geo).await?;

            print_success(&format!("Alert {} reported", reported.alert.id));
            print_alert(&reported.alert);

            let Some(handle) = reported.dispatch else {
                print_warning("Notifications could not be scheduled");
                return Ok(());
            };
            if no_wait {
                print_info(&format!(
                    "{} nearby subscribers queued, run 'vecisafe resume' to deliver",
                    handle.intents().len()
                ));
                return Ok(());
            }

            let alert_id = handle.alert_id();
            let report = tokio::select! {
                report = handle.wait() => report?,
                _ = tokio::signal::ctrl_c() => {
                    service.shutdown();
                    print_warning("Interrupted, run 'vecisafe resume' to finish notifications");
                    return Ok(());
                }
            };
            print_notifications(&service, &[alert_id], report).await?;
        }

        Commands::Amend {
            id,
            classification,
            details,
        } => {
            let amendment = AlertAmendment {
                classification: classification.map(|c| c.parse()).transpose()?,
                details,
            };
            if amendment.is_empty() {
                print_warning("Nothing to change (use --type or --details)");
                return Ok(());
            }
            let alert = service
                .amend_alert(&session_id, &id.parse()?, &amendment)
                .await?;
            print_success("Alert updated");
            print_alert(&alert);
        }

        Commands::Recent { count } => {
            print_alerts("Recent alerts", &service.recent(count).await?);
        }

        Commands::Feed { filter } => {
            let filter: RecencyFilter = filter.parse()?;
            print_alerts(&format!("Alerts ({filter})"), &service.feed(filter).await?);
        }

        Commands::Nearby {
            lat,
            lon,
            radius,
            filter,
        } => {
            let filter: RecencyFilter = filter.parse()?;
            let alerts = service
                .nearby_alerts(GeoPoint::new(lat, lon), radius, filter.window(Utc::now()))
                .await?;
            print_alerts(&format!("Alerts within {radius} m ({filter})"), &alerts);
        }

        Commands::Stats => {
            let stats = service.stats().await?;
            println!("{}", "Alert statistics".bold().underline());
            println!("  {}: {}", "Total".cyan(), stats.total);
            println!("  {}: {}", "Today".cyan(), stats.today);
        }

        Commands::Resume => {
            let handles = service.resume_deliveries().await?;
            if handles.is_empty() {
                print_info("No pending deliveries");
                return Ok(());
            }

            let alert_ids: Vec<AlertId> = handles
                .iter()
                .map(alerts::DispatchHandle::alert_id)
                .collect();
            let mut total = DispatchReport::default();
            for handle in handles {
                let report = tokio::select! {
                    report = handle.wait() => report?,
                    _ = tokio::signal::ctrl_c() => {
                        service.shutdown();
                        print_warning("Interrupted, remaining notifications left pending");
                        return Ok(());
                    }
                };
                total.sent += report.sent;
                total.exhausted += report.exhausted;
                total.pending += report.pending;
            }
            print_notifications(&service, &alert_ids, total).await?;
        }
    }

    Ok(())
}

async fn load_subscribers(data_dir: &Path) -> Result<Vec<SubscriberRecord>> {
    let path = data_dir.join(SUBSCRIBERS_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("Corrupt subscriber snapshot '{}'", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Cannot read '{}'", path.display())),
    }
}

async fn save_subscribers(data_dir: &Path, geo: &GeoIndex) -> Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join(SUBSCRIBERS_FILE);
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(&geo.snapshot().await)?;
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

async fn print_notifications(
    service: &AlertService,
    alert_ids: &[AlertId],
    report: DispatchReport,
) -> Result<()> {
    println!();
    println!("{}", "Notifications".bold().underline());
    println!("  {}: {}", "Sent".green(), report.sent);
    println!("  {}: {}", "Exhausted".red(), report.exhausted);
    println!("  {}: {}", "Pending".yellow(), report.pending);
    for alert_id in alert_ids {
        for intent in service.dispatcher().intents(alert_id).await? {
            if intent.status == DeliveryStatus::Exhausted {
                println!(
                    "  {} {} after {} attempts: {}",
                    "✗".red(),
                    intent.recipient_session_id.to_string().dimmed(),
                    intent.attempt,
                    intent.last_error.unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn print_session(session: &Session, subscription: Option<&SubscriberRecord>) {
    let phase = match session.phase {
        SessionPhase::Anonymous => session.phase.to_string().yellow(),
        SessionPhase::PendingVerification => session.phase.to_string().cyan(),
        SessionPhase::Verified => session.phase.to_string().green(),
    };
    println!("{}", "Session".bold().underline());
    println!("  ID: {}", session.session_id);
    println!("  Phase: {phase}");
    println!("  Created: {}", format_time(session.created_at));
    if let Some(pending) = &session.pending {
        println!(
            "  Code expires: {} ({} failed attempts)",
            format_time(pending.expires_at),
            pending.attempts
        );
    }
    match subscription {
        Some(record) => println!("  Notifications: on at {}", record.location),
        None => println!("  Notifications: {}", "off".dimmed()),
    }
}

fn print_alerts(title: &str, alerts: &[Alert]) {
    println!("{}", title.bold().underline());
    if alerts.is_empty() {
        println!("  {}", "No alerts".dimmed());
        return;
    }
    for alert in alerts {
        print_alert(alert);
    }
}

fn print_alert(alert: &Alert) {
    let classification = match alert.classification {
        Classification::Robbery | Classification::Assault => {
            alert.classification.to_string().red().bold()
        }
        Classification::Suspicious => alert.classification.to_string().yellow(),
        Classification::General | Classification::Other => {
            alert.classification.to_string().normal()
        }
    };
    println!(
        "  {} {} {} {}",
        format_time(alert.created_at).dimmed(),
        classification,
        alert.location,
        alert.id.to_string().dimmed()
    );
    if !alert.details.is_empty() {
        println!("      {}", alert.details);
    }
    for media in &alert.media_refs {
        println!("      {:?}: {}", media.kind, media.uri);
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}
