use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::task::JoinHandle;

use cycleflow::calendar::{format_date, today};
use cycleflow::config::Config;
use cycleflow::normalize::parse_symptoms;
use cycleflow::notify::LogNotifier;
use cycleflow::recommendation::{HttpRecommendationGenerator, Recommender};
use cycleflow::remote::{HttpRemoteStore, RemoteStore};
use cycleflow::session::{parse_day, DayUpdate, Onboarding, Session, SettingsUpdate};
use cycleflow::share::ShareWindow;
use cycleflow::storage::LocalStore;
use cycleflow::sync::RemoteSync;

/// cycleflow - cycle tracking from the command line
#[derive(Parser)]
#[command(name = "cycleflow")]
#[command(about = "Track cycles, predict periods and share a read-only view", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show prediction, phase and delay status for a day
    Status {
        #[arg(long)]
        date: Option<String>,
    },
    /// Store profile and cycle basics, seeding the first cycle
    Onboard {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        email: String,
        #[arg(long, default_value_t = 28)]
        cycle_length: u32,
        #[arg(long, default_value_t = 5)]
        period_length: u32,
        /// Start of the last period (defaults to today)
        #[arg(long)]
        last_start: Option<String>,
    },
    /// Record that a period started
    MarkStart {
        #[arg(long)]
        date: Option<String>,
    },
    /// Record a period with explicit start and end
    AddCycle { start: String, end: String },
    /// Write journal fields for a day
    LogDay {
        date: String,
        #[arg(long)]
        intensity: Option<u8>,
        #[arg(long)]
        mood: Option<String>,
        /// Comma separated
        #[arg(long)]
        symptoms: Option<String>,
        #[arg(long)]
        note: Option<String>,
        /// Flip the intimacy flag
        #[arg(long)]
        intimacy: bool,
    },
    /// Change delay threshold or average lengths
    Settings {
        #[arg(long)]
        delay_threshold: Option<u32>,
        #[arg(long)]
        cycle_length: Option<u32>,
        #[arg(long)]
        period_length: Option<u32>,
        #[arg(long)]
        theme: Option<String>,
    },
    /// Silence the delay notice for two days
    Snooze,
    /// Turn reminders on and emit the current ones
    Notify,
    /// Recommendation text for a day
    Recommend {
        #[arg(long)]
        date: Option<String>,
    },
    /// Print a read-only share link
    Share,
    /// Open a share link or token and show its status
    OpenShare {
        link: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Create an account on the sync server
    Register {
        email: String,
        password: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Log in to the sync server
    Login { email: String, password: String },
    /// Forget the server session, keeping local data
    Logout,
    /// Print all data as JSON
    Export,
    /// Delete all local data
    Wipe {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.clone())?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    cycleflow::observability::init_tracing(
        &config.observability.log_level,
        config.observability.json,
    )?;

    let remote = remote_store(&config)?;
    let store = LocalStore::from_config(&config.storage)?;
    let mut session = Session::open(store)?.with_share_window(ShareWindow::from(&config.share));

    let mut worker: Option<JoinHandle<()>> = None;
    if let Some(remote) = &remote {
        let (sync, handle) = RemoteSync::spawn(
            remote.clone(),
            Duration::from_millis(config.remote.debounce_ms),
        );
        session = session.with_sync(sync);
        worker = Some(handle);

        // A share link replaces the own context, so there is nothing to restore.
        if !matches!(cli.command, Commands::OpenShare { .. }) {
            let outcome = session.restore_remote(remote.as_ref()).await?;
            tracing::debug!(?outcome, "remote restore");
        }
    }

    let result = run(cli.command, session, &config, remote.as_deref()).await;

    // Session (and with it the sync sender) is gone; let the last upload finish.
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "sync worker stopped abnormally");
        }
    }
    result
}

fn remote_store(config: &Config) -> Result<Option<Arc<dyn RemoteStore>>> {
    let Some(base_url) = config.remote.base_url.as_deref().filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    let store = HttpRemoteStore::new(base_url, Duration::from_secs(config.remote.timeout_secs))?;
    Ok(Some(Arc::new(store)))
}

fn date_or_today(value: Option<&str>) -> Result<NaiveDate> {
    Ok(match value {
        Some(value) => parse_day(value)?,
        None => today(),
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status(session: &mut Session, date: NaiveDate) -> Result<()> {
    let view = session.day_view(date);
    let phase = view.entry.phase;
    print_json(&json!({
        "date": format_date(date),
        "readOnly": session.is_read_only(),
        "owner": session.partner_owner(),
        "phase": phase,
        "day": view,
        "delayed": session.is_delayed(today()),
        "stats": session.stats(),
    }))
}

async fn run(
    command: Commands,
    mut session: Session,
    config: &Config,
    remote: Option<&dyn RemoteStore>,
) -> Result<()> {
    match command {
        Commands::Status { date } => {
            let date = date_or_today(date.as_deref())?;
            status(&mut session, date)?;
        }
        Commands::Onboard {
            name,
            email,
            cycle_length,
            period_length,
            last_start,
        } => {
            let last_start = last_start.as_deref().map(parse_day).transpose()?;
            session.complete_onboarding(
                Onboarding {
                    name,
                    email,
                    cycle_length,
                    period_length,
                    last_start,
                    ..Onboarding::default()
                },
                today(),
            )?;
            status(&mut session, today())?;
        }
        Commands::MarkStart { date } => {
            let date = date_or_today(date.as_deref())?;
            let record = session.mark_period_start(date)?;
            print_json(&serde_json::to_value(record)?)?;
        }
        Commands::AddCycle { start, end } => {
            let record = session.add_cycle(parse_day(&start)?, parse_day(&end)?)?;
            print_json(&serde_json::to_value(record)?)?;
        }
        Commands::LogDay {
            date,
            intensity,
            mood,
            symptoms,
            note,
            intimacy,
        } => {
            let date = parse_day(&date)?;
            session.save_day(
                date,
                DayUpdate {
                    intensity,
                    mood,
                    symptoms: symptoms.as_deref().map(parse_symptoms),
                    note,
                    ..DayUpdate::default()
                },
            )?;
            if intimacy {
                session.toggle_intimacy(date)?;
            }
            status(&mut session, date)?;
        }
        Commands::Settings {
            delay_threshold,
            cycle_length,
            period_length,
            theme,
        } => {
            session.update_settings(SettingsUpdate {
                theme,
                delay_threshold,
                avg_cycle_length: cycle_length,
                avg_period_length: period_length,
            })?;
            print_json(&serde_json::to_value(&session.data().settings)?)?;
        }
        Commands::Snooze => {
            let until = session.remind_later(today())?;
            println!("Delay notice silenced until {}", format_date(until));
        }
        Commands::Notify => {
            session.enable_notifications(&LogNotifier)?;
        }
        Commands::Recommend { date } => {
            let date = date_or_today(date.as_deref())?;
            session.select_date(date);
            let generator = HttpRecommendationGenerator::new(
                config.recommendation.clone(),
                Duration::from_secs(config.remote.timeout_secs),
            )?;
            let recommender = Recommender::new(Arc::new(generator));
            let session = tokio::sync::Mutex::new(session);
            let outcome = recommender.recommend(&session, date).await?;
            println!("{}", outcome.text());
        }
        Commands::Share => {
            let link = session.create_share_link(&config.share.base_url, today())?;
            println!("{link}");
        }
        Commands::OpenShare { link, date } => {
            session.enter_partner_mode(&link)?;
            let date = date_or_today(date.as_deref())?;
            status(&mut session, date)?;
        }
        Commands::Register {
            email,
            password,
            name,
        } => {
            let Some(remote) = remote else {
                bail!("remote.base_url is not configured");
            };
            session.register(remote, &email, &password, &name).await?;
            println!("Registered {}", session.data().profile.email);
        }
        Commands::Login { email, password } => {
            let Some(remote) = remote else {
                bail!("remote.base_url is not configured");
            };
            session.login(remote, &email, &password).await?;
            println!("Logged in as {}", session.data().profile.email);
        }
        Commands::Logout => {
            session.logout()?;
        }
        Commands::Export => {
            println!("{}", session.export_json()?);
        }
        Commands::Wipe { yes } => {
            if !yes {
                bail!("refusing to wipe without --yes");
            }
            session.wipe_all_data()?;
            println!("All local data deleted");
        }
    }
    Ok(())
}
