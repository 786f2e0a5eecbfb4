use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use habit_frontend::{Tracker, TrackerView, utils};
use habit_sync::{FileStore, HttpRemote, LocalStore, SyncConfig};
use habit_utils::Frequency;

#[derive(Parser, Debug)]
#[command(version, about = "Track one habit, synced across devices", long_about = None)]
struct Args {
    /// Where the habit is stored on this device
    #[arg(long, env = "HABIT_DATA_DIR", default_value = ".habit")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current state (default)
    Show,
    /// Toggle "done" for the current period
    Done,
    /// Toggle "not done" for the current period
    NotDone {
        #[arg(short, long, default_value = "")]
        reason: String,
    },
    /// Set why the current period was not done
    Why { reason: String },
    /// Switch between daily and weekly
    Frequency { frequency: Frequency },
    /// Set the start date (YYYY-MM-DD)
    Start { date: NaiveDate },
    /// Set the counter directly
    Counter { value: i64 },
    /// Reconcile with the server now
    Sync,
    /// Forget the login and keep going local-only
    SignOut,
    /// Stay running, resyncing periodically, until ctrl-c
    Watch,
}

fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();
    utils::init_logger();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run(args))
}

async fn run(args: Args) -> Result<()> {
    let store = FileStore::open(&args.data_dir)
        .with_context(|| format!("Failed to open {}", args.data_dir.display()))?;
    let config = SyncConfig::from_env();
    let remote = HttpRemote::new(config.base_url.clone(), config.request_timeout)
        .context("Failed to build HTTP client")?;
    let tracker = Tracker::new(
        LocalStore::new(store),
        utils::identity_from_env(),
        Rc::new(remote),
        config,
    );

    match args.command.unwrap_or(Command::Show) {
        Command::Show => {}
        Command::Done => tracker.toggle_done(),
        Command::NotDone { reason } => tracker.toggle_not_done(reason),
        Command::Why { reason } => tracker.set_reason(reason),
        Command::Frequency { frequency } => tracker.set_frequency(frequency),
        Command::Start { date } => tracker.set_start_date(date),
        Command::Counter { value } => tracker.set_counter(value),
        Command::Sync => {
            if !tracker.is_signed_in() {
                anyhow::bail!("Not signed in; set HABIT_USER_ID and HABIT_TOKEN to sync");
            }
            tracker.sync_now().await?;
        }
        Command::SignOut => tracker.sign_out().await?,
        Command::Watch => return watch(&tracker).await,
    }

    // a one-shot command can't wait out the debounce
    if let Some(Err(e)) = tracker.flush().await {
        eprintln!("warning: {e}");
    }
    tracker.ensure_profile().await;
    print!("{}", render(&tracker.view()));
    Ok(())
}

async fn watch(tracker: &Tracker) -> Result<()> {
    tracker.start().await;
    let mut last = None;
    loop {
        let view = tracker.view();
        let rendered = render(&view);
        if last.as_ref() != Some(&rendered) {
            print!("{rendered}");
            last = Some(rendered);
        }
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
    }
    let _ = tracker.flush().await;
    Ok(())
}

fn render(view: &TrackerView) -> String {
    let mut out = String::new();
    let mark = if view.done {
        "done"
    } else if view.not_done {
        "not done"
    } else {
        "open"
    };
    out.push_str(&format!(
        "habit {} | {} since {} | {} ({mark})\n",
        view.version, view.frequency, view.started_date, view.period
    ));
    if let Some(reason) = &view.reason {
        out.push_str(&format!("  why: {reason}\n"));
    }
    out.push_str(&format!(
        "  {}/{} periods, {}%\n",
        view.counter, view.max_counter, view.percentage
    ));
    match (&view.identity, view.subscription_tier) {
        (Some(identity), Some(tier)) => {
            out.push_str(&format!("  signed in as {} ({tier})\n", identity.user_id))
        }
        (Some(identity), None) => out.push_str(&format!("  signed in as {}\n", identity.user_id)),
        (None, _) => out.push_str("  local only\n"),
    }
    if view.show_upgrade {
        out.push_str("  upgrade to premium for more\n");
    }
    if let Some(status) = &view.status {
        out.push_str(&format!("  {}\n", status.text));
    }
    out
}
