use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_responder::config::ResponderConfig;
use mail_responder::ledger::{DedupLedger, SentLedger};
use mail_responder::recipients::RecipientBook;
use mail_responder::responder::{
    BulkJob, ContinuousScheduler, ReplyJob, spawn_bulk_dispatch, spawn_reply_pass,
};
use mail_responder::status::{ChannelReporter, StatusReporter};
use mail_responder::transport::{LiveTransport, MailTransport};

const LOG_FILE: &str = "mail-responder.log";

/// Mailbox auto-responder and bulk mailer
#[derive(Parser, Debug)]
#[command(name = "mail-responder", version, about)]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, env = "RESPONDER_CONFIG", default_value = "responder.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer unseen mail once and exit
    Once,

    /// Keep answering unseen mail until Ctrl-C
    Watch,

    /// Send the template to the selected recipients of the book
    Bulk {
        /// Merge an `email[,name]` text file into the book before sending
        #[arg(long)]
        import: Option<PathBuf>,

        /// Send to these addresses instead of the book selection
        #[arg(long = "to")]
        to: Vec<String>,
    },

    /// Manage the recipient book
    Recipients {
        #[command(subcommand)]
        action: RecipientCommands,
    },

    /// List senders already answered
    History,

    /// Forget every answered sender
    ClearHistory,
}

#[derive(Subcommand, Debug)]
enum RecipientCommands {
    /// Show the book
    List,

    /// Add one recipient
    Add {
        email: String,
        #[arg(default_value = "")]
        name: String,
    },

    /// Remove a recipient
    Remove { email: String },

    /// Merge an `email[,name]` text file
    Import { file: PathBuf },

    /// Include a recipient in the next dispatch
    Select { email: String },

    /// Leave a recipient out of the next dispatch
    Deselect { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _log_guard = init_tracing();

    let config = ResponderConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?
        .apply_env();

    match cli.command {
        Commands::Once => run_once(&config).await,
        Commands::Watch => watch(&config).await,
        Commands::Bulk { import, to } => bulk(&config, import.as_deref(), to).await,
        Commands::Recipients { action } => recipients(&config, action),
        Commands::History => {
            let ledger = DedupLedger::open(&config.dedup_ledger)?;
            for address in ledger.addresses() {
                println!("{address}");
            }
            eprintln!("{} sender(s) answered", ledger.len());
            Ok(())
        }
        Commands::ClearHistory => {
            let ledger = DedupLedger::open(&config.dedup_ledger)?;
            ledger.clear()?;
            eprintln!("Reply history cleared.");
            Ok(())
        }
    }
}

/// stderr for the operator, plus a plain-text log file next to the ledgers.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

/// Print statuses as they arrive. Ends once every reporter is dropped.
fn status_printer() -> (Arc<dyn StatusReporter>, JoinHandle<()>) {
    let (reporter, mut rx) = ChannelReporter::new();
    let handle = tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            eprintln!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), status);
        }
    });
    (Arc::new(reporter), handle)
}

fn reply_job(config: &ResponderConfig, status: Arc<dyn StatusReporter>) -> anyhow::Result<ReplyJob> {
    config.validate()?;
    let transport: Arc<dyn MailTransport> = Arc::new(LiveTransport);
    Ok(ReplyJob {
        transport,
        profile: config.profile()?.clone(),
        credentials: config.credentials(),
        template: config.template(),
        ledger: Arc::new(DedupLedger::open(&config.dedup_ledger)?),
        status,
    })
}

async fn run_once(config: &ResponderConfig) -> anyhow::Result<()> {
    let (status, printer) = status_printer();
    let job = reply_job(config, status)?;

    let result = spawn_reply_pass(job).await;
    let _ = printer.await;

    let summary = result??;
    tracing::debug!(?summary, "Single pass done");
    Ok(())
}

async fn watch(config: &ResponderConfig) -> anyhow::Result<()> {
    let (status, printer) = status_printer();
    let job = reply_job(config, status)?;

    let scheduler = ContinuousScheduler::new(config.scheduler_config());
    scheduler.start(job)?;
    eprintln!("Continuous mode running. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;
    eprintln!("Stopping after the current step...");
    scheduler.stop();
    scheduler.wait_stopped().await;

    drop(scheduler);
    let _ = printer.await;
    Ok(())
}

async fn bulk(
    config: &ResponderConfig,
    import: Option<&Path>,
    to: Vec<String>,
) -> anyhow::Result<()> {
    let recipients = if to.is_empty() {
        let mut book = RecipientBook::load(&config.recipients)?;
        if let Some(path) = import {
            let added = book.import_file(path)?;
            book.save(&config.recipients)?;
            eprintln!("Imported {added} recipient(s) from {}", path.display());
        }
        book.selected_addresses()
    } else {
        to.into_iter().map(|a| a.trim().to_string()).collect()
    };

    let (status, printer) = status_printer();
    let transport: Arc<dyn MailTransport> = Arc::new(LiveTransport);
    let job = BulkJob {
        transport,
        profile: config.profile()?.clone(),
        credentials: config.credentials(),
        template: config.template(),
        recipients,
        sent: Arc::new(SentLedger::new(&config.sent_ledger)),
        status,
    };

    let result = spawn_bulk_dispatch(job).await;
    let _ = printer.await;

    let summary = result??;
    if summary.failures > 0 {
        anyhow::bail!("{} of {} sends failed", summary.failures, summary.total());
    }
    Ok(())
}

fn recipients(config: &ResponderConfig, action: RecipientCommands) -> anyhow::Result<()> {
    let path = &config.recipients;
    let mut book = RecipientBook::load(path)?;

    let changed = match action {
        RecipientCommands::List => {
            for entry in book.entries() {
                let mark = if entry.selected { "x" } else { " " };
                println!("[{mark}] {} <{}>", entry.label(), entry.email);
            }
            false
        }
        RecipientCommands::Add { email, name } => {
            if !book.add(&email, &name)? {
                eprintln!("{email} is already in the list.");
            }
            true
        }
        RecipientCommands::Remove { email } => {
            if !book.remove(&email) {
                anyhow::bail!("{email} is not in the list");
            }
            true
        }
        RecipientCommands::Import { file } => {
            let added = book.import_file(&file)?;
            eprintln!("Imported {added} recipient(s)");
            true
        }
        RecipientCommands::Select { email } => select(&mut book, &email, true)?,
        RecipientCommands::Deselect { email } => select(&mut book, &email, false)?,
    };

    if changed {
        book.save(path)?;
    }
    Ok(())
}

fn select(book: &mut RecipientBook, email: &str, selected: bool) -> anyhow::Result<bool> {
    if !book.set_selected(email, selected) {
        anyhow::bail!("{email} is not in the list");
    }
    Ok(true)
}
