mod ai;
mod classify;
mod db;
mod extract;
mod gmail;
mod merge;
mod models;
mod stats;
mod sync;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use db::Store;
use extract::Extractor;
use gmail::GmailClient;
use models::{AppStatus, ApplicationRec, CandidateProfile};
use sync::{SyncEngine, SyncOptions};

#[derive(Parser)]
#[command(name = "jobtrail")]
#[command(about = "Track job applications from Gmail - classify, dedup, and score application emails")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local store
    Init,

    /// Fetch application emails from Gmail and merge them into records
    Sync {
        /// Path to a file holding a Gmail OAuth access token
        #[arg(short, long, default_value = "~/.gmail_token")]
        token_file: String,

        /// Number of days to look back
        #[arg(short, long, default_value = "90")]
        days: u32,

        /// User the records belong to
        #[arg(short, long, default_value = "default")]
        user: String,

        /// AI model for extraction and match scoring (heuristics only if unset)
        #[arg(short, long)]
        model: Option<String>,

        /// Path to a resume file for match scoring
        #[arg(short, long)]
        resume: Option<PathBuf>,

        /// Recompute match scores even for records that already have one
        #[arg(long)]
        force_score: bool,
    },

    /// List tracked applications
    List {
        /// Filter by status (pending, viewed, rejected, interview_requested, offer)
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by company substring
        #[arg(short, long)]
        company: Option<String>,

        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Show one application in full
    Show {
        /// Record id (or unique prefix)
        id: String,

        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Record a manual status change
    SetStatus {
        /// Record id (or unique prefix)
        id: String,

        /// New status (pending, viewed, rejected, interview_requested, offer)
        status: String,

        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Show aggregate statistics
    Stats {
        #[arg(short, long, default_value = "default")]
        user: String,
    },

    /// Export applications as CSV
    Export {
        /// Output file (stdout if unset)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long, default_value = "default")]
        user: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = Store::open()?;

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("Store initialized at {}", store.path().display());
        }

        Commands::Sync {
            token_file,
            days,
            user,
            model,
            resume,
            force_score,
        } => {
            store.ensure_initialized()?;

            let token_path = expand_tilde(&token_file);
            let token = std::fs::read_to_string(&token_path)
                .with_context(|| format!("Failed to read token file: {}", token_path.display()))?
                .trim()
                .to_string();
            let gmail = GmailClient::new(token)?;

            match gmail.profile() {
                Ok(address) => println!("Syncing Gmail account {}...", address),
                Err(e) => log::debug!("could not fetch Gmail profile: {e}"),
            }

            let (extraction_provider, scoring_provider) = match &model {
                Some(name) => {
                    let spec = ai::resolve_model(name)?;
                    println!("Using model {} for extraction and scoring", spec.short_name);
                    (Some(ai::create_provider(&spec)?), Some(ai::create_provider(&spec)?))
                }
                None => (None, None),
            };

            let profile = match resume {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read resume file: {}", path.display()))?;
                    Some(CandidateProfile { resume: content })
                }
                None => None,
            };

            let mut engine = SyncEngine::new(Box::new(gmail), Extractor::new(extraction_provider));
            match (scoring_provider, profile) {
                (Some(provider), Some(profile)) => {
                    engine = engine.with_scorer(provider, profile);
                }
                (Some(_), None) => {
                    println!("No resume provided; skipping match scoring.");
                }
                _ => {}
            }

            // Ctrl-C stops the run at the next checkpoint; whatever merged so
            // far is still finalized and saved.
            let cancel = engine.cancel_flag();
            ctrlc::set_handler(move || {
                eprintln!("\nStopping after the current message...");
                cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .context("Failed to install Ctrl-C handler")?;

            let existing = store.load(&user)?;
            let opts = SyncOptions {
                lookback_days: days,
                force_score,
            };

            let mut last_pct = -1i32;
            let outcome = engine.run(existing, &opts, &mut |message, frac| {
                let pct = (frac * 100.0).round() as i32;
                if pct != last_pct {
                    println!("  [{:>3}%] {}", pct, message);
                    last_pct = pct;
                }
            })?;

            store.save(&outcome.records, &user)?;

            println!("\nResults:");
            println!("  Applications:     {}", outcome.records.len());
            println!(
                "  Emails processed: {} of {}",
                outcome.report.processed, outcome.report.messages_found
            );
            if outcome.report.failed > 0 {
                println!("  Emails skipped:   {}", outcome.report.failed);
            }
            if outcome.report.queries_failed > 0 {
                println!("  Queries failed:   {}", outcome.report.queries_failed);
            }
            if outcome.report.aborted {
                println!("  (sync aborted before completion)");
            }
        }

        Commands::List {
            status,
            company,
            user,
        } => {
            store.ensure_initialized()?;
            let status_filter = match status.as_deref() {
                Some(s) => Some(
                    AppStatus::parse(s)
                        .ok_or_else(|| anyhow!("Unknown status '{}'", s))?,
                ),
                None => None,
            };

            let records: Vec<ApplicationRec> = store
                .load(&user)?
                .into_iter()
                .filter(|r| status_filter.is_none_or(|s| r.status == s))
                .filter(|r| {
                    company
                        .as_deref()
                        .is_none_or(|c| r.company.to_lowercase().contains(&c.to_lowercase()))
                })
                .collect();

            if records.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<20} {:<20} {:<26} {:<12} {:>5} {:>6}",
                    "STATUS", "COMPANY", "POSITION", "APPLIED", "DAYS", "SCORE"
                );
                println!("{}", "-".repeat(94));
                for rec in &records {
                    let score = rec
                        .match_score
                        .as_ref()
                        .map(|s| s.overall.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<20} {:<20} {:<26} {:<12} {:>5} {:>6}",
                        rec.status.as_str(),
                        truncate(&rec.company, 18),
                        truncate(&rec.position, 24),
                        rec.application_date.format("%Y-%m-%d"),
                        rec.days_since_application,
                        score
                    );
                }
                println!("\n{} application(s)", records.len());
            }
        }

        Commands::Show { id, user } => {
            store.ensure_initialized()?;
            let mut records = store.load(&user)?;
            let rec = find_record(&mut records, &id)?;

            println!("Application: {}", rec.id);
            println!("Company:  {}", rec.company);
            println!("Position: {}", rec.position);
            println!("Location: {}", rec.location);
            println!("Status:   {}", rec.status);
            println!(
                "Applied:  {} ({} days ago)",
                rec.application_date.format("%Y-%m-%d"),
                rec.days_since_application
            );
            if let Some(viewed) = rec.view_date {
                println!("Viewed:   {}", viewed.format("%Y-%m-%d"));
            }
            if let Some(responded) = rec.response_date {
                println!("Response: {}", responded.format("%Y-%m-%d"));
            }
            if let Some(salary) = &rec.salary_range {
                println!("Salary:   {}", salary);
            }
            if let Some(t) = rec.employment_type {
                println!("Type:     {}", t.as_str());
            }
            if let Some(w) = rec.work_location {
                println!("Mode:     {}", w.as_str());
            }
            if let Some(url) = &rec.linkedin_url {
                println!("URL:      {}", url);
            }
            if let Some(notes) = &rec.notes {
                println!("Notes:    {}", notes);
            }
            if let Some(score) = &rec.match_score {
                println!("\nMatch score: {} overall", score.overall);
                println!(
                    "  skills {}  experience {}  location {}  salary {}",
                    score.skills, score.experience, score.location, score.salary
                );
                for reason in &score.reasons {
                    println!("  - {}", reason);
                }
            }
            if !rec.status_history.is_empty() {
                println!("\nHistory:");
                for event in &rec.status_history {
                    println!(
                        "  {}  {:<20} ({:?})",
                        event.timestamp.format("%Y-%m-%d %H:%M"),
                        event.status.as_str(),
                        event.source
                    );
                }
            }
        }

        Commands::SetStatus { id, status, user } => {
            store.ensure_initialized()?;
            let new_status = AppStatus::parse(&status).ok_or_else(|| {
                anyhow!(
                    "Unknown status '{}'. Expected one of: pending, viewed, rejected, interview_requested, offer",
                    status
                )
            })?;

            let mut records = store.load(&user)?;
            let rec = find_record(&mut records, &id)?;
            let before = rec.status;
            merge::apply_manual_event(rec, new_status, Utc::now());
            let after = rec.status;
            let rec_id = rec.id.clone();

            store.save(&records, &user)?;
            if before == after && after != new_status {
                println!(
                    "Recorded {} for {} (status stays {} - higher priority)",
                    new_status, rec_id, after
                );
            } else {
                println!("Updated {} to {}", rec_id, after);
            }
        }

        Commands::Stats { user } => {
            store.ensure_initialized()?;
            let records = store.load(&user)?;
            let stats = stats::compute_stats(&records);

            println!("Applications: {}", stats.total);
            println!("  Viewed:     {}", stats.viewed);
            println!("  Interviews: {}", stats.interviews);
            println!("  Offers:     {}", stats.offers);
            println!("  Rejected:   {}", stats.rejected);
            println!("Response rate:     {:.0}%", stats.response_rate * 100.0);
            println!("Avg response time: {:.1} days", stats.avg_response_time);
        }

        Commands::Export { output, user } => {
            store.ensure_initialized()?;
            let records = store.load(&user)?;
            let csv = stats::export_csv(&records);

            match output {
                Some(path) => {
                    std::fs::write(&path, csv)
                        .with_context(|| format!("Failed to write to {}", path.display()))?;
                    println!("Exported {} application(s) to {}", records.len(), path.display());
                }
                None => print!("{}", csv),
            }
        }
    }

    Ok(())
}

fn find_record<'a>(records: &'a mut [ApplicationRec], id: &str) -> Result<&'a mut ApplicationRec> {
    if let Some(pos) = records.iter().position(|r| r.id == id) {
        return Ok(&mut records[pos]);
    }
    let matches: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.id.starts_with(id))
        .map(|(i, _)| i)
        .collect();
    match matches.as_slice() {
        [pos] => Ok(&mut records[*pos]),
        [] => Err(anyhow!("No application with id '{}'", id)),
        _ => Err(anyhow!(
            "Id prefix '{}' is ambiguous ({} matches)",
            id,
            matches.len()
        )),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{}/{}", home, rest))
    } else {
        PathBuf::from(path)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
