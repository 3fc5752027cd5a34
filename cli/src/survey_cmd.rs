//! `survey` subcommands.
//!
//! Each invocation opens the session and pending queue from the data
//! directory, performs one operation and exits. `watch` is the long-running
//! host: a mount drain followed by periodic drains until Ctrl-C.
//!
//! ## Commands
//!
//! - `survey start`
//! - `survey answer --patch '{"gender":"female"}'`
//! - `survey rate <feature> <1-5>`
//! - `survey next` / `survey back` / `survey goto <page>`
//! - `survey status`
//! - `survey submit`
//! - `survey drain` / `survey pending`
//! - `survey watch [--interval <secs>]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use survey_core::validation::{self, SurveyPage};
use survey_core::{
    AnswersPatch, ConfigLoader, DrainItemOutcome, DrainOutcome, DrainScheduler, FeatureKey,
    FileStore, HttpTransport, KeyValueStore, PAGE_COUNT, PendingQueue, SessionError,
    SessionStore, SubmissionPipeline, SubmitError, SubmitOutcome, SurveyConfig,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Survey session and submission queue.
#[derive(Debug, Parser)]
#[command(name = "survey", version, about)]
pub struct SurveyCli {
    /// Survey home holding config.toml (defaults to ~/.survey).
    #[arg(long = "home", env = "SURVEY_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: SurveySubcommand,
}

#[derive(Debug, Subcommand)]
pub enum SurveySubcommand {
    /// Discard any in-progress answers and start a new survey.
    Start(OutputArgs),
    /// Merge answers from a JSON object into the session.
    Answer(AnswerArgs),
    /// Rate one feature from 1 to 5.
    Rate(RateArgs),
    /// Advance to the next page if the current one is complete.
    Next(OutputArgs),
    /// Go back one page.
    Back(OutputArgs),
    /// Jump to a page (0-based); invalid pages land on the last one.
    Goto(GotoArgs),
    /// Show the session and pending queue.
    Status(OutputArgs),
    /// Submit the completed survey.
    Submit(OutputArgs),
    /// Retry delivery of every pending submission once.
    Drain(OutputArgs),
    /// List pending submissions.
    Pending(OutputArgs),
    /// Drain now and then periodically until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output as JSON.
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AnswerArgs {
    /// JSON object of camelCase answer fields.
    #[arg(long = "patch", short = 'p')]
    pub patch: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct RateArgs {
    /// Feature identifier, e.g. longBattery.
    pub feature: String,

    /// Rating from 1 to 5.
    pub rating: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct GotoArgs {
    /// Page index.
    pub page: String,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds between drains (defaults to drain_interval_secs).
    #[arg(long = "interval")]
    pub interval: Option<u64>,
}

/// How a command finished, mapped to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Done,
    /// Incomplete answers or unusable input.
    Blocked,
    /// The sink refused the submission.
    Rejected,
}

impl CommandStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            CommandStatus::Done => 0,
            CommandStatus::Blocked => 1,
            CommandStatus::Rejected => 2,
        }
    }
}

/// Exit code for configuration or storage failures.
pub const INFRA_EXIT_CODE: u8 = 3;

struct CliContext {
    config: SurveyConfig,
    pipeline: SubmissionPipeline,
}

impl CliContext {
    fn open(home: Option<&PathBuf>) -> anyhow::Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(home) = home {
            loader = loader.with_home(home.clone());
        }
        let config = loader.load().context("loading configuration")?;

        let storage: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::with_base_dir(config.data_dir.clone())
                .with_context(|| format!("opening {}", config.data_dir.display()))?,
        );
        let session = SessionStore::open(storage.clone()).context("loading session")?;
        let transport = HttpTransport::new(config.submit_url()?, config.request_timeout())
            .context("building HTTP client")?;

        // A spawned retry would die with the process; `submit` retries inline.
        let pipeline = SubmissionPipeline::new(
            Arc::new(Mutex::new(session)),
            PendingQueue::new(storage),
            Arc::new(transport),
        )
        .with_request_timeout(config.request_timeout())
        .with_deferred_drain_delay(None);

        tracing::debug!(data_dir = %config.data_dir.display(), "opened survey state");
        Ok(Self { config, pipeline })
    }
}

impl SurveyCli {
    pub async fn run(self) -> anyhow::Result<CommandStatus> {
        let ctx = CliContext::open(self.home.as_ref())?;
        match self.command {
            SurveySubcommand::Start(args) => cmd_start(&ctx, &args).await,
            SurveySubcommand::Answer(args) => cmd_answer(&ctx, &args).await,
            SurveySubcommand::Rate(args) => cmd_rate(&ctx, &args).await,
            SurveySubcommand::Next(args) => cmd_next(&ctx, &args).await,
            SurveySubcommand::Back(args) => cmd_back(&ctx, &args).await,
            SurveySubcommand::Goto(args) => cmd_goto(&ctx, &args).await,
            SurveySubcommand::Status(args) => cmd_status(&ctx, &args).await,
            SurveySubcommand::Submit(args) => cmd_submit(&ctx, &args).await,
            SurveySubcommand::Drain(args) => cmd_drain(&ctx, &args).await,
            SurveySubcommand::Pending(args) => cmd_pending(&ctx, &args),
            SurveySubcommand::Watch(args) => cmd_watch(&ctx, &args).await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn page_label(index: usize) -> String {
    let title = SurveyPage::from_index(index)
        .map(SurveyPage::title)
        .unwrap_or("?");
    format!("page {}/{PAGE_COUNT} ({title})", index + 1)
}

fn session_json(store: &SessionStore, pending: usize) -> Value {
    json!({
        "status": store.status().as_str(),
        "currentPage": store.current_page(),
        "missingOnPage": store.current_page_missing(),
        "missingFields": validation::missing_fields(store.answers()),
        "pending": pending,
        "answers": store.answers(),
    })
}

/// Report an operation that left the session usable, or the reason it did not.
fn report_session(
    store: &SessionStore,
    ctx: &CliContext,
    args: &OutputArgs,
    message: &str,
) -> anyhow::Result<CommandStatus> {
    if args.json {
        let pending = ctx.pipeline.queue().len()?;
        print_json(&session_json(store, pending));
    } else {
        println!("{message}; now on {}", page_label(store.current_page()));
    }
    Ok(CommandStatus::Done)
}

fn blocked(args: &OutputArgs, error: &str, missing: &[&str]) -> CommandStatus {
    if args.json {
        print_json(&json!({ "error": error, "missingFields": missing }));
    } else {
        eprintln!("{error}");
    }
    CommandStatus::Blocked
}

/// Session errors caused by the request map to `Blocked`; storage errors
/// propagate.
fn session_failure(args: &OutputArgs, err: SessionError) -> anyhow::Result<CommandStatus> {
    match err {
        SessionError::PageIncomplete { ref missing, .. } => {
            Ok(blocked(args, &err.to_string(), missing))
        }
        SessionError::InvalidRating { .. } => Ok(blocked(args, &err.to_string(), &[])),
        SessionError::Storage(e) => Err(e).context("saving session"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command implementations
// ─────────────────────────────────────────────────────────────────────────────

async fn cmd_start(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.start_fresh_survey() {
        return session_failure(args, err);
    }
    report_session(&store, ctx, args, "Started a fresh survey")
}

async fn cmd_answer(ctx: &CliContext, args: &AnswerArgs) -> anyhow::Result<CommandStatus> {
    let patch: AnswersPatch = match serde_json::from_str(&args.patch) {
        Ok(patch) => patch,
        Err(err) => return Ok(blocked(&args.output, &format!("invalid patch: {err}"), &[])),
    };
    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.update_answers(patch) {
        return session_failure(&args.output, err);
    }
    report_session(&store, ctx, &args.output, "Saved answers")
}

async fn cmd_rate(ctx: &CliContext, args: &RateArgs) -> anyhow::Result<CommandStatus> {
    let feature: FeatureKey = match args.feature.parse() {
        Ok(feature) => feature,
        Err(err) => {
            let known: Vec<&str> = FeatureKey::ALL.iter().map(|k| k.as_str()).collect();
            let message = format!("{err} (expected one of: {})", known.join(", "));
            return Ok(blocked(&args.output, &message, &[]));
        }
    };
    let Ok(rating) = args.rating.trim().parse::<u8>() else {
        let message = format!("invalid rating '{}': expected 1 to 5", args.rating);
        return Ok(blocked(&args.output, &message, &[]));
    };

    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.rate_feature(feature, rating) {
        return session_failure(&args.output, err);
    }
    report_session(&store, ctx, &args.output, &format!("Rated {feature} {rating}/5"))
}

async fn cmd_next(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.advance_page() {
        return session_failure(args, err);
    }
    report_session(&store, ctx, args, "Page complete")
}

async fn cmd_back(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.back() {
        return session_failure(args, err);
    }
    report_session(&store, ctx, args, "Moved back")
}

async fn cmd_goto(ctx: &CliContext, args: &GotoArgs) -> anyhow::Result<CommandStatus> {
    let index = validation::resolve_page_request(&args.page);
    let mut store = ctx.pipeline.session().lock().await;
    if let Err(err) = store.set_page(index as i64) {
        return session_failure(&args.output, err);
    }
    report_session(&store, ctx, &args.output, "Moved")
}

async fn cmd_status(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let store = ctx.pipeline.session().lock().await;
    let pending = ctx.pipeline.queue().len()?;
    if args.json {
        print_json(&session_json(&store, pending));
        return Ok(CommandStatus::Done);
    }

    println!("Session: {}", store.status().as_str());
    println!("Current: {}", page_label(store.current_page()));
    let missing = store.current_page_missing();
    if missing.is_empty() {
        println!("This page is complete.");
    } else {
        println!("Still needed on this page: {}", missing.join(", "));
    }
    println!("Pending submissions: {pending}");
    Ok(CommandStatus::Done)
}

async fn cmd_submit(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    match ctx.pipeline.submit().await {
        Ok(outcome) => {
            if args.json {
                print_json(&serde_json::to_value(&outcome)?);
            } else {
                match &outcome {
                    SubmitOutcome::Delivered { record } => {
                        println!("Survey submitted (record {})", record.id);
                    }
                    SubmitOutcome::Deferred { reason, .. } => {
                        println!("Survey saved locally; delivery will be retried ({reason})");
                    }
                }
            }
            if outcome.is_deferred() {
                retry_deferred(ctx).await;
            }
            Ok(CommandStatus::Done)
        }
        Err(SubmitError::Incomplete { missing_fields }) => Ok(blocked(
            args,
            &format!("Missing required fields: {}", missing_fields.join(", ")),
            &missing_fields,
        )),
        Err(err @ SubmitError::Rejected(_)) => {
            let fields = err.rejected_fields();
            if args.json {
                print_json(&json!({
                    "error": err.to_string(),
                    "missingFields": fields,
                }));
            } else if fields.is_empty() {
                eprintln!("Submission rejected: {err}");
            } else {
                eprintln!("Submission rejected: {err} ({})", fields.join(", "));
            }
            Ok(CommandStatus::Rejected)
        }
        Err(SubmitError::InFlight) => Ok(blocked(args, "a submission is already in flight", &[])),
        Err(err) => Err(err).context("submitting survey"),
    }
}

/// One best-effort drain after the configured delay. Failures stay queued.
async fn retry_deferred(ctx: &CliContext) {
    tokio::time::sleep(ctx.config.deferred_drain_delay()).await;
    match ctx.pipeline.drain_once().await {
        Ok(DrainOutcome::Drained(report)) => {
            tracing::info!(
                succeeded = report.succeeded,
                failed = report.failed,
                "deferred retry finished"
            );
        }
        Ok(_) => {}
        Err(err) => tracing::warn!("deferred retry could not read the queue: {err}"),
    }
}

fn drain_json(outcome: &DrainOutcome) -> Value {
    match outcome {
        DrainOutcome::Idle => json!({ "status": "idle", "succeeded": 0, "failed": 0, "results": [] }),
        DrainOutcome::Busy => json!({ "status": "busy", "succeeded": 0, "failed": 0, "results": [] }),
        DrainOutcome::Drained(report) => {
            let results: Vec<Value> = report
                .results
                .iter()
                .map(|result| match &result.outcome {
                    DrainItemOutcome::Delivered { record } => json!({
                        "id": result.id,
                        "status": "delivered",
                        "recordId": record.id,
                    }),
                    DrainItemOutcome::Failed { error } => json!({
                        "id": result.id,
                        "status": "failed",
                        "kind": error.kind(),
                        "error": error.to_string(),
                    }),
                })
                .collect();
            json!({
                "status": "drained",
                "succeeded": report.succeeded,
                "failed": report.failed,
                "results": results,
                "cleanupError": report.cleanup_error,
            })
        }
    }
}

async fn cmd_drain(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let outcome = ctx
        .pipeline
        .drain_once()
        .await
        .context("reading pending queue")?;

    if args.json {
        print_json(&drain_json(&outcome));
        return Ok(CommandStatus::Done);
    }
    match &outcome {
        DrainOutcome::Idle => println!("No pending submissions."),
        DrainOutcome::Busy => println!("Another drain is already running."),
        DrainOutcome::Drained(report) => {
            for result in &report.results {
                match &result.outcome {
                    DrainItemOutcome::Delivered { record } => {
                        println!("  {} delivered (record {})", result.id, record.id);
                    }
                    DrainItemOutcome::Failed { error } => {
                        println!("  {} failed: {error}", result.id);
                    }
                }
            }
            println!(
                "Drain complete: {} delivered, {} still pending",
                report.succeeded, report.failed
            );
            if let Some(err) = &report.cleanup_error {
                println!("Delivered items are still queued and will be resent: {err}");
            }
        }
    }
    Ok(CommandStatus::Done)
}

fn cmd_pending(ctx: &CliContext, args: &OutputArgs) -> anyhow::Result<CommandStatus> {
    let items = ctx.pipeline.queue().load().context("reading pending queue")?;
    if args.json {
        print_json(&serde_json::to_value(&items)?);
        return Ok(CommandStatus::Done);
    }
    if items.is_empty() {
        println!("No pending submissions.");
    } else {
        for item in &items {
            println!("  {} (captured {})", item.id, item.captured_at.to_rfc3339());
        }
        println!("{} pending", items.len());
    }
    Ok(CommandStatus::Done)
}

/// Cancel `token` once Ctrl-C arrives. Without a signal handler the watch
/// keeps running until the process is killed.
fn on_interrupt(signal: std::io::Result<()>, token: &CancellationToken) {
    match signal {
        Ok(()) => {
            tracing::info!("interrupt received; stopping after the current drain");
            token.cancel();
        }
        Err(err) => {
            tracing::warn!("cannot listen for Ctrl-C ({err}); watching until killed");
        }
    }
}

async fn cmd_watch(ctx: &CliContext, args: &WatchArgs) -> anyhow::Result<CommandStatus> {
    let interval = args
        .interval
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.drain_interval());
    let scheduler = DrainScheduler::new(ctx.pipeline.clone());
    let token = CancellationToken::new();

    tracing::info!(
        sink = %ctx.config.sink_url,
        interval_secs = interval.as_secs(),
        "watching pending queue"
    );
    let shutdown = {
        let token = token.clone();
        tokio::spawn(async move {
            on_interrupt(tokio::signal::ctrl_c().await, &token);
        })
    };

    tokio::select! {
        _ = token.cancelled() => {}
        result = scheduler.run_once_after(ctx.config.mount_drain_delay()) => {
            result.context("reading pending queue")?;
        }
    }
    if !token.is_cancelled() {
        scheduler.run_periodic(interval, token.clone()).await;
    }

    shutdown.abort();
    Ok(CommandStatus::Done)
}
