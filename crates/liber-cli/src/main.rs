//! liber: command-line interface for the Liber recommendation engine.
//!
//! Operator entry points for on-demand generation, batch runs, similarity
//! maintenance, and running a worker process.

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use liber_core::defaults::{
    BATCH_CHUNK_SIZE, CONTEXT_DAILY_BATCH, CONTEXT_ON_DEMAND, RECOMMENDATION_COUNT,
};
use liber_core::{
    Algorithm, CatalogRepository, CollaborativeSignal, ProfileRepository,
    RecommendationRepository, SimilarityRepository, UserProfile,
};
use liber_db::{Database, PoolConfig};
use liber_engine::{
    vectorize, HttpCollaborativeSignal, RecommendationEngine, SimilarityComputation,
    SimilarityStore, StaticCollaborativeSignal,
};
use liber_jobs::{
    default_bindings, default_schedule, BatchMode, BatchOptions, BatchOrchestrator, Clock,
    GenerationService, GenerationStatus, Scheduler, SchedulerConfig, SchedulerEvent,
    SchedulerHandle, TaskRegistry, TASK_GENERATE_USER,
};

#[derive(Parser)]
#[command(name = "liber")]
#[command(author, version, about = "Recommendation engine for the Liber reading platform")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommendation generation commands
    Recommend {
        #[command(subcommand)]
        command: RecommendCommands,
    },

    /// Similarity matrix commands
    Similarity {
        #[command(subcommand)]
        command: SimilarityCommands,
    },

    /// Run a worker process (scheduler pool plus periodic clock)
    Worker,

    /// Print the broker queue bindings as JSON
    Queues,
}

#[derive(Subcommand)]
enum RecommendCommands {
    /// Generate recommendations for one user
    GenerateForUser {
        /// User UUID
        #[arg(long, conflicts_with = "username")]
        user_id: Option<Uuid>,

        /// Username (alternative to --user-id)
        #[arg(long)]
        username: Option<String>,

        /// Algorithm: content_based, collaborative, popularity, hybrid
        #[arg(short, long, default_value = "hybrid")]
        algorithm: String,

        /// Number of recommendations to produce
        #[arg(short, long, default_value_t = RECOMMENDATION_COUNT)]
        count: usize,

        /// Generation context label
        #[arg(long, default_value = CONTEXT_ON_DEMAND)]
        context: String,

        /// Regenerate even if the latest set is still fresh
        #[arg(long)]
        force: bool,

        /// Apply the freshness filter and report without generating
        #[arg(long)]
        dry_run: bool,

        /// Run through the task scheduler instead of inline
        #[arg(long)]
        defer: bool,
    },

    /// Generate recommendations for every eligible user
    GenerateForAll {
        /// Restrict to active users
        #[arg(long, default_value_t = true)]
        active_only: bool,

        /// Algorithm: content_based, collaborative, popularity, hybrid
        #[arg(short, long, default_value = "hybrid")]
        algorithm: String,

        /// Number of recommendations per user
        #[arg(short, long, default_value_t = RECOMMENDATION_COUNT)]
        count: usize,

        /// Regenerate even for users whose latest set is still fresh
        #[arg(long)]
        force: bool,

        /// Report selection counts without generating
        #[arg(long)]
        dry_run: bool,

        /// Submit chunk tasks to the scheduler instead of processing inline
        #[arg(long)]
        defer: bool,

        /// Users per chunk
        #[arg(long, default_value_t = BATCH_CHUNK_SIZE)]
        batch_size: usize,
    },

    /// Show a user's most recent recommendation set
    Show {
        /// User UUID
        #[arg(long, conflicts_with = "username")]
        user_id: Option<Uuid>,

        /// Username (alternative to --user-id)
        #[arg(long)]
        username: Option<String>,
    },
}

#[derive(Subcommand)]
enum SimilarityCommands {
    /// Refresh item vectors and rebuild the pairwise similarity matrix
    Rebuild,
}

// =============================================================================
// APPLICATION WIRING
// =============================================================================

struct App {
    profiles: Arc<dyn ProfileRepository>,
    catalog: Arc<dyn CatalogRepository>,
    recommendations: Arc<dyn RecommendationRepository>,
    service: Arc<GenerationService>,
    scheduler: Arc<Scheduler>,
    store: Arc<SimilarityStore>,
    similarity: Arc<dyn SimilarityRepository>,
}

impl App {
    /// Connect to the database and wire the engine, service, and scheduler.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `DATABASE_URL` | PostgreSQL connection string (required) |
    /// | `DATABASE_MAX_CONNECTIONS` | Pool size ceiling (default 10) |
    /// | `LIBER_SIGNAL_URL` | Collaborative-signal backend base URL (optional) |
    async fn connect() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;

        let profiles: Arc<dyn ProfileRepository> = Arc::new(db.profiles.clone());
        let catalog: Arc<dyn CatalogRepository> = Arc::new(db.catalog.clone());

        let signal: Arc<dyn CollaborativeSignal> = match std::env::var("LIBER_SIGNAL_URL") {
            Ok(url) => Arc::new(HttpCollaborativeSignal::new(url)?),
            Err(_) => Arc::new(StaticCollaborativeSignal::new()),
        };

        let recommendations: Arc<dyn RecommendationRepository> =
            Arc::new(db.recommendations.clone());

        let similarity: Arc<dyn SimilarityRepository> = Arc::new(db.similarity.clone());
        let store = Arc::new(SimilarityStore::new());
        // Load the last published matrix so content-based scoring works
        // without waiting for the next scheduled rebuild.
        if let Some(matrix) = similarity.load_latest().await? {
            store.restore(matrix);
        }
        let engine = Arc::new(RecommendationEngine::new(
            profiles.clone(),
            catalog.clone(),
            signal,
            store.clone(),
        ));
        let service = Arc::new(GenerationService::new(engine, recommendations.clone()));

        let mut registry = TaskRegistry::new();
        liber_jobs::register_default_tasks(
            &mut registry,
            profiles.clone(),
            catalog.clone(),
            service.clone(),
            Arc::new(BatchOrchestrator::new(service.clone())),
            store.clone(),
            similarity.clone(),
        )?;
        let scheduler = Arc::new(Scheduler::new(registry, SchedulerConfig::from_env()));

        Ok(Self {
            profiles,
            catalog,
            recommendations,
            service,
            scheduler,
            store,
            similarity,
        })
    }

    async fn resolve_user(
        &self,
        user_id: Option<Uuid>,
        username: Option<&str>,
    ) -> anyhow::Result<UserProfile> {
        let user = match (user_id, username) {
            (Some(id), None) => self.profiles.get(id).await?,
            (None, Some(name)) => self.profiles.get_by_username(name).await?,
            _ => bail!("exactly one of --user-id or --username is required"),
        };
        user.context("user not found")
    }
}

/// Drain scheduler events until every task in `pending` reaches a terminal
/// state. Returns the number that terminally failed.
async fn await_tasks(
    events: &mut tokio::sync::broadcast::Receiver<SchedulerEvent>,
    mut pending: HashSet<Uuid>,
) -> anyhow::Result<usize> {
    let mut failed = 0usize;
    while !pending.is_empty() {
        match events.recv().await? {
            SchedulerEvent::TaskCompleted { task_id, .. } => {
                pending.remove(&task_id);
            }
            SchedulerEvent::TaskTerminallyFailed { task_id, name, error } => {
                if pending.remove(&task_id) {
                    eprintln!("task {name} failed: {error}");
                    failed += 1;
                }
            }
            _ => {}
        }
    }
    Ok(failed)
}

// =============================================================================
// COMMANDS
// =============================================================================

#[allow(clippy::too_many_arguments)]
async fn cmd_generate_for_user(
    app: &App,
    user_id: Option<Uuid>,
    username: Option<&str>,
    algorithm: &str,
    count: usize,
    context: &str,
    force: bool,
    dry_run: bool,
    defer: bool,
) -> anyhow::Result<()> {
    let algorithm: Algorithm = algorithm.parse()?;
    let user = app.resolve_user(user_id, username).await?;
    if !user.recommendations_enabled {
        bail!("user {} has recommendations disabled", user.username);
    }

    if defer {
        if dry_run {
            bail!("--dry-run cannot be combined with --defer");
        }
        let handle = app.scheduler.start();
        let mut events = handle.events();
        let submitted = app.scheduler.submit(
            TASK_GENERATE_USER,
            serde_json::json!({
                "user_id": user.id,
                "algorithm": algorithm,
                "count": count,
                "context": context,
                "force": force,
            }),
            None,
        )?;
        println!("Submitted task {} for {}", submitted.id, user.username);
        let failed = await_tasks(&mut events, HashSet::from([submitted.id])).await?;
        handle.shutdown();
        if failed > 0 {
            bail!("deferred generation failed");
        }
        return Ok(());
    }

    match app
        .service
        .generate_for_user(&user, algorithm, count, context, force, dry_run)
        .await?
    {
        GenerationStatus::Generated { set_id, count } => {
            println!(
                "Generated {count} recommendations for {} (set {set_id})",
                user.username
            );
        }
        GenerationStatus::SkippedFresh => {
            println!(
                "Skipped {}: latest set is still fresh (use --force to override)",
                user.username
            );
        }
        GenerationStatus::DryRun => {
            println!("Dry run: would generate for {}", user.username);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_generate_for_all(
    app: &App,
    active_only: bool,
    algorithm: &str,
    count: usize,
    force: bool,
    dry_run: bool,
    defer: bool,
    batch_size: usize,
) -> anyhow::Result<()> {
    let algorithm: Algorithm = algorithm.parse()?;
    let users = if active_only {
        app.profiles.list_active().await?
    } else {
        app.profiles.list_all().await?
    };
    info!(users = users.len(), "Loaded user population");

    let options = BatchOptions {
        algorithm,
        count,
        context: CONTEXT_DAILY_BATCH.to_string(),
        chunk_size: batch_size,
        force,
        dry_run,
        mode: if defer {
            BatchMode::Deferred
        } else {
            BatchMode::Sync
        },
    };

    let orchestrator =
        BatchOrchestrator::new(app.service.clone()).with_scheduler(app.scheduler.clone());

    if defer && !dry_run {
        let handle = app.scheduler.start();
        let mut events = handle.events();
        let outcome = orchestrator.run(&users, &options).await?;
        println!(
            "Submitted {} chunk tasks covering {} users ({} skipped)",
            outcome.deferred.len(),
            outcome.selected,
            outcome.skipped
        );
        let ids: HashSet<Uuid> = outcome.deferred.iter().map(|h| h.id).collect();
        let failed = await_tasks(&mut events, ids).await?;
        handle.shutdown();
        if failed > 0 {
            bail!("{failed} batch chunk(s) failed");
        }
        return Ok(());
    }

    let outcome = orchestrator.run(&users, &options).await?;
    if dry_run {
        println!(
            "Dry run: {} of {} users would be generated ({} skipped)",
            outcome.selected,
            users.len(),
            outcome.skipped
        );
        return Ok(());
    }
    println!(
        "Batch complete: {} succeeded, {} failed, {} skipped",
        outcome.succeeded, outcome.failed, outcome.skipped
    );
    for (user_id, error) in &outcome.failures {
        eprintln!("  {user_id}: {error}");
    }
    if outcome.failed > 0 {
        bail!("{} user(s) failed", outcome.failed);
    }
    Ok(())
}

async fn cmd_show(
    app: &App,
    user_id: Option<Uuid>,
    username: Option<&str>,
) -> anyhow::Result<()> {
    let user = app.resolve_user(user_id, username).await?;
    match app.recommendations.latest(user.id).await? {
        Some(set) => {
            println!(
                "Latest set for {} ({} at {}, context {}):",
                user.username, set.algorithm, set.created_at, set.context
            );
            for (rank, item) in set.entries.iter().enumerate() {
                println!("  {:>3}. {} {:.4}", rank + 1, item.book_id, item.score);
            }
        }
        None => println!("No recommendation sets for {}", user.username),
    }
    Ok(())
}

async fn cmd_similarity_rebuild(app: &App) -> anyhow::Result<()> {
    let books = app.catalog.list_books().await?;
    println!("Refreshing vectors for {} items...", books.len());
    for book in &books {
        app.catalog.upsert_vector(&vectorize(book)).await?;
    }

    let mut corpus = app.catalog.all_vectors().await?;
    corpus.sort_by_key(|v| v.book_id);

    let matrix = SimilarityComputation::new().rebuild(&corpus)?;
    let pairs = matrix.len();
    let version = app.store.publish(matrix);
    app.similarity.save(&app.store.snapshot()).await?;
    println!(
        "Rebuilt similarity matrix: {} items, {pairs} pairs, version {version}",
        corpus.len()
    );
    Ok(())
}

async fn cmd_worker(app: &App) -> anyhow::Result<()> {
    let handle = app.scheduler.start();

    let clock = Clock::new(app.scheduler.clone()).with_schedule(default_schedule())?;
    let clock_handle = clock.start();

    println!("Worker running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    clock_handle.shutdown().await?;
    handle.shutdown();
    Ok(())
}

fn cmd_queues() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&default_bindings())?);
    Ok(())
}

// =============================================================================
// ENTRY POINT
// =============================================================================

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Recommend { command } => {
            let app = App::connect().await?;
            match command {
                RecommendCommands::GenerateForUser {
                    user_id,
                    username,
                    algorithm,
                    count,
                    context,
                    force,
                    dry_run,
                    defer,
                } => {
                    cmd_generate_for_user(
                        &app,
                        user_id,
                        username.as_deref(),
                        &algorithm,
                        count,
                        &context,
                        force,
                        dry_run,
                        defer,
                    )
                    .await
                }
                RecommendCommands::GenerateForAll {
                    active_only,
                    algorithm,
                    count,
                    force,
                    dry_run,
                    defer,
                    batch_size,
                } => {
                    cmd_generate_for_all(
                        &app,
                        active_only,
                        &algorithm,
                        count,
                        force,
                        dry_run,
                        defer,
                        batch_size,
                    )
                    .await
                }
                RecommendCommands::Show { user_id, username } => {
                    cmd_show(&app, user_id, username.as_deref()).await
                }
            }
        }
        Commands::Similarity { command } => {
            let app = App::connect().await?;
            match command {
                SimilarityCommands::Rebuild => cmd_similarity_rebuild(&app).await,
            }
        }
        Commands::Worker => {
            let app = App::connect().await?;
            cmd_worker(&app).await
        }
        Commands::Queues => cmd_queues(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "liber=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
