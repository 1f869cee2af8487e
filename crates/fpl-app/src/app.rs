// Orchestration: load scores, run the optimizer under a time bound, persist
// and explain the result.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use fpl_core::error::OptimizeError;
use fpl_core::lineup::FormationRule;
use fpl_core::optimizer::{optimize, OptimizeRequest, Optimization};
use fpl_core::player::PlayerId;
use fpl_core::squad::TransferState;
use fpl_data::db::{Database, SquadRun};
use fpl_data::history::{form_from_history, load_history};
use fpl_data::import::{import_files, ImportSummary};
use fpl_data::predictions::load_predictions;
use fpl_data::{LoadedPlayers, PlayerDetails, ScoreSource};
use fpl_llm::{
    build_explanation_prompt, system_prompt, ExplanationContext, LlmEvent, TextGenerator,
    TransferSummary,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::cli::{ImportArgs, OptimizeArgs};
use crate::config::Config;

/// A finished optimize run, ready for reporting and explanation.
#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub result: Optimization,
    pub details: BTreeMap<PlayerId, PlayerDetails>,
    pub source: ScoreSource,
    pub formation: FormationRule,
    pub budget_tenths: u32,
    pub locked_names: Vec<String>,
    pub transfers: Option<TransferSummary>,
    pub run_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Data loading
// ---------------------------------------------------------------------------

/// Load optimizer rows from the configured (or overridden) source.
pub fn load_players(config: &Config, source: ScoreSource, db: Option<&Database>) -> Result<LoadedPlayers> {
    let loaded = match source {
        ScoreSource::Predictions => {
            let path = Path::new(&config.data.predictions_csv);
            load_predictions(path)
                .with_context(|| format!("failed to load predictions from {}", path.display()))?
        }
        ScoreSource::History => {
            let path = Path::new(&config.data.history_csv);
            let records = load_history(path)
                .with_context(|| format!("failed to load history from {}", path.display()))?;
            form_from_history(&records, config.data.history_window)
        }
        ScoreSource::Database => {
            let db = db.ok_or_else(|| anyhow!("database source requires an open database"))?;
            db.load_form(config.data.history_window)
                .context("failed to load form from database")?
        }
    };
    info!("Loaded {} player rows from {}", loaded.len(), source.as_str());
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Bounded solve
// ---------------------------------------------------------------------------

/// Run a CPU-bound optimizer call on the blocking pool, giving up after
/// `limit`. Timeouts and panics surface as `SolverInconclusive`.
pub async fn run_bounded<F, T>(limit: Duration, work: F) -> Result<T, OptimizeError>
where
    F: FnOnce() -> Result<T, OptimizeError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_err)) => Err(OptimizeError::SolverInconclusive(format!(
            "solver task failed: {join_err}"
        ))),
        Err(_) => Err(OptimizeError::SolverInconclusive(format!(
            "no solution within {}s",
            limit.as_secs_f64()
        ))),
    }
}

/// Drive `fut` on a fresh multi-threaded runtime, then shut the runtime down
/// without waiting on blocking tasks. A solve abandoned by `run_bounded`
/// keeps its thread busy; dropping the runtime normally would block until it
/// finishes.
pub fn block_on_detached<F: Future>(fut: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(output)
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

fn resolve_transfer(args: &OptimizeArgs, db: Option<&Database>) -> Result<Option<TransferState>> {
    let prior = if args.prior_from_last_run {
        let db = db.ok_or_else(|| anyhow!("--prior-from-last-run requires the database"))?;
        let run = db
            .last_run()
            .context("failed to read saved runs")?
            .ok_or_else(|| anyhow!("no saved run to use as the current squad"))?;
        info!("Using saved run {:?} from {} as the current squad", run.id, run.created_at);
        Some(run.squad_ids)
    } else if args.prior_squad.is_empty() {
        None
    } else {
        Some(args.prior_squad.clone())
    };

    match (prior, args.transfers) {
        (Some(prior_squad), Some(transfer_count)) => Ok(Some(TransferState {
            prior_squad,
            transfer_count,
        })),
        (None, None) => Ok(None),
        (Some(_), None) => bail!("a current squad was given without --transfers"),
        (None, Some(_)) => {
            bail!("--transfers requires --prior-squad or --prior-from-last-run")
        }
    }
}

fn display_name(details: &BTreeMap<PlayerId, PlayerDetails>, id: PlayerId) -> String {
    details
        .get(&id)
        .map(|d| d.full_name())
        .unwrap_or_else(|| format!("#{id}"))
}

/// Names moved out of and into the squad, in id order.
pub fn summarize_transfers(
    result: &Optimization,
    prior: &[PlayerId],
    details: &BTreeMap<PlayerId, PlayerDetails>,
) -> TransferSummary {
    let prior: BTreeSet<PlayerId> = prior.iter().copied().collect();
    let current: BTreeSet<PlayerId> = result.squad_ids().into_iter().collect();
    TransferSummary {
        transfers_out: prior
            .difference(&current)
            .map(|id| display_name(details, *id))
            .collect(),
        transfers_in: current
            .difference(&prior)
            .map(|id| display_name(details, *id))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn needs_database(args: &OptimizeArgs, source: ScoreSource) -> bool {
    source == ScoreSource::Database || args.save || args.prior_from_last_run
}

/// Load data, solve and optionally save. Errors from the optimizer are
/// returned as `OptimizeError` inside the `anyhow` chain so callers can
/// downcast them.
pub async fn run_optimize(config: &Config, args: &OptimizeArgs) -> Result<OptimizeOutcome> {
    let source = args.source.unwrap_or(config.data.source);
    let formation = args.formation.unwrap_or(config.formation);
    let mut rules = config.squad;
    if let Some(budget) = args.budget {
        rules.budget_tenths = budget;
    }

    let db = if needs_database(args, source) {
        Some(Database::open(&config.db_path).context("failed to open database")?)
    } else {
        None
    };

    let loaded = load_players(config, source, db.as_ref())?;
    let transfer = resolve_transfer(args, db.as_ref())?;
    let prior = transfer.as_ref().map(|t| t.prior_squad.clone());

    let request = OptimizeRequest {
        locked_names: args.locks.clone(),
        transfer,
        rules,
        formation,
    };
    info!(
        "Optimizing: source={}, formation={}, budget={}, locks={}, transfers={:?}",
        source.as_str(),
        formation,
        rules.budget_tenths,
        request.locked_names.len(),
        request.transfer.as_ref().map(|t| t.transfer_count)
    );

    let LoadedPlayers { rows, details } = loaded;
    let limit = Duration::from_secs(config.solver.timeout_secs);
    let solved = run_bounded(limit, move || optimize(rows, &request)).await;
    let result = match solved {
        Ok(result) => result,
        Err(e @ OptimizeError::SolverInconclusive(_)) => {
            error!("Solver inconclusive: {}", e);
            return Err(e.into());
        }
        Err(e) if e.is_no_solution() => {
            warn!("No legal squad: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            warn!("Rejected input: {}", e);
            return Err(e.into());
        }
    };

    let report = &result.pool_report;
    if report.rows_excluded() > 0 {
        warn!(
            "{} of {} rows excluded ({} unresolved positions)",
            report.rows_excluded(),
            report.rows_seen,
            report.unresolved_position
        );
    }

    let transfers = prior.map(|p| summarize_transfers(&result, &p, &details));

    let run_id = match (&db, args.save) {
        (Some(db), true) => {
            let run = SquadRun::from_optimization(&result, source.as_str(), formation.as_str());
            let id = db.save_run(&run).context("failed to save squad run")?;
            info!("Saved squad run {}", id);
            Some(id)
        }
        _ => None,
    };

    Ok(OptimizeOutcome {
        result,
        details,
        source,
        formation,
        budget_tenths: rules.budget_tenths,
        locked_names: args.locks.clone(),
        transfers,
        run_id,
    })
}

pub fn run_import(config: &Config, args: &ImportArgs) -> Result<ImportSummary> {
    let db = Database::open(&config.db_path).context("failed to open database")?;
    import_files(
        &db,
        &args.players,
        args.teams.as_deref(),
        args.history.as_deref(),
    )
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

async fn drain_events(
    mut rx: mpsc::Receiver<LlmEvent>,
    mut on_token: impl FnMut(&str),
) -> Result<String> {
    let mut text = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            LlmEvent::Token { text: t } => {
                on_token(&t);
                text.push_str(&t);
            }
            LlmEvent::Complete {
                full_text,
                input_tokens,
                output_tokens,
            } => {
                info!(
                    "Explanation complete ({} input / {} output tokens)",
                    input_tokens, output_tokens
                );
                return Ok(full_text);
            }
            LlmEvent::Error { message } => bail!("explanation failed: {message}"),
        }
    }
    if text.is_empty() {
        bail!("explanation stream closed without output");
    }
    Ok(text)
}

/// Stream an explanation of `outcome`, passing each token to `on_token`.
/// Returns `Ok(None)` without calling the generator when it is disabled.
pub async fn explain<G>(
    generator: &G,
    outcome: &OptimizeOutcome,
    on_token: impl FnMut(&str),
) -> Result<Option<String>>
where
    G: TextGenerator + ?Sized,
{
    if !generator.is_enabled() {
        info!("LLM disabled (no API key); skipping explanation");
        return Ok(None);
    }

    let ctx = ExplanationContext {
        result: &outcome.result,
        budget_tenths: outcome.budget_tenths,
        formation: outcome.formation,
        score_source: outcome.source.as_str(),
        locked_names: &outcome.locked_names,
        transfers: outcome.transfers.as_ref(),
    };
    let prompt = build_explanation_prompt(&ctx);
    let system = system_prompt();

    let (tx, rx) = mpsc::channel(256);
    let (sent, received) = tokio::join!(
        generator.stream(&system, &prompt, tx),
        drain_events(rx, on_token)
    );
    sent?;
    received.map(Some)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
