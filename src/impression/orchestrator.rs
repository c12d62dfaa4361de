//! Per-turn update pipeline and the detached worker that runs it.
//!
//! A turn moves `Resolved -> LedgerChecked -> WindowFetched -> (Gated | Skipped)
//! -> Dispatched -> Settled`. Window ids are marked processed as soon as the
//! window is read, before evaluation, so a turn is consumed at most once even
//! if everything after that fails.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::derive::{DerivationPath, DerivationReport, ProfilePath, ScorePath};
use super::identity::{resolve, TurnIdentity, TurnSnapshot};
use super::ledger::ProcessedLedger;
use super::weight::{WeightEvaluator, WeightVerdict};
use super::window::{HistoryWindow, Window};
use crate::config::AppConfig;
use crate::traits::{ScoreBounds, StateStore, TextGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Resolved,
    LedgerChecked,
    WindowFetched,
    Gated,
    Skipped,
    Dispatched,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyProcessed,
    EmptyWindow,
    EvaluationFailed,
    BelowThreshold,
    /// A store read failed before anything was dispatched.
    StoreUnavailable,
}

/// Terminal record of one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub subject_id: String,
    pub message_id: String,
    pub stage: TurnStage,
    pub skip: Option<SkipReason>,
    pub weight_score: Option<f64>,
    pub profile_updated: bool,
    pub score_updated: bool,
}

impl TurnOutcome {
    fn skipped(identity: &TurnIdentity, reason: SkipReason, weight_score: Option<f64>) -> Self {
        Self {
            subject_id: identity.subject_id.clone(),
            message_id: identity.message_id.clone(),
            stage: TurnStage::Skipped,
            skip: Some(reason),
            weight_score,
            profile_updated: false,
            score_updated: false,
        }
    }
}

/// A gated turn, ready for both derivation paths.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub identity: TurnIdentity,
    /// Context handed to the profile path.
    pub context: String,
    pub weight_score: f64,
}

#[derive(Debug)]
pub enum Prepared {
    Skipped(TurnOutcome),
    Dispatch(DispatchPlan),
}

pub struct UpdateOrchestrator {
    store: Arc<dyn StateStore>,
    ledger: ProcessedLedger,
    window: HistoryWindow,
    evaluator: WeightEvaluator,
    profile: Arc<dyn DerivationPath>,
    score: Arc<dyn DerivationPath>,
}

impl UpdateOrchestrator {
    /// `weight_generator` overrides `generator` for weight evaluation only.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn StateStore>,
        generator: Arc<dyn TextGenerator>,
        weight_generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let bounds = ScoreBounds::from(&config.affection);
        let evaluator = WeightEvaluator::new(
            weight_generator.unwrap_or_else(|| generator.clone()),
            config.weight.clone(),
        );
        let profile: Arc<dyn DerivationPath> = Arc::new(ProfilePath::new(
            generator.clone(),
            store.clone(),
            config.prompts.profile_template.clone(),
            bounds,
        ));
        let score: Arc<dyn DerivationPath> = Arc::new(ScorePath::new(
            generator,
            store.clone(),
            config.prompts.affection_template.clone(),
            config.affection.clone(),
        ));

        Self {
            ledger: ProcessedLedger::new(store.clone()),
            window: HistoryWindow::new(store.clone(), config.history.clone()),
            store,
            evaluator,
            profile,
            score,
        }
    }

    pub fn evaluator(&self) -> &WeightEvaluator {
        &self.evaluator
    }

    /// Identity, ledger, window (with immediate marking), weight and gate.
    pub async fn prepare(&self, snapshot: TurnSnapshot) -> Prepared {
        let identity = resolve(self.store.as_ref(), snapshot).await;
        let subject = identity.subject_id.as_str();
        let message_id = identity.message_id.as_str();
        debug!(subject = %subject, message_id = %message_id, stage = ?TurnStage::Resolved, "Turn stage");

        match self.ledger.is_processed(subject, message_id).await {
            Ok(true) => {
                debug!(subject = %subject, message_id = %message_id, "Turn already processed");
                return Prepared::Skipped(TurnOutcome::skipped(
                    &identity,
                    SkipReason::AlreadyProcessed,
                    None,
                ));
            }
            Ok(false) => {}
            Err(e) => {
                warn!(subject = %subject, message_id = %message_id, error = %e, "Ledger check failed");
                return Prepared::Skipped(TurnOutcome::skipped(
                    &identity,
                    SkipReason::StoreUnavailable,
                    None,
                ));
            }
        }
        debug!(subject = %subject, message_id = %message_id, stage = ?TurnStage::LedgerChecked, "Turn stage");

        let limit = self.window.default_limit();
        let window = match self.window.get_window(subject, limit).await {
            Ok(w) => w,
            Err(e) => {
                warn!(subject = %subject, message_id = %message_id, error = %e, "History window read failed");
                return Prepared::Skipped(TurnOutcome::skipped(
                    &identity,
                    SkipReason::StoreUnavailable,
                    None,
                ));
            }
        };
        if let Err(e) = self.ledger.record_all(subject, &window.message_ids).await {
            error!(subject = %subject, message_id = %message_id, error = %e, "Failed to mark window turns processed");
        }
        info!(
            subject = %subject,
            message_id = %message_id,
            chars = window.context.chars().count(),
            turns = window.message_ids.len(),
            stage = ?TurnStage::WindowFetched,
            "History window fetched"
        );

        if window.is_empty() {
            return Prepared::Skipped(TurnOutcome::skipped(
                &identity,
                SkipReason::EmptyWindow,
                None,
            ));
        }

        let verdict = self
            .evaluator
            .evaluate(subject, message_id, &identity.text, &window.context)
            .await;
        let weight_score = match &verdict {
            WeightVerdict::Scored { score, .. } => *score,
            WeightVerdict::Failed { .. } => {
                return Prepared::Skipped(TurnOutcome::skipped(
                    &identity,
                    SkipReason::EvaluationFailed,
                    None,
                ));
            }
        };
        if !self.evaluator.accepts(&verdict) {
            return Prepared::Skipped(TurnOutcome::skipped(
                &identity,
                SkipReason::BelowThreshold,
                Some(weight_score),
            ));
        }
        debug!(subject = %subject, message_id = %message_id, stage = ?TurnStage::Gated, "Turn stage");

        let context = self.refetch_context(subject, limit, window).await;
        Prepared::Dispatch(DispatchPlan {
            identity,
            context,
            weight_score,
        })
    }

    /// The first window's ids are already marked, so the re-read normally
    /// only contains turns that arrived since. Falls back to the evaluated
    /// window when nothing new is there.
    async fn refetch_context(&self, subject: &str, limit: usize, evaluated: Window) -> String {
        match self.window.get_window(subject, limit).await {
            Ok(latest) if !latest.is_empty() => latest.context,
            Ok(_) => evaluated.context,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Window re-read failed; using evaluated window");
                evaluated.context
            }
        }
    }

    /// Run both derivation paths concurrently, then record the summary.
    pub async fn settle(&self, plan: DispatchPlan) -> TurnOutcome {
        let DispatchPlan {
            identity,
            context,
            weight_score,
        } = plan;
        let subject = identity.subject_id.as_str();
        debug!(subject = %subject, message_id = %identity.message_id, stage = ?TurnStage::Dispatched, "Turn stage");

        let (profile, score) = tokio::join!(
            run_path(self.profile.as_ref(), subject, &identity.text, &context),
            run_path(self.score.as_ref(), subject, &identity.text, &context),
        );

        if let Err(e) = self
            .store
            .update_message_state(subject, &identity.message_id, profile.ok, score.ok)
            .await
        {
            error!(subject = %subject, message_id = %identity.message_id, error = %e, "Failed to record message state");
        }

        info!(
            subject = %subject,
            message_id = %identity.message_id,
            profile_updated = profile.ok,
            score_updated = score.ok,
            weight = weight_score,
            "Turn settled"
        );
        TurnOutcome {
            subject_id: identity.subject_id.clone(),
            message_id: identity.message_id.clone(),
            stage: TurnStage::Settled,
            skip: None,
            weight_score: Some(weight_score),
            profile_updated: profile.ok,
            score_updated: score.ok,
        }
    }

    /// Whole pipeline inline. The worker splits this in two.
    pub async fn process_turn(&self, snapshot: TurnSnapshot) -> TurnOutcome {
        match self.prepare(snapshot).await {
            Prepared::Skipped(outcome) => outcome,
            Prepared::Dispatch(plan) => self.settle(plan).await,
        }
    }
}

async fn run_path(
    path: &dyn DerivationPath,
    subject: &str,
    text: &str,
    context: &str,
) -> DerivationReport {
    let name = path.name();
    match AssertUnwindSafe(path.derive(subject, text, context))
        .catch_unwind()
        .await
    {
        Ok(report) => {
            if !report.ok {
                warn!(subject = %subject, path = name, detail = %report.detail, "Derivation failed");
            }
            report
        }
        Err(_) => {
            error!(subject = %subject, path = name, "Derivation panicked");
            DerivationReport::failure(format!("{} path panicked", name))
        }
    }
}

/// Detached queue in front of the orchestrator.
///
/// `submit` never waits. Steps up to the gate run one turn at a time on the
/// worker loop; each dispatched turn settles on its own task.
#[derive(Clone)]
pub struct UpdateWorker {
    tx: mpsc::Sender<TurnSnapshot>,
    outcomes: broadcast::Sender<TurnOutcome>,
}

impl UpdateWorker {
    pub fn spawn(orchestrator: Arc<UpdateOrchestrator>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<TurnSnapshot>(capacity.max(1));
        let (outcomes, _) = broadcast::channel(64);
        let outcomes_tx = outcomes.clone();

        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                let subject = snapshot.subject_id.clone();
                let prepared = AssertUnwindSafe(orchestrator.prepare(snapshot))
                    .catch_unwind()
                    .await;
                match prepared {
                    Ok(Prepared::Skipped(outcome)) => {
                        debug!(subject = %outcome.subject_id, reason = ?outcome.skip, "Turn skipped");
                        let _ = outcomes_tx.send(outcome);
                    }
                    Ok(Prepared::Dispatch(plan)) => {
                        let orchestrator = orchestrator.clone();
                        let outcomes_tx = outcomes_tx.clone();
                        tokio::spawn(async move {
                            let outcome = orchestrator.settle(plan).await;
                            let _ = outcomes_tx.send(outcome);
                        });
                    }
                    Err(_) => {
                        error!(subject = %subject, "Turn preparation panicked");
                    }
                }
            }
            debug!("Update worker stopped");
        });

        Self { tx, outcomes }
    }

    /// Queue a turn. Returns false when the queue is full or closed; the
    /// turn is dropped.
    pub fn submit(&self, snapshot: TurnSnapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(s)) => {
                warn!(subject = %s.subject_id, "Update queue full; dropping turn");
                false
            }
            Err(mpsc::error::TrySendError::Closed(s)) => {
                warn!(subject = %s.subject_id, "Update worker gone; dropping turn");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnOutcome> {
        self.outcomes.subscribe()
    }
}
