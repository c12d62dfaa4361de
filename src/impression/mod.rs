//! Long-term impression of each subject: profile text plus affection score,
//! updated out of band after each rendered reply.

pub mod derive;
pub mod identity;
pub mod ledger;
pub mod orchestrator;
pub mod weight;
pub mod window;

pub use derive::{DerivationPath, DerivationReport, ProfilePath, ScorePath};
pub use identity::{IdentityError, TurnIdentity, TurnSnapshot};
pub use ledger::ProcessedLedger;
pub use orchestrator::{
    DispatchPlan, Prepared, SkipReason, TurnOutcome, TurnStage, UpdateOrchestrator, UpdateWorker,
};
pub use weight::{WeightCache, WeightEvaluator, WeightRecord, WeightVerdict};
pub use window::{HistoryWindow, Window};
