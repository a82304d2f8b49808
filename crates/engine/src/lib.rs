//! Latency-arbitrage engine for 15-minute up/down windows.
//!
//! The engine compares the live spot price of an asset against the window's
//! reference price, estimates a fair probability for the leading outcome,
//! and trades when the quoted odds lag behind.
//!
//! - [`reference`]: window registry and reference-price capture
//! - [`odds`]: prioritized outcome quotes
//! - [`edge`]: fair value, edge, confidence and sizing
//! - [`exit_rules`]: per-position exit decisions
//! - [`lifecycle`]: entry, fill confirmation, exits and settlement
//! - [`risk`]: daily loss, loss streak and exposure gate
//! - [`persistence`]: JSON position store
//! - [`runner`]: the periodic loops tying it together

pub mod book;
pub mod edge;
pub mod exit_rules;
pub mod lifecycle;
pub mod odds;
pub mod persistence;
pub mod reference;
pub mod risk;
pub mod runner;

pub use book::{EntryBlocked, EntryLimits, PositionBook};
pub use edge::{EdgeInput, EdgeModel, Opportunity, Rejection, Sizing};
pub use exit_rules::{ExitReason, ExitRules, MarketView};
pub use lifecycle::{
    EntryError, ExitReport, LifecycleEngine, LifecycleStats, MarketData, ResolutionSource,
    Settlement,
};
pub use odds::{GammaQuoteCache, OddsAggregator, OddsQuote, QuoteSource};
pub use persistence::JsonPositionStore;
pub use reference::{
    CaptureMethod, CaptureOutcome, CapturePlan, ReferenceTracker, SourcePrice, WindowReference,
};
pub use risk::{DailyRiskGate, RiskError};
pub use runner::{EngineRunner, RunnerParts, RunnerStats, WindowSource};
