//! PitLab Core: point-in-time data access, tuned parameters, growth models and candidate pools.
//!
//! This crate contains everything needed to score one equity on one date
//! without seeing the future:
//! - Domain types (equities, price bars, fundamentals, scores)
//! - Market data stores (in-memory and CSV directory)
//! - Point-in-time accessor with retry and per-call deadlines
//! - Tuned-parameter registry parsed from literal text
//! - Predictor trait and the standard model families
//! - Scorer that turns (equity, as-of) into a score or a typed failure
//! - Candidate pool construction, filtering, merging and artifacts

pub mod accessor;
pub mod domain;
pub mod models;
pub mod pool;
pub mod registry;
pub mod rng;
pub mod scorer;
pub mod store;

pub use accessor::{Accessor, AccessorError, AccessorOptions, UniverseFilter};
pub use domain::{EquityId, ModelKind, ScoreFailure, ScoreResult};
pub use registry::ParameterRegistry;
pub use scorer::{ModelSelection, Scorer, ScorerOptions};
