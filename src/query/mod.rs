//! Graph query layer - deps, dependents, call graph and imports over seeds

pub mod engine;
pub mod graph;

pub use engine::{
    CallDirection, CallHit, DetailLevel, GraphHit, HitSummary, ImpactLevel, ImportDirection, ImportHit,
    QueryEngine, QueryOutput,
};
pub use graph::{CodeGraph, GraphStats, QueryScope};
