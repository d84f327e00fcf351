//! `bgtcheck-recon`: BOR/BGT overlap reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded objects, returns classified pairs.
//! No CLI or IO dependencies.

pub mod area;
pub mod audit;
pub mod classify;
pub mod config;
pub mod derived;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod geometry;
pub mod matcher;
pub mod model;
pub mod overlap;
pub mod rules;
pub mod summary;

pub use config::ReconConfig;
pub use engine::{run, Engine};
pub use error::ReconError;
pub use exclusion::ExclusionSet;
pub use model::{
    Area, AssetCategory, BgtClass, Bucket, MatchInput, Problem, RunReport, SpatialObject,
};
pub use rules::{RuleRow, RuleTable, Verdict};
