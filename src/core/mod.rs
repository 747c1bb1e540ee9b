// src/core/mod.rs
mod engine;

// Circuit connectivity the tracer walks
pub mod netlist;

// Chain tracing, caching, reduction and output
pub mod scan;

pub use engine::{Engine, TraceOutcome};
