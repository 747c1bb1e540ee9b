// src/core/scan/mod.rs
mod catalog;
mod chain;
mod entity_cache;
mod reducer;
mod tracer;
mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use catalog::{
    Catalog, ChainStartPort, ControllerSpec, ExportStart, PassThroughSpec, PortKey, ScanElementSpec,
};
pub use chain::{
    ChainData, ChainNode, Content, DataNetOptions, DataNetSpec, LastSubChain, NodeKind,
    SubChainInstance, TERMINAL_NAME,
};
pub use entity_cache::{Entity, EntityCache, EntityId, EntityKey};
pub use reducer::{ReduceStats, Reducer};
pub use tracer::{ChainTracer, TraceIssue};
pub use writer::{escape_attr, DocumentWriter};
