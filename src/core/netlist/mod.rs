//! Hierarchical netlists and the connectivity queries the tracer runs on them
mod design;
mod graph;

pub use design::{expand_bus, CellDecl, Design, DesignFile, ExportDecl, InstanceDecl};
pub use graph::{CellId, ExportRef, InstanceRef, NetGraph, PortRef};
