// src/core/netlist/graph.rs
use std::fmt;

/// Identifies a cell definition in a design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub usize);

/// One bit of a (possibly bundled) instance inside a parent cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceRef {
    /// Cell that contains the instance
    pub cell: CellId,
    /// Position of the instance in its parent cell
    pub instance: usize,
    /// Bit of the bundle, 0 for plain instances
    pub bit: usize,
}

/// One terminal of an instance bit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub owner: InstanceRef,
    /// Single-bit port name, such as `sin` or `leaf[1]`
    pub name: String,
    /// Position of the bit in the instantiated cell's port list
    pub index: usize,
}

/// One bit of a cell's exported port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExportRef {
    pub cell: CellId,
    pub name: String,
    pub index: usize,
}

impl fmt::Display for ExportRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Connectivity queries the chain tracer needs from a circuit database.
///
/// All net queries are local to the cell that owns the port or export;
/// crossing hierarchy is done by the caller through exports.
pub trait NetGraph {
    /// Cell type of an instance
    fn cell_of(&self, instance: InstanceRef) -> CellId;

    /// Short cell name, used for catalog matching
    fn cell_name(&self, cell: CellId) -> &str;

    /// Library-qualified cell name, `library:cell`
    fn describe(&self, cell: CellId) -> String;

    /// Library the cell belongs to
    fn library_of(&self, cell: CellId) -> &str;

    /// Every instance bit in a cell, in declaration order
    fn instances_in(&self, cell: CellId) -> Vec<InstanceRef>;

    /// False for primitive nodes that can't be descended into
    fn is_sub_cell_instance(&self, instance: InstanceRef) -> bool;

    /// Name of a single bit, `x[2]` for bundles
    fn instance_name(&self, instance: InstanceRef) -> String;

    /// Name of the whole bundle, `x[0:3]`; same as the instance name otherwise
    fn bundle_name(&self, instance: InstanceRef) -> String;

    fn bundle_width(&self, instance: InstanceRef) -> usize;

    /// Another bit of the same bundle
    fn bundle_bit(&self, instance: InstanceRef, bit: usize) -> InstanceRef;

    /// Port on an instance bit by single-bit name
    fn port_on_instance(&self, instance: InstanceRef, name: &str) -> Option<PortRef>;

    /// Export of a cell by single-bit name
    fn export_named(&self, cell: CellId, name: &str) -> Option<ExportRef>;

    /// Other instance ports sharing a net with `port`, excluding `port` itself
    fn ports_on_same_net(&self, port: &PortRef) -> Vec<PortRef>;

    /// Instance ports on the net an export is attached to
    fn ports_on_export_net(&self, export: &ExportRef) -> Vec<PortRef>;

    /// First export of the enclosing cell on the same net as `port`
    fn export_on_same_net(&self, port: &PortRef) -> Option<ExportRef>;

    /// Whether the net of `port` leaves the enclosing cell through an export
    fn net_has_export(&self, port: &PortRef) -> bool {
        self.export_on_same_net(port).is_some()
    }
}
