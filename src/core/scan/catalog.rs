// src/core/scan/catalog.rs
use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use super::chain::DataNetSpec;

/// A cell type entered through one of its ports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortKey {
    pub cell: String,
    pub port: String,
}

impl PortKey {
    pub fn new(cell: impl Into<String>, port: impl Into<String>) -> Self {
        Self { cell: cell.into(), port: port.into() }
    }
}

/// A cell holding one bit of scan storage
#[derive(Debug, Clone, PartialEq)]
pub struct ScanElementSpec {
    pub cell: String,
    pub access: String,
    pub clears: String,
    pub in_port: String,
    pub out_port: String,
    pub data_net: Option<DataNetSpec>,
    pub data_net2: Option<DataNetSpec>,
}

/// A buffer or inverter that forwards scan data without storing it
#[derive(Debug, Clone, PartialEq)]
pub struct PassThroughSpec {
    pub cell: String,
    pub in_port: String,
    pub out_port: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainStartPort {
    pub opcode: u32,
    pub out_port: String,
    pub chain_name: Option<String>,
}

impl ChainStartPort {
    pub fn chain_name(&self) -> String {
        self.chain_name
            .clone()
            .unwrap_or_else(|| format!("chain_{}", self.out_port))
    }
}

/// The cell every chain starts from and returns to
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSpec {
    /// Cell name, matched against instance cell types
    pub cell: String,
    pub length_ir: u32,
    pub ports: Vec<ChainStartPort>,
}

impl ControllerSpec {
    pub fn new(cell: impl Into<String>, length_ir: u32) -> Self {
        Self { cell: cell.into(), length_ir, ports: Vec::new() }
    }
}

/// Partial chain traced from a top-level export instead of the controller
#[derive(Debug, Clone, PartialEq)]
pub struct ExportStart {
    pub export: String,
    pub chain_name: String,
}

/// Element kinds the tracer recognizes, configured once before tracing
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    scan_elements: HashMap<PortKey, ScanElementSpec>,
    pass_throughs: HashMap<PortKey, PassThroughSpec>,
    controller: Option<ControllerSpec>,
    flatten: HashSet<String>,
    export_starts: Vec<ExportStart>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_scan_element(&mut self, spec: ScanElementSpec) {
        let key = PortKey::new(&spec.cell, &spec.in_port);
        if self.scan_elements.insert(key, spec).is_some() {
            debug!("Replaced an earlier scan element definition");
        }
    }

    pub fn register_pass_through(&mut self, spec: PassThroughSpec) {
        let key = PortKey::new(&spec.cell, &spec.in_port);
        if self.pass_throughs.insert(key, spec).is_some() {
            debug!("Replaced an earlier pass-through definition");
        }
    }

    pub fn set_controller(&mut self, spec: ControllerSpec) {
        self.controller = Some(spec);
    }

    pub fn add_chain_start_port(&mut self, opcode: u32, out_port: impl Into<String>, chain_name: Option<String>) {
        let out_port = out_port.into();
        match self.controller.as_mut() {
            Some(controller) => controller.ports.push(ChainStartPort { opcode, out_port, chain_name }),
            None => warn!(
                "Can't add port {} because the controller has not been defined yet",
                out_port
            ),
        }
    }

    /// Mark a cell (library-qualified name) for inlining
    pub fn add_flatten_target(&mut self, cell: impl Into<String>) {
        self.flatten.insert(cell.into());
    }

    pub fn add_export_start(&mut self, export: impl Into<String>, chain_name: impl Into<String>) {
        self.export_starts.push(ExportStart {
            export: export.into(),
            chain_name: chain_name.into(),
        });
    }

    pub fn export_starts(&self) -> &[ExportStart] {
        &self.export_starts
    }

    pub fn scan_element_for(&self, cell: &str, port: &str) -> Option<&ScanElementSpec> {
        self.scan_elements.get(&PortKey::new(cell, port))
    }

    pub fn pass_through_for(&self, cell: &str, port: &str) -> Option<&PassThroughSpec> {
        self.pass_throughs.get(&PortKey::new(cell, port))
    }

    pub fn controller(&self) -> Option<&ControllerSpec> {
        self.controller.as_ref()
    }

    pub fn is_controller(&self, cell: &str) -> bool {
        self.controller.as_ref().is_some_and(|c| c.cell == cell)
    }

    pub fn is_flatten_target(&self, cell: &str) -> bool {
        self.flatten.contains(cell)
    }
}
