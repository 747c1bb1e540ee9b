// src/core/netlist/design.rs
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ScanChainError, Result};
use super::graph::{CellId, ExportRef, InstanceRef, NetGraph, PortRef};

/// On-disk design description
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignFile {
    #[serde(default)]
    pub cells: Vec<CellDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellDecl {
    pub name: String,

    #[serde(default = "default_library")]
    pub library: String,

    /// Primitive nodes are never descended into
    #[serde(default)]
    pub primitive: bool,

    #[serde(default)]
    pub exports: Vec<ExportDecl>,

    #[serde(default)]
    pub instances: Vec<InstanceDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDecl {
    /// Export name, bus notation allowed (`leaf[0:7]`)
    pub name: String,

    /// Internal net; defaults to the export name
    #[serde(default)]
    pub net: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDecl {
    /// Instance name; `x[0:3]` declares a bundle of four. Defaults to `<cell>@<n>`.
    #[serde(default)]
    pub name: Option<String>,

    /// Instantiated cell, `library:cell` or `cell`
    pub cell: String,

    /// Port (bit, bus or bus base name) to net(s)
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

fn default_library() -> String {
    "work".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    instance: usize,
    bit: usize,
    port: usize,
}

#[derive(Debug, Clone)]
struct PortBit {
    name: String,
    net: usize,
}

#[derive(Debug, Clone)]
struct Net {
    name: String,
    members: Vec<Slot>,
}

#[derive(Debug, Clone)]
struct Instance {
    name: String,
    bits: Vec<String>,
    cell: CellId,
    /// Net per bundle bit and port bit
    nets: Vec<Vec<Option<usize>>>,
}

#[derive(Debug, Clone)]
struct Cell {
    name: String,
    library: String,
    primitive: bool,
    ports: Vec<PortBit>,
    /// Declared export base names and the port bits they cover
    groups: Vec<(String, Vec<usize>)>,
    instances: Vec<Instance>,
    nets: Vec<Net>,
}

impl Cell {
    fn port_position(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    fn resolve_port_bits(&self, key: &str) -> Option<Vec<usize>> {
        let bits: Option<Vec<usize>> = expand_bus(key)
            .iter()
            .map(|name| self.port_position(name))
            .collect();
        bits.or_else(|| {
            self.groups
                .iter()
                .find(|(base, _)| base == key)
                .map(|(_, bits)| bits.clone())
        })
    }
}

/// Per-cell net name interning while a design is being built
#[derive(Default)]
struct NetTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl NetTable {
    fn intern(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }
}

/// In-memory hierarchical netlist
#[derive(Debug, Clone)]
pub struct Design {
    cells: Vec<Cell>,
    lookup: HashMap<String, CellId>,
}

fn bus_regex() -> &'static Regex {
    static BUS: OnceLock<Regex> = OnceLock::new();
    BUS.get_or_init(|| {
        Regex::new(r"^(?P<base>[^\[]*)\[(?P<from>\d+):(?P<to>\d+)\](?P<rest>.*)$")
            .expect("Invalid bus regex")
    })
}

/// Expand `name[a:b]` into single-bit names, in declaration order
pub fn expand_bus(name: &str) -> Vec<String> {
    let Some(caps) = bus_regex().captures(name) else {
        return vec![name.to_string()];
    };
    let base = &caps["base"];
    let rest = &caps["rest"];
    let (Ok(from), Ok(to)) = (caps["from"].parse::<usize>(), caps["to"].parse::<usize>()) else {
        return vec![name.to_string()];
    };

    let indices: Vec<usize> = if from <= to {
        (from..=to).collect()
    } else {
        (to..=from).rev().collect()
    };
    indices
        .into_iter()
        .map(|i| format!("{}[{}]{}", base, i, rest))
        .collect()
}

fn bus_base(name: &str) -> &str {
    name.split('[').next().unwrap_or(name)
}

impl Design {
    /// Parse a design file, choosing the format from its extension
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(content),
            _ => Self::from_toml_str(content),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: DesignFile =
            toml::from_str(content).map_err(|e| ScanChainError::Design(e.to_string()))?;
        Self::build(file)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: DesignFile = serde_json::from_str(content)?;
        Self::build(file)
    }

    /// Resolve declarations into a connected netlist
    pub fn build(file: DesignFile) -> Result<Self> {
        let mut lookup = HashMap::new();
        for (i, decl) in file.cells.iter().enumerate() {
            let id = CellId(i);
            let qualified = format!("{}:{}", decl.library, decl.name);
            if lookup.insert(qualified.clone(), id).is_some() {
                return Err(ScanChainError::Design(format!("cell {} declared twice", qualified)));
            }
        }
        for (i, decl) in file.cells.iter().enumerate() {
            if let Some(existing) = lookup.get(&decl.name) {
                debug!("Cell name {} is ambiguous, bare references resolve to cell #{}", decl.name, existing.0);
                continue;
            }
            lookup.insert(decl.name.clone(), CellId(i));
        }

        // Exports first: instances need the port lists of the cells they instantiate
        let mut tables: Vec<NetTable> = Vec::with_capacity(file.cells.len());
        let mut cells: Vec<Cell> = Vec::with_capacity(file.cells.len());
        for decl in &file.cells {
            let mut table = NetTable::default();
            let mut ports = Vec::new();
            let mut groups = Vec::new();

            for export in &decl.exports {
                let bits = expand_bus(&export.name);
                let nets = expand_bus(export.net.as_deref().unwrap_or(&export.name));
                if nets.len() != bits.len() && nets.len() != 1 {
                    return Err(ScanChainError::Design(format!(
                        "export {} of {}:{} has {} bits but {} nets",
                        export.name, decl.library, decl.name, bits.len(), nets.len()
                    )));
                }

                let first = ports.len();
                for (i, bit) in bits.iter().enumerate() {
                    let net_name = if nets.len() == 1 { &nets[0] } else { &nets[i] };
                    ports.push(PortBit { name: bit.clone(), net: table.intern(net_name) });
                }
                groups.push((bus_base(&export.name).to_string(), (first..ports.len()).collect()));
            }

            tables.push(table);
            cells.push(Cell {
                name: decl.name.clone(),
                library: decl.library.clone(),
                primitive: decl.primitive,
                ports,
                groups,
                instances: Vec::new(),
                nets: Vec::new(),
            });
        }

        for (ci, decl) in file.cells.iter().enumerate() {
            let mut counters: HashMap<String, usize> = HashMap::new();
            let mut instances = Vec::with_capacity(decl.instances.len());

            for inst_decl in &decl.instances {
                let target = *lookup.get(&inst_decl.cell).ok_or_else(|| {
                    ScanChainError::Design(format!(
                        "{}:{} instantiates unknown cell {}",
                        decl.library, decl.name, inst_decl.cell
                    ))
                })?;
                let target_cell = &cells[target.0];

                let name = match &inst_decl.name {
                    Some(name) => name.clone(),
                    None => {
                        let counter = counters.entry(target_cell.name.clone()).or_insert(0);
                        let name = format!("{}@{}", target_cell.name, counter);
                        *counter += 1;
                        name
                    }
                };
                if instances.iter().any(|i: &Instance| i.name == name) {
                    return Err(ScanChainError::Design(format!(
                        "instance {} declared twice in {}:{}",
                        name, decl.library, decl.name
                    )));
                }

                let bits = expand_bus(&name);
                let width = bits.len();
                let mut nets = vec![vec![None; target_cell.ports.len()]; width];

                for (port_key, net_spec) in &inst_decl.connections {
                    let port_bits = target_cell.resolve_port_bits(port_key).ok_or_else(|| {
                        ScanChainError::Design(format!(
                            "instance {} in {}:{} connects unknown port {} of {}",
                            name, decl.library, decl.name, port_key, target_cell.name
                        ))
                    })?;
                    let net_ids: Vec<usize> = expand_bus(net_spec)
                        .iter()
                        .map(|n| tables[ci].intern(n))
                        .collect();

                    let per_bit = port_bits.len();
                    for bit in 0..width {
                        for (j, &port) in port_bits.iter().enumerate() {
                            let net = if net_ids.len() == per_bit * width {
                                net_ids[bit * per_bit + j]
                            } else if net_ids.len() == per_bit {
                                net_ids[j]
                            } else if net_ids.len() == 1 {
                                net_ids[0]
                            } else {
                                return Err(ScanChainError::Design(format!(
                                    "instance {} in {}:{} connects {} nets to port {} ({} bits x {} instances)",
                                    name, decl.library, decl.name, net_ids.len(), port_key, per_bit, width
                                )));
                            };
                            nets[bit][port] = Some(net);
                        }
                    }
                }

                instances.push(Instance { name, bits, cell: target, nets });
            }

            cells[ci].instances = instances;
        }

        for (cell, table) in cells.iter_mut().zip(tables) {
            let mut nets: Vec<Net> = table
                .names
                .into_iter()
                .map(|name| Net { name, members: Vec::new() })
                .collect();
            for (i, inst) in cell.instances.iter().enumerate() {
                for (bit, bit_nets) in inst.nets.iter().enumerate() {
                    for (port, net) in bit_nets.iter().enumerate() {
                        if let Some(net) = net {
                            nets[*net].members.push(Slot { instance: i, bit, port });
                        }
                    }
                }
            }
            cell.nets = nets;
        }

        let design = Self { cells, lookup };
        design.check_acyclic()?;
        debug!("Loaded design with {} cells", design.cells.len());
        Ok(design)
    }

    fn check_acyclic(&self) -> Result<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        fn visit(design: &Design, cell: usize, state: &mut [u8]) -> Result<()> {
            match state[cell] {
                1 => {
                    return Err(ScanChainError::Design(format!(
                        "cell {} instantiates itself",
                        design.describe(CellId(cell))
                    )))
                }
                2 => return Ok(()),
                _ => {}
            }
            state[cell] = 1;
            for inst in &design.cells[cell].instances {
                visit(design, inst.cell.0, state)?;
            }
            state[cell] = 2;
            Ok(())
        }

        let mut state = vec![0u8; self.cells.len()];
        for cell in 0..self.cells.len() {
            visit(self, cell, &mut state)?;
        }
        Ok(())
    }

    /// Find a cell by `library:cell` or bare name
    pub fn find_cell(&self, reference: &str) -> Option<CellId> {
        self.lookup.get(reference).copied()
    }

    /// Cells that no other cell instantiates
    pub fn top_cells(&self) -> Vec<CellId> {
        let mut used = vec![false; self.cells.len()];
        for cell in &self.cells {
            for inst in &cell.instances {
                used[inst.cell.0] = true;
            }
        }
        (0..self.cells.len())
            .filter(|&i| !used[i])
            .map(CellId)
            .collect()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Name of the net an instance port is on, if connected
    #[cfg(test)]
    pub fn net_name(&self, port: &PortRef) -> Option<&str> {
        let cell = &self.cells[port.owner.cell.0];
        let net = self.net_of(port)?;
        Some(&cell.nets[net].name)
    }

    fn instance(&self, instance: InstanceRef) -> &Instance {
        &self.cells[instance.cell.0].instances[instance.instance]
    }

    fn net_of(&self, port: &PortRef) -> Option<usize> {
        self.instance(port.owner)
            .nets
            .get(port.owner.bit)?
            .get(port.index)
            .copied()
            .flatten()
    }

    fn slot_port(&self, cell: CellId, slot: Slot) -> PortRef {
        let inst = &self.cells[cell.0].instances[slot.instance];
        PortRef {
            owner: InstanceRef { cell, instance: slot.instance, bit: slot.bit },
            name: self.cells[inst.cell.0].ports[slot.port].name.clone(),
            index: slot.port,
        }
    }
}

impl NetGraph for Design {
    fn cell_of(&self, instance: InstanceRef) -> CellId {
        self.instance(instance).cell
    }

    fn cell_name(&self, cell: CellId) -> &str {
        &self.cells[cell.0].name
    }

    fn describe(&self, cell: CellId) -> String {
        let cell = &self.cells[cell.0];
        format!("{}:{}", cell.library, cell.name)
    }

    fn library_of(&self, cell: CellId) -> &str {
        &self.cells[cell.0].library
    }

    fn instances_in(&self, cell: CellId) -> Vec<InstanceRef> {
        self.cells[cell.0]
            .instances
            .iter()
            .enumerate()
            .flat_map(|(i, inst)| {
                (0..inst.bits.len()).map(move |bit| InstanceRef { cell, instance: i, bit })
            })
            .collect()
    }

    fn is_sub_cell_instance(&self, instance: InstanceRef) -> bool {
        !self.cells[self.cell_of(instance).0].primitive
    }

    fn instance_name(&self, instance: InstanceRef) -> String {
        let inst = self.instance(instance);
        inst.bits
            .get(instance.bit)
            .cloned()
            .unwrap_or_else(|| inst.name.clone())
    }

    fn bundle_name(&self, instance: InstanceRef) -> String {
        self.instance(instance).name.clone()
    }

    fn bundle_width(&self, instance: InstanceRef) -> usize {
        self.instance(instance).bits.len()
    }

    fn bundle_bit(&self, instance: InstanceRef, bit: usize) -> InstanceRef {
        InstanceRef { bit, ..instance }
    }

    fn port_on_instance(&self, instance: InstanceRef, name: &str) -> Option<PortRef> {
        let target = &self.cells[self.cell_of(instance).0];
        let index = target.port_position(name)?;
        Some(PortRef { owner: instance, name: name.to_string(), index })
    }

    fn export_named(&self, cell: CellId, name: &str) -> Option<ExportRef> {
        let index = self.cells[cell.0].port_position(name)?;
        Some(ExportRef { cell, name: name.to_string(), index })
    }

    fn ports_on_same_net(&self, port: &PortRef) -> Vec<PortRef> {
        let Some(net) = self.net_of(port) else {
            return Vec::new();
        };
        let cell = port.owner.cell;
        let own = Slot { instance: port.owner.instance, bit: port.owner.bit, port: port.index };
        self.cells[cell.0].nets[net]
            .members
            .iter()
            .filter(|slot| **slot != own)
            .map(|slot| self.slot_port(cell, *slot))
            .collect()
    }

    fn ports_on_export_net(&self, export: &ExportRef) -> Vec<PortRef> {
        let cell = &self.cells[export.cell.0];
        let net = cell.ports[export.index].net;
        cell.nets[net]
            .members
            .iter()
            .map(|slot| self.slot_port(export.cell, *slot))
            .collect()
    }

    fn export_on_same_net(&self, port: &PortRef) -> Option<ExportRef> {
        let net = self.net_of(port)?;
        let cell = port.owner.cell;
        self.cells[cell.0]
            .ports
            .iter()
            .position(|p| p.net == net)
            .map(|index| ExportRef {
                cell,
                name: self.cells[cell.0].ports[index].name.clone(),
                index,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUSSED: &str = r#"
[[cells]]
name = "dff"
library = "scan"
exports = [{ name = "sin" }, { name = "sout" }]

[[cells]]
name = "row"
library = "work"
exports = [{ name = "in", net = "s[0]" }, { name = "out", net = "s[4]" }]

[[cells.instances]]
name = "r[0:3]"
cell = "scan:dff"
connections = { sin = "s[0:3]", sout = "s[1:4]" }

[[cells.instances]]
cell = "dff"

[[cells.instances]]
cell = "dff"
connections = { sin = "s[4]" }
"#;

    #[test]
    fn test_expand_bus() {
        assert_eq!(expand_bus("leaf[0:2]"), vec!["leaf[0]", "leaf[1]", "leaf[2]"]);
        assert_eq!(expand_bus("d[2:1]"), vec!["d[2]", "d[1]"]);
        assert_eq!(expand_bus("sin"), vec!["sin"]);
        assert_eq!(expand_bus("leaf[3]"), vec!["leaf[3]"]);
    }

    #[test]
    fn test_bundle_connections_are_distributed_per_bit() {
        let design = Design::from_toml_str(BUSSED).unwrap();
        let row = design.find_cell("work:row").unwrap();
        let bits = design.instances_in(row);

        // four bundle bits plus two plain instances
        assert_eq!(bits.len(), 6);
        assert_eq!(design.instance_name(bits[2]), "r[2]");
        assert_eq!(design.bundle_name(bits[2]), "r[0:3]");
        assert_eq!(design.bundle_width(bits[2]), 4);

        let sout = design.port_on_instance(bits[0], "sout").unwrap();
        let next = design.ports_on_same_net(&sout);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].owner, bits[1]);
        assert_eq!(next[0].name, "sin");
    }

    #[test]
    fn test_default_instance_names_count_per_cell() {
        let design = Design::from_toml_str(BUSSED).unwrap();
        let row = design.find_cell("row").unwrap();
        let bits = design.instances_in(row);
        assert_eq!(design.instance_name(bits[4]), "dff@0");
        assert_eq!(design.instance_name(bits[5]), "dff@1");
    }

    #[test]
    fn test_exports_map_to_internal_ports() {
        let design = Design::from_toml_str(BUSSED).unwrap();
        let row = design.find_cell("row").unwrap();

        let input = design.export_named(row, "in").unwrap();
        let ports = design.ports_on_export_net(&input);
        assert_eq!(ports.len(), 1);
        assert_eq!(design.instance_name(ports[0].owner), "r[0]");

        // last bundle bit and dff@1 share s[4], which is also the "out" export
        let bits = design.instances_in(row);
        let last_out = design.port_on_instance(bits[3], "sout").unwrap();
        assert_eq!(design.export_on_same_net(&last_out).unwrap().name, "out");
        assert_eq!(design.ports_on_same_net(&last_out).len(), 1);
        assert_eq!(design.net_name(&last_out), Some("s[4]"));
    }

    #[test]
    fn test_top_cells_and_lookup() {
        let design = Design::from_toml_str(BUSSED).unwrap();
        assert_eq!(design.top_cells(), vec![design.find_cell("row").unwrap()]);
        assert_eq!(design.describe(design.find_cell("dff").unwrap()), "scan:dff");
        assert!(design.find_cell("missing").is_none());
    }

    #[test]
    fn test_unknown_port_is_rejected() {
        let err = Design::from_toml_str(
            r#"
[[cells]]
name = "leaf"
exports = [{ name = "a" }]

[[cells]]
name = "top"
[[cells.instances]]
cell = "leaf"
connections = { b = "n" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ScanChainError::Design(_)));
    }

    #[test]
    fn test_recursive_instantiation_is_rejected() {
        let err = Design::from_toml_str(
            r#"
[[cells]]
name = "a"
[[cells.instances]]
cell = "b"

[[cells]]
name = "b"
[[cells.instances]]
cell = "a"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("instantiates itself"));
    }

    #[test]
    fn test_json_designs_load() {
        let design = Design::from_json_str(
            r#"{"cells": [{"name": "leaf", "exports": [{"name": "a"}]},
                          {"name": "top", "instances": [{"cell": "leaf", "connections": {"a": "n"}}]}]}"#,
        )
        .unwrap();
        assert_eq!(design.cell_count(), 2);
    }
}
