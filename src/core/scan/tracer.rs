// src/core/scan/tracer.rs
use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::core::netlist::{CellId, InstanceRef, NetGraph, PortRef};
use crate::error::{ScanChainError, Result};
use super::catalog::{Catalog, ExportStart, ScanElementSpec};
use super::chain::{ChainNode, Content, SubChainInstance};
use super::entity_cache::{EntityCache, EntityKey};

/// Problems found while tracing; none of them stop the run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceIssue {
    #[error("Could not find port {port} on {instance}")]
    MissingPort { port: String, instance: String },

    #[error("Cannot find export {export} in cell {cell}")]
    MissingExport { export: String, cell: String },

    #[error("No other ports connected to port {port} on node {instance} in cell {cell}")]
    NoConnections { port: String, instance: String, cell: String },

    #[error("In {cell}, last element \"{instance}\", output port \"{port}\" does not connect to another scan element, is not exported from the cell, and does not terminate at the controller")]
    DanglingExit { cell: String, instance: String, port: String },

    #[error("Found more than one chain branching from port set: {} in cell {cell}", .ports.join(", "))]
    BranchingAmbiguity { ports: Vec<String>, cell: String },

    #[error("Chain {chain} did not end at the controller; last sub chain is {last}")]
    UnterminatedChain { chain: String, last: String },
}

impl TraceIssue {
    pub fn is_error(&self) -> bool {
        !matches!(self, TraceIssue::NoConnections { .. })
    }
}

/// Walks net connectivity to discover scan chains.
///
/// Each hop classifies the ports sharing a net with the current exit port:
/// pass-throughs and scan elements are leaves, the controller ends the chain,
/// and any other cell instance is descended into and cached as an entity.
pub struct ChainTracer<'a, G: NetGraph> {
    graph: &'a G,
    catalog: &'a Catalog,
    cache: &'a mut EntityCache,
    issues: Vec<TraceIssue>,
}

impl<'a, G: NetGraph> ChainTracer<'a, G> {
    pub fn new(graph: &'a G, catalog: &'a Catalog, cache: &'a mut EntityCache) -> Self {
        Self {
            graph,
            catalog,
            cache,
            issues: Vec::new(),
        }
    }

    pub fn issues(&self) -> &[TraceIssue] {
        &self.issues
    }

    pub fn into_issues(self) -> Vec<TraceIssue> {
        self.issues
    }

    fn report(&mut self, issue: TraceIssue) {
        if issue.is_error() {
            error!("{}", issue);
        } else {
            warn!("{}", issue);
        }
        self.issues.push(issue);
    }

    /// Trace one chain per controller start port. The controller may sit
    /// anywhere below `top`.
    pub fn trace_from_controller(&mut self, top: CellId) -> Result<Vec<ChainNode>> {
        let graph = self.graph;
        let catalog = self.catalog;
        let controller = catalog.controller().ok_or(ScanChainError::MissingController)?;

        let path = self
            .find_controller_path(top, &controller.cell, &mut HashSet::new())
            .ok_or_else(|| ScanChainError::ControllerNotFound {
                controller: controller.cell.clone(),
                top: graph.describe(top),
            })?;
        let Some(&controller_instance) = path.last() else {
            return Ok(Vec::new());
        };
        info!(
            "Generating chains starting from controller {} : {}",
            graph.describe(graph.cell_of(controller_instance)),
            graph.instance_name(controller_instance)
        );

        let mut chains = Vec::new();
        for start in &controller.ports {
            let name = start.chain_name();
            if graph.port_on_instance(controller_instance, &start.out_port).is_none() {
                self.report(TraceIssue::MissingPort {
                    port: start.out_port.clone(),
                    instance: graph.instance_name(controller_instance),
                });
                continue;
            }

            debug!("Starting chain {} from port {}", start.opcode, start.out_port);
            let mut chain = ChainNode::chain(name, Some(start.opcode));
            self.descend(&mut chain.children, &path, &start.out_port);
            self.finish_chain(&chain, true);
            chains.push(chain);
        }

        Ok(chains)
    }

    /// Trace partial chains starting at exports of `top`
    pub fn trace_from_exports(&mut self, top: CellId, starts: &[ExportStart]) -> Vec<ChainNode> {
        let graph = self.graph;
        let mut chains = Vec::new();

        for ExportStart { export: export_name, chain_name } in starts {
            let Some(export) = graph.export_named(top, export_name) else {
                self.report(TraceIssue::MissingExport {
                    export: export_name.clone(),
                    cell: graph.describe(top),
                });
                continue;
            };

            info!("Tracing sub-chain {} from export {}", chain_name, export);
            let mut chain = ChainNode::chain(chain_name, Some(0));
            let candidates = graph.ports_on_export_net(&export);
            self.follow(&mut chain.children, &candidates);
            self.finish_chain(&chain, false);
            chains.push(chain);
        }

        chains
    }

    fn finish_chain(&mut self, chain: &ChainNode, must_terminate: bool) {
        let found = chain.num_scan_elements(self.cache);
        info!("completed: chain {} had {} scan chain elements", chain.data.name, found);
        if !must_terminate {
            return;
        }

        let last = chain
            .last_sub_chain(self.cache)
            .map(|last| (last.is_terminal(), format!("{}, length={}", last.name(), last.length())));
        match last {
            Some((true, _)) => {}
            Some((false, last)) => self.report(TraceIssue::UnterminatedChain {
                chain: chain.data.name.clone(),
                last,
            }),
            None => self.report(TraceIssue::UnterminatedChain {
                chain: chain.data.name.clone(),
                last: "none".to_string(),
            }),
        }
    }

    /// Depth-first search for the controller; the path runs from an instance
    /// in `cell` down to the controller instance itself
    fn find_controller_path(
        &self,
        cell: CellId,
        controller: &str,
        searched: &mut HashSet<CellId>,
    ) -> Option<Vec<InstanceRef>> {
        for instance in self.graph.instances_in(cell) {
            let sub_cell = self.graph.cell_of(instance);
            if self.graph.cell_name(sub_cell) == controller {
                return Some(vec![instance]);
            }
            if !self.graph.is_sub_cell_instance(instance) || searched.contains(&sub_cell) {
                continue;
            }
            match self.find_controller_path(sub_cell, controller, searched) {
                Some(mut path) => {
                    path.insert(0, instance);
                    return Some(path);
                }
                None => {
                    searched.insert(sub_cell);
                }
            }
        }
        None
    }

    /// Walk back up from the controller, one hierarchy level per path entry.
    /// Each level above the controller becomes a sub-chain named after the
    /// instance; the chain continues at the parent level through the export
    /// the lower level left by.
    fn descend(
        &mut self,
        chain: &mut Vec<SubChainInstance>,
        path: &[InstanceRef],
        start_port: &str,
    ) -> Option<SubChainInstance> {
        let graph = self.graph;
        let (&instance, rest) = path.split_first()?;

        if rest.is_empty() {
            let start = self.port_on(instance, start_port)?;
            let candidates = self.next_ports(&start);
            return Some(
                self.follow(chain, &candidates)
                    .unwrap_or_else(|| SubChainInstance::marker(start)),
            );
        }

        let name = graph.instance_name(instance);
        debug!("Descending into {} looking for the controller", name);
        let mut level = ChainNode::sub(name.clone(), 0);
        let inner = self.descend(&mut level.children, rest, start_port);
        chain.push(SubChainInstance::new(None, None, Some(instance), name, Content::owned(level)));
        let index = chain.len() - 1;

        let inner_exit = inner.and_then(|last| last.exit);
        if let Some(export) = inner_exit.and_then(|exit| graph.export_on_same_net(&exit)) {
            let exit = self.port_on(instance, &export.name);
            chain[index].exit = exit.clone();
            if let Some(exit) = exit {
                debug!(
                    "Continuing chain in {} from port {}",
                    graph.describe(instance.cell),
                    exit.name
                );
                let candidates = self.next_ports(&exit);
                if let Some(last) = self.follow(chain, &candidates) {
                    return Some(last);
                }
            }
        }
        Some(chain[index].clone())
    }

    /// Classify every candidate and append the single branch that leads
    /// somewhere. Returns the last instance of that branch.
    pub fn follow(
        &mut self,
        chain: &mut Vec<SubChainInstance>,
        candidates: &[PortRef],
    ) -> Option<SubChainInstance> {
        let mut branches: Vec<(Vec<SubChainInstance>, SubChainInstance)> = Vec::new();

        for port in candidates {
            let Some(found) = self.classify(port) else {
                continue;
            };

            if found.is_terminal() {
                branches.push((vec![found.clone()], found));
                continue;
            }

            let mut branch = Vec::new();
            if found.content.is_significant(self.cache) {
                branch.push(found.clone());
            }

            let mut last = found;
            if let Some(exit) = last.exit.clone() {
                let next = self.next_ports(&exit);
                if let Some(tail) = self.follow(&mut branch, &next) {
                    last = tail;
                }
            }

            if !branch.is_empty() {
                branches.push((branch, last));
            }
        }

        if branches.len() > 1 {
            let graph = self.graph;
            let ports = candidates
                .iter()
                .map(|p| format!("{}:{}", graph.instance_name(p.owner), p.name))
                .collect();
            let cell = candidates
                .first()
                .map(|p| graph.describe(p.owner.cell))
                .unwrap_or_default();
            self.report(TraceIssue::BranchingAmbiguity { ports, cell });
        }

        let (branch, last) = branches.into_iter().next()?;
        chain.extend(branch);
        Some(last)
    }

    /// Decide what a port leads into. `None` is a dead end.
    pub fn classify(&mut self, port: &PortRef) -> Option<SubChainInstance> {
        let graph = self.graph;
        let catalog = self.catalog;
        let owner = port.owner;
        let cell = graph.cell_of(owner);
        let cell_name = graph.cell_name(cell);

        if let Some(spec) = catalog.pass_through_for(cell_name, &port.name) {
            debug!("  ...matched pass through cell {}", spec.cell);
            let exit = self.port_on(owner, &spec.out_port);
            return Some(SubChainInstance::new(
                Some(port.clone()),
                exit,
                Some(owner),
                graph.instance_name(owner),
                Content::owned(ChainNode::pass_through(spec.cell.clone())),
            ));
        }

        if !graph.is_sub_cell_instance(owner) {
            return None;
        }

        if let Some(spec) = catalog.scan_element_for(cell_name, &port.name) {
            debug!("  ...matched scan chain element {}", spec.cell);
            return Some(self.scan_element(port, spec));
        }

        if catalog.is_controller(cell_name) {
            debug!("  ...matched end of chain, port {}", port.name);
            return Some(SubChainInstance::new(
                Some(port.clone()),
                None,
                Some(owner),
                graph.instance_name(owner),
                Content::Terminal,
            ));
        }

        self.get_or_build(cell, port)
    }

    fn scan_element(&mut self, port: &PortRef, spec: &ScanElementSpec) -> SubChainInstance {
        let graph = self.graph;
        let owner = port.owner;
        let width = graph.bundle_width(owner);

        // A bundle is one sub-chain; it is left through its last bit
        let (name, exit) = if width > 1 {
            let last = graph.bundle_bit(owner, width - 1);
            (graph.bundle_name(owner), self.port_on(last, &spec.out_port))
        } else {
            (graph.instance_name(owner), self.port_on(owner, &spec.out_port))
        };

        let mut node = ChainNode::sub(name.clone(), width as i64);
        node.data.access = Some(spec.access.clone());
        node.data.clears = Some(spec.clears.clone());
        node.data.data_net = spec.data_net.clone();
        node.data.data_net2 = spec.data_net2.clone();

        SubChainInstance::new(Some(port.clone()), exit, Some(owner), name, Content::owned(node))
    }

    /// Find or trace the entity for `cell` entered through `inport`, and bind
    /// it to the caller's instance
    pub fn get_or_build(&mut self, cell: CellId, inport: &PortRef) -> Option<SubChainInstance> {
        let graph = self.graph;
        let key = EntityKey::new(graph.describe(cell), inport.name.clone());

        let (id, exit_export) = match self.cache.lookup(&key) {
            Some(id) => (id, self.cache.get(id).exit_export.clone()),
            None => {
                let Some(export) = graph.export_named(cell, &inport.name) else {
                    self.report(TraceIssue::MissingExport {
                        export: inport.name.clone(),
                        cell: graph.describe(cell),
                    });
                    return None;
                };

                let name = format!("{}_{}", graph.library_of(cell), graph.cell_name(cell));
                let id = self.cache.reserve(key, name);
                debug!("  ...descending into {}", graph.describe(cell));

                let mut body = Vec::new();
                let candidates = graph.ports_on_export_net(&export);
                let last_exit = self.follow(&mut body, &candidates).and_then(|last| last.exit);

                let exit_export = match last_exit {
                    Some(exit) => match graph.export_on_same_net(&exit) {
                        Some(export) => Some(export.name),
                        None => {
                            self.report(TraceIssue::DanglingExit {
                                cell: graph.describe(cell),
                                instance: graph.instance_name(exit.owner),
                                port: exit.name.clone(),
                            });
                            None
                        }
                    },
                    None => None,
                };

                self.cache.complete(id, body, exit_export.clone());
                (id, exit_export)
            }
        };

        let exit = exit_export.and_then(|name| self.port_on(inport.owner, &name));
        Some(SubChainInstance::new(
            Some(inport.clone()),
            exit,
            Some(inport.owner),
            graph.instance_name(inport.owner),
            Content::Entity(id),
        ))
    }

    fn port_on(&mut self, instance: InstanceRef, name: &str) -> Option<PortRef> {
        let port = self.graph.port_on_instance(instance, name);
        if port.is_none() {
            self.report(TraceIssue::MissingPort {
                port: name.to_string(),
                instance: self.graph.instance_name(instance),
            });
        }
        port
    }

    /// Ports to continue with after leaving through `exit`
    fn next_ports(&mut self, exit: &PortRef) -> Vec<PortRef> {
        let ports = self.graph.ports_on_same_net(exit);
        if ports.is_empty() && !self.graph.net_has_export(exit) {
            self.report(TraceIssue::NoConnections {
                port: exit.name.clone(),
                instance: self.graph.instance_name(exit.owner),
                cell: self.graph.describe(exit.owner.cell),
            });
        }
        ports
    }
}
