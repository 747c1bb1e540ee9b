// src/core/engine.rs
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ScanChainError;
use super::netlist::{CellId, Design, NetGraph};
use super::scan::{
    Catalog, ChainNode, ChainTracer, ControllerSpec, DataNetSpec, DocumentWriter, EntityCache,
    PassThroughSpec, ReduceStats, Reducer, ScanElementSpec, TraceIssue,
};

/// Everything one run produced, ready to be written
#[derive(Debug)]
pub struct TraceOutcome {
    pub chains: Vec<ChainNode>,
    pub cache: EntityCache,
    pub issues: Vec<TraceIssue>,
    pub stats: ReduceStats,
    pub length_ir: u32,
}

impl TraceOutcome {
    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.error_count()
    }
}

/// Main orchestration engine: config and design in, scan chain document out
pub struct Engine {
    config: Config,
}

/// Bare cell name of a `library:cell` reference
fn cell_name_of(reference: &str) -> &str {
    reference.rsplit(':').next().unwrap_or(reference)
}

impl Engine {
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<()> {
        let path = path.unwrap_or_else(|| PathBuf::from("scanchain.toml"));
        let path = if tokio::fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false) {
            path.join("scanchain.toml")
        } else {
            path
        };

        if tokio::fs::try_exists(&path).await? && !force {
            return Err(ScanChainError::Config(format!(
                "{} already exists, use --force to overwrite it",
                path.display()
            ))
            .into());
        }

        Config::example().save(&path)?;
        info!("✅ Wrote starter configuration to {}", path.display());
        Ok(())
    }

    pub async fn trace(
        &self,
        design: Option<PathBuf>,
        top: Option<String>,
        output: Option<PathBuf>,
        flat: bool,
    ) -> Result<()> {
        let design = self.load_design(design).await?;
        let outcome = self.run(&design, top.as_deref())?;

        let output = output.or_else(|| self.config.project.output.clone());
        let document_name = output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdout".to_string());
        let xml = self.render(&outcome, &document_name, flat || self.config.output.flat)?;

        match output {
            Some(path) => {
                tokio::fs::write(&path, xml).await?;
                info!("📝 Wrote XML file to {}", path.display());
            }
            None => print!("{}", xml),
        }

        if !outcome.issues.is_empty() {
            warn!(
                "⚠️ Tracing reported {} errors and {} warnings",
                outcome.error_count(),
                outcome.warning_count()
            );
        }
        Ok(())
    }

    pub async fn validate(&self, design: Option<PathBuf>, top: Option<String>, strict: bool) -> Result<()> {
        info!("🔍 Validating scan chains...");
        let design = self.load_design(design).await?;
        let outcome = self.run(&design, top.as_deref())?;

        for chain in &outcome.chains {
            info!(
                "  - {}: {} scan chain elements",
                chain.data.name,
                chain.num_scan_elements(&outcome.cache)
            );
        }

        let errors = outcome.error_count();
        let warnings = outcome.warning_count();
        if errors == 0 && (warnings == 0 || !strict) {
            info!("✅ Scan chain validation passed ({} warnings)", warnings);
            return Ok(());
        }

        warn!("❌ Scan chain validation failed:");
        for issue in &outcome.issues {
            warn!("  - {}", issue);
        }
        Err(ScanChainError::Validation(format!("{} errors, {} warnings", errors, warnings)).into())
    }

    async fn load_design(&self, design: Option<PathBuf>) -> Result<Design> {
        let path = design
            .or_else(|| self.config.project.design.clone())
            .ok_or_else(|| ScanChainError::Config("no design file given, use --design or [project] design".to_string()))?;

        info!("Loading design from {}", path.display());
        let content = tokio::fs::read_to_string(&path).await?;
        let design = Design::parse(&path, &content)?;
        debug!("Design has {} cells", design.cell_count());
        Ok(design)
    }

    /// Build the element catalog, resolving cell references through the design
    pub fn build_catalog(&self, design: &Design) -> crate::error::Result<Catalog> {
        let mut catalog = Catalog::new();

        for element in &self.config.scan_elements {
            catalog.register_scan_element(ScanElementSpec {
                cell: cell_name_of(&element.cell).to_string(),
                access: element.access.clone(),
                clears: element.clears.clone(),
                in_port: element.in_port.clone(),
                out_port: element.out_port.clone(),
                data_net: DataNetSpec::parse_optional(element.data_net.as_deref())?,
                data_net2: DataNetSpec::parse_optional(element.data_net2.as_deref())?,
            });
        }

        for pass_through in &self.config.pass_throughs {
            catalog.register_pass_through(PassThroughSpec {
                cell: cell_name_of(&pass_through.cell).to_string(),
                in_port: pass_through.in_port.clone(),
                out_port: pass_through.out_port.clone(),
            });
        }

        if let Some(controller) = &self.config.controller {
            match design.find_cell(&controller.cell) {
                Some(cell) => {
                    catalog.set_controller(ControllerSpec::new(design.cell_name(cell), controller.length_ir));
                    for port in &controller.ports {
                        catalog.add_chain_start_port(port.opcode, port.out_port.clone(), port.chain.clone());
                    }
                }
                // export starts don't need the controller
                None if !self.config.export_starts.is_empty() => {
                    warn!("Did not find controller cell {}", controller.cell)
                }
                None => {
                    return Err(ScanChainError::Config(format!(
                        "controller cell {} not found in design",
                        controller.cell
                    )))
                }
            }
        }

        for reference in &self.config.flatten {
            match design.find_cell(reference) {
                Some(cell) => catalog.add_flatten_target(design.describe(cell)),
                None => warn!("Did not find cell {} to flatten", reference),
            }
        }

        for start in &self.config.export_starts {
            catalog.add_export_start(start.export.clone(), start.chain.clone());
        }

        Ok(catalog)
    }

    fn resolve_top(&self, design: &Design, top: Option<&str>) -> crate::error::Result<CellId> {
        if let Some(reference) = top.or(self.config.project.top.as_deref()) {
            return design
                .find_cell(reference)
                .ok_or_else(|| ScanChainError::Config(format!("top cell {} not found in design", reference)));
        }

        match design.top_cells().as_slice() {
            [only] => Ok(*only),
            tops => Err(ScanChainError::Config(format!(
                "design has {} top-level cells, choose one with --top",
                tops.len()
            ))),
        }
    }

    /// Trace, then reduce. Export starts take precedence over the controller.
    pub fn run(&self, design: &Design, top: Option<&str>) -> crate::error::Result<TraceOutcome> {
        let catalog = self.build_catalog(design)?;
        let top = self.resolve_top(design, top)?;
        info!("Tracing scan chains under {}", design.describe(top));

        let mut cache = EntityCache::new();
        let (mut chains, issues) = {
            let mut tracer = ChainTracer::new(design, &catalog, &mut cache);
            let chains = if !catalog.export_starts().is_empty() {
                tracer.trace_from_exports(top, catalog.export_starts())
            } else if catalog.controller().is_some() {
                tracer.trace_from_controller(top)?
            } else {
                return Err(ScanChainError::MissingController);
            };
            (chains, tracer.into_issues())
        };

        if chains.is_empty() {
            return Err(ScanChainError::NoStartingPoint);
        }

        let reducer = Reducer::new(&self.config.reduce.foldable_pattern, self.config.reduce.enabled)?;
        let stats = reducer.run(&mut chains, &mut cache, &catalog);
        debug!("Reduction stats: {:?}", stats);

        let length_ir = catalog
            .controller()
            .map(|c| c.length_ir)
            .or_else(|| self.config.controller.as_ref().map(|c| c.length_ir))
            .unwrap_or(8);

        Ok(TraceOutcome { chains, cache, issues, stats, length_ir })
    }

    pub fn render(&self, outcome: &TraceOutcome, document_name: &str, flat: bool) -> crate::error::Result<String> {
        DocumentWriter::new(&outcome.cache, &self.config.project.chip_name, outcome.length_ir)
            .document_name(document_name)
            .flat(flat)
            .min_entity_elements(self.config.output.min_entity_elements)
            .render(&outcome.chains)
    }
}
