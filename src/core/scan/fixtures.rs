// src/core/scan/fixtures.rs
//! Small designs shared by the scan tests

use crate::core::netlist::Design;
use super::catalog::{Catalog, ControllerSpec, PassThroughSpec, ScanElementSpec};
use super::chain::ChainNode;
use super::entity_cache::EntityCache;
use super::tracer::{ChainTracer, TraceIssue};

/// Controller, scan flop and buffer used by every fixture
pub const LIBRARY: &str = r#"
[[cells]]
name = "jtag"
library = "scan"
exports = [{ name = "p0" }, { name = "p1" }, { name = "ret" }]

[[cells]]
name = "scanDFF"
library = "scan"
exports = [{ name = "sin" }, { name = "sout" }, { name = "dout" }]

[[cells]]
name = "buf"
library = "scan"
primitive = true
exports = [{ name = "in" }, { name = "out" }]
"#;

pub const EMPTY_CHAIN: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n0" }
"#;

pub const PASS_THROUGH: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n3" }

[[cells.instances]]
name = "A"
cell = "scanDFF"
connections = { sin = "n0", sout = "n1", dout = "a" }

[[cells.instances]]
name = "B"
cell = "buf"
connections = { in = "n1", out = "n2" }

[[cells.instances]]
name = "C"
cell = "scanDFF"
connections = { sin = "n2", sout = "n3", dout = "c" }
"#;

pub const SHARED_CELL: &str = r#"
[[cells]]
name = "S"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
cell = "scanDFF"
connections = { sin = "in", sout = "out" }

[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n2" }

[[cells.instances]]
name = "s1"
cell = "S"
connections = { in = "n0", out = "n1" }

[[cells.instances]]
name = "s2"
cell = "S"
connections = { in = "n1", out = "n2" }
"#;

pub const SHARED_CELL_WIDE: &str = r#"
[[cells]]
name = "S"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
name = "a"
cell = "scanDFF"
connections = { sin = "in", sout = "m1" }

[[cells.instances]]
name = "b"
cell = "scanDFF"
connections = { sin = "m1", sout = "m2" }

[[cells.instances]]
name = "c"
cell = "scanDFF"
connections = { sin = "m2", sout = "out" }

[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n2" }

[[cells.instances]]
name = "s1"
cell = "S"
connections = { in = "n0", out = "n1" }

[[cells.instances]]
name = "s2"
cell = "S"
connections = { in = "n1", out = "n2" }
"#;

/// Two uses of `seg`, which carries a buffer between its flops
pub const PASS_IN_ENTITY: &str = r#"
[[cells]]
name = "seg"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
name = "a"
cell = "scanDFF"
connections = { sin = "in", sout = "m1" }

[[cells.instances]]
name = "p"
cell = "buf"
connections = { in = "m1", out = "m2" }

[[cells.instances]]
name = "b"
cell = "scanDFF"
connections = { sin = "m2", sout = "out" }

[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n2" }

[[cells.instances]]
name = "g1"
cell = "seg"
connections = { in = "n0", out = "n1" }

[[cells.instances]]
name = "g2"
cell = "seg"
connections = { in = "n1", out = "n2" }
"#;

/// The flop inside `S` drives a net that goes nowhere
pub const DANGLING_EXIT: &str = r#"
[[cells]]
name = "S"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
name = "Z"
cell = "scanDFF"
connections = { sin = "in", sout = "loose" }

[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n1" }

[[cells.instances]]
name = "s1"
cell = "S"
connections = { in = "n0", out = "n1" }
"#;

pub const BRANCHING: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n1" }

[[cells.instances]]
name = "A"
cell = "scanDFF"
connections = { sin = "n0", sout = "n1" }

[[cells.instances]]
name = "B"
cell = "scanDFF"
connections = { sin = "n0", sout = "n1" }
"#;

pub const NESTED_CONTROLLER: &str = r#"
[[cells]]
name = "core"
exports = [{ name = "so" }, { name = "si" }]

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "so", ret = "si" }

[[cells]]
name = "top"

[[cells.instances]]
name = "c0"
cell = "core"
connections = { so = "a", si = "b" }

[[cells.instances]]
name = "X"
cell = "scanDFF"
connections = { sin = "a", sout = "b" }
"#;

pub const UNTERMINATED: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0" }

[[cells.instances]]
name = "A"
cell = "scanDFF"
connections = { sin = "n0", sout = "n1" }
"#;

pub const BUNDLE: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n[0]", ret = "n[4]" }

[[cells.instances]]
name = "r[0:3]"
cell = "scanDFF"
connections = { sin = "n[0:3]", sout = "n[1:4]" }
"#;

pub const NO_CONTROLLER: &str = r#"
[[cells]]
name = "top"

[[cells.instances]]
name = "A"
cell = "scanDFF"
connections = { sin = "n0", sout = "n1" }
"#;

/// `pair` is a flatten target; each `bit` wraps one unnamed flop
pub const FLATTEN: &str = r#"
[[cells]]
name = "bit"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
cell = "scanDFF"
connections = { sin = "in", sout = "out" }

[[cells]]
name = "pair"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
cell = "bit"
connections = { in = "in", out = "m" }

[[cells.instances]]
cell = "bit"
connections = { in = "m", out = "out" }

[[cells]]
name = "wrap"
exports = [{ name = "in" }, { name = "out" }]

[[cells.instances]]
cell = "pair"
connections = { in = "in", out = "m" }

[[cells.instances]]
name = "q"
cell = "scanDFF"
connections = { sin = "m", sout = "out" }

[[cells]]
name = "top"

[[cells.instances]]
name = "ctl"
cell = "jtag"
connections = { p0 = "n0", ret = "n1" }

[[cells.instances]]
name = "w"
cell = "wrap"
connections = { in = "n0", out = "n1" }
"#;

pub struct TracedRun {
    pub design: Design,
    pub catalog: Catalog,
    pub chains: Vec<ChainNode>,
    pub cache: EntityCache,
    pub issues: Vec<TraceIssue>,
}

pub fn design(cells: &str) -> Design {
    Design::from_toml_str(&format!("{}{}", LIBRARY, cells)).unwrap()
}

pub fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.register_scan_element(ScanElementSpec {
        cell: "scanDFF".to_string(),
        access: "RW".to_string(),
        clears: "L".to_string(),
        in_port: "sin".to_string(),
        out_port: "sout".to_string(),
        data_net: Some("dout(RW)".parse().unwrap()),
        data_net2: None,
    });
    catalog.register_pass_through(PassThroughSpec {
        cell: "buf".to_string(),
        in_port: "in".to_string(),
        out_port: "out".to_string(),
    });
    catalog.set_controller(ControllerSpec::new("jtag", 8));
    catalog.add_chain_start_port(1, "p0", Some("chain1".to_string()));
    catalog.add_flatten_target("work:pair");
    catalog
}

/// Trace `cells` from the controller in `top`
pub fn trace(cells: &str) -> TracedRun {
    let design = design(cells);
    let catalog = catalog();
    let mut cache = EntityCache::new();
    let top = design.find_cell("top").unwrap();

    let mut tracer = ChainTracer::new(&design, &catalog, &mut cache);
    let chains = tracer.trace_from_controller(top).unwrap();
    let issues = tracer.into_issues();

    TracedRun { design, catalog, chains, cache, issues }
}
