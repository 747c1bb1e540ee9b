use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ScanChainError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Document output settings
    pub output: OutputConfig,

    /// Post-trace simplification settings
    pub reduce: ReduceConfig,

    /// The controller all chains start from and return to
    pub controller: Option<ControllerConfig>,

    /// Cells that hold one bit of scan storage
    pub scan_elements: Vec<ScanElementConfig>,

    /// Buffering cells found in series in a chain
    pub pass_throughs: Vec<PassThroughConfig>,

    /// Cells to inline instead of keeping their hierarchy (`library:cell` or `cell`)
    pub flatten: Vec<String>,

    /// Trace partial chains from exports of the top cell instead of the controller
    pub export_starts: Vec<ExportStartConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Chip name written on the `chip` element
    pub chip_name: String,

    /// Design file (TOML or JSON)
    pub design: Option<PathBuf>,

    /// Top cell to start from (`library:cell` or `cell`)
    pub top: Option<String>,

    /// Output file; stdout when unset
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Always inline entities instead of emitting definitions
    pub flat: bool,

    /// Entities with fewer scan elements than this are always inlined
    pub min_entity_elements: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceConfig {
    /// Run the fold/flatten passes (pass-through removal always runs)
    pub enabled: bool,

    /// Instance names that may be folded or flattened away
    pub foldable_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller cell (`library:cell` or `cell`)
    pub cell: String,

    /// Instruction register length in bits
    #[serde(default = "default_length_ir")]
    pub length_ir: u32,

    /// Chain start ports, one chain each
    #[serde(default)]
    pub ports: Vec<ControllerPortConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerPortConfig {
    pub opcode: u32,
    pub out_port: String,
    pub chain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanElementConfig {
    pub cell: String,
    pub access: String,
    pub clears: String,
    pub in_port: String,
    pub out_port: String,
    /// Data net, `net` or `net(RWI)`
    #[serde(default)]
    pub data_net: Option<String>,
    #[serde(default)]
    pub data_net2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassThroughConfig {
    pub cell: String,
    pub in_port: String,
    pub out_port: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStartConfig {
    pub export: String,
    pub chain: String,
}

fn default_length_ir() -> u32 {
    8
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            chip_name: "?".to_string(),
            design: None,
            top: None,
            output: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            flat: false,
            min_entity_elements: 3,
        }
    }
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            foldable_pattern: ".*?@.*".to_string(),
        }
    }
}

impl Config {
    /// Starter configuration written by `scanchain init`
    pub fn example() -> Self {
        Self {
            project: ProjectConfig {
                chip_name: "chip".to_string(),
                design: Some(PathBuf::from("design.toml")),
                top: None,
                output: Some(PathBuf::from("chip.xml")),
            },
            controller: Some(ControllerConfig {
                cell: "jtag:jtagCentral".to_string(),
                length_ir: 8,
                ports: vec![ControllerPortConfig {
                    opcode: 1,
                    out_port: "leaf[1]".to_string(),
                    chain: Some("chain1".to_string()),
                }],
            }),
            scan_elements: vec![ScanElementConfig {
                cell: "scanDFF".to_string(),
                access: "RW".to_string(),
                clears: "L".to_string(),
                in_port: "sin".to_string(),
                out_port: "sout".to_string(),
                data_net: Some("dout(RW)".to_string()),
                data_net2: None,
            }],
            pass_throughs: vec![PassThroughConfig {
                cell: "scanAmp".to_string(),
                in_port: "in".to_string(),
                out_port: "out".to_string(),
            }],
            ..Self::default()
        }
    }

    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ScanChainError::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ScanChainError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                let candidates = [
                    "Scanchain.toml",
                    "scanchain.toml",
                    ".scanchain.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
[project]
chip_name = "test"

[controller]
cell = "jtag"

[[controller.ports]]
opcode = 2
out_port = "leaf[2]"
"#,
        )
        .unwrap();

        assert_eq!(config.project.chip_name, "test");
        assert!(config.reduce.enabled);
        assert_eq!(config.reduce.foldable_pattern, ".*?@.*");
        assert_eq!(config.output.min_entity_elements, 3);

        let controller = config.controller.unwrap();
        assert_eq!(controller.length_ir, 8);
        assert_eq!(controller.ports[0].chain, None);
    }

    #[test]
    fn test_example_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanchain.toml");

        Config::example().save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded.project.chip_name, "chip");
        assert_eq!(loaded.scan_elements.len(), 1);
        assert_eq!(loaded.scan_elements[0].data_net.as_deref(), Some("dout(RW)"));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = Config::from_toml_str("[controller]\nlength_ir = 4\n").unwrap_err();
        assert!(matches!(err, ScanChainError::Config(_)));
    }
}
