//! Configuration for muxsim

use crate::topology::{MinigraphFactsTopology, PortIndexLookup, StaticTopology};
use crate::types::{MuxError, Side};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Testbed the simulator belongs to
    pub testbed: TestbedConfig,

    /// Where the mux simulator server listens
    pub simulator: SimulatorConfig,

    /// How interface names map to simulator port indices
    pub topology: TopologySource,
}

/// Testbed identity, as found in the testbed inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestbedConfig {
    /// Testbed name, e.g. "vms-kvm-dual-t0"
    #[serde(default)]
    pub name: String,

    /// Topology name; only topologies containing "dualtor" have a simulator
    pub topo: String,

    /// VM set name, the last segment of the simulator base URL
    pub group_name: String,

    /// DUT hostnames in testbed order: upper ToR first, lower ToR second
    #[serde(default)]
    pub duts: Vec<String>,
}

impl TestbedConfig {
    pub fn is_dual_tor(&self) -> bool {
        self.topo.contains("dualtor")
    }
}

/// Mux simulator server address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Test server management address
    pub host: String,

    /// Simulator HTTP port (default: 8080)
    #[serde(default = "default_simulator_port")]
    pub port: u16,
}

fn default_simulator_port() -> u16 {
    8080
}

/// Source of the interface → port index map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologySource {
    /// Fixed map written into the config
    Static { ptf_indices: HashMap<String, u16> },

    /// Minigraph facts dump, re-read on every lookup
    MinigraphFacts { path: PathBuf },
}

impl TopologySource {
    pub fn build(&self) -> Arc<dyn PortIndexLookup> {
        match self {
            TopologySource::Static { ptf_indices } => {
                Arc::new(StaticTopology::new(ptf_indices.clone()))
            }
            TopologySource::MinigraphFacts { path } => {
                Arc::new(MinigraphFactsTopology::new(path.clone()))
            }
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Simulator base URL including the vmset, e.g.
    /// `http://10.0.0.64:8080/mux/vms17-8`. `None` unless the testbed is
    /// dual-ToR.
    pub fn mux_server_url(&self) -> Option<String> {
        if !self.testbed.is_dual_tor() {
            return None;
        }
        Some(format!(
            "http://{}:{}/mux/{}",
            self.simulator.host, self.simulator.port, self.testbed.group_name
        ))
    }

    /// Side whose ToR is `dut`: the first DUT is the upper ToR, any other
    /// listed DUT the lower one.
    pub fn tor_side_for(&self, dut: &str) -> Result<Side, MuxError> {
        match self.testbed.duts.iter().position(|name| name == dut) {
            Some(0) => Ok(Side::UpperTor),
            Some(_) => Ok(Side::LowerTor),
            None => Err(MuxError::UnknownDut {
                dut: dut.to_string(),
                duts: self.testbed.duts.clone(),
            }),
        }
    }

    /// Validate configuration, warning about common misconfigurations.
    pub fn validate(&self) {
        if !self.testbed.is_dual_tor() {
            warn!(
                topo = %self.testbed.topo,
                "Testbed is not dual-ToR; there is no mux simulator to talk to"
            );
            return;
        }

        if self.testbed.duts.len() != 2 {
            warn!(
                duts = ?self.testbed.duts,
                "Dual-ToR testbed should list exactly two DUTs (upper ToR first)"
            );
        }

        if let TopologySource::Static { ptf_indices } = &self.topology {
            if ptf_indices.is_empty() {
                warn!("Static topology has no interfaces; every port operation will fail");
            }

            let mut by_index: HashMap<u16, Vec<&str>> = HashMap::new();
            for (interface, index) in ptf_indices {
                by_index.entry(*index).or_default().push(interface);
            }
            for (index, mut interfaces) in by_index {
                if interfaces.len() > 1 {
                    interfaces.sort_unstable();
                    warn!(
                        index,
                        interfaces = ?interfaces,
                        "Several interfaces map to the same simulator port"
                    );
                }
            }
        }
    }
}
