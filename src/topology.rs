//! Interface name to simulator port index resolution.
//!
//! The simulator addresses mux cables by PTF port index, while tests speak in
//! DUT interface names. Lookups go through [`PortIndexLookup`] on every call
//! and are never cached, so a topology reloaded mid-run is picked up by the
//! next request.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, trace};

/// Errors from resolving an interface to a port index
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("interface not found in topology: {0}")]
    UnknownInterface(String),

    #[error("failed to read minigraph facts {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse minigraph facts {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Resolves a DUT interface name to the simulator port index.
#[async_trait]
pub trait PortIndexLookup: Send + Sync {
    async fn port_index(&self, interface: &str) -> Result<u16, TopologyError>;
}

/// Fixed interface map, typically taken straight from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    ptf_indices: HashMap<String, u16>,
}

impl StaticTopology {
    pub fn new(ptf_indices: HashMap<String, u16>) -> Self {
        Self { ptf_indices }
    }
}

impl<S: Into<String>> FromIterator<(S, u16)> for StaticTopology {
    fn from_iter<I: IntoIterator<Item = (S, u16)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[async_trait]
impl PortIndexLookup for StaticTopology {
    async fn port_index(&self, interface: &str) -> Result<u16, TopologyError> {
        self.ptf_indices
            .get(interface)
            .copied()
            .ok_or_else(|| TopologyError::UnknownInterface(interface.to_string()))
    }
}

#[derive(Deserialize)]
struct MinigraphFacts {
    minigraph_ptf_indices: HashMap<String, u16>,
}

/// Reads `minigraph_ptf_indices` from a minigraph facts JSON dump on every
/// lookup.
#[derive(Debug, Clone)]
pub struct MinigraphFactsTopology {
    path: PathBuf,
}

impl MinigraphFactsTopology {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PortIndexLookup for MinigraphFactsTopology {
    async fn port_index(&self, interface: &str) -> Result<u16, TopologyError> {
        trace!(path = %self.path.display(), "Reading minigraph facts");
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| TopologyError::Read {
                path: self.path.clone(),
                source,
            })?;

        let facts: MinigraphFacts =
            serde_json::from_str(&contents).map_err(|source| TopologyError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let index = facts
            .minigraph_ptf_indices
            .get(interface)
            .copied()
            .ok_or_else(|| TopologyError::UnknownInterface(interface.to_string()))?;
        debug!(interface, index, "Resolved interface from minigraph facts");
        Ok(index)
    }
}
