//! Simulator endpoint URLs.
//!
//! | interface | action | URL                              |
//! |-----------|--------|----------------------------------|
//! | none      | none   | `{base}`                         |
//! | none      | some   | `{base}/{action}` (bulk only)    |
//! | some      | none   | `{base}/{port_index}`            |
//! | some      | some   | `{base}/{port_index}/{action}`   |
//!
//! `base` already carries the vmset, e.g. `http://10.0.0.64:8080/mux/vms17-8`.

use crate::topology::{PortIndexLookup, TopologyError};
use crate::types::Action;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
pub struct UrlBuilder {
    base: String,
    topology: Arc<dyn PortIndexLookup>,
}

impl UrlBuilder {
    pub fn new(base: impl Into<String>, topology: Arc<dyn PortIndexLookup>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self { base, topology }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Resolve an interface through the topology. Not cached.
    pub async fn port_index(&self, interface: &str) -> Result<u16, TopologyError> {
        self.topology.port_index(interface).await
    }

    pub async fn build(
        &self,
        interface: Option<&str>,
        action: Option<Action>,
    ) -> Result<String, TopologyError> {
        let url = match (interface, action) {
            (None, None) => self.base.clone(),
            (None, Some(action)) => format!("{}/{}", self.base, action),
            (Some(interface), None) => {
                let index = self.port_index(interface).await?;
                format!("{}/{}", self.base, index)
            }
            (Some(interface), Some(action)) => {
                let index = self.port_index(interface).await?;
                format!("{}/{}/{}", self.base, index, action)
            }
        };
        trace!(?interface, ?action, url = %url, "Built simulator URL");
        Ok(url)
    }
}
