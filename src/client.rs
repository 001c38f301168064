//! Mux simulator control client.
//!
//! Every operation resolves its URL, performs exactly one HTTP exchange and
//! turns the outcome into a `Result`. A POST that is not answered with 200 is
//! a [`MuxError::Rejected`]; reads that fail are reported as missing data
//! rather than errors, matching what the simulator can tell us.

use crate::config::Config;
use crate::topology::PortIndexLookup;
use crate::transport::Transport;
use crate::types::{
    Action, ActiveSide, ActiveSideRequest, ClearFlapCounterRequest, DirectionSet, MuxError,
    MuxStatus, OutSidesRequest, ResetRequest, Side,
};
use crate::url::UrlBuilder;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ClientInner {
    urls: UrlBuilder,
    transport: Transport,
}

/// Handle to one testbed's mux simulator. Cheap to clone.
#[derive(Clone)]
pub struct MuxSimulatorClient {
    inner: Arc<ClientInner>,
}

impl MuxSimulatorClient {
    /// `base_url` includes the vmset, e.g. `http://10.0.0.64:8080/mux/vms17-8`.
    pub fn new(base_url: impl Into<String>, topology: Arc<dyn PortIndexLookup>) -> Self {
        Self::with_transport(base_url, topology, Transport::new())
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        topology: Arc<dyn PortIndexLookup>,
        transport: Transport,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                urls: UrlBuilder::new(base_url, topology),
                transport,
            }),
        }
    }

    /// Build a client for a dual-ToR testbed described by `config`.
    pub fn from_config(config: &Config) -> Result<Self, MuxError> {
        let base_url = config
            .mux_server_url()
            .ok_or_else(|| MuxError::NotDualTor(config.testbed.topo.clone()))?;
        Ok(Self::new(base_url, config.topology.build()))
    }

    pub fn base_url(&self) -> &str {
        self.inner.urls.base()
    }

    pub fn urls(&self) -> &UrlBuilder {
        &self.inner.urls
    }

    async fn post_or_reject<B>(
        &self,
        url: &str,
        body: &B,
        operation: String,
    ) -> Result<(), MuxError>
    where
        B: serde::Serialize + std::fmt::Debug,
    {
        if self.inner.transport.post(url, body).await {
            Ok(())
        } else {
            Err(MuxError::Rejected {
                operation,
                url: url.to_string(),
            })
        }
    }

    // -----------------------------------------------------------------------
    // Active side
    // -----------------------------------------------------------------------

    /// Toggle one port to `side`, which must be `upper_tor` or `lower_tor`.
    pub async fn toggle_to(&self, interface: &str, side: Side) -> Result<(), MuxError> {
        if !side.is_port_toggle_target() {
            return Err(MuxError::UnsupportedSide {
                side,
                operation: "port toggle",
            });
        }
        let url = self.inner.urls.build(Some(interface), None).await?;
        self.post_or_reject(
            &url,
            &ActiveSideRequest { active_side: side },
            format!("toggle to {side} on interface {interface}"),
        )
        .await
    }

    pub async fn toggle_to_upper(&self, interface: &str) -> Result<(), MuxError> {
        self.toggle_to(interface, Side::UpperTor).await
    }

    pub async fn toggle_to_lower(&self, interface: &str) -> Result<(), MuxError> {
        self.toggle_to(interface, Side::LowerTor).await
    }

    /// Toggle every port of the vmset in one request.
    ///
    /// `side` must be one of `upper_tor`, `lower_tor`, `toggle` or `random`;
    /// anything else is rejected before a request is sent.
    pub async fn toggle_all(&self, side: Side) -> Result<(), MuxError> {
        if !side.is_bulk_toggle_target() {
            return Err(MuxError::UnsupportedSide {
                side,
                operation: "bulk toggle",
            });
        }
        info!(side = %side, "Toggle all ports");
        let url = self.inner.urls.build(None, None).await?;
        self.post_or_reject(
            &url,
            &ActiveSideRequest { active_side: side },
            format!("toggle all ports to '{side}'"),
        )
        .await
    }

    /// Toggle every port toward `dut`. Returns `Ok(false)` without touching
    /// the simulator on a testbed that is not dual-ToR.
    pub async fn toggle_all_to_dut(&self, config: &Config, dut: &str) -> Result<bool, MuxError> {
        if !config.testbed.is_dual_tor() {
            debug!(topo = %config.testbed.topo, "Not a dual-ToR testbed; skipping toggle");
            return Ok(false);
        }
        let side = config.tor_side_for(dut)?;
        info!(dut, side = %side, "Toggle all ports toward DUT");
        self.toggle_all(side).await?;
        Ok(true)
    }

    /// Read the active side of one port.
    ///
    /// A failed read or an unexpected `active_side` value yields
    /// [`ActiveSide::Indeterminate`]; only an unknown interface is an error.
    pub async fn read_active_side(&self, interface: &str) -> Result<ActiveSide, MuxError> {
        let active = self
            .port_status(interface)
            .await?
            .map(|status| status.active())
            .unwrap_or(ActiveSide::Indeterminate);
        debug!(interface, ?active, "Read active side");
        Ok(active)
    }

    /// Pick `upper` or `lower` according to which ToR is active on `interface`.
    pub async fn active_tor<'a, T>(
        &self,
        interface: &str,
        upper: &'a T,
        lower: &'a T,
    ) -> Result<&'a T, MuxError> {
        match self.read_active_side(interface).await? {
            ActiveSide::Upper => Ok(upper),
            ActiveSide::Lower => Ok(lower),
            ActiveSide::Indeterminate => Err(MuxError::StatusUnavailable {
                url: self.inner.urls.build(Some(interface), None).await?,
            }),
        }
    }

    /// Status of one port, `None` if the simulator gave nothing usable.
    pub async fn port_status(&self, interface: &str) -> Result<Option<MuxStatus>, MuxError> {
        let url = self.inner.urls.build(Some(interface), None).await?;
        Ok(self.inner.transport.get_as(&url).await)
    }

    /// Status of every port keyed by port index.
    pub async fn all_port_status(&self) -> Option<BTreeMap<u16, MuxStatus>> {
        self.inner.transport.get_as(self.base_url()).await
    }

    // -----------------------------------------------------------------------
    // Drop / output
    // -----------------------------------------------------------------------

    /// Block traffic toward `directions` on a port.
    ///
    /// Nothing here restores the port afterwards; use
    /// [`DropRegistry`](crate::recovery::DropRegistry) in tests.
    pub async fn set_drop(
        &self,
        interface: &str,
        directions: &DirectionSet,
    ) -> Result<(), MuxError> {
        let url = self
            .inner
            .urls
            .build(Some(interface), Some(Action::Drop))
            .await?;
        self.post_or_reject(
            &url,
            &OutSidesRequest {
                out_sides: directions.clone(),
            },
            format!("set drop on {directions} for interface {interface}"),
        )
        .await
    }

    /// Let traffic through toward `directions` on a port.
    pub async fn set_output(
        &self,
        interface: &str,
        directions: &DirectionSet,
    ) -> Result<(), MuxError> {
        let url = self
            .inner
            .urls
            .build(Some(interface), Some(Action::Output))
            .await?;
        self.post_or_reject(
            &url,
            &OutSidesRequest {
                out_sides: directions.clone(),
            },
            format!("set output on {directions} for interface {interface}"),
        )
        .await
    }

    /// Restore traffic on `upper_tor`, `lower_tor` and `nic`. Idempotent.
    pub async fn recover_all_directions(&self, interface: &str) -> Result<(), MuxError> {
        self.set_output(interface, &DirectionSet::all()).await
    }

    // -----------------------------------------------------------------------
    // Flap counters
    // -----------------------------------------------------------------------

    /// Number of active-side changes seen on one port.
    pub async fn flap_counter(&self, interface: &str) -> Result<u64, MuxError> {
        let url = self
            .inner
            .urls
            .build(Some(interface), Some(Action::FlapCounter))
            .await?;
        let counters: Option<HashMap<String, u64>> = self.inner.transport.get_as(&url).await;
        let counters = counters.unwrap_or_default();

        let entries = counters.len();
        match counters.into_values().next() {
            Some(count) if entries == 1 => Ok(count),
            _ => Err(MuxError::FlapCounterEntries {
                interface: interface.to_string(),
                entries,
            }),
        }
    }

    /// Flap counters of every port keyed by port index.
    pub async fn flap_counters(&self) -> Result<BTreeMap<u16, u64>, MuxError> {
        let url = self.inner.urls.build(None, Some(Action::FlapCounter)).await?;
        self.inner
            .transport
            .get_as(&url)
            .await
            .ok_or(MuxError::StatusUnavailable { url })
    }

    /// Reset the flap counter of one port, or of every port when `interface`
    /// is `None`.
    pub async fn clear_flap_counter(&self, interface: Option<&str>) -> Result<(), MuxError> {
        let port_to_clear = match interface {
            Some(interface) => self.inner.urls.port_index(interface).await?.to_string(),
            None => "all".to_string(),
        };
        let url = self
            .inner
            .urls
            .build(None, Some(Action::ClearFlapCounter))
            .await?;
        let operation = format!("clear flap counter for {}", interface.unwrap_or("all ports"));
        self.post_or_reject(&url, &ClearFlapCounterRequest { port_to_clear }, operation)
            .await
    }

    // -----------------------------------------------------------------------
    // Reset
    // -----------------------------------------------------------------------

    /// Reset one port, or every port when `interface` is `None`. Disruptive.
    pub async fn reset_port(&self, interface: Option<&str>) -> Result<(), MuxError> {
        let target = interface.unwrap_or("all");
        warn!(target, "Resetting simulator ports");
        let url = self.inner.urls.build(interface, Some(Action::Reset)).await?;
        self.post_or_reject(
            &url,
            &ResetRequest::default(),
            format!("reset simulator port {target}"),
        )
        .await
    }
}
