//! # muxsim
//!
//! Control client for the dual-ToR mux cable simulator used by integration
//! tests: toggles active sides, blocks and restores traffic directions, reads
//! and clears flap counters, and resets ports.
//!
//! This crate provides:
//! - **MuxSimulatorClient**: one method per simulator operation
//! - **DropRegistry**: remembers dropped ports and restores them on teardown
//! - **Config**: testbed description and interface → port index lookup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          muxsim                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ with_drop_recovery / DropRegistry                   │    │
//! │  │ - Records ports put into a drop state               │    │
//! │  │ - Restores upper_tor/lower_tor/nic on every exit    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │                          │                                  │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │ MuxSimulatorClient                                  │    │
//! │  │ - toggle / drop / output / flap counters / reset    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! │              │                            │                 │
//! │  ┌───────────────────────┐    ┌───────────────────────┐     │
//! │  │ UrlBuilder            │    │ Transport             │     │
//! │  │ - interface → port    │    │ - GET → Option<JSON>  │     │
//! │  │   via PortIndexLookup │    │ - POST → bool         │     │
//! │  └───────────────────────┘    └───────────────────────┘     │
//! │                                           │                 │
//! │                                           ▼                 │
//! │                      [mux simulator: /mux/{vmset}/...]      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod config;
pub mod recovery;
pub mod topology;
pub mod transport;
mod types;
pub mod url;

#[cfg(test)]
mod test_support;

pub use client::MuxSimulatorClient;
pub use config::{Config, SimulatorConfig, TestbedConfig, TopologySource};
pub use recovery::{DropRegistry, with_drop_recovery};
pub use topology::{MinigraphFactsTopology, PortIndexLookup, StaticTopology, TopologyError};
pub use transport::Transport;
pub use types::{
    Action, ActiveSide, ActiveSideRequest, ClearFlapCounterRequest, DirectionSet, MuxError,
    MuxStatus, OutSidesRequest, ParseDirectionsError, ParseSideError, ResetRequest, Side,
};
pub use url::UrlBuilder;
