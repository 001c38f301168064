//! Shared domain types used across the codebase.

use crate::topology::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Errors from simulator control operations.
///
/// Transport failures never show up here: they are logged and folded into
/// `None`/`false` by the transport. These variants are the cases a test must
/// stop on.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("unsupported side '{side}' for {operation}")]
    UnsupportedSide { side: Side, operation: &'static str },

    #[error("'{0}' is not a valid drop/output direction (expected upper_tor, lower_tor or nic)")]
    UnsupportedDirection(Side),

    #[error("{operation} failed: POST {url} was not answered with 200")]
    Rejected { operation: String, url: String },

    #[error("flap counter for {interface}: expected exactly 1 entry, simulator returned {entries}")]
    FlapCounterEntries { interface: String, entries: usize },

    #[error("no usable status from simulator at {url}")]
    StatusUnavailable { url: String },

    #[error("testbed topology '{0}' is not a dual-ToR topology")]
    NotDualTor(String),

    #[error("DUT {dut} is not part of testbed (DUTs: {duts:?})")]
    UnknownDut { dut: String, duts: Vec<String> },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// A mux side as understood by the simulator API.
///
/// `UpperTor`/`LowerTor` are absolute targets. `Toggle` and `Random` are only
/// meaningful for the bulk toggle. `Nic` is a drop/output direction, never a
/// toggle target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    UpperTor,
    LowerTor,
    Toggle,
    Random,
    Nic,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::UpperTor => "upper_tor",
            Side::LowerTor => "lower_tor",
            Side::Toggle => "toggle",
            Side::Random => "random",
            Side::Nic => "nic",
        }
    }

    /// Legal values for the bulk toggle endpoint.
    pub fn is_bulk_toggle_target(&self) -> bool {
        matches!(
            self,
            Side::UpperTor | Side::LowerTor | Side::Toggle | Side::Random
        )
    }

    /// Legal values for the per-port toggle endpoint.
    pub fn is_port_toggle_target(&self) -> bool {
        matches!(self, Side::UpperTor | Side::LowerTor)
    }

    /// Legal members of a [`DirectionSet`].
    pub fn is_direction(&self) -> bool {
        matches!(self, Side::UpperTor | Side::LowerTor | Side::Nic)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown side '{0}' (expected upper_tor, lower_tor, toggle, random or nic)")]
pub struct ParseSideError(String);

impl FromStr for Side {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "upper_tor" | "upper" => Ok(Side::UpperTor),
            "lower_tor" | "lower" => Ok(Side::LowerTor),
            "toggle" => Ok(Side::Toggle),
            "random" => Ok(Side::Random),
            "nic" => Ok(Side::Nic),
            _ => Err(ParseSideError(s.to_string())),
        }
    }
}

/// Set of directions on which a port forwards (`output`) or blocks (`drop`)
/// traffic. Only `upper_tor`, `lower_tor` and `nic` are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Side>", into = "Vec<Side>")]
pub struct DirectionSet(BTreeSet<Side>);

impl DirectionSet {
    pub fn new(sides: impl IntoIterator<Item = Side>) -> Result<Self, MuxError> {
        let mut set = BTreeSet::new();
        for side in sides {
            if !side.is_direction() {
                return Err(MuxError::UnsupportedDirection(side));
            }
            set.insert(side);
        }
        Ok(Self(set))
    }

    /// `upper_tor`, `lower_tor` and `nic`: full connectivity.
    pub fn all() -> Self {
        Self(BTreeSet::from([Side::UpperTor, Side::LowerTor, Side::Nic]))
    }

    /// Both ToR directions, leaving the NIC side alone.
    pub fn tors() -> Self {
        Self(BTreeSet::from([Side::UpperTor, Side::LowerTor]))
    }

    pub fn contains(&self, side: Side) -> bool {
        self.0.contains(&side)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Side> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<Side>> for DirectionSet {
    type Error = MuxError;

    fn try_from(sides: Vec<Side>) -> Result<Self, Self::Error> {
        Self::new(sides)
    }
}

impl From<DirectionSet> for Vec<Side> {
    fn from(set: DirectionSet) -> Self {
        set.0.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid directions '{0}' (expected a comma-separated list of upper_tor, lower_tor or nic)")]
pub struct ParseDirectionsError(String);

impl FromStr for DirectionSet {
    type Err = ParseDirectionsError;

    /// Comma-separated list, e.g. `upper_tor,nic`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDirectionsError(s.to_string());
        let sides = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Side::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let set = Self::new(sides).map_err(|_| invalid())?;
        if set.is_empty() {
            return Err(invalid());
        }
        Ok(set)
    }
}

impl fmt::Display for DirectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Side::as_str).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Active side of a port as read back from the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveSide {
    Upper,
    Lower,
    /// The read failed or the simulator reported something other than a ToR.
    Indeterminate,
}

/// Action segment appended to a simulator URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Drop,
    Output,
    FlapCounter,
    ClearFlapCounter,
    Reset,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Drop => "drop",
            Action::Output => "output",
            Action::FlapCounter => "flap_counter",
            Action::ClearFlapCounter => "clear_flap_counter",
            Action::Reset => "reset",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request / Response bodies
// ---------------------------------------------------------------------------

/// Body for `POST /mux/{vmset}` and `POST /mux/{vmset}/{port}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSideRequest {
    pub active_side: Side,
}

/// Body for the `drop` and `output` actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutSidesRequest {
    pub out_sides: DirectionSet,
}

/// Body for `POST /mux/{vmset}/clear_flap_counter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearFlapCounterRequest {
    /// A port index rendered as a string, or `"all"`.
    pub port_to_clear: String,
}

/// Body for the `reset` action: always `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {}

/// Status of one port as reported by `GET /mux/{vmset}/{port}`.
///
/// Only `active_side` is guaranteed by the simulator; the rest is filled in
/// when the server reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxStatus {
    pub active_side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_sides: Option<DirectionSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flap_counter: Option<u64>,
}

impl MuxStatus {
    pub fn active(&self) -> ActiveSide {
        match self.active_side {
            Side::UpperTor => ActiveSide::Upper,
            Side::LowerTor => ActiveSide::Lower,
            _ => ActiveSide::Indeterminate,
        }
    }
}
