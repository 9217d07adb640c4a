use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Telemetry domains served by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    RevolutionCounter,
    Workforce,
}

/// How a sensor reports its count fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// The sensor reports the absolute counter value on every sample.
    Absolute,
    /// The sensor reports the increment since its previous sample.
    Delta,
}

/// Shape of the per-shift totals a domain reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupKind {
    /// Cumulative count converted to whole rolls of yarn.
    Rolls,
    /// Input and output counts side by side.
    Throughput,
}

/// Capability descriptor that parameterizes the aggregation engine, the payload parser and
/// the report builder. Both domains run through the same code paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainProfile {
    pub domain: Domain,
    pub rate_field: &'static str,
    pub count_field: &'static str,
    pub input_field: Option<&'static str>,
    pub count_mode: CountMode,
    pub has_idle_time: bool,
    pub has_incident_logs: bool,
    pub rollup: RollupKind,
}

const REVOLUTION_COUNTER: DomainProfile = DomainProfile {
    domain: Domain::RevolutionCounter,
    rate_field: "rpm",
    count_field: "count",
    input_field: None,
    count_mode: CountMode::Absolute,
    has_idle_time: true,
    has_incident_logs: true,
    rollup: RollupKind::Rolls,
};

const WORKFORCE: DomainProfile = DomainProfile {
    domain: Domain::Workforce,
    rate_field: "rcpm",
    count_field: "count",
    input_field: Some("in"),
    count_mode: CountMode::Delta,
    has_idle_time: false,
    has_incident_logs: false,
    rollup: RollupKind::Throughput,
};

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::RevolutionCounter, Domain::Workforce];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RevolutionCounter => "revolution_counter",
            Self::Workforce => "workforce",
        }
    }

    pub fn profile(self) -> &'static DomainProfile {
        match self {
            Self::RevolutionCounter => &REVOLUTION_COUNTER,
            Self::Workforce => &WORKFORCE,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown telemetry domain `{0}`")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "revolution_counter" => Ok(Self::RevolutionCounter),
            "workforce" => Ok(Self::Workforce),
            other => Err(UnknownDomain(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_names_round_trip_through_from_str() {
        for domain in Domain::ALL {
            assert_eq!(domain.as_str().parse::<Domain>().unwrap(), domain);
        }
        assert!("revolution_counter_2".parse::<Domain>().is_err());
    }

    #[test]
    fn only_the_absolute_domain_tracks_idle_time() {
        assert!(Domain::RevolutionCounter.profile().has_idle_time);
        assert!(!Domain::Workforce.profile().has_idle_time);
        assert_eq!(Domain::Workforce.profile().count_mode, CountMode::Delta);
        assert_eq!(Domain::Workforce.profile().input_field, Some("in"));
    }
}
