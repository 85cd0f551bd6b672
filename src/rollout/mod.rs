pub mod orchestrator;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::database::audit::AuditRow;
use crate::database::manager::DatabaseError;
use crate::rls::{RlsError, RlsPolicyConfig};

pub use orchestrator::{
    execute_phase, run_rollout, PgRolloutTarget, PhaseReport, RolloutFailure, RolloutOptions, RolloutTarget,
};

/// Rollout phases, strictly ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Tighten,
    Enforce,
}

/// Fixed policy and operator description for a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseConfig {
    pub policy: RlsPolicyConfig,
    pub description: &'static str,
}

impl Phase {
    pub const SEQUENCE: [Phase; 3] = [Phase::Prepare, Phase::Tighten, Phase::Enforce];

    pub const fn config(self) -> PhaseConfig {
        match self {
            Phase::Prepare => PhaseConfig {
                policy: RlsPolicyConfig::new(true, false),
                description: "Enable RLS policies while still permitting NULL tenant rows for legacy data.",
            },
            Phase::Tighten => PhaseConfig {
                policy: RlsPolicyConfig::new(false, false),
                description: "Disallow NULL tenant rows, ensuring every record is assigned before force enforcement.",
            },
            Phase::Enforce => PhaseConfig {
                policy: RlsPolicyConfig::new(false, true),
                description: "Force RLS so even table owners respect tenant isolation.",
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Tighten => "tighten",
            Phase::Enforce => "enforce",
        }
    }

    /// Stricter phases audit NULL tenants before and after applying
    pub fn is_gated(self) -> bool {
        self != Phase::Prepare
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "prepare" => Ok(Phase::Prepare),
            "tighten" => Ok(Phase::Tighten),
            "enforce" => Ok(Phase::Enforce),
            _ => Err(RolloutError::UnknownPhase(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Unknown phase \"{0}\". Use one of: prepare, tighten, enforce, auto.")]
    UnknownPhase(String),

    #[error(
        "NULL tenantId rows remain in {} table(s). Resolve them or rerun with --force to continue.",
        .offenders.len()
    )]
    NullTenantRows { offenders: Vec<AuditRow> },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Rls(#[from] RlsError),
}

/// Which phases to run, resolved from `--phase` and `--sequential`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPlan {
    pub start: Phase,
    pub sequential: bool,
}

impl RolloutPlan {
    /// `None` starts at prepare; `auto` starts at prepare and walks the sequence
    pub fn from_args(phase: Option<&str>, sequential: bool) -> Result<Self, RolloutError> {
        let Some(raw) = phase.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(Self {
                start: Phase::Prepare,
                sequential,
            });
        };

        if raw.eq_ignore_ascii_case("auto") {
            return Ok(Self {
                start: Phase::Prepare,
                sequential: true,
            });
        }

        Ok(Self {
            start: raw.parse()?,
            sequential,
        })
    }

    pub fn phases(&self) -> Vec<Phase> {
        if !self.sequential {
            return vec![self.start];
        }
        Phase::SEQUENCE
            .iter()
            .copied()
            .skip_while(|phase| *phase != self.start)
            .collect()
    }
}
