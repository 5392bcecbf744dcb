//! Fixed role tables. Each topology is data: a primary role and the
//! subordinate roles it may delegate to, each with a capability profile and
//! the prompt template it is built from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use conclave_core::tools::{BASH, DELEGATION_TOOL, FULL_ACCESS, READ, READ_ONLY, WRITE};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityProfile {
    /// Read, write and run commands in the working directory.
    FullAccess,
    /// Inspect and run commands, never write files.
    ReadOnly,
    /// Only talk to subordinates; file and shell tools are denied.
    DelegationOnly,
    FullAccessWithDelegation,
}

impl CapabilityProfile {
    pub fn allowed_tools(self) -> Vec<&'static str> {
        match self {
            Self::FullAccess => FULL_ACCESS.to_vec(),
            Self::ReadOnly => READ_ONLY.to_vec(),
            Self::DelegationOnly => vec![DELEGATION_TOOL],
            Self::FullAccessWithDelegation => vec![READ, WRITE, BASH, DELEGATION_TOOL],
        }
    }

    pub fn disallowed_tools(self) -> &'static [&'static str] {
        match self {
            Self::DelegationOnly => FULL_ACCESS,
            _ => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleSpec {
    pub identity: &'static str,
    pub profile: CapabilityProfile,
    /// Template path relative to the prompts directory.
    pub prompt: &'static str,
}

impl RoleSpec {
    const fn new(identity: &'static str, profile: CapabilityProfile, prompt: &'static str) -> Self {
        Self {
            identity,
            profile,
            prompt,
        }
    }
}

#[derive(Debug)]
pub struct TopologyTable {
    pub primary: RoleSpec,
    pub subordinates: &'static [RoleSpec],
}

impl TopologyTable {
    pub fn subordinate_ids(&self) -> Vec<&'static str> {
        self.subordinates.iter().map(|r| r.identity).collect()
    }
}

use CapabilityProfile::*;

static SINGLE: TopologyTable = TopologyTable {
    primary: RoleSpec::new("Agent", FullAccess, "single_agent/sys_prompt.md"),
    subordinates: &[],
};

static LEADER_WORKER: TopologyTable = TopologyTable {
    primary: RoleSpec::new("Leader", DelegationOnly, "leader/sys_prompt_leader.md"),
    subordinates: &[
        RoleSpec::new("swe_1", FullAccess, "leader/sys_prompt_agent.md"),
        RoleSpec::new("swe_2", FullAccess, "leader/sys_prompt_agent.md"),
        RoleSpec::new("swe_3", FullAccess, "leader/sys_prompt_agent.md"),
    ],
};

static BUILDER_CRITIC: TopologyTable = TopologyTable {
    primary: RoleSpec::new(
        "Builder",
        FullAccessWithDelegation,
        "builder_critic/sys_prompt_builder.md",
    ),
    subordinates: &[RoleSpec::new(
        "critic",
        ReadOnly,
        "builder_critic/sys_prompt_critic.md",
    )],
};

static VOTING: TopologyTable = TopologyTable {
    primary: RoleSpec::new("Organizer", DelegationOnly, "voting/sys_prompt_organizer.md"),
    subordinates: &[
        RoleSpec::new("architect", FullAccess, "voting/sys_prompt_architect_agent.md"),
        RoleSpec::new("coding", FullAccess, "voting/sys_prompt_coding_agent.md"),
        RoleSpec::new("product", FullAccess, "voting/sys_prompt_product_agent.md"),
    ],
};

static SPECIALISTS: TopologyTable = TopologyTable {
    primary: RoleSpec::new(
        "Coordinator",
        DelegationOnly,
        "specialists/sys_prompt_coordinator.md",
    ),
    subordinates: &[
        RoleSpec::new("implementer", FullAccess, "specialists/sys_prompt_implementer.md"),
        RoleSpec::new("tester", FullAccess, "specialists/sys_prompt_tester.md"),
        RoleSpec::new("reviewer", FullAccess, "specialists/sys_prompt_reviewer.md"),
    ],
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    Single,
    LeaderWorker,
    BuilderCritic,
    Voting,
    Specialists,
}

impl Topology {
    pub const ALL: [Topology; 5] = [
        Self::Single,
        Self::LeaderWorker,
        Self::BuilderCritic,
        Self::Voting,
        Self::Specialists,
    ];

    pub fn table(self) -> &'static TopologyTable {
        match self {
            Self::Single => &SINGLE,
            Self::LeaderWorker => &LEADER_WORKER,
            Self::BuilderCritic => &BUILDER_CRITIC,
            Self::Voting => &VOTING,
            Self::Specialists => &SPECIALISTS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::LeaderWorker => "leader-worker",
            Self::BuilderCritic => "builder-critic",
            Self::Voting => "voting",
            Self::Specialists => "specialists",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "single" => Ok(Self::Single),
            "leader-worker" | "leader" => Ok(Self::LeaderWorker),
            "builder-critic" => Ok(Self::BuilderCritic),
            "voting" => Ok(Self::Voting),
            "specialists" => Ok(Self::Specialists),
            other => Err(format!(
                "unknown strategy '{other}' (expected one of: single, leader-worker, builder-critic, voting, specialists)"
            )),
        }
    }
}
