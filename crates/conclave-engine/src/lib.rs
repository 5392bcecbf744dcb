//! Multi-session orchestration: a pool of subordinate sessions reachable by
//! delegation, the fixed topologies that drive a primary session over that
//! pool, and the prompt assembly feeding them.

pub mod error;
pub mod pool;
pub mod prompts;
pub mod strategy;
pub mod target;
pub mod topology;

pub use error::{EngineError, PoolError};
pub use pool::{PoolState, ShutdownReport, SubordinatePool};
pub use prompts::PromptLibrary;
pub use strategy::{Strategy, StrategyConfig};
pub use target::{Benchmark, Target};
pub use topology::{CapabilityProfile, RoleSpec, Topology, TopologyTable};
