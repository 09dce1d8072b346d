//! herd-sim: agent-based dairy herd simulation (Layer 0)
//!
//! Synchronous domain layer: animals and rosters, validated scenario
//! parameters, day samplers, the cull model, purchase policies and the
//! month-by-month simulation engine. Nothing here is async; the forecast
//! layer runs many realizations of [`Engine`] in parallel.

pub mod animal;
pub mod calendar;
pub mod culling;
pub mod empirical;
pub mod engine;
pub mod error;
pub mod params;
pub mod purchase;
pub mod roster;
pub mod sampler;
pub mod snapshot;

pub use animal::{Animal, AnimalId, Origin, ReproStatus};
pub use culling::{CullGroup, CullModel, StatusGroup};
pub use empirical::EmpiricalStats;
pub use engine::{simulate, Engine, SimulationRun};
pub use error::{Result, SimError, ValidationError};
pub use params::{
    CullGrouping, CullingParams, DimMode, Mode, ModelCoefficients, PurchaseItem,
    PurchasePolicyKind, ReplacementParams, Scenario, ScenarioLimits, ScenarioParams,
    RUN_SEED_STRIDE,
};
pub use purchase::{ArrivalKind, PurchaseLog, PurchaseRecord};
pub use roster::{HerdRoster, NormalizedHerd};
pub use sampler::{fit_lognormal, IntSampler, ReproductionModel};
pub use snapshot::{EventTally, HerdSnapshot};
