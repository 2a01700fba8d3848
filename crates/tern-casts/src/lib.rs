//! Dynamic casts for Tern MIR.
//!
//! This crate implements:
//! - A feasibility classifier deciding whether a cast between two formal
//!   types will succeed, may succeed, or will fail
//! - An emitter lowering casts proven to succeed into MIR with no runtime
//!   check, including optional injection and optional-to-optional dispatch
//! - Opt-in classification traces
//!
//! The checked (conditional) cast path is not handled here; callers route
//! anything short of [`CastFeasibility::WillSucceed`] elsewhere.

mod emitter;
mod feasibility;
pub mod trace;

#[cfg(test)]
mod prop_tests;

use tern_types::Type;

pub use emitter::{CastConsumptionKind, CastLowering};
pub use feasibility::{CastFeasibility, classify_dynamic_cast, classify_dynamic_cast_traced};
pub use trace::{ClassifyRule, ClassifyStep};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastLoweringConfig {
    /// Re-run the classifier at the unconditional entry points and panic
    /// unless it reports `WillSucceed`.
    pub assert_feasibility: bool,
}

impl Default for CastLoweringConfig {
    fn default() -> Self {
        Self {
            assert_feasibility: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CastLoweringError {
    #[error("cast from `{from}` to `{to}` is not provably successful ({feasibility})")]
    NotProvable {
        from: Type,
        to: Type,
        feasibility: CastFeasibility,
    },
}
