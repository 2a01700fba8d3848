//! Classification traces.
//!
//! A trace records which classifier rule fired for each pair of types
//! visited, outermost pair first. Tracing is opt-in through
//! [`classify_dynamic_cast_traced`](crate::classify_dynamic_cast_traced);
//! the untraced classifier never allocates.

use serde::Serialize;
use tern_types::Type;

use crate::CastFeasibility;

/// One rule application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifyStep {
    /// Recursion depth; the outermost pair is at 0.
    pub depth: usize,
    pub rule: ClassifyRule,
    pub source: String,
    pub target: String,
    pub result: CastFeasibility,
}

impl ClassifyStep {
    pub(crate) fn new(
        depth: usize,
        rule: ClassifyRule,
        source: &Type,
        target: &Type,
        result: CastFeasibility,
    ) -> Self {
        Self {
            depth,
            rule,
            source: source.to_string(),
            target: target.to_string(),
            result,
        }
    }
}

/// Which classifier rule decided a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifyRule {
    /// Structurally equal types.
    Identical,
    /// One optional layer stripped from both sides.
    BothOptional,
    /// Casting into a more optional type.
    TargetOptional,
    /// Casting out of an optional; success is weakened.
    SourceOptional,
    /// An existential or a type mentioning a generic parameter.
    ExistentialOrDependent,
    /// Metatype layers unwrapped pairwise.
    Metatype,
    /// Class-to-class relationship in the hierarchy.
    ClassHierarchy,
    /// No rule relates the two types.
    Unrelated,
}
