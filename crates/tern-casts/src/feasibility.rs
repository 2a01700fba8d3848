//! Compile-time classification of dynamic casts.

use std::fmt;

use serde::Serialize;
use tern_types::{MetatypeKind, SubtypeQuery, Type};

use crate::trace::{ClassifyRule, ClassifyStep};

/// What can be proven about a runtime cast before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastFeasibility {
    /// The cast always succeeds; it can be lowered without a runtime check.
    WillSucceed,
    /// The cast needs a runtime check.
    MaySucceed,
    /// The cast never succeeds.
    WillFail,
}

impl CastFeasibility {
    /// Demote a proven success to a possible one.
    pub fn weaken_success(self) -> Self {
        match self {
            CastFeasibility::WillSucceed => CastFeasibility::MaySucceed,
            other => other,
        }
    }

    /// Human-readable verdict, as used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            CastFeasibility::WillSucceed => "will succeed",
            CastFeasibility::MaySucceed => "may succeed",
            CastFeasibility::WillFail => "will fail",
        }
    }
}

impl fmt::Display for CastFeasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a cast from `source` to `target`.
///
/// Total and deterministic. Only the class hierarchy is consulted; anything
/// the rules cannot relate is reported as [`CastFeasibility::WillFail`], so
/// `WillFail` means "never lower this unconditionally" rather than "provably
/// impossible at runtime".
pub fn classify_dynamic_cast<H>(hierarchy: &H, source: &Type, target: &Type) -> CastFeasibility
where
    H: SubtypeQuery + ?Sized,
{
    Classifier {
        hierarchy,
        steps: None,
    }
    .classify(source, target, 0)
}

/// Like [`classify_dynamic_cast`], also returning the rules applied,
/// outermost pair first.
pub fn classify_dynamic_cast_traced<H>(
    hierarchy: &H,
    source: &Type,
    target: &Type,
) -> (CastFeasibility, Vec<ClassifyStep>)
where
    H: SubtypeQuery + ?Sized,
{
    let mut classifier = Classifier {
        hierarchy,
        steps: Some(Vec::new()),
    };
    let result = classifier.classify(source, target, 0);
    (result, classifier.steps.unwrap_or_default())
}

struct Classifier<'a, H: ?Sized> {
    hierarchy: &'a H,
    steps: Option<Vec<ClassifyStep>>,
}

impl<H: SubtypeQuery + ?Sized> Classifier<'_, H> {
    fn classify(&mut self, source: &Type, target: &Type, depth: usize) -> CastFeasibility {
        let slot = self.steps.as_ref().map(Vec::len);
        let (rule, result) = self.apply_rules(source, target, depth);
        if let (Some(steps), Some(slot)) = (self.steps.as_mut(), slot) {
            steps.insert(slot, ClassifyStep::new(depth, rule, source, target, result));
        }
        result
    }

    fn apply_rules(
        &mut self,
        source: &Type,
        target: &Type,
        depth: usize,
    ) -> (ClassifyRule, CastFeasibility) {
        if source == target {
            return (ClassifyRule::Identical, CastFeasibility::WillSucceed);
        }

        match (source.optional_object(), target.optional_object()) {
            (Some(source_object), Some(target_object)) => {
                let result = self.classify(source_object, target_object, depth + 1);
                return (ClassifyRule::BothOptional, result);
            }
            (None, Some(target_object)) => {
                let result = self.classify(source, target_object, depth + 1);
                return (ClassifyRule::TargetOptional, result);
            }
            (Some(source_object), None) => {
                let result = self.classify(source_object, target, depth + 1);
                return (ClassifyRule::SourceOptional, result.weaken_success());
            }
            (None, None) => {}
        }

        if source.is_existential_or_dependent() || target.is_existential_or_dependent() {
            return (
                ClassifyRule::ExistentialOrDependent,
                CastFeasibility::MaySucceed,
            );
        }

        if source.metatype_instance().is_some() {
            return (ClassifyRule::Metatype, self.classify_metatypes(source, target));
        }

        match (source.class_name(), target.class_name()) {
            (Some(_), Some(_)) => (
                ClassifyRule::ClassHierarchy,
                self.classify_classes(source, target),
            ),
            _ => (ClassifyRule::Unrelated, CastFeasibility::WillFail),
        }
    }

    fn classify_metatypes(&self, mut source: &Type, mut target: &Type) -> CastFeasibility {
        while let Some((source_kind, source_instance)) = source.metatype_instance() {
            let Some((target_kind, target_instance)) = target.metatype_instance() else {
                return CastFeasibility::WillFail;
            };
            source = source_instance;
            target = target_instance;

            if source_kind == MetatypeKind::Existential || target_kind == MetatypeKind::Existential
            {
                return if source.metatype_depth() == target.metatype_depth() {
                    CastFeasibility::MaySucceed
                } else {
                    CastFeasibility::WillFail
                };
            }
        }
        self.classify_classes(source, target)
    }

    fn classify_classes(&self, source: &Type, target: &Type) -> CastFeasibility {
        let (Some(source_class), Some(target_class)) = (source.class_name(), target.class_name())
        else {
            return CastFeasibility::WillFail;
        };
        if self.hierarchy.is_ancestor_or_self(target_class, source_class) {
            CastFeasibility::WillSucceed
        } else if self.hierarchy.is_ancestor_or_self(source_class, target_class) {
            CastFeasibility::MaySucceed
        } else {
            CastFeasibility::WillFail
        }
    }
}
