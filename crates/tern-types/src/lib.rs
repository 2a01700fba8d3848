//! Formal type descriptors for Tern's mid-level cast machinery.
//!
//! These are the canonical, source-level types the cast classifier reasons
//! about. They are distinct from lowered MIR types (which live in
//! `tern-mir` and add a value category on top of a formal type).
//!
//! Equality is structural: two independently built descriptors of the same
//! type always compare equal.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Name of a nominal class. Class identity is its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassName(pub String);

impl ClassName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which flavour of optional wraps a value. Both flavours share the same
/// `some`/`none` layout and count as one optional layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionalKind {
    Optional,
    ImplicitlyUnwrapped,
}

impl OptionalKind {
    /// Name of the optional enum this flavour lowers to.
    pub fn as_str(self) -> &'static str {
        match self {
            OptionalKind::Optional => "Optional",
            OptionalKind::ImplicitlyUnwrapped => "ImplicitlyUnwrappedOptional",
        }
    }
}

/// Representation of a metatype value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetatypeKind {
    /// Concrete type-of-`T`.
    Thick,
    /// Erased type-of-type: any type whose instances conform to `T`.
    Existential,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A formal type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    /// `T?` or `T!`.
    Optional {
        kind: OptionalKind,
        object: Box<Type>,
    },
    /// Type-of-a-type.
    Metatype {
        instance: Box<Type>,
        kind: MetatypeKind,
    },
    /// Nominal class in the single-inheritance hierarchy.
    Class(ClassName),
    /// Existential container: `any Show`, `any (Show, Eq)`.
    Existential { bounds: BTreeSet<String> },
    /// Generic parameter not yet resolved to a concrete type.
    Param(String),
    /// Nominal value type.
    Struct(String),
    Tuple(Vec<Type>),
}

impl Type {
    pub fn optional(object: Type) -> Self {
        Type::Optional {
            kind: OptionalKind::Optional,
            object: Box::new(object),
        }
    }

    pub fn implicitly_unwrapped(object: Type) -> Self {
        Type::Optional {
            kind: OptionalKind::ImplicitlyUnwrapped,
            object: Box::new(object),
        }
    }

    /// Wrap `object` in `depth` plain optional layers.
    pub fn optional_n(object: Type, depth: usize) -> Self {
        (0..depth).fold(object, |ty, _| Type::optional(ty))
    }

    pub fn metatype(instance: Type) -> Self {
        Type::Metatype {
            instance: Box::new(instance),
            kind: MetatypeKind::Thick,
        }
    }

    pub fn existential_metatype(instance: Type) -> Self {
        Type::Metatype {
            instance: Box::new(instance),
            kind: MetatypeKind::Existential,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        Type::Class(ClassName::new(name))
    }

    pub fn existential<I, S>(bounds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Type::Existential {
            bounds: bounds.into_iter().map(Into::into).collect(),
        }
    }

    /// The existential with no bounds.
    pub fn any() -> Self {
        Type::Existential {
            bounds: BTreeSet::new(),
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Type::Param(name.into())
    }

    pub fn structure(name: impl Into<String>) -> Self {
        Type::Struct(name.into())
    }

    /// The wrapped type if this is an optional of either flavour.
    pub fn optional_object(&self) -> Option<&Type> {
        self.optional_object_with_kind().map(|(_, object)| object)
    }

    pub fn optional_object_with_kind(&self) -> Option<(OptionalKind, &Type)> {
        match self {
            Type::Optional { kind, object } => Some((*kind, object)),
            _ => None,
        }
    }

    /// Number of optional layers wrapped around a non-optional type.
    pub fn optional_depth(&self) -> usize {
        let mut depth = 0;
        let mut ty = self;
        while let Some(object) = ty.optional_object() {
            depth += 1;
            ty = object;
        }
        depth
    }

    /// The innermost non-optional type.
    pub fn strip_optionals(&self) -> &Type {
        let mut ty = self;
        while let Some(object) = ty.optional_object() {
            ty = object;
        }
        ty
    }

    pub fn metatype_instance(&self) -> Option<(MetatypeKind, &Type)> {
        match self {
            Type::Metatype { instance, kind } => Some((*kind, instance)),
            _ => None,
        }
    }

    /// Number of metatype layers wrapped around a non-metatype type.
    pub fn metatype_depth(&self) -> usize {
        let mut depth = 0;
        let mut ty = self;
        while let Some((_, instance)) = ty.metatype_instance() {
            depth += 1;
            ty = instance;
        }
        depth
    }

    pub fn class_name(&self) -> Option<&ClassName> {
        match self {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }

    /// The classes an upcast from `from` to `to` converts between. Matching
    /// thick metatype layers are stripped pairwise; a class must remain on
    /// both sides.
    pub fn class_conversion<'a>(
        mut from: &'a Type,
        mut to: &'a Type,
    ) -> Option<(&'a ClassName, &'a ClassName)> {
        while let (
            Some((MetatypeKind::Thick, from_instance)),
            Some((MetatypeKind::Thick, to_instance)),
        ) = (from.metatype_instance(), to.metatype_instance())
        {
            from = from_instance;
            to = to_instance;
        }
        Some((from.class_name()?, to.class_name()?))
    }

    pub fn is_existential(&self) -> bool {
        matches!(self, Type::Existential { .. })
    }

    /// Whether a generic parameter occurs anywhere inside this type.
    pub fn has_param(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::Optional { object, .. } => object.has_param(),
            Type::Metatype { instance, .. } => instance.has_param(),
            Type::Tuple(elems) => elems.iter().any(Type::has_param),
            Type::Class(_) | Type::Existential { .. } | Type::Struct(_) => false,
        }
    }

    /// Existential containers and types mentioning unresolved parameters.
    /// The classifier treats both as opaque.
    pub fn is_existential_or_dependent(&self) -> bool {
        self.is_existential() || self.has_param()
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

fn needs_parens_before_suffix(ty: &Type) -> bool {
    matches!(ty, Type::Existential { bounds } if !bounds.is_empty())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Optional { kind, object } => {
                let suffix = match kind {
                    OptionalKind::Optional => '?',
                    OptionalKind::ImplicitlyUnwrapped => '!',
                };
                if needs_parens_before_suffix(object) {
                    write!(f, "({object}){suffix}")
                } else {
                    write!(f, "{object}{suffix}")
                }
            }
            Type::Metatype {
                instance,
                kind: MetatypeKind::Thick,
            } => write!(f, "Metatype({instance})"),
            Type::Metatype {
                instance,
                kind: MetatypeKind::Existential,
            } => write!(f, "ExistentialMetatype({instance})"),
            Type::Class(name) => write!(f, "{name}"),
            Type::Existential { bounds } => {
                if bounds.is_empty() {
                    return write!(f, "Any");
                }
                write!(f, "any ")?;
                if bounds.len() == 1 {
                    for b in bounds {
                        write!(f, "{b}")?;
                    }
                    return Ok(());
                }
                write!(f, "(")?;
                for (i, b) in bounds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{b}")?;
                }
                write!(f, ")")
            }
            Type::Param(name) => write!(f, "{name}"),
            Type::Struct(name) => write!(f, "{name}"),
            Type::Tuple(elems) => {
                write!(f, "#(")?;
                for (i, t) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Class hierarchy
// ---------------------------------------------------------------------------

/// Subtype queries over nominal classes.
///
/// Implementations must describe a single-inheritance partial order: every
/// class has at most one superclass and no class is its own strict ancestor.
pub trait SubtypeQuery {
    /// `true` when `ancestor` is `descendant` itself or one of its
    /// (transitive) superclasses.
    fn is_ancestor_or_self(&self, ancestor: &ClassName, descendant: &ClassName) -> bool;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("class `{name}` is already declared")]
    DuplicateClass { name: ClassName },
    #[error("superclass `{superclass}` of `{name}` is not declared")]
    UnknownSuperclass {
        name: ClassName,
        superclass: ClassName,
    },
}

/// A single-inheritance class table.
///
/// A subclass can only be declared after its superclass, so the table can
/// never contain a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassHierarchy {
    superclasses: BTreeMap<ClassName, Option<ClassName>>,
}

impl ClassHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_root(&mut self, name: impl Into<String>) -> Result<ClassName, HierarchyError> {
        let name = ClassName::new(name);
        self.insert(name, None)
    }

    pub fn declare_subclass(
        &mut self,
        name: impl Into<String>,
        superclass: impl Into<String>,
    ) -> Result<ClassName, HierarchyError> {
        let name = ClassName::new(name);
        let superclass = ClassName::new(superclass);
        if !self.contains(&superclass) {
            return Err(HierarchyError::UnknownSuperclass { name, superclass });
        }
        self.insert(name, Some(superclass))
    }

    fn insert(
        &mut self,
        name: ClassName,
        superclass: Option<ClassName>,
    ) -> Result<ClassName, HierarchyError> {
        if self.superclasses.contains_key(&name) {
            return Err(HierarchyError::DuplicateClass { name });
        }
        self.superclasses.insert(name.clone(), superclass);
        Ok(name)
    }

    pub fn contains(&self, name: &ClassName) -> bool {
        self.superclasses.contains_key(name)
    }

    pub fn superclass(&self, name: &ClassName) -> Option<&ClassName> {
        self.superclasses.get(name).and_then(Option::as_ref)
    }

    /// `name` followed by each of its superclasses, nearest first.
    pub fn ancestors<'a>(&'a self, name: &'a ClassName) -> impl Iterator<Item = &'a ClassName> {
        let start = self.contains(name).then_some(name);
        std::iter::successors(start, move |current| self.superclass(current))
    }
}

impl SubtypeQuery for ClassHierarchy {
    fn is_ancestor_or_self(&self, ancestor: &ClassName, descendant: &ClassName) -> bool {
        if ancestor == descendant {
            return true;
        }
        self.ancestors(descendant).any(|class| class == ancestor)
    }
}
