//! Per-type value semantics consumed by lowering passes.

use std::collections::BTreeSet;

use serde::Deserialize;
use tern_types::Type;

use crate::{LoadQualifier, MirBuilder, MirValueId};

/// How values of a type are held and copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Representation {
    /// Plain bits; copying needs no ownership operation.
    Trivial,
    /// A single reference-counted pointer.
    Reference,
    /// Register-held aggregate containing references.
    Loadable,
    /// Must stay in memory; layout unknown at compile time.
    AddressOnly,
}

impl Representation {
    pub fn is_trivial(self) -> bool {
        self == Representation::Trivial
    }

    pub fn is_address_only(self) -> bool {
        self == Representation::AddressOnly
    }
}

/// The type-lowering service.
///
/// Implementors decide representation; the provided methods emit the
/// matching copy/move sequences. All emission helpers produce initializing
/// stores: the destination memory must be uninitialized.
pub trait TypeLowering {
    fn representation(&self, ty: &Type) -> Representation;

    /// Produce an extra +1 of a register value.
    fn emit_retain_value(&self, builder: &mut MirBuilder, value: MirValueId) {
        let ty = builder.value_type(value).ty.clone();
        if !self.representation(&ty).is_trivial() {
            builder.create_retain(value);
        }
    }

    /// Load an owned value from `addr`, either moving it out (`take`) or
    /// copying it.
    fn emit_load_of_copy(
        &self,
        builder: &mut MirBuilder,
        addr: MirValueId,
        take: bool,
    ) -> MirValueId {
        let ty = builder.value_type(addr).ty.clone();
        let repr = self.representation(&ty);
        assert!(
            !repr.is_address_only(),
            "cannot load address-only type `{ty}` into a register"
        );
        let qualifier = match (repr.is_trivial(), take) {
            (true, _) => LoadQualifier::Trivial,
            (false, true) => LoadQualifier::Take,
            (false, false) => LoadQualifier::Copy,
        };
        builder.create_load(addr, qualifier)
    }

    /// Store an owned register value into uninitialized memory.
    fn emit_store_of_copy(&self, builder: &mut MirBuilder, value: MirValueId, addr: MirValueId) {
        builder.create_store(value, addr);
    }

    /// Initialize `dest` from `src`, moving when `take` is set.
    fn emit_copy_into(
        &self,
        builder: &mut MirBuilder,
        src: MirValueId,
        dest: MirValueId,
        take: bool,
    ) {
        builder.create_copy_addr(src, dest, take);
    }
}

/// Struct representation overrides for [`StandardTypeLowering`].
///
/// Structs not listed are trivial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoweringConfig {
    /// Structs holding references (lowered as loadable aggregates).
    pub loadable_structs: BTreeSet<String>,
    /// Structs with a layout unknown to this compilation unit.
    pub address_only_structs: BTreeSet<String>,
}

/// Default lowering: classes are references, metatypes are trivial,
/// existentials and generic parameters are address-only.
#[derive(Debug, Clone, Default)]
pub struct StandardTypeLowering {
    config: LoweringConfig,
}

impl StandardTypeLowering {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: LoweringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoweringConfig {
        &self.config
    }
}

impl TypeLowering for StandardTypeLowering {
    fn representation(&self, ty: &Type) -> Representation {
        match ty {
            Type::Class(_) => Representation::Reference,
            Type::Metatype { .. } => Representation::Trivial,
            Type::Existential { .. } | Type::Param(_) => Representation::AddressOnly,
            Type::Optional { object, .. } => match self.representation(object) {
                Representation::Reference => Representation::Loadable,
                other => other,
            },
            Type::Struct(name) => {
                if self.config.address_only_structs.contains(name) {
                    Representation::AddressOnly
                } else if self.config.loadable_structs.contains(name) {
                    Representation::Loadable
                } else {
                    Representation::Trivial
                }
            }
            Type::Tuple(elems) => {
                let widest = elems
                    .iter()
                    .map(|elem| self.representation(elem))
                    .max()
                    .unwrap_or(Representation::Trivial);
                match widest {
                    Representation::Reference => Representation::Loadable,
                    other => other,
                }
            }
        }
    }
}
