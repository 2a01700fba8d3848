//! Backend-neutral mid-level IR (MIR) for Tern.
//!
//! This crate defines explicit control-flow + memory/ownership operations
//! used by the cast lowering in `tern-casts`, together with the services that
//! lowering consumes: a block-structured [`MirBuilder`], the [`TypeLowering`]
//! contract for per-type copy semantics, a structural [`verify_function`]
//! check and a reference [`Interpreter`] with reference counting.

mod builder;
pub mod interp;
mod lowering;
mod print;
mod stats;
mod verify;

use std::collections::BTreeMap;
use std::fmt;

use tern_types::{OptionalKind, Type};

pub use builder::{MirBuildError, MirBuilder};
pub use interp::{Address, InterpConfig, InterpError, Interpreter, ObjectId, RtValue};
pub use lowering::{LoweringConfig, Representation, StandardTypeLowering, TypeLowering};
pub use stats::MirFunctionStats;
pub use verify::{VerifyError, verify_function};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirBlockId(pub u32);

impl fmt::Display for MirValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for MirBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lowered types
// ---------------------------------------------------------------------------

/// Whether a value is the thing itself or the address of a memory location
/// holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    Object,
    Address,
}

/// A lowered (representation) type: a formal type plus a value category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirType {
    pub ty: Type,
    pub category: ValueCategory,
}

impl MirType {
    pub fn object(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Object,
        }
    }

    pub fn address(ty: Type) -> Self {
        Self {
            ty,
            category: ValueCategory::Address,
        }
    }

    pub fn is_address(&self) -> bool {
        self.category == ValueCategory::Address
    }

    pub fn object_type(&self) -> MirType {
        MirType::object(self.ty.clone())
    }

    /// Type of the `some` payload of an optional, in the same category.
    pub fn optional_payload(&self) -> Option<MirType> {
        self.ty.optional_object().map(|object| MirType {
            ty: object.clone(),
            category: self.category,
        })
    }
}

impl fmt::Display for MirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            ValueCategory::Object => write!(f, "${}", self.ty),
            ValueCategory::Address => write!(f, "$*{}", self.ty),
        }
    }
}

// ---------------------------------------------------------------------------
// Optional cases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalCase {
    Some,
    None,
}

/// One case of an optional of a given flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OptionalElement {
    pub kind: OptionalKind,
    pub case: OptionalCase,
}

impl OptionalElement {
    pub fn some(kind: OptionalKind) -> Self {
        Self {
            kind,
            case: OptionalCase::Some,
        }
    }

    pub fn none(kind: OptionalKind) -> Self {
        Self {
            kind,
            case: OptionalCase::None,
        }
    }
}

impl fmt::Display for OptionalElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let case = match self.case {
            OptionalCase::Some => "some",
            OptionalCase::None => "none",
        };
        write!(f, "#{}.{case}", self.kind.as_str())
    }
}

// ---------------------------------------------------------------------------
// Functions, blocks, instructions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MirFunction {
    pub name: String,
    pub entry: MirBlockId,
    /// Blocks in layout order.
    pub blocks: Vec<MirBlock>,
    pub value_types: BTreeMap<MirValueId, MirType>,
}

impl MirFunction {
    pub fn block(&self, id: MirBlockId) -> Option<&MirBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }

    pub fn value_type(&self, value: MirValueId) -> Option<&MirType> {
        self.value_types.get(&value)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &MirInst> {
        self.blocks.iter().flat_map(|block| block.instructions.iter())
    }

    pub fn stats(&self) -> MirFunctionStats {
        MirFunctionStats::collect(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirBlock {
    pub id: MirBlockId,
    pub params: Vec<MirValueId>,
    pub instructions: Vec<MirInst>,
    pub terminator: MirTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadQualifier {
    /// Move the value out; the memory is left uninitialized.
    Take,
    /// Copy the value out, retaining it; the memory stays initialized.
    Copy,
    /// Bitwise load of a trivial value.
    Trivial,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirInst {
    AllocStack {
        dest: MirValueId,
        ty: Type,
    },
    DeallocStack {
        slot: MirValueId,
    },
    Load {
        dest: MirValueId,
        src: MirValueId,
        qualifier: LoadQualifier,
    },
    /// Initialize uninitialized memory at `dest`, consuming `src`.
    Store {
        src: MirValueId,
        dest: MirValueId,
    },
    /// Initialize uninitialized memory at `dest` from memory at `src`.
    CopyAddr {
        src: MirValueId,
        dest: MirValueId,
        take: bool,
    },
    Retain {
        value: MirValueId,
    },
    Release {
        value: MirValueId,
    },
    Upcast {
        dest: MirValueId,
        value: MirValueId,
        ty: MirType,
    },
    Enum {
        dest: MirValueId,
        element: OptionalElement,
        payload: Option<MirValueId>,
        ty: MirType,
    },
    /// Address of the `some` payload area of uninitialized optional memory.
    InitEnumDataAddr {
        dest: MirValueId,
        addr: MirValueId,
        element: OptionalElement,
    },
    /// Set the case tag, completing initialization of optional memory.
    InjectEnumAddr {
        addr: MirValueId,
        element: OptionalElement,
    },
    /// Destructively project the payload out of initialized `some` memory.
    UncheckedTakeEnumDataAddr {
        dest: MirValueId,
        addr: MirValueId,
        element: OptionalElement,
    },
}

impl MirInst {
    pub fn defined_value(&self) -> Option<MirValueId> {
        match self {
            MirInst::AllocStack { dest, .. }
            | MirInst::Load { dest, .. }
            | MirInst::Upcast { dest, .. }
            | MirInst::Enum { dest, .. }
            | MirInst::InitEnumDataAddr { dest, .. }
            | MirInst::UncheckedTakeEnumDataAddr { dest, .. } => Some(*dest),
            MirInst::DeallocStack { .. }
            | MirInst::Store { .. }
            | MirInst::CopyAddr { .. }
            | MirInst::Retain { .. }
            | MirInst::Release { .. }
            | MirInst::InjectEnumAddr { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<MirValueId> {
        match self {
            MirInst::AllocStack { .. } => vec![],
            MirInst::DeallocStack { slot } => vec![*slot],
            MirInst::Load { src, .. } => vec![*src],
            MirInst::Store { src, dest } | MirInst::CopyAddr { src, dest, .. } => {
                vec![*src, *dest]
            }
            MirInst::Retain { value } | MirInst::Release { value } => vec![*value],
            MirInst::Upcast { value, .. } => vec![*value],
            MirInst::Enum { payload, .. } => payload.iter().copied().collect(),
            MirInst::InitEnumDataAddr { addr, .. }
            | MirInst::InjectEnumAddr { addr, .. }
            | MirInst::UncheckedTakeEnumDataAddr { addr, .. } => vec![*addr],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MirTerminator {
    Jump {
        target: MirBlockId,
        args: Vec<MirValueId>,
    },
    /// Branch on the case of an optional value. The `some` successor
    /// receives the payload as its only block parameter.
    SwitchEnum {
        operand: MirValueId,
        kind: OptionalKind,
        some: MirBlockId,
        none: MirBlockId,
    },
    /// Branch on the case of optional memory without consuming it.
    SwitchEnumAddr {
        addr: MirValueId,
        kind: OptionalKind,
        some: MirBlockId,
        none: MirBlockId,
    },
    Return {
        value: Option<MirValueId>,
    },
    Unreachable,
}

impl MirTerminator {
    pub fn successors(&self) -> Vec<MirBlockId> {
        match self {
            MirTerminator::Jump { target, .. } => vec![*target],
            MirTerminator::SwitchEnum { some, none, .. }
            | MirTerminator::SwitchEnumAddr { some, none, .. } => vec![*some, *none],
            MirTerminator::Return { .. } | MirTerminator::Unreachable => vec![],
        }
    }

    pub fn operands(&self) -> Vec<MirValueId> {
        match self {
            MirTerminator::Jump { args, .. } => args.clone(),
            MirTerminator::SwitchEnum { operand, .. } => vec![*operand],
            MirTerminator::SwitchEnumAddr { addr, .. } => vec![*addr],
            MirTerminator::Return { value } => value.iter().copied().collect(),
            MirTerminator::Unreachable => vec![],
        }
    }
}
