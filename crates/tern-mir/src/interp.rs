//! Reference interpreter for MIR.
//!
//! Executes a function on concrete runtime values while tracking reference
//! counts, memory initialization state and the stack of live `alloc_stack`
//! slots. Used to check that lowered code computes the right value and
//! leaves ownership balanced; it is not a performance-oriented evaluator.

use std::collections::BTreeMap;

use tern_types::{ClassName, SubtypeQuery, Type};
use tracing::{debug, trace};

use crate::{LoadQualifier, MirFunction, MirInst, MirTerminator, MirValueId, OptionalCase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

/// A memory location: a slot plus the number of optional payload areas
/// projected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub slot: u32,
    pub depth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtValue {
    Object(ObjectId),
    /// A metatype value; carries the dynamic type it denotes.
    Metatype(Type),
    Scalar(i64),
    Some(Box<RtValue>),
    None,
    Tuple(Vec<RtValue>),
    Address(Address),
}

impl RtValue {
    pub fn some(value: RtValue) -> Self {
        RtValue::Some(Box::new(value))
    }

    /// Every heap object reachable from this value, with multiplicity.
    pub fn objects(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        self.collect_objects(&mut out);
        out
    }

    fn collect_objects(&self, out: &mut Vec<ObjectId>) {
        match self {
            RtValue::Object(id) => out.push(*id),
            RtValue::Some(inner) => inner.collect_objects(out),
            RtValue::Tuple(elems) => elems.iter().for_each(|e| e.collect_objects(out)),
            RtValue::Metatype(_) | RtValue::Scalar(_) | RtValue::None | RtValue::Address(_) => {}
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            RtValue::Object(_) => "object",
            RtValue::Metatype(_) => "metatype",
            RtValue::Scalar(_) => "scalar",
            RtValue::Some(_) => "some",
            RtValue::None => "none",
            RtValue::Tuple(_) => "tuple",
            RtValue::Address(_) => "address",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cell {
    Uninit,
    Init(RtValue),
    /// Optional memory whose tag is not set; the payload area is nested.
    Payload(Box<Cell>),
}

impl Cell {
    fn holds_value(&self) -> bool {
        match self {
            Cell::Uninit => false,
            Cell::Init(_) => true,
            Cell::Payload(inner) => inner.holds_value(),
        }
    }

    /// Whether destroying this cell would have to release anything.
    fn holds_references(&self) -> bool {
        match self {
            Cell::Uninit => false,
            Cell::Init(value) => !value.objects().is_empty(),
            Cell::Payload(inner) => inner.holds_references(),
        }
    }
}

fn descend(cell: &mut Cell, depth: u32, slot: u32) -> Result<&mut Cell, InterpError> {
    if depth == 0 {
        return Ok(cell);
    }
    match cell {
        Cell::Payload(inner) => descend(inner, depth - 1, slot),
        _ => Err(InterpError::NotAPayloadArea { slot }),
    }
}

fn descend_ref(cell: &Cell, depth: u32, slot: u32) -> Result<&Cell, InterpError> {
    if depth == 0 {
        return Ok(cell);
    }
    match cell {
        Cell::Payload(inner) => descend_ref(inner, depth - 1, slot),
        _ => Err(InterpError::NotAPayloadArea { slot }),
    }
}

#[derive(Debug)]
struct Slot {
    cell: Cell,
    live: bool,
    stack: bool,
}

#[derive(Debug)]
struct HeapObject {
    class: ClassName,
    refcount: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpConfig {
    /// Instructions plus terminators executed before giving up.
    pub max_steps: usize,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self { max_steps: 10_000 }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum InterpError {
    #[error("`%{value}` has no runtime value")]
    UnboundValue { value: u32 },
    #[error("block `bb{block}` does not exist")]
    MissingBlock { block: u32 },
    #[error("`bb{block}` expects {expected} arguments, got {actual}")]
    ArgumentCount {
        block: u32,
        expected: usize,
        actual: usize,
    },
    #[error("expected {expected}, found {found}")]
    TypeConfusion {
        expected: &'static str,
        found: &'static str,
    },
    #[error("read of uninitialized memory in slot {slot}")]
    UninitializedRead { slot: u32 },
    #[error("initialization of already initialized memory in slot {slot}")]
    DoubleInitialization { slot: u32 },
    #[error("slot {slot} has no optional payload area at this depth")]
    NotAPayloadArea { slot: u32 },
    #[error("access to deallocated or unknown slot {slot}")]
    DanglingAddress { slot: u32 },
    #[error("stack slot {slot} deallocated while still holding references")]
    LeakedStackValue { slot: u32 },
    #[error("stack slot {slot} deallocated out of order")]
    StackOrder { slot: u32 },
    #[error("return with {count} live stack slot(s)")]
    LiveStackAtReturn { count: usize },
    #[error("object {object} released below zero")]
    OverRelease { object: u32 },
    #[error("object of class `{class}` cannot be upcast to `{target}`")]
    BadUpcast { class: String, target: String },
    #[error("reached `unreachable` in `bb{block}`")]
    Unreachable { block: u32 },
    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: usize },
}

/// Interpreter state: heap objects and memory slots persist across runs so
/// callers can set up inputs before and inspect outputs after [`Interpreter::run`].
pub struct Interpreter<'h> {
    hierarchy: &'h dyn SubtypeQuery,
    config: InterpConfig,
    heap: Vec<HeapObject>,
    slots: Vec<Slot>,
    stack: Vec<u32>,
}

impl<'h> Interpreter<'h> {
    pub fn new(hierarchy: &'h dyn SubtypeQuery) -> Self {
        Self::with_config(hierarchy, InterpConfig::default())
    }

    pub fn with_config(hierarchy: &'h dyn SubtypeQuery, config: InterpConfig) -> Self {
        Self {
            hierarchy,
            config,
            heap: Vec::new(),
            slots: Vec::new(),
            stack: Vec::new(),
        }
    }

    // -- Heap ----------------------------------------------------------------

    /// Allocate an object with a reference count of one, owned by the caller.
    pub fn alloc_object(&mut self, class: ClassName) -> RtValue {
        let id = ObjectId(self.heap.len() as u32);
        self.heap.push(HeapObject { class, refcount: 1 });
        RtValue::Object(id)
    }

    pub fn refcount(&self, object: ObjectId) -> u32 {
        self.heap
            .get(object.0 as usize)
            .map_or(0, |obj| obj.refcount)
    }

    pub fn class_of(&self, object: ObjectId) -> Option<&ClassName> {
        self.heap.get(object.0 as usize).map(|obj| &obj.class)
    }

    /// Objects whose reference count has not dropped to zero.
    pub fn live_objects(&self) -> Vec<ObjectId> {
        self.heap
            .iter()
            .enumerate()
            .filter(|(_, obj)| obj.refcount > 0)
            .map(|(idx, _)| ObjectId(idx as u32))
            .collect()
    }

    pub fn retain_value(&mut self, value: &RtValue) -> Result<(), InterpError> {
        for object in value.objects() {
            let obj = self
                .heap
                .get_mut(object.0 as usize)
                .ok_or(InterpError::OverRelease { object: object.0 })?;
            obj.refcount += 1;
        }
        Ok(())
    }

    pub fn release_value(&mut self, value: &RtValue) -> Result<(), InterpError> {
        for object in value.objects() {
            let obj = self
                .heap
                .get_mut(object.0 as usize)
                .filter(|obj| obj.refcount > 0)
                .ok_or(InterpError::OverRelease { object: object.0 })?;
            obj.refcount -= 1;
        }
        Ok(())
    }

    // -- Memory --------------------------------------------------------------

    /// Allocate caller-owned memory, optionally initialized with `initial`.
    pub fn alloc_memory(&mut self, initial: Option<RtValue>) -> Address {
        self.push_slot(initial.map_or(Cell::Uninit, Cell::Init), false)
    }

    fn push_slot(&mut self, cell: Cell, stack: bool) -> Address {
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            cell,
            live: true,
            stack,
        });
        Address { slot, depth: 0 }
    }

    fn cell_mut(&mut self, addr: Address) -> Result<&mut Cell, InterpError> {
        let slot = self
            .slots
            .get_mut(addr.slot as usize)
            .filter(|slot| slot.live)
            .ok_or(InterpError::DanglingAddress { slot: addr.slot })?;
        descend(&mut slot.cell, addr.depth, addr.slot)
    }

    fn cell(&self, addr: Address) -> Result<&Cell, InterpError> {
        let slot = self
            .slots
            .get(addr.slot as usize)
            .filter(|slot| slot.live)
            .ok_or(InterpError::DanglingAddress { slot: addr.slot })?;
        descend_ref(&slot.cell, addr.depth, addr.slot)
    }

    /// The value stored at `addr`, or `None` when it is not initialized.
    pub fn read(&self, addr: Address) -> Result<Option<RtValue>, InterpError> {
        Ok(match self.cell(addr)? {
            Cell::Init(value) => Some(value.clone()),
            Cell::Uninit | Cell::Payload(_) => None,
        })
    }

    /// Whether any initialized value remains anywhere under `addr`.
    pub fn holds_value(&self, addr: Address) -> Result<bool, InterpError> {
        Ok(self.cell(addr)?.holds_value())
    }

    /// Move the value out of `addr`, leaving it uninitialized.
    pub fn take(&mut self, addr: Address) -> Result<RtValue, InterpError> {
        let cell = self.cell_mut(addr)?;
        match std::mem::replace(cell, Cell::Uninit) {
            Cell::Init(value) => Ok(value),
            other => {
                *cell = other;
                Err(InterpError::UninitializedRead { slot: addr.slot })
            }
        }
    }

    /// Destroy the value at `addr`, releasing everything it holds.
    pub fn destroy(&mut self, addr: Address) -> Result<(), InterpError> {
        let value = self.take(addr)?;
        self.release_value(&value)
    }

    fn store(&mut self, addr: Address, value: RtValue) -> Result<(), InterpError> {
        let cell = self.cell_mut(addr)?;
        if *cell != Cell::Uninit {
            return Err(InterpError::DoubleInitialization { slot: addr.slot });
        }
        *cell = Cell::Init(value);
        Ok(())
    }

    fn load(&mut self, addr: Address, qualifier: LoadQualifier) -> Result<RtValue, InterpError> {
        match qualifier {
            LoadQualifier::Take => self.take(addr),
            LoadQualifier::Copy | LoadQualifier::Trivial => {
                let value = self
                    .read(addr)?
                    .ok_or(InterpError::UninitializedRead { slot: addr.slot })?;
                if qualifier == LoadQualifier::Copy {
                    self.retain_value(&value)?;
                }
                Ok(value)
            }
        }
    }

    pub fn live_stack_slots(&self) -> usize {
        self.stack.len()
    }

    // -- Execution -----------------------------------------------------------

    /// Run `func` from its entry block with `args` bound to the entry
    /// parameters. Returns the returned value, if any.
    pub fn run(
        &mut self,
        func: &MirFunction,
        args: Vec<RtValue>,
    ) -> Result<Option<RtValue>, InterpError> {
        let mut regs: BTreeMap<MirValueId, RtValue> = BTreeMap::new();
        let mut block_id = func.entry;
        let mut incoming = args;
        let mut steps = 0usize;
        debug!(function = %func.name, args = incoming.len(), "interpreting function");

        loop {
            let block = func
                .block(block_id)
                .ok_or(InterpError::MissingBlock { block: block_id.0 })?;
            trace!(block = %block_id, steps, "entering block");
            if block.params.len() != incoming.len() {
                return Err(InterpError::ArgumentCount {
                    block: block_id.0,
                    expected: block.params.len(),
                    actual: incoming.len(),
                });
            }
            for (param, value) in block.params.iter().zip(incoming.drain(..)) {
                regs.insert(*param, value);
            }

            for inst in &block.instructions {
                steps += 1;
                if steps > self.config.max_steps {
                    return Err(InterpError::StepLimit {
                        limit: self.config.max_steps,
                    });
                }
                self.step(inst, &mut regs)?;
            }

            steps += 1;
            if steps > self.config.max_steps {
                return Err(InterpError::StepLimit {
                    limit: self.config.max_steps,
                });
            }
            let (next, args) = match &block.terminator {
                MirTerminator::Jump { target, args } => {
                    let values = args
                        .iter()
                        .map(|arg| get(&regs, *arg).cloned())
                        .collect::<Result<Vec<_>, _>>()?;
                    (*target, values)
                }
                MirTerminator::SwitchEnum {
                    operand,
                    some,
                    none,
                    ..
                } => match get(&regs, *operand)? {
                    RtValue::Some(payload) => (*some, vec![(**payload).clone()]),
                    RtValue::None => (*none, vec![]),
                    other => {
                        return Err(InterpError::TypeConfusion {
                            expected: "optional",
                            found: other.kind_name(),
                        });
                    }
                },
                MirTerminator::SwitchEnumAddr {
                    addr, some, none, ..
                } => {
                    let addr = get_address(&regs, *addr)?;
                    match self.cell(addr)? {
                        Cell::Init(RtValue::Some(_)) => (*some, vec![]),
                        Cell::Init(RtValue::None) => (*none, vec![]),
                        Cell::Init(other) => {
                            return Err(InterpError::TypeConfusion {
                                expected: "optional",
                                found: other.kind_name(),
                            });
                        }
                        Cell::Uninit | Cell::Payload(_) => {
                            return Err(InterpError::UninitializedRead { slot: addr.slot });
                        }
                    }
                }
                MirTerminator::Return { value } => {
                    if !self.stack.is_empty() {
                        return Err(InterpError::LiveStackAtReturn {
                            count: self.stack.len(),
                        });
                    }
                    return value.map(|value| get(&regs, value).cloned()).transpose();
                }
                MirTerminator::Unreachable => {
                    return Err(InterpError::Unreachable { block: block_id.0 });
                }
            };
            block_id = next;
            incoming = args;
        }
    }

    fn step(
        &mut self,
        inst: &MirInst,
        regs: &mut BTreeMap<MirValueId, RtValue>,
    ) -> Result<(), InterpError> {
        match inst {
            MirInst::AllocStack { dest, .. } => {
                let addr = self.push_slot(Cell::Uninit, true);
                self.stack.push(addr.slot);
                regs.insert(*dest, RtValue::Address(addr));
            }
            MirInst::DeallocStack { slot } => {
                let addr = get_address(regs, *slot)?;
                if self.stack.last() != Some(&addr.slot) || addr.depth != 0 {
                    return Err(InterpError::StackOrder { slot: addr.slot });
                }
                if self.cell(addr)?.holds_references() {
                    return Err(InterpError::LeakedStackValue { slot: addr.slot });
                }
                self.stack.pop();
                if let Some(slot) = self.slots.get_mut(addr.slot as usize) {
                    slot.live = false;
                }
            }
            MirInst::Load {
                dest,
                src,
                qualifier,
            } => {
                let addr = get_address(regs, *src)?;
                let value = self.load(addr, *qualifier)?;
                regs.insert(*dest, value);
            }
            MirInst::Store { src, dest } => {
                let value = get(regs, *src)?.clone();
                let addr = get_address(regs, *dest)?;
                self.store(addr, value)?;
            }
            MirInst::CopyAddr { src, dest, take } => {
                let src = get_address(regs, *src)?;
                let dest = get_address(regs, *dest)?;
                let qualifier = if *take {
                    LoadQualifier::Take
                } else {
                    LoadQualifier::Copy
                };
                let value = self.load(src, qualifier)?;
                self.store(dest, value)?;
            }
            MirInst::Retain { value } => {
                let value = get(regs, *value)?.clone();
                self.retain_value(&value)?;
            }
            MirInst::Release { value } => {
                let value = get(regs, *value)?.clone();
                self.release_value(&value)?;
            }
            MirInst::Upcast { dest, value, ty } => {
                let value = get(regs, *value)?.clone();
                self.check_upcast(&value, &ty.ty)?;
                regs.insert(*dest, value);
            }
            MirInst::Enum { dest, payload, .. } => {
                let value = match payload {
                    Some(payload) => RtValue::some(get(regs, *payload)?.clone()),
                    None => RtValue::None,
                };
                regs.insert(*dest, value);
            }
            MirInst::InitEnumDataAddr { dest, addr, .. } => {
                let addr = get_address(regs, *addr)?;
                let cell = self.cell_mut(addr)?;
                if *cell != Cell::Uninit {
                    return Err(InterpError::DoubleInitialization { slot: addr.slot });
                }
                *cell = Cell::Payload(Box::new(Cell::Uninit));
                regs.insert(
                    *dest,
                    RtValue::Address(Address {
                        slot: addr.slot,
                        depth: addr.depth + 1,
                    }),
                );
            }
            MirInst::InjectEnumAddr { addr, element } => {
                let addr = get_address(regs, *addr)?;
                let cell = self.cell_mut(addr)?;
                match (element.case, std::mem::replace(cell, Cell::Uninit)) {
                    (OptionalCase::Some, Cell::Payload(inner)) => match *inner {
                        Cell::Init(value) => *cell = Cell::Init(RtValue::some(value)),
                        other => {
                            *cell = Cell::Payload(Box::new(other));
                            return Err(InterpError::UninitializedRead { slot: addr.slot });
                        }
                    },
                    (OptionalCase::None, Cell::Uninit) => *cell = Cell::Init(RtValue::None),
                    (OptionalCase::Some, other) => {
                        *cell = other;
                        return Err(InterpError::NotAPayloadArea { slot: addr.slot });
                    }
                    (OptionalCase::None, other) => {
                        *cell = other;
                        return Err(InterpError::DoubleInitialization { slot: addr.slot });
                    }
                }
            }
            MirInst::UncheckedTakeEnumDataAddr { dest, addr, .. } => {
                let addr = get_address(regs, *addr)?;
                let cell = self.cell_mut(addr)?;
                match std::mem::replace(cell, Cell::Uninit) {
                    Cell::Init(RtValue::Some(payload)) => {
                        *cell = Cell::Payload(Box::new(Cell::Init(*payload)));
                    }
                    other => {
                        let found = match &other {
                            Cell::Init(value) => value.kind_name(),
                            Cell::Uninit | Cell::Payload(_) => "uninitialized memory",
                        };
                        *cell = other;
                        return Err(InterpError::TypeConfusion {
                            expected: "some",
                            found,
                        });
                    }
                }
                regs.insert(
                    *dest,
                    RtValue::Address(Address {
                        slot: addr.slot,
                        depth: addr.depth + 1,
                    }),
                );
            }
        }
        Ok(())
    }

    fn check_upcast(&self, value: &RtValue, target: &Type) -> Result<(), InterpError> {
        let (dynamic, target_class) = match (value, target) {
            (RtValue::Object(id), Type::Class(target_class)) => {
                let class = self
                    .class_of(*id)
                    .ok_or(InterpError::OverRelease { object: id.0 })?;
                (class.clone(), target_class)
            }
            // A metatype value carries the type it denotes, one layer below
            // its static type.
            (RtValue::Metatype(denoted), Type::Metatype { instance, .. }) => {
                let (class, target_class) = Type::class_conversion(denoted, instance).ok_or(
                    InterpError::TypeConfusion {
                        expected: "class metatype",
                        found: "metatype",
                    },
                )?;
                (class.clone(), target_class)
            }
            (other, _) => {
                return Err(InterpError::TypeConfusion {
                    expected: "class instance or class metatype",
                    found: other.kind_name(),
                });
            }
        };
        if !self.hierarchy.is_ancestor_or_self(target_class, &dynamic) {
            return Err(InterpError::BadUpcast {
                class: dynamic.to_string(),
                target: target_class.to_string(),
            });
        }
        Ok(())
    }
}

fn get(regs: &BTreeMap<MirValueId, RtValue>, value: MirValueId) -> Result<&RtValue, InterpError> {
    regs.get(&value)
        .ok_or(InterpError::UnboundValue { value: value.0 })
}

fn get_address(
    regs: &BTreeMap<MirValueId, RtValue>,
    value: MirValueId,
) -> Result<Address, InterpError> {
    match get(regs, value)? {
        RtValue::Address(addr) => Ok(*addr),
        other => Err(InterpError::TypeConfusion {
            expected: "address",
            found: other.kind_name(),
        }),
    }
}
