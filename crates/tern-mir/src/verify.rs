//! Structural well-formedness checks for MIR functions.
//!
//! The verifier checks what the cast lowering must guarantee: terminated
//! blocks with known successors, values defined once and dominating their
//! uses, operand categories and types that agree with each instruction,
//! block arguments that match block parameters, and stack slots released in
//! LIFO order on every path.

use std::collections::{BTreeMap, BTreeSet};

use tern_types::{OptionalKind, Type};

use crate::{
    MirBlock, MirBlockId, MirFunction, MirInst, MirTerminator, MirType, MirValueId, OptionalCase,
    OptionalElement,
};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("`{function}`: entry block `bb{block}` is missing")]
    MissingEntry { function: String, block: u32 },
    #[error("`{function}`: block `bb{block}` appears more than once")]
    DuplicateBlock { function: String, block: u32 },
    #[error("`{function}`: `bb{from}` branches to unknown block `bb{to}`")]
    UnknownBlock { function: String, from: u32, to: u32 },
    #[error("`{function}`: `%{value}` is defined more than once")]
    DuplicateDefinition { function: String, value: u32 },
    #[error("`{function}`: `%{value}` has no recorded type")]
    MissingType { function: String, value: u32 },
    #[error("`{function}`: `%{value}` used in `bb{block}` is never defined")]
    UndefinedValue {
        function: String,
        block: u32,
        value: u32,
    },
    #[error("`{function}`: `%{value}` used in `bb{block}` does not dominate its use")]
    NotDominated {
        function: String,
        block: u32,
        value: u32,
    },
    #[error("`{function}`: `bb{from}` passes {actual} arguments to `bb{to}`, expected {expected}")]
    ArgumentCount {
        function: String,
        from: u32,
        to: u32,
        expected: usize,
        actual: usize,
    },
    #[error("`{function}` in `bb{block}`: {detail}")]
    Malformed {
        function: String,
        block: u32,
        detail: String,
    },
    #[error("`{function}` in `bb{block}`: stack discipline violated: {detail}")]
    StackDiscipline {
        function: String,
        block: u32,
        detail: String,
    },
}

/// Check `func` for structural well-formedness.
pub fn verify_function(func: &MirFunction) -> Result<(), VerifyError> {
    let verifier = Verifier::new(func)?;
    for block in &func.blocks {
        verifier.check_block(block)?;
    }
    verifier.check_dominance()?;
    verifier.check_stack_discipline()
}

#[derive(Debug, Clone, Copy)]
struct Definition {
    block: MirBlockId,
    /// `None` for block parameters.
    index: Option<usize>,
}

struct Verifier<'a> {
    func: &'a MirFunction,
    blocks: BTreeMap<MirBlockId, &'a MirBlock>,
    definitions: BTreeMap<MirValueId, Definition>,
    stack_slots: BTreeSet<MirValueId>,
}

impl<'a> Verifier<'a> {
    fn new(func: &'a MirFunction) -> Result<Self, VerifyError> {
        let mut blocks = BTreeMap::new();
        for block in &func.blocks {
            if blocks.insert(block.id, block).is_some() {
                return Err(VerifyError::DuplicateBlock {
                    function: func.name.clone(),
                    block: block.id.0,
                });
            }
        }
        if !blocks.contains_key(&func.entry) {
            return Err(VerifyError::MissingEntry {
                function: func.name.clone(),
                block: func.entry.0,
            });
        }

        let mut verifier = Self {
            func,
            blocks,
            definitions: BTreeMap::new(),
            stack_slots: BTreeSet::new(),
        };
        for block in &func.blocks {
            for param in &block.params {
                verifier.define(*param, block.id, None)?;
            }
            for (index, inst) in block.instructions.iter().enumerate() {
                if let Some(dest) = inst.defined_value() {
                    verifier.define(dest, block.id, Some(index))?;
                }
                if let MirInst::AllocStack { dest, .. } = inst {
                    verifier.stack_slots.insert(*dest);
                }
            }
            for succ in block.terminator.successors() {
                if !verifier.blocks.contains_key(&succ) {
                    return Err(VerifyError::UnknownBlock {
                        function: func.name.clone(),
                        from: block.id.0,
                        to: succ.0,
                    });
                }
            }
        }
        Ok(verifier)
    }

    fn define(
        &mut self,
        value: MirValueId,
        block: MirBlockId,
        index: Option<usize>,
    ) -> Result<(), VerifyError> {
        if !self.func.value_types.contains_key(&value) {
            return Err(VerifyError::MissingType {
                function: self.func.name.clone(),
                value: value.0,
            });
        }
        if self
            .definitions
            .insert(value, Definition { block, index })
            .is_some()
        {
            return Err(VerifyError::DuplicateDefinition {
                function: self.func.name.clone(),
                value: value.0,
            });
        }
        Ok(())
    }

    fn malformed(&self, block: MirBlockId, detail: impl Into<String>) -> VerifyError {
        VerifyError::Malformed {
            function: self.func.name.clone(),
            block: block.0,
            detail: detail.into(),
        }
    }

    fn type_of(&self, block: MirBlockId, value: MirValueId) -> Result<&'a MirType, VerifyError> {
        if !self.definitions.contains_key(&value) {
            return Err(VerifyError::UndefinedValue {
                function: self.func.name.clone(),
                block: block.0,
                value: value.0,
            });
        }
        self.func
            .value_type(value)
            .ok_or_else(|| VerifyError::MissingType {
                function: self.func.name.clone(),
                value: value.0,
            })
    }

    fn expect_object(&self, block: MirBlockId, value: MirValueId) -> Result<&'a Type, VerifyError> {
        let ty = self.type_of(block, value)?;
        if ty.is_address() {
            return Err(self.malformed(block, format!("{value} must be an object, found {ty}")));
        }
        Ok(&ty.ty)
    }

    fn expect_address(
        &self,
        block: MirBlockId,
        value: MirValueId,
    ) -> Result<&'a Type, VerifyError> {
        let ty = self.type_of(block, value)?;
        if !ty.is_address() {
            return Err(self.malformed(block, format!("{value} must be an address, found {ty}")));
        }
        Ok(&ty.ty)
    }

    fn expect_same(
        &self,
        block: MirBlockId,
        what: &str,
        expected: &Type,
        actual: &Type,
    ) -> Result<(), VerifyError> {
        if expected != actual {
            return Err(self.malformed(
                block,
                format!("{what}: expected `{expected}`, found `{actual}`"),
            ));
        }
        Ok(())
    }

    /// Payload type of an optional of the given flavour.
    fn optional_payload<'t>(
        &self,
        block: MirBlockId,
        ty: &'t Type,
        kind: OptionalKind,
    ) -> Result<&'t Type, VerifyError> {
        match ty.optional_object_with_kind() {
            Some((actual, object)) if actual == kind => Ok(object),
            Some((actual, _)) => Err(self.malformed(
                block,
                format!(
                    "optional flavour mismatch: `{ty}` is {}, case names {}",
                    actual.as_str(),
                    kind.as_str()
                ),
            )),
            None => Err(self.malformed(block, format!("`{ty}` is not an optional"))),
        }
    }

    fn expect_some_case(
        &self,
        block: MirBlockId,
        element: OptionalElement,
    ) -> Result<(), VerifyError> {
        if element.case != OptionalCase::Some {
            return Err(self.malformed(block, format!("{element} has no payload")));
        }
        Ok(())
    }

    fn check_block(&self, block: &MirBlock) -> Result<(), VerifyError> {
        let id = block.id;
        for inst in &block.instructions {
            self.check_inst(id, inst)?;
        }
        self.check_terminator(id, &block.terminator)
    }

    fn check_inst(&self, block: MirBlockId, inst: &MirInst) -> Result<(), VerifyError> {
        match inst {
            MirInst::AllocStack { dest, ty } => {
                let dest_ty = self.expect_address(block, *dest)?;
                self.expect_same(block, "alloc_stack result", ty, dest_ty)
            }
            MirInst::DeallocStack { slot } => {
                self.expect_address(block, *slot)?;
                if !self.stack_slots.contains(slot) {
                    return Err(self.malformed(
                        block,
                        format!("dealloc_stack of {slot}, which is not a stack slot"),
                    ));
                }
                Ok(())
            }
            MirInst::Load { dest, src, .. } => {
                let src_ty = self.expect_address(block, *src)?;
                let dest_ty = self.expect_object(block, *dest)?;
                self.expect_same(block, "load result", src_ty, dest_ty)
            }
            MirInst::Store { src, dest } => {
                let src_ty = self.expect_object(block, *src)?;
                let dest_ty = self.expect_address(block, *dest)?;
                self.expect_same(block, "store destination", src_ty, dest_ty)
            }
            MirInst::CopyAddr { src, dest, .. } => {
                let src_ty = self.expect_address(block, *src)?;
                let dest_ty = self.expect_address(block, *dest)?;
                self.expect_same(block, "copy_addr destination", src_ty, dest_ty)
            }
            MirInst::Retain { value } | MirInst::Release { value } => {
                self.expect_object(block, *value).map(|_| ())
            }
            MirInst::Upcast { dest, value, ty } => {
                let from = self.expect_object(block, *value)?;
                let to = self.expect_object(block, *dest)?;
                self.expect_same(block, "upcast result", &ty.ty, to)?;
                if ty.is_address() {
                    return Err(self.malformed(block, "upcast to an address type"));
                }
                if Type::class_conversion(from, to).is_none() {
                    return Err(self.malformed(
                        block,
                        format!("upcast from `{from}` to `{to}` is not a class conversion"),
                    ));
                }
                Ok(())
            }
            MirInst::Enum {
                dest,
                element,
                payload,
                ty,
            } => {
                let dest_ty = self.expect_object(block, *dest)?;
                self.expect_same(block, "enum result", &ty.ty, dest_ty)?;
                let object = self.optional_payload(block, dest_ty, element.kind)?;
                match (element.case, payload) {
                    (OptionalCase::Some, Some(payload)) => {
                        let payload_ty = self.expect_object(block, *payload)?;
                        self.expect_same(block, "enum payload", object, payload_ty)
                    }
                    (OptionalCase::None, None) => Ok(()),
                    (OptionalCase::Some, None) => {
                        Err(self.malformed(block, format!("{element} requires a payload")))
                    }
                    (OptionalCase::None, Some(_)) => {
                        Err(self.malformed(block, format!("{element} takes no payload")))
                    }
                }
            }
            MirInst::InitEnumDataAddr {
                dest,
                addr,
                element,
            }
            | MirInst::UncheckedTakeEnumDataAddr {
                dest,
                addr,
                element,
            } => {
                self.expect_some_case(block, *element)?;
                let addr_ty = self.expect_address(block, *addr)?;
                let object = self.optional_payload(block, addr_ty, element.kind)?;
                let dest_ty = self.expect_address(block, *dest)?;
                self.expect_same(block, "enum data address", object, dest_ty)
            }
            MirInst::InjectEnumAddr { addr, element } => {
                let addr_ty = self.expect_address(block, *addr)?;
                self.optional_payload(block, addr_ty, element.kind)
                    .map(|_| ())
            }
        }
    }

    fn check_arguments(
        &self,
        from: MirBlockId,
        to: MirBlockId,
        args: &[&MirType],
    ) -> Result<(), VerifyError> {
        let target = self.blocks[&to];
        if target.params.len() != args.len() {
            return Err(VerifyError::ArgumentCount {
                function: self.func.name.clone(),
                from: from.0,
                to: to.0,
                expected: target.params.len(),
                actual: args.len(),
            });
        }
        for (param, arg_ty) in target.params.iter().zip(args) {
            let param_ty = self.type_of(to, *param)?;
            if param_ty != *arg_ty {
                return Err(self.malformed(
                    from,
                    format!("argument of type {arg_ty} passed to {param} of type {param_ty}"),
                ));
            }
        }
        Ok(())
    }

    fn check_terminator(&self, block: MirBlockId, term: &MirTerminator) -> Result<(), VerifyError> {
        match term {
            MirTerminator::Jump { target, args } => {
                let arg_types = args
                    .iter()
                    .map(|arg| self.type_of(block, *arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.check_arguments(block, *target, &arg_types)
            }
            MirTerminator::SwitchEnum {
                operand,
                kind,
                some,
                none,
            } => {
                let operand_ty = self.expect_object(block, *operand)?;
                let payload = MirType::object(self.optional_payload(block, operand_ty, *kind)?.clone());
                self.check_arguments(block, *some, &[&payload])?;
                self.check_arguments(block, *none, &[])
            }
            MirTerminator::SwitchEnumAddr {
                addr,
                kind,
                some,
                none,
            } => {
                let addr_ty = self.expect_address(block, *addr)?;
                self.optional_payload(block, addr_ty, *kind)?;
                self.check_arguments(block, *some, &[])?;
                self.check_arguments(block, *none, &[])
            }
            MirTerminator::Return { value } => {
                if let Some(value) = value {
                    self.type_of(block, *value)?;
                }
                Ok(())
            }
            MirTerminator::Unreachable => Ok(()),
        }
    }

    fn predecessors(&self) -> BTreeMap<MirBlockId, Vec<MirBlockId>> {
        let mut preds: BTreeMap<MirBlockId, Vec<MirBlockId>> = BTreeMap::new();
        for block in &self.func.blocks {
            for succ in block.terminator.successors() {
                preds.entry(succ).or_default().push(block.id);
            }
        }
        preds
    }

    fn reachable(&self) -> BTreeSet<MirBlockId> {
        let mut seen = BTreeSet::new();
        let mut worklist = vec![self.func.entry];
        while let Some(block) = worklist.pop() {
            if !seen.insert(block) {
                continue;
            }
            worklist.extend(self.blocks[&block].terminator.successors());
        }
        seen
    }

    /// Iterative dominator sets over reachable blocks.
    fn dominators(&self) -> BTreeMap<MirBlockId, BTreeSet<MirBlockId>> {
        let reachable = self.reachable();
        let preds = self.predecessors();
        let mut doms: BTreeMap<MirBlockId, BTreeSet<MirBlockId>> = reachable
            .iter()
            .map(|block| {
                let init = if *block == self.func.entry {
                    BTreeSet::from([*block])
                } else {
                    reachable.clone()
                };
                (*block, init)
            })
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for block in &reachable {
                if *block == self.func.entry {
                    continue;
                }
                let mut new_set: Option<BTreeSet<MirBlockId>> = None;
                for pred in preds.get(block).into_iter().flatten() {
                    let Some(pred_doms) = doms.get(pred) else {
                        continue;
                    };
                    new_set = Some(match new_set {
                        None => pred_doms.clone(),
                        Some(acc) => acc.intersection(pred_doms).copied().collect(),
                    });
                }
                let mut new_set = new_set.unwrap_or_default();
                new_set.insert(*block);
                if doms[block] != new_set {
                    doms.insert(*block, new_set);
                    changed = true;
                }
            }
        }
        doms
    }

    fn check_use(
        &self,
        doms: &BTreeMap<MirBlockId, BTreeSet<MirBlockId>>,
        block: MirBlockId,
        position: usize,
        value: MirValueId,
    ) -> Result<(), VerifyError> {
        let Some(def) = self.definitions.get(&value) else {
            return Err(VerifyError::UndefinedValue {
                function: self.func.name.clone(),
                block: block.0,
                value: value.0,
            });
        };
        let dominated = if def.block == block {
            def.index.is_none_or(|index| index < position)
        } else {
            doms.get(&block)
                .is_some_and(|block_doms| block_doms.contains(&def.block))
        };
        if !dominated {
            return Err(VerifyError::NotDominated {
                function: self.func.name.clone(),
                block: block.0,
                value: value.0,
            });
        }
        Ok(())
    }

    fn check_dominance(&self) -> Result<(), VerifyError> {
        let doms = self.dominators();
        for block in &self.func.blocks {
            if !doms.contains_key(&block.id) {
                continue;
            }
            for (position, inst) in block.instructions.iter().enumerate() {
                for operand in inst.operands() {
                    self.check_use(&doms, block.id, position, operand)?;
                }
            }
            let end = block.instructions.len();
            for operand in block.terminator.operands() {
                self.check_use(&doms, block.id, end, operand)?;
            }
        }
        Ok(())
    }

    fn check_stack_discipline(&self) -> Result<(), VerifyError> {
        let stack_error = |block: MirBlockId, detail: String| VerifyError::StackDiscipline {
            function: self.func.name.clone(),
            block: block.0,
            detail,
        };

        let mut states: BTreeMap<MirBlockId, Vec<MirValueId>> =
            BTreeMap::from([(self.func.entry, Vec::new())]);
        let mut worklist = vec![self.func.entry];
        while let Some(id) = worklist.pop() {
            let block = self.blocks[&id];
            let mut stack = states[&id].clone();
            for inst in &block.instructions {
                match inst {
                    MirInst::AllocStack { dest, .. } => stack.push(*dest),
                    MirInst::DeallocStack { slot } => {
                        if stack.last() != Some(slot) {
                            return Err(stack_error(
                                id,
                                format!(
                                    "dealloc_stack {slot} but the innermost live slot is {}",
                                    stack
                                        .last()
                                        .map_or_else(|| "none".to_string(), ToString::to_string)
                                ),
                            ));
                        }
                        stack.pop();
                    }
                    _ => {}
                }
            }
            if matches!(block.terminator, MirTerminator::Return { .. }) && !stack.is_empty() {
                return Err(stack_error(
                    id,
                    format!("return with {} live stack slot(s)", stack.len()),
                ));
            }
            for succ in block.terminator.successors() {
                match states.get(&succ) {
                    Some(existing) if *existing != stack => {
                        return Err(stack_error(
                            succ,
                            "predecessors reach this block with different live stack slots"
                                .to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => {
                        states.insert(succ, stack.clone());
                        worklist.push(succ);
                    }
                }
            }
        }
        Ok(())
    }
}
