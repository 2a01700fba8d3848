use std::collections::BTreeMap;

use tern_types::{OptionalKind, Type};

use crate::{
    LoadQualifier, MirBlock, MirBlockId, MirFunction, MirInst, MirTerminator, MirType,
    MirValueId, OptionalElement,
};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MirBuildError {
    #[error("block `bb{block}` in `{function}` has no terminator")]
    UnterminatedBlock { function: String, block: u32 },
}

#[derive(Debug)]
struct PendingBlock {
    id: MirBlockId,
    params: Vec<MirValueId>,
    instructions: Vec<MirInst>,
    terminator: Option<MirTerminator>,
}

impl PendingBlock {
    fn new(id: MirBlockId) -> Self {
        Self {
            id,
            params: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

/// Appends instructions at the end of an insertion block.
///
/// The builder is the single mutable cursor over a function under
/// construction; lowering code receives it as `&mut MirBuilder`.
#[derive(Debug)]
pub struct MirBuilder {
    name: String,
    entry: MirBlockId,
    blocks: Vec<PendingBlock>,
    value_types: BTreeMap<MirValueId, MirType>,
    next_value: u32,
    next_block: u32,
    insertion: MirBlockId,
}

impl MirBuilder {
    /// Start a function with an empty entry block as insertion point.
    pub fn new(name: impl Into<String>) -> Self {
        let entry = MirBlockId(0);
        Self {
            name: name.into(),
            entry,
            blocks: vec![PendingBlock::new(entry)],
            value_types: BTreeMap::new(),
            next_value: 0,
            next_block: 1,
            insertion: entry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_block(&self) -> MirBlockId {
        self.entry
    }

    pub fn insertion_block(&self) -> MirBlockId {
        self.insertion
    }

    pub fn set_insertion_point(&mut self, block: MirBlockId) {
        assert!(
            self.block_index(block).is_some(),
            "{block} does not belong to `{}`",
            self.name
        );
        self.insertion = block;
    }

    /// Type of a value created by this builder.
    pub fn value_type(&self, value: MirValueId) -> &MirType {
        self.value_types
            .get(&value)
            .unwrap_or_else(|| panic!("{value} is not defined in `{}`", self.name))
    }

    pub fn is_terminated(&self, block: MirBlockId) -> bool {
        self.pending(block).terminator.is_some()
    }

    fn block_index(&self, block: MirBlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == block)
    }

    fn pending(&self, block: MirBlockId) -> &PendingBlock {
        let idx = self
            .block_index(block)
            .unwrap_or_else(|| panic!("{block} does not belong to `{}`", self.name));
        &self.blocks[idx]
    }

    fn pending_mut(&mut self, block: MirBlockId) -> &mut PendingBlock {
        let idx = self
            .block_index(block)
            .unwrap_or_else(|| panic!("{block} does not belong to `{}`", self.name));
        &mut self.blocks[idx]
    }

    fn fresh_value(&mut self, ty: MirType) -> MirValueId {
        let id = MirValueId(self.next_value);
        self.next_value += 1;
        self.value_types.insert(id, ty);
        id
    }

    fn fresh_block(&mut self) -> MirBlockId {
        let id = MirBlockId(self.next_block);
        self.next_block += 1;
        id
    }

    fn push(&mut self, inst: MirInst) {
        let insertion = self.insertion;
        let block = self.pending_mut(insertion);
        assert!(
            block.terminator.is_none(),
            "cannot append to terminated block {insertion}"
        );
        block.instructions.push(inst);
    }

    fn terminate(&mut self, terminator: MirTerminator) {
        let insertion = self.insertion;
        let block = self.pending_mut(insertion);
        assert!(
            block.terminator.is_none(),
            "{insertion} is already terminated"
        );
        block.terminator = Some(terminator);
    }

    // -- Blocks ------------------------------------------------------------

    /// Append a new empty block at the end of the layout.
    pub fn create_block(&mut self) -> MirBlockId {
        let id = self.fresh_block();
        self.blocks.push(PendingBlock::new(id));
        id
    }

    /// Create a new empty block laid out directly after the insertion block.
    ///
    /// Instructions are only ever appended, so nothing follows the insertion
    /// point and the split moves no instructions; the new block simply
    /// becomes the fallthrough position for code emitted after the current
    /// block is terminated.
    pub fn split_block_for_fallthrough(&mut self) -> MirBlockId {
        let id = self.fresh_block();
        let after = self
            .block_index(self.insertion)
            .map_or(self.blocks.len(), |idx| idx + 1);
        self.blocks.insert(after, PendingBlock::new(id));
        id
    }

    pub fn add_block_param(&mut self, block: MirBlockId, ty: MirType) -> MirValueId {
        let value = self.fresh_value(ty);
        self.pending_mut(block).params.push(value);
        value
    }

    pub fn add_entry_param(&mut self, ty: MirType) -> MirValueId {
        self.add_block_param(self.entry, ty)
    }

    // -- Memory ------------------------------------------------------------

    pub fn create_alloc_stack(&mut self, ty: Type) -> MirValueId {
        let dest = self.fresh_value(MirType::address(ty.clone()));
        self.push(MirInst::AllocStack { dest, ty });
        dest
    }

    pub fn create_dealloc_stack(&mut self, slot: MirValueId) {
        self.push(MirInst::DeallocStack { slot });
    }

    pub fn create_load(&mut self, src: MirValueId, qualifier: LoadQualifier) -> MirValueId {
        let ty = self.value_type(src).object_type();
        let dest = self.fresh_value(ty);
        self.push(MirInst::Load {
            dest,
            src,
            qualifier,
        });
        dest
    }

    pub fn create_store(&mut self, src: MirValueId, dest: MirValueId) {
        self.push(MirInst::Store { src, dest });
    }

    pub fn create_copy_addr(&mut self, src: MirValueId, dest: MirValueId, take: bool) {
        self.push(MirInst::CopyAddr { src, dest, take });
    }

    // -- Ownership ---------------------------------------------------------

    pub fn create_retain(&mut self, value: MirValueId) {
        self.push(MirInst::Retain { value });
    }

    pub fn create_release(&mut self, value: MirValueId) {
        self.push(MirInst::Release { value });
    }

    // -- Conversions and optionals -----------------------------------------

    pub fn create_upcast(&mut self, value: MirValueId, ty: MirType) -> MirValueId {
        let dest = self.fresh_value(ty.clone());
        self.push(MirInst::Upcast { dest, value, ty });
        dest
    }

    pub fn create_enum(
        &mut self,
        payload: Option<MirValueId>,
        element: OptionalElement,
        ty: MirType,
    ) -> MirValueId {
        let dest = self.fresh_value(ty.clone());
        self.push(MirInst::Enum {
            dest,
            element,
            payload,
            ty,
        });
        dest
    }

    pub fn create_init_enum_data_addr(
        &mut self,
        addr: MirValueId,
        element: OptionalElement,
        payload_ty: MirType,
    ) -> MirValueId {
        let dest = self.fresh_value(payload_ty);
        self.push(MirInst::InitEnumDataAddr {
            dest,
            addr,
            element,
        });
        dest
    }

    pub fn create_inject_enum_addr(&mut self, addr: MirValueId, element: OptionalElement) {
        self.push(MirInst::InjectEnumAddr { addr, element });
    }

    pub fn create_unchecked_take_enum_data_addr(
        &mut self,
        addr: MirValueId,
        element: OptionalElement,
        payload_ty: MirType,
    ) -> MirValueId {
        let dest = self.fresh_value(payload_ty);
        self.push(MirInst::UncheckedTakeEnumDataAddr {
            dest,
            addr,
            element,
        });
        dest
    }

    // -- Terminators -------------------------------------------------------

    pub fn create_jump(&mut self, target: MirBlockId, args: Vec<MirValueId>) {
        self.terminate(MirTerminator::Jump { target, args });
    }

    pub fn create_switch_enum(
        &mut self,
        operand: MirValueId,
        kind: OptionalKind,
        some: MirBlockId,
        none: MirBlockId,
    ) {
        self.terminate(MirTerminator::SwitchEnum {
            operand,
            kind,
            some,
            none,
        });
    }

    pub fn create_switch_enum_addr(
        &mut self,
        addr: MirValueId,
        kind: OptionalKind,
        some: MirBlockId,
        none: MirBlockId,
    ) {
        self.terminate(MirTerminator::SwitchEnumAddr {
            addr,
            kind,
            some,
            none,
        });
    }

    pub fn create_return(&mut self, value: Option<MirValueId>) {
        self.terminate(MirTerminator::Return { value });
    }

    pub fn create_unreachable(&mut self) {
        self.terminate(MirTerminator::Unreachable);
    }

    /// Seal the function. Every block must have been terminated.
    pub fn finish(self) -> Result<MirFunction, MirBuildError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in self.blocks {
            let Some(terminator) = block.terminator else {
                return Err(MirBuildError::UnterminatedBlock {
                    function: self.name,
                    block: block.id.0,
                });
            };
            blocks.push(MirBlock {
                id: block.id,
                params: block.params,
                instructions: block.instructions,
                terminator,
            });
        }
        Ok(MirFunction {
            name: self.name,
            entry: self.entry,
            blocks,
            value_types: self.value_types,
        })
    }
}
