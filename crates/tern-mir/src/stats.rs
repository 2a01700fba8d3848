use serde::Serialize;

use crate::{LoadQualifier, MirFunction, MirInst, MirTerminator};

/// Per-function instruction counts, serialized by the metrics tooling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MirFunctionStats {
    pub function: String,
    pub block_count: usize,
    pub block_param_count: usize,
    pub retain_count: usize,
    pub release_count: usize,
    pub load_copy_count: usize,
    pub load_take_count: usize,
    pub copy_addr_count: usize,
    pub alloc_stack_count: usize,
    pub upcast_count: usize,
    pub enum_count: usize,
    pub switch_count: usize,
}

impl MirFunctionStats {
    pub fn collect(function: &MirFunction) -> Self {
        let mut stats = MirFunctionStats {
            function: function.name.clone(),
            block_count: function.blocks.len(),
            ..MirFunctionStats::default()
        };

        for block in &function.blocks {
            stats.block_param_count += block.params.len();
            for inst in &block.instructions {
                match inst {
                    MirInst::Retain { .. } => stats.retain_count += 1,
                    MirInst::Release { .. } => stats.release_count += 1,
                    MirInst::Load { qualifier, .. } => match qualifier {
                        LoadQualifier::Copy => stats.load_copy_count += 1,
                        LoadQualifier::Take => stats.load_take_count += 1,
                        LoadQualifier::Trivial => {}
                    },
                    MirInst::CopyAddr { .. } => stats.copy_addr_count += 1,
                    MirInst::AllocStack { .. } => stats.alloc_stack_count += 1,
                    MirInst::Upcast { .. } => stats.upcast_count += 1,
                    MirInst::Enum { .. } | MirInst::InjectEnumAddr { .. } => {
                        stats.enum_count += 1
                    }
                    MirInst::DeallocStack { .. }
                    | MirInst::Store { .. }
                    | MirInst::InitEnumDataAddr { .. }
                    | MirInst::UncheckedTakeEnumDataAddr { .. } => {}
                }
            }
            if matches!(
                block.terminator,
                MirTerminator::SwitchEnum { .. } | MirTerminator::SwitchEnumAddr { .. }
            ) {
                stats.switch_count += 1;
            }
        }

        stats
    }

    /// Reference-count operations, including copying loads.
    pub fn ownership_op_count(&self) -> usize {
        self.retain_count + self.release_count + self.load_copy_count
    }
}
