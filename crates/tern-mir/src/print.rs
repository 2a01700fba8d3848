//! Textual MIR, used by snapshot tests and debugging output.

use std::fmt;

use crate::{LoadQualifier, MirBlock, MirFunction, MirInst, MirTerminator, MirValueId, OptionalElement};

struct Typed<'a> {
    func: &'a MirFunction,
    value: MirValueId,
}

impl fmt::Display for Typed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.func.value_type(self.value) {
            Some(ty) => write!(f, "{} : {ty}", self.value),
            None => write!(f, "{} : <?>", self.value),
        }
    }
}

impl MirFunction {
    fn typed(&self, value: MirValueId) -> Typed<'_> {
        Typed { func: self, value }
    }

    fn write_block(&self, f: &mut fmt::Formatter<'_>, block: &MirBlock) -> fmt::Result {
        write!(f, "{}", block.id)?;
        if !block.params.is_empty() {
            write!(f, "(")?;
            for (i, param) in block.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", self.typed(*param))?;
            }
            write!(f, ")")?;
        }
        writeln!(f, ":")?;
        for inst in &block.instructions {
            write!(f, "  ")?;
            self.write_inst(f, inst)?;
            writeln!(f)?;
        }
        write!(f, "  ")?;
        self.write_terminator(f, &block.terminator)?;
        writeln!(f)
    }

    fn write_inst(&self, f: &mut fmt::Formatter<'_>, inst: &MirInst) -> fmt::Result {
        match inst {
            MirInst::AllocStack { dest, ty } => write!(f, "{dest} = alloc_stack ${ty}"),
            MirInst::DeallocStack { slot } => write!(f, "dealloc_stack {}", self.typed(*slot)),
            MirInst::Load {
                dest,
                src,
                qualifier,
            } => {
                let qualifier = match qualifier {
                    LoadQualifier::Take => "take",
                    LoadQualifier::Copy => "copy",
                    LoadQualifier::Trivial => "trivial",
                };
                write!(f, "{dest} = load [{qualifier}] {}", self.typed(*src))
            }
            MirInst::Store { src, dest } => {
                write!(f, "store {src} to [init] {}", self.typed(*dest))
            }
            MirInst::CopyAddr { src, dest, take } => {
                let take = if *take { "[take] " } else { "" };
                write!(f, "copy_addr {take}{src} to [init] {}", self.typed(*dest))
            }
            MirInst::Retain { value } => write!(f, "retain_value {}", self.typed(*value)),
            MirInst::Release { value } => write!(f, "release_value {}", self.typed(*value)),
            MirInst::Upcast { dest, value, ty } => {
                write!(f, "{dest} = upcast {} to {ty}", self.typed(*value))
            }
            MirInst::Enum {
                dest,
                element,
                payload,
                ty,
            } => {
                write!(f, "{dest} = enum {ty}, {element}")?;
                if let Some(payload) = payload {
                    write!(f, ", {}", self.typed(*payload))?;
                }
                Ok(())
            }
            MirInst::InitEnumDataAddr {
                dest,
                addr,
                element,
            } => self.write_projection(f, *dest, "init_enum_data_addr", *addr, *element),
            MirInst::InjectEnumAddr { addr, element } => {
                write!(f, "inject_enum_addr {}, {element}", self.typed(*addr))
            }
            MirInst::UncheckedTakeEnumDataAddr {
                dest,
                addr,
                element,
            } => self.write_projection(f, *dest, "unchecked_take_enum_data_addr", *addr, *element),
        }
    }

    fn write_projection(
        &self,
        f: &mut fmt::Formatter<'_>,
        dest: MirValueId,
        opcode: &str,
        addr: MirValueId,
        element: OptionalElement,
    ) -> fmt::Result {
        write!(f, "{dest} = {opcode} {}, {element}", self.typed(addr))
    }

    fn write_terminator(&self, f: &mut fmt::Formatter<'_>, term: &MirTerminator) -> fmt::Result {
        match term {
            MirTerminator::Jump { target, args } => {
                write!(f, "br {target}")?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            MirTerminator::SwitchEnum {
                operand,
                kind,
                some,
                none,
            } => write!(
                f,
                "switch_enum {}, case {}: {some}, case {}: {none}",
                self.typed(*operand),
                OptionalElement::some(*kind),
                OptionalElement::none(*kind),
            ),
            MirTerminator::SwitchEnumAddr {
                addr,
                kind,
                some,
                none,
            } => write!(
                f,
                "switch_enum_addr {}, case {}: {some}, case {}: {none}",
                self.typed(*addr),
                OptionalElement::some(*kind),
                OptionalElement::none(*kind),
            ),
            MirTerminator::Return { value: Some(value) } => {
                write!(f, "return {}", self.typed(*value))
            }
            MirTerminator::Return { value: None } => write!(f, "return"),
            MirTerminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

impl fmt::Display for MirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "fn {} {{", self.name)?;
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            self.write_block(f, block)?;
        }
        write!(f, "}}")
    }
}
