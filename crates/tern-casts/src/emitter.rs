//! Lowering of casts already proven to succeed.
//!
//! The emitter only ever produces upcasts, same-type copies and moves, and
//! optional wrapping/unwrapping. It never emits a runtime check: callers
//! must have classified the outer pair as [`CastFeasibility::WillSucceed`].
//! Contract violations are compiler defects and panic.

use tern_mir::{MirBlockId, MirBuilder, MirType, MirValueId, OptionalElement, TypeLowering};
use tern_types::{OptionalKind, SubtypeQuery, Type};
use tracing::{debug, trace};

use crate::{CastFeasibility, CastLoweringConfig, CastLoweringError, classify_dynamic_cast};

/// Who owns the source value of an indirect cast once the cast is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastConsumptionKind {
    /// The source is consumed whatever happens.
    TakeAlways,
    /// The source is consumed only if the cast succeeds. For casts that
    /// cannot fail this is the same as `TakeAlways`.
    TakeOnSuccess,
    /// The source is left untouched; the destination gets a copy.
    CopyOnSuccess,
}

impl CastConsumptionKind {
    pub fn should_take(self) -> bool {
        self != CastConsumptionKind::CopyOnSuccess
    }
}

/// A value on its way through the cast.
///
/// Neither `Clone` nor `Copy`; every step that consumes a source takes it
/// by value.
#[derive(Debug)]
struct Source {
    value: MirValueId,
    formal_type: Type,
    lowered: MirType,
    consumption: CastConsumptionKind,
}

impl Source {
    fn new(
        value: MirValueId,
        formal_type: Type,
        lowered: MirType,
        consumption: CastConsumptionKind,
    ) -> Self {
        Self {
            value,
            formal_type,
            lowered,
            consumption,
        }
    }

    fn is_address(&self) -> bool {
        self.lowered.is_address()
    }

    fn should_take(&self) -> bool {
        self.consumption.should_take()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Place {
    /// Write the result into this uninitialized memory.
    Address(MirValueId),
    /// Produce the result as a register value.
    Register,
}

/// Where a cast result goes.
#[derive(Debug, Clone)]
struct Target {
    place: Place,
    lowered_type: MirType,
    formal_type: Type,
}

impl Target {
    fn address(address: MirValueId, lowered_type: MirType, formal_type: Type) -> Self {
        assert!(
            lowered_type.is_address(),
            "address target for `{formal_type}` has object type {lowered_type}"
        );
        Self {
            place: Place::Address(address),
            lowered_type,
            formal_type,
        }
    }

    fn register(lowered_type: MirType, formal_type: Type) -> Self {
        assert!(
            !lowered_type.is_address(),
            "register target for `{formal_type}` has address type {lowered_type}"
        );
        Self {
            place: Place::Register,
            lowered_type,
            formal_type,
        }
    }

    fn is_address(&self) -> bool {
        matches!(self.place, Place::Address(_))
    }

    fn optional_kind(&self) -> OptionalKind {
        match self.formal_type.optional_object_with_kind() {
            Some((kind, _)) => kind,
            None => panic!(
                "emitting an optional case into non-optional type `{}`",
                self.formal_type
            ),
        }
    }

    fn as_address_source(&self) -> Source {
        let Place::Address(address) = self.place else {
            panic!("`{}` is not an address target", self.formal_type);
        };
        Source::new(
            address,
            self.formal_type.clone(),
            self.lowered_type.clone(),
            CastConsumptionKind::TakeAlways,
        )
    }

    fn as_scalar_source(&self, value: MirValueId) -> Source {
        assert!(
            !self.is_address(),
            "`{}` is not a register target",
            self.formal_type
        );
        Source::new(
            value,
            self.formal_type.clone(),
            self.lowered_type.clone(),
            CastConsumptionKind::TakeAlways,
        )
    }
}

/// Lowers successful casts into MIR.
///
/// Holds the read-only services lowering needs; the builder is passed to
/// each call.
pub struct CastLowering<'a> {
    hierarchy: &'a dyn SubtypeQuery,
    lowering: &'a dyn TypeLowering,
    config: CastLoweringConfig,
}

impl<'a> CastLowering<'a> {
    pub fn new(hierarchy: &'a dyn SubtypeQuery, lowering: &'a dyn TypeLowering) -> Self {
        Self::with_config(hierarchy, lowering, CastLoweringConfig::default())
    }

    pub fn with_config(
        hierarchy: &'a dyn SubtypeQuery,
        lowering: &'a dyn TypeLowering,
        config: CastLoweringConfig,
    ) -> Self {
        Self {
            hierarchy,
            lowering,
            config,
        }
    }

    pub fn config(&self) -> &CastLoweringConfig {
        &self.config
    }

    pub fn classify(&self, source: &Type, target: &Type) -> CastFeasibility {
        classify_dynamic_cast(self.hierarchy, source, target)
    }

    fn check_feasibility(&self, source: &Type, target: &Type) {
        if self.config.assert_feasibility {
            let feasibility = self.classify(source, target);
            assert_eq!(
                feasibility,
                CastFeasibility::WillSucceed,
                "unconditional cast from `{source}` to `{target}` {feasibility}"
            );
        }
    }

    /// Cast a register value. The result has type `lowered_target_type` and
    /// is owned by the caller; `value` is consumed.
    pub fn emit_successful_scalar_cast(
        &self,
        builder: &mut MirBuilder,
        value: MirValueId,
        source_type: &Type,
        lowered_target_type: MirType,
        target_type: &Type,
    ) -> MirValueId {
        self.check_feasibility(source_type, target_type);
        debug!(
            function = builder.name(),
            source = %source_type,
            target = %target_type,
            "emitting successful scalar cast"
        );

        if source_type == target_type {
            return value;
        }

        let lowered_source = builder.value_type(value).clone();
        assert!(
            !lowered_source.is_address(),
            "scalar cast source {value} has address type {lowered_source}"
        );
        let source = Source::new(
            value,
            source_type.clone(),
            lowered_source,
            CastConsumptionKind::TakeAlways,
        );
        let target = Target::register(lowered_target_type.clone(), target_type.clone());
        let result = CastEmitter::new(builder, self.lowering).emit_top_level(source, &target);

        assert!(!result.is_address());
        assert_eq!(result.lowered, lowered_target_type);
        assert_eq!(result.consumption, CastConsumptionKind::TakeAlways);
        result.value
    }

    /// Cast the value in memory at `src` into uninitialized memory at
    /// `dest`. Afterwards `dest` is initialized and owned by the caller;
    /// `src` is consumed unless `consumption` is
    /// [`CastConsumptionKind::CopyOnSuccess`].
    pub fn emit_successful_indirect_cast(
        &self,
        builder: &mut MirBuilder,
        consumption: CastConsumptionKind,
        src: MirValueId,
        source_type: &Type,
        dest: MirValueId,
        target_type: &Type,
    ) {
        self.check_feasibility(source_type, target_type);
        debug!(
            function = builder.name(),
            source = %source_type,
            target = %target_type,
            ?consumption,
            "emitting successful indirect cast"
        );

        let lowered_source = builder.value_type(src).clone();
        let lowered_dest = builder.value_type(dest).clone();
        assert!(
            lowered_source.is_address(),
            "indirect cast source {src} has object type {lowered_source}"
        );

        let source = Source::new(src, source_type.clone(), lowered_source, consumption);
        let target = Target::address(dest, lowered_dest, target_type.clone());
        let result = CastEmitter::new(builder, self.lowering).emit_top_level(source, &target);

        assert!(result.is_address());
        assert_eq!(result.value, dest);
        assert_eq!(result.consumption, CastConsumptionKind::TakeAlways);
    }

    /// Classify first and emit only if the cast is proven to succeed.
    /// Nothing is emitted on error.
    pub fn try_emit_scalar_cast(
        &self,
        builder: &mut MirBuilder,
        value: MirValueId,
        source_type: &Type,
        lowered_target_type: MirType,
        target_type: &Type,
    ) -> Result<MirValueId, CastLoweringError> {
        self.prove(source_type, target_type)?;
        Ok(self.emit_successful_scalar_cast(
            builder,
            value,
            source_type,
            lowered_target_type,
            target_type,
        ))
    }

    /// Indirect counterpart of [`CastLowering::try_emit_scalar_cast`].
    pub fn try_emit_indirect_cast(
        &self,
        builder: &mut MirBuilder,
        consumption: CastConsumptionKind,
        src: MirValueId,
        source_type: &Type,
        dest: MirValueId,
        target_type: &Type,
    ) -> Result<(), CastLoweringError> {
        self.prove(source_type, target_type)?;
        self.emit_successful_indirect_cast(
            builder,
            consumption,
            src,
            source_type,
            dest,
            target_type,
        );
        Ok(())
    }

    fn prove(&self, source: &Type, target: &Type) -> Result<(), CastLoweringError> {
        match self.classify(source, target) {
            CastFeasibility::WillSucceed => Ok(()),
            feasibility => Err(CastLoweringError::NotProvable {
                from: source.clone(),
                to: target.clone(),
                feasibility,
            }),
        }
    }
}

struct CastEmitter<'b> {
    builder: &'b mut MirBuilder,
    lowering: &'b dyn TypeLowering,
}

impl<'b> CastEmitter<'b> {
    fn new(builder: &'b mut MirBuilder, lowering: &'b dyn TypeLowering) -> Self {
        Self { builder, lowering }
    }

    fn emit_top_level(&mut self, source: Source, target: &Target) -> Source {
        let source_depth = source.formal_type.optional_depth();
        let target_depth = target.formal_type.optional_depth();
        assert!(
            source_depth <= target_depth,
            "successful cast from `{}` to `{}` cannot remove optional layers",
            source.formal_type,
            target.formal_type
        );
        self.emit_and_inject_into_optionals(source, target, target_depth - source_depth)
    }

    /// A +1 register value for `source`.
    fn get_owned_scalar(&mut self, source: Source) -> MirValueId {
        assert!(!source.is_address(), "{} is an address", source.value);
        if !source.should_take() {
            self.lowering.emit_retain_value(self.builder, source.value);
        }
        source.value
    }

    fn put_owned_scalar(&mut self, scalar: MirValueId, target: &Target) -> Source {
        assert_eq!(
            self.builder.value_type(scalar),
            &target.lowered_type.object_type(),
            "result does not match the target representation"
        );
        match target.place {
            Place::Register => target.as_scalar_source(scalar),
            Place::Address(address) => {
                self.lowering
                    .emit_store_of_copy(self.builder, scalar, address);
                target.as_address_source()
            }
        }
    }

    fn emit_same_type(&mut self, source: Source, target: &Target) -> Source {
        assert_eq!(source.formal_type, target.formal_type);
        match (source.is_address(), target.place) {
            (false, Place::Register) => {
                let value = self.get_owned_scalar(source);
                target.as_scalar_source(value)
            }
            (false, Place::Address(_)) => {
                let value = self.get_owned_scalar(source);
                self.put_owned_scalar(value, target)
            }
            (true, Place::Register) => {
                let value =
                    self.lowering
                        .emit_load_of_copy(self.builder, source.value, source.should_take());
                target.as_scalar_source(value)
            }
            (true, Place::Address(address)) => {
                self.lowering.emit_copy_into(
                    self.builder,
                    source.value,
                    address,
                    source.should_take(),
                );
                target.as_address_source()
            }
        }
    }

    fn emit(&mut self, source: Source, target: &Target) -> Source {
        if source.formal_type == target.formal_type {
            return self.emit_same_type(source, target);
        }

        if let Some((kind, object)) = source.formal_type.optional_object_with_kind() {
            let object = object.clone();
            return self.emit_optional_to_optional(source, kind, object, target);
        }
        assert!(
            target.formal_type.optional_object().is_none(),
            "non-optional `{}` cast to optional `{}` at equal depth",
            source.formal_type,
            target.formal_type
        );

        // Only upcasts remain.
        let value = if source.is_address() {
            self.lowering
                .emit_load_of_copy(self.builder, source.value, source.should_take())
        } else {
            self.get_owned_scalar(source)
        };
        let value = self
            .builder
            .create_upcast(value, target.lowered_type.object_type());
        self.put_owned_scalar(value, target)
    }

    fn emit_and_inject_into_optionals(
        &mut self,
        source: Source,
        target: &Target,
        depth: usize,
    ) -> Source {
        if depth == 0 {
            return self.emit(source, target);
        }

        trace!(target_type = %target.formal_type, depth, "injecting into optional layer");
        let (object_target, some) = self.prepare_for_emit_some(target);
        let object_source = self.emit_and_inject_into_optionals(source, &object_target, depth - 1);
        self.emit_some(object_source, target, some)
    }

    fn emit_optional_to_optional(
        &mut self,
        source: Source,
        source_kind: OptionalKind,
        source_object: Type,
        target: &Target,
    ) -> Source {
        let cont = self.builder.split_block_for_fallthrough();
        let none = self.builder.split_block_for_fallthrough();
        let some = self.builder.split_block_for_fallthrough();
        trace!(
            source_type = %source.formal_type,
            target_type = %target.formal_type,
            %some,
            %none,
            %cont,
            "dispatching on optional"
        );

        let Source {
            value,
            formal_type: _,
            lowered,
            consumption,
        } = source;
        let is_address = lowered.is_address();
        if is_address {
            self.builder
                .create_switch_enum_addr(value, source_kind, some, none);
        } else {
            self.builder.create_switch_enum(value, source_kind, some, none);
        }

        // Some: unwrap, convert the payload, rewrap.
        self.builder.set_insertion_point(some);
        {
            let source_some = OptionalElement::some(source_kind);
            let lowered_object = lowered
                .optional_payload()
                .unwrap_or_else(|| panic!("{value} of type {lowered} is not an optional"));
            let (object_target, target_some) = self.prepare_for_emit_some(target);

            let mut source_temp = None;
            let object_source = if is_address {
                let mut address = value;
                if !consumption.should_take() {
                    let temp = self.builder.create_alloc_stack(lowered.ty.clone());
                    self.builder.create_copy_addr(value, temp, false);
                    source_temp = Some(temp);
                    address = temp;
                }
                let payload = self.builder.create_unchecked_take_enum_data_addr(
                    address,
                    source_some,
                    lowered_object.clone(),
                );
                Source::new(
                    payload,
                    source_object,
                    lowered_object,
                    CastConsumptionKind::TakeAlways,
                )
            } else {
                let payload = self.builder.add_block_param(some, lowered_object.clone());
                Source::new(payload, source_object, lowered_object, consumption)
            };

            let result_object = self.emit(object_source, &object_target);
            if let Some(temp) = source_temp {
                self.builder.create_dealloc_stack(temp);
            }
            let result = self.emit_some(result_object, target, target_some);
            self.branch_to_join(result, target, cont);
        }

        // None: no payload to convert.
        self.builder.set_insertion_point(none);
        {
            let result = self.emit_none(target);
            self.branch_to_join(result, target, cont);
        }

        self.builder.set_insertion_point(cont);
        match target.place {
            Place::Address(_) => target.as_address_source(),
            Place::Register => {
                let value = self
                    .builder
                    .add_block_param(cont, target.lowered_type.clone());
                target.as_scalar_source(value)
            }
        }
    }

    fn branch_to_join(&mut self, result: Source, target: &Target, join: MirBlockId) {
        assert_eq!(result.is_address(), target.is_address());
        let args = match target.place {
            Place::Address(_) => vec![],
            Place::Register => vec![result.value],
        };
        self.builder.create_jump(join, args);
    }

    /// Target for the payload of the optional `target`. For memory this
    /// projects the payload area; the case is set by [`Self::emit_some`].
    fn prepare_for_emit_some(&mut self, target: &Target) -> (Target, OptionalElement) {
        let some = OptionalElement::some(target.optional_kind());
        let object_type = target
            .formal_type
            .optional_object()
            .cloned()
            .unwrap_or_else(|| panic!("`{}` is not an optional", target.formal_type));
        let lowered_object = target
            .lowered_type
            .optional_payload()
            .unwrap_or_else(|| panic!("{} is not an optional", target.lowered_type));

        let object_target = match target.place {
            Place::Address(address) => {
                let payload =
                    self.builder
                        .create_init_enum_data_addr(address, some, lowered_object.clone());
                Target::address(payload, lowered_object, object_type)
            }
            Place::Register => Target::register(lowered_object, object_type),
        };
        (object_target, some)
    }

    fn emit_some(&mut self, source: Source, target: &Target, some: OptionalElement) -> Source {
        match target.place {
            Place::Address(address) => {
                assert!(source.is_address(), "payload was not written in place");
                self.builder.create_inject_enum_addr(address, some);
                target.as_address_source()
            }
            Place::Register => {
                let payload = self.get_owned_scalar(source);
                let value = self.builder.create_enum(
                    Some(payload),
                    some,
                    target.lowered_type.clone(),
                );
                target.as_scalar_source(value)
            }
        }
    }

    fn emit_none(&mut self, target: &Target) -> Source {
        let none = OptionalElement::none(target.optional_kind());
        match target.place {
            Place::Address(address) => {
                self.builder.create_inject_enum_addr(address, none);
                target.as_address_source()
            }
            Place::Register => {
                let value = self
                    .builder
                    .create_enum(None, none, target.lowered_type.clone());
                target.as_scalar_source(value)
            }
        }
    }
}
