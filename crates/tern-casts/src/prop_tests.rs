//! Property tests for classification and successful-cast lowering.
//!
//! Key properties:
//!
//! 1. Reflexivity: classify(t, t) is WillSucceed
//! 2. A shared optional layer never changes the classification
//! 3. Widening: a proven cast stays proven into a more optional target
//! 4. Narrowing: unwrapping the source weakens success to MaySucceed
//! 5. Class casts are asymmetric along the hierarchy
//! 6. Emitted casts verify, compute the directly-constructed value and
//!    leave reference counts balanced on every dispatch path

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tern_mir::{
    InterpError, Interpreter, LoweringConfig, MirBuilder, MirType, RtValue, StandardTypeLowering,
    verify_function,
};
use tern_types::{ClassHierarchy, ClassName, OptionalKind, SubtypeQuery, Type};

use crate::{
    CastConsumptionKind, CastFeasibility, CastLowering, classify_dynamic_cast,
    classify_dynamic_cast_traced,
};

fn zoo() -> ClassHierarchy {
    let mut h = ClassHierarchy::new();
    h.declare_root("Animal").expect("fresh root");
    h.declare_subclass("Dog", "Animal").expect("known superclass");
    h.declare_subclass("Puppy", "Dog").expect("known superclass");
    h.declare_subclass("Cat", "Animal").expect("known superclass");
    h.declare_root("Vehicle").expect("fresh root");
    h
}

/// `Handle` is a struct holding a reference.
fn lowering() -> StandardTypeLowering {
    StandardTypeLowering::from_config(LoweringConfig {
        loadable_structs: ["Handle".to_string()].into(),
        ..LoweringConfig::default()
    })
}

fn classify(source: &Type, target: &Type) -> CastFeasibility {
    classify_dynamic_cast(&zoo(), source, target)
}

fn wrap(kind: OptionalKind, ty: Type) -> Type {
    match kind {
        OptionalKind::Optional => Type::optional(ty),
        OptionalKind::ImplicitlyUnwrapped => Type::implicitly_unwrapped(ty),
    }
}

// ---------------------------------------------------------------------------
// Strategies for generating types
// ---------------------------------------------------------------------------

const CLASS_POOL: &[&str] = &["Animal", "Dog", "Puppy", "Cat", "Vehicle"];

fn arb_class_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(CLASS_POOL)
}

fn arb_optional_kind() -> impl Strategy<Value = OptionalKind> {
    prop_oneof![
        3 => Just(OptionalKind::Optional),
        1 => Just(OptionalKind::ImplicitlyUnwrapped),
    ]
}

fn arb_leaf_type() -> impl Strategy<Value = Type> {
    prop_oneof![
        6 => arb_class_name().prop_map(Type::class),
        1 => Just(Type::structure("Int")),
        1 => Just(Type::structure("String")),
        1 => Just(Type::any()),
        1 => Just(Type::existential(["Show"])),
        1 => Just(Type::param("T")),
    ]
}

/// Generate types of bounded depth. Depth 0 = leaf types only.
fn arb_type(depth: u32) -> BoxedStrategy<Type> {
    if depth == 0 {
        return arb_leaf_type().boxed();
    }
    let inner = arb_type(depth - 1);
    prop_oneof![
        4 => arb_leaf_type(),
        2 => (arb_optional_kind(), inner.clone()).prop_map(|(kind, ty)| wrap(kind, ty)),
        1 => inner.clone().prop_map(Type::metatype),
        1 => inner.clone().prop_map(Type::existential_metatype),
        1 => prop::collection::vec(inner, 1..=3).prop_map(Type::Tuple),
    ]
    .boxed()
}

/// Types with no optional layer on the outside.
fn arb_non_optional_type(depth: u32) -> BoxedStrategy<Type> {
    arb_type(depth)
        .prop_filter("outer optional", |ty| ty.optional_object().is_none())
        .boxed()
}

// ---------------------------------------------------------------------------
// Strategies for castable values
// ---------------------------------------------------------------------------

/// Innermost pair of a provably successful cast.
#[derive(Debug, Clone, Copy)]
enum Base {
    Class(&'static str, &'static str),
    /// Class metatypes nested `depth` times.
    Metatype(&'static str, &'static str, usize),
    Int,
    /// A loadable struct wrapping an object.
    Handle,
    /// A generic parameter bound to an object; address-only.
    Param,
}

const UPCAST_POOL: &[(&str, &str)] = &[
    ("Dog", "Animal"),
    ("Puppy", "Animal"),
    ("Puppy", "Dog"),
    ("Cat", "Animal"),
    ("Dog", "Dog"),
    ("Vehicle", "Vehicle"),
];

/// Address-only bases can only be cast indirectly.
fn arb_base(address_only: bool) -> BoxedStrategy<Base> {
    let pair = prop::sample::select(UPCAST_POOL);
    let loadable = prop_oneof![
        4 => pair.clone().prop_map(|(from, to)| Base::Class(from, to)),
        2 => (pair, 1usize..=3).prop_map(|((from, to), depth)| Base::Metatype(from, to, depth)),
        1 => Just(Base::Int),
        1 => Just(Base::Handle),
    ];
    if address_only {
        prop_oneof![6 => loadable, 1 => Just(Base::Param)].boxed()
    } else {
        loadable.boxed()
    }
}

/// A cast proven to succeed, together with a concrete source value.
#[derive(Debug, Clone)]
struct CastCase {
    base: Base,
    /// Shared optional layers, innermost first: source flavour, target
    /// flavour, and whether the source value is present at that layer.
    layers: Vec<(OptionalKind, OptionalKind, bool)>,
    /// Optional layers only the target has, innermost first.
    extra: Vec<OptionalKind>,
    scalar: i64,
}

fn arb_cast_case(address_only: bool) -> impl Strategy<Value = CastCase> {
    (
        arb_base(address_only),
        prop::collection::vec(
            (arb_optional_kind(), arb_optional_kind(), prop::bool::weighted(0.7)),
            0..=3,
        ),
        prop::collection::vec(arb_optional_kind(), 0..=2),
        any::<i64>(),
    )
        .prop_map(|(base, layers, extra, scalar)| CastCase {
            base,
            layers,
            extra,
            scalar,
        })
}

fn arb_consumption() -> impl Strategy<Value = CastConsumptionKind> {
    prop_oneof![
        Just(CastConsumptionKind::TakeAlways),
        Just(CastConsumptionKind::TakeOnSuccess),
        Just(CastConsumptionKind::CopyOnSuccess),
    ]
}

impl CastCase {
    fn base_types(&self) -> (Type, Type) {
        match self.base {
            Base::Class(from, to) => (Type::class(from), Type::class(to)),
            Base::Metatype(from, to, depth) => (
                nest_metatypes(Type::class(from), depth),
                nest_metatypes(Type::class(to), depth),
            ),
            Base::Int => (Type::structure("Int"), Type::structure("Int")),
            Base::Handle => (Type::structure("Handle"), Type::structure("Handle")),
            Base::Param => (Type::param("T"), Type::param("T")),
        }
    }

    fn source_type(&self) -> Type {
        let (base, _) = self.base_types();
        self.layers
            .iter()
            .fold(base, |ty, (kind, _, _)| wrap(*kind, ty))
    }

    fn target_type(&self) -> Type {
        let (_, base) = self.base_types();
        let shared = self
            .layers
            .iter()
            .fold(base, |ty, (_, kind, _)| wrap(*kind, ty));
        self.extra.iter().fold(shared, |ty, kind| wrap(*kind, ty))
    }

    /// The source value and the value a direct construction at the target
    /// type produces. The caller owns the source value.
    fn values(&self, interp: &mut Interpreter<'_>) -> Result<(RtValue, RtValue), InterpError> {
        let base = match self.base {
            Base::Class(from, _) => interp.alloc_object(ClassName::new(from)),
            Base::Metatype(from, _, depth) => {
                RtValue::Metatype(nest_metatypes(Type::class(from), depth - 1))
            }
            Base::Int => RtValue::Scalar(self.scalar),
            Base::Handle => RtValue::Tuple(vec![
                interp.alloc_object(ClassName::new("Dog")),
                RtValue::Scalar(self.scalar),
            ]),
            Base::Param => interp.alloc_object(ClassName::new("Puppy")),
        };
        let value = self
            .layers
            .iter()
            .fold(base.clone(), |value, (_, _, present)| {
                if *present {
                    RtValue::some(value)
                } else {
                    RtValue::None
                }
            });
        if value.objects().is_empty() {
            interp.release_value(&base)?;
        }
        let expected = self
            .extra
            .iter()
            .fold(value.clone(), |value, _| RtValue::some(value));
        Ok((value, expected))
    }
}

fn nest_metatypes(ty: Type, depth: usize) -> Type {
    (0..depth).fold(ty, |ty, _| Type::metatype(ty))
}

fn interp_ok<T>(result: Result<T, InterpError>) -> Result<T, TestCaseError> {
    result.map_err(|err| TestCaseError::fail(err.to_string()))
}

fn check_scalar_round_trip(case: &CastCase) -> Result<(), TestCaseError> {
    let h = zoo();
    let lowering = lowering();
    let casts = CastLowering::new(&h, &lowering);
    let source = case.source_type();
    let target = case.target_type();
    prop_assert_eq!(casts.classify(&source, &target), CastFeasibility::WillSucceed);

    let mut b = MirBuilder::new("scalar_round_trip");
    let param = b.add_entry_param(MirType::object(source.clone()));
    let result = casts.emit_successful_scalar_cast(
        &mut b,
        param,
        &source,
        MirType::object(target.clone()),
        &target,
    );
    b.create_return(Some(result));
    let func = b.finish().map_err(|err| TestCaseError::fail(err.to_string()))?;
    if let Err(err) = verify_function(&func) {
        return Err(TestCaseError::fail(format!("{err}\n{func}")));
    }

    let mut interp = Interpreter::new(&h);
    let (value, expected) = interp_ok(case.values(&mut interp))?;
    let out = interp_ok(interp.run(&func, vec![value]))?;
    prop_assert_eq!(out, Some(expected.clone()));
    prop_assert_eq!(interp.live_stack_slots(), 0);
    for object in expected.objects() {
        prop_assert_eq!(interp.refcount(object), 1);
    }

    interp_ok(interp.release_value(&expected))?;
    prop_assert!(interp.live_objects().is_empty(), "leaked {:?}", interp.live_objects());
    Ok(())
}

fn check_indirect_round_trip(
    case: &CastCase,
    consumption: CastConsumptionKind,
) -> Result<(), TestCaseError> {
    let h = zoo();
    let lowering = lowering();
    let casts = CastLowering::new(&h, &lowering);
    let source = case.source_type();
    let target = case.target_type();
    prop_assert_eq!(casts.classify(&source, &target), CastFeasibility::WillSucceed);

    let mut b = MirBuilder::new("indirect_round_trip");
    let src = b.add_entry_param(MirType::address(source.clone()));
    let dest = b.add_entry_param(MirType::address(target.clone()));
    casts.emit_successful_indirect_cast(&mut b, consumption, src, &source, dest, &target);
    b.create_return(None);
    let func = b.finish().map_err(|err| TestCaseError::fail(err.to_string()))?;
    if let Err(err) = verify_function(&func) {
        return Err(TestCaseError::fail(format!("{err}\n{func}")));
    }

    let mut interp = Interpreter::new(&h);
    let (value, expected) = interp_ok(case.values(&mut interp))?;
    let src_addr = interp.alloc_memory(Some(value.clone()));
    let dest_addr = interp.alloc_memory(None);
    let out = interp_ok(interp.run(
        &func,
        vec![RtValue::Address(src_addr), RtValue::Address(dest_addr)],
    ))?;
    prop_assert_eq!(out, None);
    prop_assert_eq!(interp.live_stack_slots(), 0);
    prop_assert_eq!(interp_ok(interp.read(dest_addr))?, Some(expected.clone()));

    // One reference from the destination, plus one from an untouched source.
    let holders = if consumption.should_take() { 1 } else { 2 };
    for object in expected.objects() {
        prop_assert_eq!(interp.refcount(object), holders);
    }

    if consumption == CastConsumptionKind::CopyOnSuccess {
        prop_assert_eq!(interp_ok(interp.read(src_addr))?, Some(value));
        interp_ok(interp.destroy(src_addr))?;
    }
    interp_ok(interp.destroy(dest_addr))?;
    prop_assert!(interp.live_objects().is_empty(), "leaked {:?}", interp.live_objects());
    Ok(())
}

// ---------------------------------------------------------------------------
// Properties: classification
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn classification_is_reflexive(ty in arb_type(3)) {
        prop_assert_eq!(classify(&ty, &ty), CastFeasibility::WillSucceed);
    }

    #[test]
    fn shared_optional_layer_is_transparent(
        source in arb_type(2),
        target in arb_type(2),
        source_kind in arb_optional_kind(),
        target_kind in arb_optional_kind(),
    ) {
        prop_assert_eq!(
            classify(&wrap(source_kind, source.clone()), &wrap(target_kind, target.clone())),
            classify(&source, &target)
        );
        prop_assert_eq!(
            classify(&Type::optional(source.clone()), &Type::optional(source.clone())),
            classify(&source, &source)
        );
    }

    #[test]
    fn proven_casts_widen_into_optionals(
        case in arb_cast_case(true),
        kind in arb_optional_kind(),
    ) {
        let (source, target) = (case.source_type(), case.target_type());
        prop_assert_eq!(classify(&source, &target), CastFeasibility::WillSucceed);
        prop_assert_eq!(
            classify(&source, &wrap(kind, target)),
            CastFeasibility::WillSucceed
        );
    }

    #[test]
    fn any_type_widens_into_its_optional(ty in arb_type(2), kind in arb_optional_kind()) {
        prop_assert_eq!(classify(&ty, &wrap(kind, ty.clone())), CastFeasibility::WillSucceed);
    }

    #[test]
    fn unwrapping_the_source_weakens_success(
        source in arb_type(2),
        target in arb_non_optional_type(2),
        kind in arb_optional_kind(),
    ) {
        prop_assert_eq!(
            classify(&wrap(kind, source.clone()), &target),
            classify(&source, &target).weaken_success()
        );
    }

    #[test]
    fn class_casts_follow_the_hierarchy(a in arb_class_name(), b in arb_class_name()) {
        let h = zoo();
        let (class_a, class_b) = (ClassName::new(a), ClassName::new(b));
        let (ty_a, ty_b) = (Type::class(a), Type::class(b));
        prop_assume!(a != b);
        if h.is_ancestor_or_self(&class_a, &class_b) {
            prop_assert_eq!(classify(&ty_b, &ty_a), CastFeasibility::WillSucceed);
            prop_assert_eq!(classify(&ty_a, &ty_b), CastFeasibility::MaySucceed);
        } else if !h.is_ancestor_or_self(&class_b, &class_a) {
            prop_assert_eq!(classify(&ty_a, &ty_b), CastFeasibility::WillFail);
            prop_assert_eq!(classify(&ty_b, &ty_a), CastFeasibility::WillFail);
        }
    }

    #[test]
    fn tracing_does_not_change_the_result(source in arb_type(3), target in arb_type(3)) {
        let h = zoo();
        let (traced, steps) = classify_dynamic_cast_traced(&h, &source, &target);
        prop_assert_eq!(traced, classify_dynamic_cast(&h, &source, &target));
        prop_assert_eq!(steps[0].depth, 0);
        prop_assert_eq!(steps[0].result, traced);
        prop_assert!(steps.windows(2).all(|pair| pair[1].depth == pair[0].depth + 1));
    }
}

// ---------------------------------------------------------------------------
// Properties: emission
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn scalar_casts_round_trip(case in arb_cast_case(false)) {
        check_scalar_round_trip(&case)?;
    }

    #[test]
    fn indirect_casts_round_trip(
        case in arb_cast_case(true),
        consumption in arb_consumption(),
    ) {
        check_indirect_round_trip(&case, consumption)?;
    }
}
