use insta::assert_snapshot;
use tern_casts::{
    CastConsumptionKind, CastFeasibility, CastLowering, CastLoweringError, classify_dynamic_cast,
    classify_dynamic_cast_traced,
};
use tern_mir::{MirBuilder, MirType, StandardTypeLowering, verify_function};
use tern_types::{ClassHierarchy, Type};

fn zoo() -> ClassHierarchy {
    let mut h = ClassHierarchy::new();
    h.declare_root("Animal").expect("fresh root");
    h.declare_subclass("Dog", "Animal").expect("known superclass");
    h.declare_subclass("Cat", "Animal").expect("known superclass");
    h
}

fn dog() -> Type {
    Type::class("Dog")
}

fn animal() -> Type {
    Type::class("Animal")
}

/// Emit a register cast as a whole function returning the result.
fn scalar_cast_function(name: &str, source: &Type, target: &Type) -> String {
    let h = zoo();
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&h, &lowering);
    assert_eq!(casts.classify(source, target), CastFeasibility::WillSucceed);

    let mut b = MirBuilder::new(name);
    let value = b.add_entry_param(MirType::object(source.clone()));
    let result = casts.emit_successful_scalar_cast(
        &mut b,
        value,
        source,
        MirType::object(target.clone()),
        target,
    );
    b.create_return(Some(result));
    let func = b.finish().expect("cast emission terminates every block");
    verify_function(&func).expect("emitted cast verifies");
    func.to_string()
}

#[test]
fn scenario_a_register_upcast() {
    let output = scalar_cast_function("upcast_dog_to_animal", &dog(), &animal());
    assert_snapshot!("scenario_a_register_upcast", output);
}

#[test]
fn scenario_b_optional_dispatch_and_injection() {
    let output = scalar_cast_function(
        "optional_dog_to_double_optional_animal",
        &Type::optional(dog()),
        &Type::optional_n(animal(), 2),
    );
    assert_snapshot!("scenario_b_optional_dispatch_and_injection", output);
}

#[test]
fn scenario_b_classification_trace() {
    let (result, steps) = classify_dynamic_cast_traced(
        &zoo(),
        &Type::optional(dog()),
        &Type::optional_n(animal(), 2),
    );
    assert_eq!(result, CastFeasibility::WillSucceed);
    let output = serde_json::to_string_pretty(&steps).expect("trace serializes");
    assert_snapshot!("scenario_b_classification_trace", output);
}

#[test]
fn indirect_copy_on_success_uses_a_stack_temporary() {
    let h = zoo();
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&h, &lowering);
    let source = Type::optional(dog());
    let target = Type::optional(animal());

    let mut b = MirBuilder::new("indirect_copy_optional_dog_to_optional_animal");
    let src = b.add_entry_param(MirType::address(source.clone()));
    let dest = b.add_entry_param(MirType::address(target.clone()));
    casts.emit_successful_indirect_cast(
        &mut b,
        CastConsumptionKind::CopyOnSuccess,
        src,
        &source,
        dest,
        &target,
    );
    b.create_return(None);
    let func = b.finish().expect("cast emission terminates every block");
    verify_function(&func).expect("emitted cast verifies");

    assert_snapshot!("indirect_copy_on_success", func.to_string());
}

#[test]
fn scenario_c_siblings_are_never_lowered() {
    let h = zoo();
    let cat = Type::class("Cat");
    assert_eq!(
        classify_dynamic_cast(&h, &cat, &dog()),
        CastFeasibility::WillFail
    );

    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&h, &lowering);
    let mut b = MirBuilder::new("sibling");
    let value = b.add_entry_param(MirType::object(cat.clone()));
    let err = casts
        .try_emit_scalar_cast(&mut b, value, &cat, MirType::object(dog()), &dog())
        .unwrap_err();
    assert!(matches!(
        err,
        CastLoweringError::NotProvable {
            feasibility: CastFeasibility::WillFail,
            ..
        }
    ));
}

#[test]
fn scenario_d_existentials_need_a_runtime_check() {
    let h = zoo();
    assert_eq!(
        classify_dynamic_cast(&h, &Type::any(), &dog()),
        CastFeasibility::MaySucceed
    );

    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&h, &lowering);
    let mut b = MirBuilder::new("existential");
    let src = b.add_entry_param(MirType::address(Type::any()));
    let dest = b.add_entry_param(MirType::address(dog()));
    let err = casts
        .try_emit_indirect_cast(
            &mut b,
            CastConsumptionKind::TakeAlways,
            src,
            &Type::any(),
            dest,
            &dog(),
        )
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cast from `Any` to `Dog` is not provably successful (may succeed)"
    );
    b.create_return(None);
    let func = b.finish().expect("entry block is terminated");
    assert_eq!(func.stats().block_count, 1);
    assert_eq!(func.instructions().count(), 0);
}
