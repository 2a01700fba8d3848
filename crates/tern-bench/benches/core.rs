use std::hint::black_box;

use divan::{AllocProfiler, Bencher};
use tern_casts::{
    CastConsumptionKind, CastFeasibility, CastLowering, classify_dynamic_cast,
    classify_dynamic_cast_traced,
};
use tern_mir::{
    Interpreter, MirBuilder, MirFunction, MirType, RtValue, StandardTypeLowering, verify_function,
};
use tern_types::{ClassHierarchy, ClassName, Type};

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

#[divan::bench(args = [8, 64, 512])]
fn classify_deep_class_chain(bencher: Bencher, chain_len: usize) {
    let hierarchy = build_class_chain(chain_len);
    let leaf = Type::class(chain_class(chain_len));
    let root = Type::class(chain_class(0));
    bencher.bench(|| {
        let result = classify_dynamic_cast(&hierarchy, black_box(&leaf), black_box(&root));
        assert_eq!(result, CastFeasibility::WillSucceed);
        black_box(result)
    });
}

#[divan::bench(args = [1, 4, 16])]
fn classify_nested_optionals(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(2);
    let source = Type::optional_n(Type::class(chain_class(2)), depth);
    let target = Type::optional_n(Type::class(chain_class(0)), depth + 1);
    bencher.bench(|| {
        black_box(classify_dynamic_cast(
            &hierarchy,
            black_box(&source),
            black_box(&target),
        ))
    });
}

#[divan::bench(args = [1, 4, 16])]
fn classify_nested_optionals_traced(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(2);
    let source = Type::optional_n(Type::class(chain_class(2)), depth);
    let target = Type::optional_n(Type::class(chain_class(0)), depth + 1);
    bencher.bench(|| {
        let (result, steps) =
            classify_dynamic_cast_traced(&hierarchy, black_box(&source), black_box(&target));
        assert_eq!(steps.len(), depth + 2);
        black_box((result, steps))
    });
}

#[divan::bench(args = [1, 4, 16])]
fn emit_scalar_optional_cast(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(1);
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&hierarchy, &lowering);
    let source = Type::optional_n(Type::class(chain_class(1)), depth);
    let target = Type::optional_n(Type::class(chain_class(0)), depth + 1);
    bencher.bench(|| black_box(scalar_cast_function(&casts, &source, &target)));
}

#[divan::bench(args = [1, 4, 16])]
fn emit_indirect_copy_on_success(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(1);
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&hierarchy, &lowering);
    let source = Type::optional_n(Type::class(chain_class(1)), depth);
    let target = Type::optional_n(Type::class(chain_class(0)), depth);
    bencher.bench(|| {
        black_box(indirect_cast_function(
            &casts,
            CastConsumptionKind::CopyOnSuccess,
            &source,
            &target,
        ))
    });
}

#[divan::bench(args = [1, 4, 16])]
fn verify_emitted_cast(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(1);
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&hierarchy, &lowering);
    let func = indirect_cast_function(
        &casts,
        CastConsumptionKind::CopyOnSuccess,
        &Type::optional_n(Type::class(chain_class(1)), depth),
        &Type::optional_n(Type::class(chain_class(0)), depth),
    );
    bencher.bench(|| {
        verify_function(black_box(&func))
            .unwrap_or_else(|err| panic!("emitted cast failed to verify: {err}"));
    });
}

#[divan::bench(args = [1, 4, 16])]
fn interpret_scalar_optional_cast(bencher: Bencher, depth: usize) {
    let hierarchy = build_class_chain(1);
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&hierarchy, &lowering);
    let func = scalar_cast_function(
        &casts,
        &Type::optional_n(Type::class(chain_class(1)), depth),
        &Type::optional_n(Type::class(chain_class(0)), depth + 1),
    );
    bencher.bench(|| {
        let mut interp = Interpreter::new(&hierarchy);
        let object = interp.alloc_object(ClassName::new(chain_class(1)));
        let arg = (0..depth).fold(object, |value, _| RtValue::some(value));
        let result = interp
            .run(black_box(&func), vec![arg])
            .unwrap_or_else(|err| panic!("interpretation failed in benchmark: {err}"))
            .unwrap_or_else(|| panic!("scalar cast returned nothing"));
        interp
            .release_value(&result)
            .unwrap_or_else(|err| panic!("release failed in benchmark: {err}"));
        assert!(interp.live_objects().is_empty());
        black_box(result)
    });
}

fn chain_class(index: usize) -> String {
    format!("C{index}")
}

/// `C0 > C1 > ... > Cn`, a single inheritance chain.
fn build_class_chain(len: usize) -> ClassHierarchy {
    let mut hierarchy = ClassHierarchy::new();
    hierarchy
        .declare_root(chain_class(0))
        .unwrap_or_else(|err| panic!("hierarchy setup failed: {err}"));
    for index in 1..=len {
        hierarchy
            .declare_subclass(chain_class(index), chain_class(index - 1))
            .unwrap_or_else(|err| panic!("hierarchy setup failed: {err}"));
    }
    hierarchy
}

fn scalar_cast_function(casts: &CastLowering<'_>, source: &Type, target: &Type) -> MirFunction {
    let mut builder = MirBuilder::new("bench_scalar_cast");
    let value = builder.add_entry_param(MirType::object(source.clone()));
    let result = casts.emit_successful_scalar_cast(
        &mut builder,
        value,
        source,
        MirType::object(target.clone()),
        target,
    );
    builder.create_return(Some(result));
    builder
        .finish()
        .unwrap_or_else(|err| panic!("scalar cast emission left a block open: {err}"))
}

fn indirect_cast_function(
    casts: &CastLowering<'_>,
    consumption: CastConsumptionKind,
    source: &Type,
    target: &Type,
) -> MirFunction {
    let mut builder = MirBuilder::new("bench_indirect_cast");
    let src = builder.add_entry_param(MirType::address(source.clone()));
    let dest = builder.add_entry_param(MirType::address(target.clone()));
    casts.emit_successful_indirect_cast(&mut builder, consumption, src, source, dest, target);
    builder.create_return(None);
    builder
        .finish()
        .unwrap_or_else(|err| panic!("indirect cast emission left a block open: {err}"))
}
