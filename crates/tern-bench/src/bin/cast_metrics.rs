use std::path::PathBuf;

use serde::Serialize;
use tern_casts::{CastConsumptionKind, CastLowering, CastLoweringError};
use tern_mir::{MirBuilder, MirFunction, MirFunctionStats, MirType, StandardTypeLowering};
use tern_types::{ClassHierarchy, HierarchyError, Type};

#[derive(Debug, Serialize)]
struct CastKernelMetric {
    name: &'static str,
    source: String,
    target: String,
    #[serde(flatten)]
    stats: MirFunctionStats,
}

#[derive(Debug, Default, Serialize)]
struct MetricTotals {
    block_count: usize,
    retain_count: usize,
    release_count: usize,
    copy_addr_count: usize,
    alloc_stack_count: usize,
    upcast_count: usize,
    ownership_op_count: usize,
}

#[derive(Debug, Serialize)]
struct MetricsReport {
    kernels: Vec<CastKernelMetric>,
    totals: MetricTotals,
}

enum KernelShape {
    Scalar,
    Indirect(CastConsumptionKind),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let hierarchy = build_hierarchy().map_err(|err| format!("failed to build hierarchy: {err}"))?;
    let lowering = StandardTypeLowering::new();
    let casts = CastLowering::new(&hierarchy, &lowering);

    let dog = Type::class("Dog");
    let animal = Type::class("Animal");
    let kernels = vec![
        emit_kernel(&casts, "register_upcast", KernelShape::Scalar, &dog, &animal)?,
        emit_kernel(
            &casts,
            "optional_dispatch_and_injection",
            KernelShape::Scalar,
            &Type::optional(dog.clone()),
            &Type::optional_n(animal.clone(), 2),
        )?,
        emit_kernel(
            &casts,
            "nested_optional_dispatch",
            KernelShape::Scalar,
            &Type::optional_n(Type::class("Puppy"), 3),
            &Type::optional_n(animal.clone(), 3),
        )?,
        emit_kernel(
            &casts,
            "metatype_upcast",
            KernelShape::Scalar,
            &Type::metatype(dog.clone()),
            &Type::metatype(animal.clone()),
        )?,
        emit_kernel(
            &casts,
            "indirect_take_always",
            KernelShape::Indirect(CastConsumptionKind::TakeAlways),
            &Type::optional(dog.clone()),
            &Type::optional(animal.clone()),
        )?,
        emit_kernel(
            &casts,
            "indirect_copy_on_success",
            KernelShape::Indirect(CastConsumptionKind::CopyOnSuccess),
            &Type::optional(dog.clone()),
            &Type::optional(animal.clone()),
        )?,
        emit_kernel(
            &casts,
            "indirect_copy_into_implicit_optional",
            KernelShape::Indirect(CastConsumptionKind::CopyOnSuccess),
            &dog,
            &Type::implicitly_unwrapped(Type::optional(animal)),
        )?,
    ];

    let totals = kernels
        .iter()
        .fold(MetricTotals::default(), |mut totals, kernel| {
            totals.block_count += kernel.stats.block_count;
            totals.retain_count += kernel.stats.retain_count;
            totals.release_count += kernel.stats.release_count;
            totals.copy_addr_count += kernel.stats.copy_addr_count;
            totals.alloc_stack_count += kernel.stats.alloc_stack_count;
            totals.upcast_count += kernel.stats.upcast_count;
            totals.ownership_op_count += kernel.stats.ownership_op_count();
            totals
        });
    let report = MetricsReport { kernels, totals };
    let json = serde_json::to_string_pretty(&report)
        .map_err(|err| format!("failed to serialize metrics: {err}"))?;

    if let Some(path) = std::env::args().nth(1) {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("failed to create `{}`: {err}", parent.display()))?;
        }
        std::fs::write(&path, json)
            .map_err(|err| format!("failed to write `{}`: {err}", path.display()))?;
    } else {
        println!("{json}");
    }

    Ok(())
}

fn build_hierarchy() -> Result<ClassHierarchy, HierarchyError> {
    let mut hierarchy = ClassHierarchy::new();
    hierarchy.declare_root("Animal")?;
    hierarchy.declare_subclass("Dog", "Animal")?;
    hierarchy.declare_subclass("Puppy", "Dog")?;
    Ok(hierarchy)
}

fn emit_kernel(
    casts: &CastLowering<'_>,
    name: &'static str,
    shape: KernelShape,
    source: &Type,
    target: &Type,
) -> Result<CastKernelMetric, String> {
    let func = emit_cast_function(casts, name, shape, source, target)
        .map_err(|err| format!("failed to lower cast kernel `{name}`: {err}"))?;
    tern_mir::verify_function(&func)
        .map_err(|err| format!("cast kernel `{name}` failed to verify: {err}"))?;
    Ok(CastKernelMetric {
        name,
        source: source.to_string(),
        target: target.to_string(),
        stats: func.stats(),
    })
}

fn emit_cast_function(
    casts: &CastLowering<'_>,
    name: &str,
    shape: KernelShape,
    source: &Type,
    target: &Type,
) -> Result<MirFunction, String> {
    let mut builder = MirBuilder::new(name);
    match shape {
        KernelShape::Scalar => {
            let value = builder.add_entry_param(MirType::object(source.clone()));
            let result = casts
                .try_emit_scalar_cast(
                    &mut builder,
                    value,
                    source,
                    MirType::object(target.clone()),
                    target,
                )
                .map_err(|err: CastLoweringError| err.to_string())?;
            builder.create_return(Some(result));
        }
        KernelShape::Indirect(consumption) => {
            let src = builder.add_entry_param(MirType::address(source.clone()));
            let dest = builder.add_entry_param(MirType::address(target.clone()));
            casts
                .try_emit_indirect_cast(&mut builder, consumption, src, source, dest, target)
                .map_err(|err: CastLoweringError| err.to_string())?;
            builder.create_return(None);
        }
    }
    builder.finish().map_err(|err| err.to_string())
}
