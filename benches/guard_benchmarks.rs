//! Benchmarks for the guard accounting path.
//!
//! Run with: cargo bench

use std::sync::Arc;
use std::time::Duration;

use boxguard::program::ast::{BinaryOp, Block, Expr, Program, Stmt};
use boxguard::program::{ReferenceUnit, SymbolKind, SymbolTable};
use boxguard::runtime::ScriptContext;
use boxguard::whitelist::file::parse_rules;
use boxguard::{
    current_guard, BoxCompiler, DeclarationId, FrontEnd, GuardLimits, GuardRegistry, Interpreter,
    ParsedProgram, WhitelistPolicy,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

/// Limits loose enough that a whole measurement fits in one run.
fn bench_limits() -> GuardLimits {
    GuardLimits::builder()
        .timeout(Duration::from_secs(3600))
        .max_allocations(u64::MAX)
        .build()
}

/// Benchmark the probes instrumented code calls most often.
fn bench_probes(c: &mut Criterion) {
    let registry = GuardRegistry::new();
    let (gid, guard) = registry.allocate(&bench_limits()).unwrap();
    let context = ScriptContext::new(gid, Arc::clone(&guard));

    let mut group = c.benchmark_group("probes");
    let _run = guard.start();
    context.run_sync(|| {
        group.bench_function("guard_enter", |b| b.iter(|| black_box(guard.guard_enter())));
        group.bench_function("guard_jump", |b| b.iter(|| black_box(guard.guard_jump())));
        group.bench_function("guard_count", |b| b.iter(|| black_box(guard.guard_count(0))));
        group.bench_function("current_guard", |b| {
            b.iter(|| black_box(current_guard(gid).is_ok()))
        });
    });
    group.finish();
}

/// Benchmark lock-free guard lookups as the registry grows.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    for live in [16usize, 1024] {
        let registry = GuardRegistry::new();
        let gids: Vec<_> = (0..live)
            .map(|_| registry.allocate(&GuardLimits::default()).unwrap().0)
            .collect();
        let probe = gids[live / 2];

        group.bench_with_input(BenchmarkId::new("get", live), &probe, |b, gid| {
            b.iter(|| black_box(registry.get(*gid).is_ok()))
        });
    }

    group.bench_function("allocate_free", |b| {
        let registry = GuardRegistry::new();
        let limits = GuardLimits::default();
        b.iter(|| {
            let (gid, _) = registry.allocate(&limits).unwrap();
            registry.free(gid).unwrap();
        })
    });

    group.finish();
}

/// `for (var i = 0; i < n; i = i + 1) { }`
struct CountingLoop;

impl FrontEnd for CountingLoop {
    fn parse(
        &self,
        source: &str,
        _references: &[ReferenceUnit],
        _globals: Option<&DeclarationId>,
    ) -> anyhow::Result<ParsedProgram> {
        let n: i64 = source.parse()?;
        let mut symbols = SymbolTable::new();
        symbols.define_type("System.Int32", None);
        let mut program = Program::new(symbols);
        let i = program.symbols.define_local(SymbolKind::Local, "i");
        program.declare(i);

        let i_ref = || Expr::name(i, Default::default());
        program.body = Block::new(vec![Stmt::For {
            init: vec![Stmt::Local {
                symbol: i,
                init: Some(Expr::int(0)),
            }],
            cond: Some(Expr::binary(BinaryOp::Lt, i_ref(), Expr::int(n))),
            step: vec![Expr::assign(
                i_ref(),
                Expr::binary(BinaryOp::Add, i_ref(), Expr::int(1)),
            )],
            body: Box::new(Stmt::Block(Block::default())),
        }]);

        Ok(ParsedProgram {
            program,
            ..ParsedProgram::default()
        })
    }
}

/// Benchmark an instrumented loop end to end.
fn bench_interpreted_loop(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut policy = WhitelistPolicy::new();
    policy.extend_rules(parse_rules("T:System.Int32\n").unwrap());
    let compiler = BoxCompiler::new(&policy, bench_limits(), CountingLoop, Interpreter::new());

    let mut group = c.benchmark_group("interpreted_loop");
    for iterations in [100i64, 10_000] {
        let script = compiler
            .compile(&iterations.to_string(), None)
            .unwrap()
            .into_script()
            .unwrap();

        group.throughput(Throughput::Elements(iterations as u64));
        group.bench_with_input(BenchmarkId::from_parameter(iterations), &script, |b, script| {
            b.to_async(&rt).iter(|| async { black_box(script.run(None).await.unwrap()) })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_probes, bench_registry, bench_interpreted_loop);
criterion_main!(benches);
