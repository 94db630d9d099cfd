use criterion::{black_box, criterion_group, criterion_main, Criterion};
use silica_ir::{BinOp, Design, ModuleBuilder, ModuleId};
use silica_sim::Simulator;

/// A chain of `depth` adders: the worst case for the settle scheduler,
/// since every driver depends on the previous one.
fn adder_chain(depth: usize) -> (Design, ModuleId) {
    let mut m = ModuleBuilder::new("chain");
    let clk = m.input("clk", 1).unwrap();
    let x = m.input("x", 32).unwrap();
    let y = m.output("y", 32).unwrap();
    let acc = m.reg("acc", 32, 0).unwrap();

    let one = m.lit(1, 32);
    let mut prev = x.expr;
    for i in 0..depth {
        let w = m.wire(format!("w{i}"), 32).unwrap();
        let sum = m.binary(BinOp::Add, prev, one);
        m.assign(w, sum).unwrap();
        prev = w.expr;
    }
    let p = m.process(clk);
    m.update(p, acc, prev).unwrap();
    m.assign(y, acc).unwrap();

    let mut design = Design::new();
    let id = design.add_module(m.build().unwrap());
    (design, id)
}

fn bench_settle(c: &mut Criterion) {
    let (design, top) = adder_chain(256);
    let mut sim = Simulator::new(design, top).unwrap();
    c.bench_function("settle/256-deep-adder-chain", |b| {
        b.iter(|| {
            sim.poke("x", black_box(7)).unwrap();
            sim.settle();
            black_box(sim.peek("w255").unwrap())
        })
    });
}

fn bench_tick(c: &mut Criterion) {
    let (design, top) = adder_chain(256);
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("x", 1).unwrap();
    c.bench_function("tick/256-deep-adder-chain", |b| {
        b.iter(|| {
            sim.poke("clk", 0).unwrap();
            sim.settle();
            sim.poke("clk", 1).unwrap();
            sim.tick();
            black_box(sim.peek("y").unwrap())
        })
    });
}

criterion_group!(benches, bench_settle, bench_tick);
criterion_main!(benches);
