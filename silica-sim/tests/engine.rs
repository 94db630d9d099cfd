//! Black-box tests of the settle/tick contract.

use silica_ir::{BinOp, Design, ModuleBuilder, ModuleId};
use silica_sim::{ElaborationError, SimulationError, Simulator};

/// An 8-bit counter with synchronous reset and an `inc` input.
fn counter_design() -> (Design, ModuleId) {
    let mut m = ModuleBuilder::new("counter");
    let clk = m.input("clk", 1).unwrap();
    let rst = m.input("rst", 1).unwrap();
    let inc = m.input("inc", 8).unwrap();
    let count = m.reg("count", 8, 0).unwrap();
    let out = m.output("out", 8).unwrap();

    let next = m.binary(BinOp::Add, count, inc);
    let p = m.process(clk);
    m.process_reset(p, rst);
    m.update(p, count, next).unwrap();
    m.assign(out, count).unwrap();

    let mut design = Design::new();
    let id = design.add_module(m.build().unwrap());
    (design, id)
}

fn cycle(sim: &mut Simulator) {
    sim.poke("clk", 0).unwrap();
    sim.settle();
    sim.poke("clk", 1).unwrap();
    sim.tick();
}

#[test]
fn registers_advance_only_on_tick() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("inc", 3).unwrap();
    sim.settle();
    assert_eq!(sim.peek("out").unwrap(), 0);

    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 3);
    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 6);
}

#[test]
fn settle_is_idempotent() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("inc", 7).unwrap();
    sim.settle();
    let first = sim.peek("out").unwrap();
    sim.settle();
    sim.settle();
    assert_eq!(sim.peek("out").unwrap(), first);
}

#[test]
fn no_rising_edge_no_transition() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("inc", 1).unwrap();

    // Clock held high: the first tick sees a rising edge, the second does not.
    sim.poke("clk", 1).unwrap();
    sim.tick();
    sim.tick();
    assert_eq!(sim.peek("out").unwrap(), 1);
}

#[test]
fn synchronous_reset_loads_declared_values() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("inc", 5).unwrap();
    cycle(&mut sim);
    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 10);

    sim.poke("rst", 1).unwrap();
    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 0);

    // Held in reset: no transitions.
    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 0);
}

#[test]
fn poke_rejects_non_inputs_and_unknown_names() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    assert_eq!(
        sim.poke("out", 1).unwrap_err(),
        SimulationError::NotAnInput("out".into())
    );
    assert_eq!(
        sim.peek("bogus").unwrap_err(),
        SimulationError::NoSuchSignal("bogus".into())
    );
}

#[test]
fn combinational_cycle_is_rejected() {
    let mut m = ModuleBuilder::new("loopy");
    let a = m.wire("a", 1).unwrap();
    let b = m.wire("b", 1).unwrap();
    let na = m.not(a);
    let nb = m.not(b);
    m.assign(b, na).unwrap();
    m.assign(a, nb).unwrap();
    let mut design = Design::new();
    let id = design.add_module(m.build().unwrap());

    match Simulator::new(design, id) {
        Err(ElaborationError::CombinationalCycle { signal }) => {
            assert!(signal == "a" || signal == "b");
        }
        other => panic!("expected a combinational cycle, got {other:?}"),
    }
}

/// Feedback through a register is legal even though the net graph loops.
#[test]
fn cycles_through_registers_are_legal() {
    let mut m = ModuleBuilder::new("toggler");
    let clk = m.input("clk", 1).unwrap();
    let q = m.reg("q", 1, 0).unwrap();
    let out = m.output("out", 1).unwrap();
    let nq = m.not(q);
    let p = m.process(clk);
    m.update(p, q, nq).unwrap();
    m.assign(out, q).unwrap();

    let mut design = Design::new();
    let id = design.add_module(m.build().unwrap());
    let mut sim = Simulator::new(design, id).unwrap();

    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 1);
    cycle(&mut sim);
    assert_eq!(sim.peek("out").unwrap(), 0);
}

/// A memory write committed at cycle N reads back old data during N and new
/// data from N+1 on; the register file leans on this.
#[test]
fn memory_reads_before_writes() {
    let mut m = ModuleBuilder::new("scratchpad");
    let clk = m.input("clk", 1).unwrap();
    let wen = m.input("wen", 1).unwrap();
    let waddr = m.input("waddr", 4).unwrap();
    let wdata = m.input("wdata", 8).unwrap();
    let raddr = m.input("raddr", 4).unwrap();
    let rdata = m.output("rdata", 8).unwrap();

    let mem = m.memory("cells", 16, 8).unwrap();
    m.write_port(mem, clk, wen, waddr, wdata).unwrap();
    let read = m.mem_read(mem, raddr);
    m.assign(rdata, read).unwrap();

    let mut design = Design::new();
    let id = design.add_module(m.build().unwrap());
    let mut sim = Simulator::new(design, id).unwrap();

    sim.poke("wen", 1).unwrap();
    sim.poke("waddr", 9).unwrap();
    sim.poke("wdata", 0xAB).unwrap();
    sim.poke("raddr", 9).unwrap();
    sim.poke("clk", 0).unwrap();
    sim.settle();
    assert_eq!(sim.peek("rdata").unwrap(), 0, "pre-edge read sees old value");

    sim.poke("clk", 1).unwrap();
    sim.tick();
    assert_eq!(sim.peek("rdata").unwrap(), 0xAB, "post-edge read sees commit");
}

/// Hierarchical instance: the adder's ports alias top-level signals, and the
/// child is observable through its dotted path.
#[test]
fn instances_alias_parent_signals() {
    let mut adder = ModuleBuilder::new("adder");
    let a = adder.input("a", 8).unwrap();
    let b = adder.input("b", 8).unwrap();
    let sum = adder.output("sum", 8).unwrap();
    let s = adder.binary(BinOp::Add, a, b);
    adder.assign(sum, s).unwrap();

    let mut design = Design::new();
    let adder_id = design.add_module(adder.build().unwrap());

    let mut top = ModuleBuilder::new("top");
    let x = top.input("x", 8).unwrap();
    let y = top.input("y", 8).unwrap();
    let total = top.wire("total", 8).unwrap();
    let out = top.output("out", 8).unwrap();
    top.instance(
        &design,
        "u0",
        adder_id,
        &[("a", x.expr), ("b", y.expr), ("sum", total.expr)],
    )
    .unwrap();
    top.assign(out, total).unwrap();
    let top_id = design.add_module(top.build().unwrap());

    let mut sim = Simulator::new(design, top_id).unwrap();
    sim.poke("x", 20).unwrap();
    sim.poke("y", 22).unwrap();
    sim.settle();
    assert_eq!(sim.peek("out").unwrap(), 42);
    assert_eq!(sim.peek("u0.sum").unwrap(), 42);
    assert_eq!(sim.peek("u0.a").unwrap(), 20);
}

#[test]
fn simulator_reset_restores_power_on_state() {
    let (design, top) = counter_design();
    let mut sim = Simulator::new(design, top).unwrap();
    sim.poke("inc", 1).unwrap();
    for _ in 0..5 {
        cycle(&mut sim);
    }
    assert_eq!(sim.peek("out").unwrap(), 5);
    sim.reset();
    assert_eq!(sim.peek("out").unwrap(), 0);
}
