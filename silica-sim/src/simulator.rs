//! The settle/tick engine.

use crate::{
    elaborate::{elaborate, Cell, Elaborated, NodeId, NodeKind},
    error::{ElaborationError, SimulationError},
    state::MemImage,
};
use silica_ir::{mask, sign_extend, Design, Expr, ExprId, ModuleId, Op, Value};
use tracing::trace;

/// Per-cell expression memo: `(epoch, value)` per arena slot. A slot is
/// valid only while its epoch matches the current settle pass.
type Scratch = Vec<(u64, Value)>;

/// Cycle-accurate simulator owning all mutable state of one design.
///
/// Construction elaborates the hierarchy and fails on combinational cycles;
/// afterwards the instance is driven through [`poke`](Self::poke) /
/// [`settle`](Self::settle) / [`tick`](Self::tick) and observed with
/// [`peek`](Self::peek).
#[derive(Debug)]
pub struct Simulator {
    design: Design,
    elab: Elaborated,
    values: Vec<Value>,
    mems: Vec<MemImage>,
    /// Clock levels sampled at the end of the previous `tick`, parallel to
    /// `elab.clocks`.
    last_clock: Vec<Value>,
    scratch: Vec<Scratch>,
    epoch: u64,
    staged_regs: Vec<(NodeId, Value)>,
    staged_mem: Vec<(usize, u64, Value)>,
}

impl Simulator {
    /// Elaborate `top` and settle the power-on state.
    pub fn new(design: Design, top: ModuleId) -> Result<Self, ElaborationError> {
        let elab = elaborate(&design, top)?;
        let values = elab
            .nodes
            .iter()
            .map(|n| match n.kind {
                NodeKind::Register(reset) => reset,
                _ => 0,
            })
            .collect();
        let mems = elab
            .mems
            .iter()
            .map(|m| MemImage::new(m.depth, m.width))
            .collect();
        let scratch = elab.cells.iter().map(|c| vec![(0, 0); c.arena_len]).collect();
        let mut sim = Self {
            last_clock: vec![0; elab.clocks.len()],
            values,
            mems,
            scratch,
            epoch: 0,
            staged_regs: Vec::new(),
            staged_mem: Vec::new(),
            design,
            elab,
        };
        sim.settle();
        Ok(sim)
    }

    /// Drive a top-level input port. The value is truncated to the port
    /// width and takes effect at the next `settle`.
    pub fn poke(&mut self, name: &str, value: Value) -> Result<(), SimulationError> {
        let node = self.lookup(name)?;
        let info = &self.elab.nodes[node.index()];
        if info.kind != NodeKind::TopInput {
            return Err(SimulationError::NotAnInput(name.to_string()));
        }
        self.values[node.index()] = value & mask(info.width);
        Ok(())
    }

    /// Observe any signal by hierarchical path, e.g. `"regfile.rdata1"`.
    pub fn peek(&self, name: &str) -> Result<Value, SimulationError> {
        Ok(self.values[self.lookup(name)?.index()])
    }

    /// Observe one memory cell by hierarchical path, e.g. `"csrfile.cells"`.
    pub fn peek_memory(&self, name: &str, addr: u64) -> Result<Value, SimulationError> {
        let &idx = self
            .elab
            .mem_names
            .get(name)
            .ok_or_else(|| SimulationError::NoSuchMemory(name.to_string()))?;
        Ok(self.mems[idx].get(addr))
    }

    fn lookup(&self, name: &str) -> Result<NodeId, SimulationError> {
        self.elab
            .names
            .get(name)
            .copied()
            .ok_or_else(|| SimulationError::NoSuchSignal(name.to_string()))
    }

    /// Evaluate every combinational driver once, in topological order.
    ///
    /// Idempotent: with unchanged inputs and state, repeated calls produce
    /// identical values on every node. Settling also records each clock's
    /// level; [`tick`](Self::tick) fires a process only when its clock was
    /// observed low and has since risen.
    pub fn settle(&mut self) {
        self.epoch += 1;
        for i in 0..self.elab.drivers.len() {
            let d = self.elab.drivers[i];
            let value = self.eval(d.cell, d.expr);
            let width = self.elab.nodes[d.node.index()].width;
            self.values[d.node.index()] = value & mask(width);
        }
        for (i, &clock) in self.elab.clocks.iter().enumerate() {
            self.last_clock[i] = self.values[clock.index()];
        }
    }

    /// Commit one rising-edge transition.
    ///
    /// Every clocked process and memory write port whose clock rose since
    /// the previous `tick` samples pre-edge state, then all commits land
    /// atomically, then the design re-settles.
    pub fn tick(&mut self) {
        let before = self.last_clock.clone();
        self.settle();

        let rising: Vec<bool> = self
            .elab
            .clocks
            .iter()
            .zip(&before)
            .map(|(&clock, &last)| last == 0 && self.values[clock.index()] != 0)
            .collect();
        let is_rising = |clocks: &[NodeId], clock: NodeId| {
            clocks
                .iter()
                .position(|&c| c == clock)
                .is_some_and(|i| rising[i])
        };

        self.staged_regs.clear();
        self.staged_mem.clear();

        for p in 0..self.elab.procs.len() {
            let (clock, reset, cell) = {
                let proc = &self.elab.procs[p];
                (proc.clock, proc.reset, proc.cell)
            };
            if !is_rising(&self.elab.clocks, clock) {
                continue;
            }
            let in_reset =
                reset.is_some_and(|r| self.values[r.index()] != 0);
            for u in 0..self.elab.procs[p].updates.len() {
                let (node, expr, reset_value) = self.elab.procs[p].updates[u];
                let value = if in_reset {
                    reset_value
                } else {
                    self.eval(cell, expr)
                };
                self.staged_regs.push((node, value));
            }
        }

        for m in 0..self.elab.mems.len() {
            for p in 0..self.elab.mems[m].ports.len() {
                let (cell, clock, enable, addr, data) = {
                    let port = &self.elab.mems[m].ports[p];
                    (port.cell, port.clock, port.enable, port.addr, port.data)
                };
                if !is_rising(&self.elab.clocks, clock) {
                    continue;
                }
                if self.eval(cell, enable) != 0 {
                    let addr = self.eval(cell, addr);
                    let data = self.eval(cell, data);
                    self.staged_mem.push((m, addr, data));
                }
            }
        }

        for i in 0..self.staged_regs.len() {
            let (node, value) = self.staged_regs[i];
            let width = self.elab.nodes[node.index()].width;
            self.values[node.index()] = value & mask(width);
        }
        for i in 0..self.staged_mem.len() {
            let (m, addr, data) = self.staged_mem[i];
            if addr < self.elab.mems[m].depth {
                let width = self.elab.mems[m].width;
                self.mems[m].set(addr, data, width);
            }
        }
        trace!(
            regs = self.staged_regs.len(),
            mem_writes = self.staged_mem.len(),
            "tick committed"
        );

        self.settle();
    }

    /// Return registers to their reset values, zero all memories and clear
    /// the clock-edge history, then settle.
    pub fn reset(&mut self) {
        for (i, node) in self.elab.nodes.iter().enumerate() {
            self.values[i] = match node.kind {
                NodeKind::Register(reset) => reset,
                NodeKind::TopInput => self.values[i],
                NodeKind::Comb => 0,
            };
        }
        for mem in &mut self.mems {
            mem.clear();
        }
        self.last_clock.fill(0);
        self.settle();
    }

    /// Evaluate one expression in a cell against current values, memoized
    /// per settle pass. Expressions never cross cell boundaries; hierarchy
    /// is resolved through node aliasing at elaboration time.
    fn eval(&mut self, cell: usize, expr: ExprId) -> Value {
        eval_expr(
            self.design
                .module(self.elab.cells[cell].module)
                .expect("cell module exists")
                .exprs(),
            &self.elab.cells[cell],
            &self.values,
            &self.mems,
            &mut self.scratch[cell],
            self.epoch,
            expr,
        )
    }
}

fn eval_expr(
    exprs: &[Expr],
    cell: &Cell,
    values: &[Value],
    mems: &[MemImage],
    scratch: &mut Scratch,
    epoch: u64,
    id: ExprId,
) -> Value {
    let (cached_epoch, cached) = scratch[id.index()];
    if cached_epoch == epoch {
        return cached;
    }

    let node = &exprs[id.index()];
    let mut arg =
        |scratch: &mut Scratch, e: ExprId| eval_expr(exprs, cell, values, mems, scratch, epoch, e);

    let value = match &node.op {
        Op::Lit(v) => *v,
        Op::Sig(s) => values[cell.sig_node[s.index()].index()],
        Op::Slice { src, lo } => (arg(scratch, *src) >> lo) & mask(node.width),
        Op::Concat(parts) => {
            let mut acc = 0;
            for &p in parts {
                let w = exprs[p.index()].width;
                let v = arg(scratch, p);
                acc = if w >= 64 { v } else { (acc << w) | v };
            }
            acc
        }
        Op::Repeat { src, count } => {
            let w = exprs[src.index()].width;
            let v = arg(scratch, *src);
            let mut acc = 0;
            for _ in 0..*count {
                acc = if w >= 64 { v } else { (acc << w) | v };
            }
            acc
        }
        Op::Not(e) => !arg(scratch, *e) & mask(node.width),
        Op::Bin { op, lhs, rhs } => {
            let (lw, rw) = (exprs[lhs.index()].width, exprs[rhs.index()].width);
            let (lv, rv) = (arg(scratch, *lhs), arg(scratch, *rhs));
            op.apply(lv, lw, rv, rw)
        }
        Op::Mux {
            sel,
            on_true,
            on_false,
        } => {
            if arg(scratch, *sel) != 0 {
                arg(scratch, *on_true)
            } else {
                arg(scratch, *on_false)
            }
        }
        Op::Select {
            index,
            arms,
            default,
        } => {
            let idx = arg(scratch, *index);
            let chosen = arms
                .iter()
                .find_map(|&(tag, e)| (tag == idx).then_some(e))
                .unwrap_or(*default);
            arg(scratch, chosen)
        }
        Op::Zext(e) => arg(scratch, *e) & mask(node.width),
        Op::Sext(e) => {
            let w = exprs[e.index()].width;
            (sign_extend(arg(scratch, *e), w) as Value) & mask(node.width)
        }
        Op::MemRead { mem, addr } => {
            let addr = arg(scratch, *addr);
            mems[cell.mem_index[mem.index()]].get(addr)
        }
    };

    scratch[id.index()] = (epoch, value);
    value
}
