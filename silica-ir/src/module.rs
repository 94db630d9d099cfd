//! Modules and the eager-validating [`ModuleBuilder`].

use crate::{
    design::{Design, ModuleId},
    error::BuildError,
    expr::{mask, BinOp, Expr, ExprId, MemoryId, Op, SignalId, Value, Width, MAX_WIDTH},
};

use std::collections::HashSet;

/// What a signal is: a port, a net, or a piece of clocked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Driven by the parent instance or by the harness.
    Input,
    /// Driven internally, visible to the parent.
    Output,
    /// Internal combinational net; exactly one driver.
    Wire,
    /// Clocked state; advanced by at most one process.
    Register {
        /// Value loaded at reset.
        reset: Value,
    },
}

/// A named, width-typed signal.
#[derive(Debug, Clone)]
pub struct Signal {
    /// Name, unique within the module.
    pub name: String,
    /// Bit width, `1..=64`.
    pub width: Width,
    /// Port direction or storage class.
    pub kind: SignalKind,
}

/// One synchronous write port of a memory.
#[derive(Debug, Clone)]
pub struct WritePort {
    /// Clock whose rising edge commits the write.
    pub clock: SignalId,
    /// 1-bit enable, sampled pre-edge.
    pub enable: ExprId,
    /// Cell address, sampled pre-edge.
    pub addr: ExprId,
    /// Data, sampled pre-edge.
    pub data: ExprId,
}

/// An array of width-typed cells with asynchronous reads and synchronous,
/// read-before-write writes.
#[derive(Debug, Clone)]
pub struct Memory {
    /// Name, unique within the module.
    pub name: String,
    /// Number of cells.
    pub depth: u64,
    /// Width of each cell.
    pub width: Width,
    /// Synchronous write ports, committed in declaration order.
    pub write_ports: Vec<WritePort>,
}

/// A combinational driver: `target <- expr`, truncating or zero-extending.
#[derive(Debug, Clone, Copy)]
pub struct Assign {
    /// Driven net or output port.
    pub target: SignalId,
    /// Driving expression.
    pub expr: ExprId,
}

/// A clocked process: register updates committed together on a rising edge.
#[derive(Debug, Clone)]
pub struct Process {
    /// Clock signal.
    pub clock: SignalId,
    /// Optional synchronous reset; when it samples 1, registers load their
    /// declared reset values instead.
    pub reset: Option<SignalId>,
    /// `(register, next value)` pairs, all committed atomically.
    pub updates: Vec<(SignalId, ExprId)>,
}

/// Binding of one child port to a parent-side signal.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Port name on the child module.
    pub port: String,
    /// Parent signal carrying (input) or receiving (output) the value.
    pub signal: SignalId,
}

/// A hierarchical child instance.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Instance name, unique within the module.
    pub name: String,
    /// The instantiated module.
    pub module: ModuleId,
    /// Port bindings, exact-width.
    pub connections: Vec<Connection>,
}

/// An immutable module: interface, state and behavior.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) signals: Vec<Signal>,
    pub(crate) ports: Vec<SignalId>,
    pub(crate) memories: Vec<Memory>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) assigns: Vec<Assign>,
    pub(crate) processes: Vec<Process>,
    pub(crate) instances: Vec<Instance>,
}

impl Module {
    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All signals, indexable by [`SignalId`].
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Ports in declaration order.
    pub fn ports(&self) -> &[SignalId] {
        &self.ports
    }

    /// All memories, indexable by [`MemoryId`].
    pub fn memories(&self) -> &[Memory] {
        &self.memories
    }

    /// The expression arena.
    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    /// Combinational drivers.
    pub fn assigns(&self) -> &[Assign] {
        &self.assigns
    }

    /// Clocked processes.
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Child instances.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Look up a signal by name.
    pub fn signal(&self, name: &str) -> Option<SignalId> {
        self.signals
            .iter()
            .position(|s| s.name == name)
            .map(|i| SignalId(i as u32))
    }

    /// Look up a port by name, with its direction and width.
    pub fn port(&self, name: &str) -> Option<(SignalId, &Signal)> {
        self.ports.iter().copied().find_map(|id| {
            let sig = &self.signals[id.index()];
            (sig.name == name).then_some((id, sig))
        })
    }
}

/// Handle to a declared signal, usable directly as an expression operand.
#[derive(Debug, Clone, Copy)]
pub struct Sig {
    /// The declared signal.
    pub id: SignalId,
    /// Arena node referencing the signal's value.
    pub expr: ExprId,
    /// Declared width.
    pub width: Width,
}

impl From<Sig> for ExprId {
    fn from(sig: Sig) -> ExprId {
        sig.expr
    }
}

/// Operand position accepting either a [`Sig`] handle or a raw [`ExprId`].
#[derive(Debug, Clone, Copy)]
pub struct Operand(ExprId);

impl From<ExprId> for Operand {
    fn from(e: ExprId) -> Operand {
        Operand(e)
    }
}

impl From<Sig> for Operand {
    fn from(sig: Sig) -> Operand {
        Operand(sig.expr)
    }
}

/// Handle to a clocked process under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcId(usize);

/// Builder for one module. Declarations and behavior are validated eagerly;
/// [`build`](Self::build) performs the final whole-module checks (every net
/// and output port driven).
#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
    names: HashSet<String>,
    /// Signals that already have a combinational or instance-output driver.
    driven: HashSet<SignalId>,
    /// Registers already claimed by a process update.
    updated: HashSet<SignalId>,
}

impl ModuleBuilder {
    /// Start a module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            module: Module {
                name: name.into(),
                signals: Vec::new(),
                ports: Vec::new(),
                memories: Vec::new(),
                exprs: Vec::new(),
                assigns: Vec::new(),
                processes: Vec::new(),
                instances: Vec::new(),
            },
            names: HashSet::new(),
            driven: HashSet::new(),
            updated: HashSet::new(),
        }
    }

    fn check_width(&self, name: &str, width: Width) -> Result<(), BuildError> {
        if width == 0 || width > MAX_WIDTH {
            return Err(BuildError::WidthOutOfRange {
                name: name.to_string(),
                width: u64::from(width),
            });
        }
        Ok(())
    }

    fn declare(
        &mut self,
        name: impl Into<String>,
        width: Width,
        kind: SignalKind,
    ) -> Result<Sig, BuildError> {
        let name = name.into();
        self.check_width(&name, width)?;
        if !self.names.insert(name.clone()) {
            return Err(BuildError::DuplicateName(name));
        }
        let id = SignalId(self.module.signals.len() as u32);
        self.module.signals.push(Signal { name, width, kind });
        if matches!(kind, SignalKind::Input | SignalKind::Output) {
            self.module.ports.push(id);
        }
        let expr = self.push(Op::Sig(id), width);
        Ok(Sig { id, expr, width })
    }

    /// Declare an input port.
    pub fn input(&mut self, name: impl Into<String>, width: Width) -> Result<Sig, BuildError> {
        self.declare(name, width, SignalKind::Input)
    }

    /// Declare an output port.
    pub fn output(&mut self, name: impl Into<String>, width: Width) -> Result<Sig, BuildError> {
        self.declare(name, width, SignalKind::Output)
    }

    /// Declare an internal net.
    pub fn wire(&mut self, name: impl Into<String>, width: Width) -> Result<Sig, BuildError> {
        self.declare(name, width, SignalKind::Wire)
    }

    /// Declare a register with a reset value (truncated to the width).
    pub fn reg(
        &mut self,
        name: impl Into<String>,
        width: Width,
        reset: Value,
    ) -> Result<Sig, BuildError> {
        let reset = reset & mask(width.clamp(1, MAX_WIDTH));
        self.declare(name, width, SignalKind::Register { reset })
    }

    /// Declare a memory of `depth` cells, each `width` bits.
    pub fn memory(
        &mut self,
        name: impl Into<String>,
        depth: u64,
        width: Width,
    ) -> Result<MemoryId, BuildError> {
        let name = name.into();
        self.check_width(&name, width)?;
        if depth == 0 {
            return Err(BuildError::ZeroDepth(name));
        }
        if !self.names.insert(name.clone()) {
            return Err(BuildError::DuplicateName(name));
        }
        let id = MemoryId(self.module.memories.len() as u32);
        self.module.memories.push(Memory {
            name,
            depth,
            width,
            write_ports: Vec::new(),
        });
        Ok(id)
    }

    fn push(&mut self, op: Op, width: Width) -> ExprId {
        let id = ExprId(self.module.exprs.len() as u32);
        self.module.exprs.push(Expr { op, width });
        id
    }

    fn width_of(&self, e: ExprId) -> Width {
        self.module.exprs[e.index()].width
    }

    /// Constant literal, truncated to `width`.
    pub fn lit(&mut self, value: Value, width: Width) -> ExprId {
        let w = width.clamp(1, MAX_WIDTH);
        self.push(Op::Lit(value & mask(w)), w)
    }

    /// Single bit `[i]`.
    pub fn bit(&mut self, e: impl Into<Operand>, i: Width) -> Result<ExprId, BuildError> {
        self.bits(e, i, i)
    }

    /// Inclusive bit range `[hi:lo]`.
    pub fn bits(
        &mut self,
        e: impl Into<Operand>,
        hi: Width,
        lo: Width,
    ) -> Result<ExprId, BuildError> {
        let src = e.into().0;
        let width = self.width_of(src);
        if hi < lo || hi >= width {
            return Err(BuildError::SliceOutOfRange { hi, lo, width });
        }
        Ok(self.push(Op::Slice { src, lo }, hi - lo + 1))
    }

    /// Concatenation, most significant part first.
    pub fn concat(&mut self, parts: &[ExprId]) -> Result<ExprId, BuildError> {
        if parts.is_empty() {
            return Err(BuildError::EmptyConcat);
        }
        let width: Width = parts.iter().map(|&p| self.width_of(p)).sum();
        self.check_width("concat", width)?;
        Ok(self.push(Op::Concat(parts.to_vec()), width))
    }

    /// `count` copies of `e`, concatenated.
    pub fn repeat(&mut self, e: impl Into<Operand>, count: u32) -> Result<ExprId, BuildError> {
        let src = e.into().0;
        if count == 0 {
            return Err(BuildError::ZeroRepeat);
        }
        let width = self.width_of(src) * count;
        self.check_width("repeat", width)?;
        Ok(self.push(Op::Repeat { src, count }, width))
    }

    /// Bitwise complement.
    pub fn not(&mut self, e: impl Into<Operand>) -> ExprId {
        let src = e.into().0;
        let width = self.width_of(src);
        self.push(Op::Not(src), width)
    }

    /// Zero-extend (or truncate) to `width`.
    pub fn zext(&mut self, e: impl Into<Operand>, width: Width) -> Result<ExprId, BuildError> {
        let src = e.into().0;
        self.check_width("zext", width)?;
        Ok(self.push(Op::Zext(src), width))
    }

    /// Sign-extend to `width`; narrowing is a build error.
    pub fn sext(&mut self, e: impl Into<Operand>, width: Width) -> Result<ExprId, BuildError> {
        let src = e.into().0;
        self.check_width("sext", width)?;
        let from = self.width_of(src);
        if width < from {
            return Err(BuildError::SignExtendNarrows { from, to: width });
        }
        Ok(self.push(Op::Sext(src), width))
    }

    /// Generic two-operand node.
    pub fn binary(
        &mut self,
        op: BinOp,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> ExprId {
        let (lhs, rhs) = (lhs.into().0, rhs.into().0);
        let width = op.result_width(self.width_of(lhs), self.width_of(rhs));
        self.push(Op::Bin { op, lhs, rhs }, width)
    }

    /// Two-way choice on a 1-bit selector.
    pub fn mux(
        &mut self,
        sel: impl Into<Operand>,
        on_true: impl Into<Operand>,
        on_false: impl Into<Operand>,
    ) -> Result<ExprId, BuildError> {
        let sel = sel.into().0;
        let (on_true, on_false) = (on_true.into().0, on_false.into().0);
        let sel_width = self.width_of(sel);
        if sel_width != 1 {
            return Err(BuildError::MuxSelectorWidth(sel_width));
        }
        let width = self.width_of(on_true).max(self.width_of(on_false));
        Ok(self.push(
            Op::Mux {
                sel,
                on_true,
                on_false,
            },
            width,
        ))
    }

    /// N-way choice with a default arm.
    pub fn select(
        &mut self,
        index: impl Into<Operand>,
        arms: &[(Value, ExprId)],
        default: impl Into<Operand>,
    ) -> ExprId {
        let index = index.into().0;
        let default = default.into().0;
        let width = arms
            .iter()
            .map(|&(_, e)| self.width_of(e))
            .chain([self.width_of(default)])
            .max()
            .unwrap_or(1);
        self.push(
            Op::Select {
                index,
                arms: arms.to_vec(),
                default,
            },
            width,
        )
    }

    /// Asynchronous memory read.
    pub fn mem_read(&mut self, mem: MemoryId, addr: impl Into<Operand>) -> ExprId {
        let addr = addr.into().0;
        let width = self.module.memories[mem.index()].width;
        self.push(Op::MemRead { mem, addr }, width)
    }

    /// Named local binding: a wire named `name` driven by `e`.
    pub fn local(
        &mut self,
        name: impl Into<String>,
        e: impl Into<Operand>,
    ) -> Result<ExprId, BuildError> {
        let e = e.into().0;
        let w = self.wire(name, self.width_of(e))?;
        self.assign(w, e)?;
        Ok(w.expr)
    }

    /// Drive a net or output port. Zero-extends or truncates to the target
    /// width; a second driver is a build error.
    pub fn assign(&mut self, target: Sig, e: impl Into<Operand>) -> Result<(), BuildError> {
        let mut expr = e.into().0;
        let sig = &self.module.signals[target.id.index()];
        match sig.kind {
            SignalKind::Wire | SignalKind::Output => {}
            _ => {
                return Err(BuildError::WrongSignalKind {
                    name: sig.name.clone(),
                    expected: "net or output port",
                })
            }
        }
        if !self.driven.insert(target.id) {
            return Err(BuildError::DuplicateDriver(sig.name.clone()));
        }
        let target_width = self.module.signals[target.id.index()].width;
        if self.width_of(expr) != target_width {
            expr = self.push(Op::Zext(expr), target_width);
        }
        self.module.assigns.push(Assign {
            target: target.id,
            expr,
        });
        Ok(())
    }

    /// Open a clocked process on `clock`.
    pub fn process(&mut self, clock: Sig) -> ProcId {
        let id = ProcId(self.module.processes.len());
        self.module.processes.push(Process {
            clock: clock.id,
            reset: None,
            updates: Vec::new(),
        });
        id
    }

    /// Attach a synchronous reset to a process.
    pub fn process_reset(&mut self, proc: ProcId, reset: Sig) {
        self.module.processes[proc.0].reset = Some(reset.id);
    }

    /// Schedule `reg <- e` on the process clock. A register may be updated by
    /// at most one process across the module.
    pub fn update(
        &mut self,
        proc: ProcId,
        reg: Sig,
        e: impl Into<Operand>,
    ) -> Result<(), BuildError> {
        let mut expr = e.into().0;
        let sig = &self.module.signals[reg.id.index()];
        if !matches!(sig.kind, SignalKind::Register { .. }) {
            return Err(BuildError::WrongSignalKind {
                name: sig.name.clone(),
                expected: "register",
            });
        }
        if !self.updated.insert(reg.id) {
            return Err(BuildError::DuplicateDriver(sig.name.clone()));
        }
        let width = sig.width;
        if self.width_of(expr) != width {
            expr = self.push(Op::Zext(expr), width);
        }
        self.module.processes[proc.0].updates.push((reg.id, expr));
        Ok(())
    }

    /// Add a synchronous write port to a memory. Address and data are
    /// truncated or zero-extended to the memory's geometry; the enable must
    /// be a single bit.
    pub fn write_port(
        &mut self,
        mem: MemoryId,
        clock: Sig,
        enable: impl Into<Operand>,
        addr: impl Into<Operand>,
        data: impl Into<Operand>,
    ) -> Result<(), BuildError> {
        let enable = enable.into().0;
        let (addr, mut data) = (addr.into().0, data.into().0);
        let enable_width = self.width_of(enable);
        if enable_width != 1 {
            return Err(BuildError::MuxSelectorWidth(enable_width));
        }
        let cell_width = self.module.memories[mem.index()].width;
        if self.width_of(data) != cell_width {
            data = self.push(Op::Zext(data), cell_width);
        }
        self.module.memories[mem.index()].write_ports.push(WritePort {
            clock: clock.id,
            enable,
            addr,
            data,
        });
        Ok(())
    }

    /// Instantiate `child` under `name`, binding child ports to parent-side
    /// expressions. Inputs accept any expression (non-signal operands are
    /// routed through an implicit wire); outputs must be bound to an undriven
    /// wire, which the instance then drives.
    pub fn instance(
        &mut self,
        design: &Design,
        name: impl Into<String>,
        child: ModuleId,
        bindings: &[(&str, ExprId)],
    ) -> Result<(), BuildError> {
        let name = name.into();
        if !self.names.insert(name.clone()) {
            return Err(BuildError::DuplicateName(name));
        }
        let child_module = design
            .module(child)
            .ok_or_else(|| BuildError::UnknownModule(name.clone()))?;

        let (child_name, child_ports): (String, Vec<(String, Width, SignalKind)>) = (
            child_module.name().to_string(),
            child_module
                .ports()
                .iter()
                .map(|&pid| {
                    let sig = &child_module.signals()[pid.index()];
                    (sig.name.clone(), sig.width, sig.kind)
                })
                .collect(),
        );

        let mut connections = Vec::with_capacity(bindings.len());
        let mut bound: HashSet<&str> = HashSet::new();
        for &(port, expr) in bindings {
            let (_, port_width, port_kind) = child_ports
                .iter()
                .find(|(n, _, _)| n == port)
                .cloned()
                .ok_or_else(|| BuildError::UnknownPort {
                    module: child_name.clone(),
                    port: port.to_string(),
                })?;
            bound.insert(port);
            let expr_width = self.width_of(expr);
            if expr_width != port_width {
                return Err(BuildError::BindWidthMismatch {
                    instance: name.clone(),
                    port: port.to_string(),
                    port_width,
                    signal_width: expr_width,
                });
            }
            let parent_sig = match (port_kind, &self.module.exprs[expr.index()].op) {
                (SignalKind::Input, Op::Sig(id)) => *id,
                (SignalKind::Input, _) => {
                    // Route a computed operand through an implicit wire so
                    // the connection always names a parent signal.
                    let alias = format!("{name}${port}");
                    let w = self.declare(alias, expr_width, SignalKind::Wire)?;
                    self.driven.insert(w.id);
                    self.module.assigns.push(Assign {
                        target: w.id,
                        expr,
                    });
                    w.id
                }
                (_, Op::Sig(id)) => {
                    let id = *id;
                    let sig = &self.module.signals[id.index()];
                    if !matches!(sig.kind, SignalKind::Wire | SignalKind::Output) {
                        return Err(BuildError::OutputBindNotWire {
                            instance: name.clone(),
                            port: port.to_string(),
                        });
                    }
                    if !self.driven.insert(id) {
                        return Err(BuildError::DuplicateDriver(sig.name.clone()));
                    }
                    id
                }
                _ => {
                    return Err(BuildError::OutputBindNotWire {
                        instance: name.clone(),
                        port: port.to_string(),
                    })
                }
            };
            connections.push(Connection {
                port: port.to_string(),
                signal: parent_sig,
            });
        }

        // Child inputs may not dangle; dangling child outputs are fine.
        for (port_name, _, kind) in &child_ports {
            if matches!(kind, SignalKind::Input) && !bound.contains(port_name.as_str()) {
                return Err(BuildError::UnboundPort {
                    instance: name,
                    port: port_name.clone(),
                });
            }
        }

        self.module.instances.push(Instance {
            name,
            module: child,
            connections,
        });
        Ok(())
    }

    /// Finish the module: every net and output port must have a driver.
    /// Instance-output bindings count as drivers; they were marked when the
    /// instance was wired.
    pub fn build(self) -> Result<Module, BuildError> {
        for (i, sig) in self.module.signals.iter().enumerate() {
            let id = SignalId(i as u32);
            if matches!(sig.kind, SignalKind::Wire | SignalKind::Output)
                && !self.driven.contains(&id)
            {
                return Err(BuildError::UndrivenSignal(sig.name.clone()));
            }
        }
        Ok(self.module)
    }
}
