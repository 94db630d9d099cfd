//! Flattening the instance hierarchy and scheduling combinational drivers.

use crate::error::ElaborationError;
use hashbrown::HashMap;
use silica_ir::{Design, ExprId, ModuleId, Op, SignalId, SignalKind, Value, Width};

/// Index of a flattened signal node. Bound ports alias their parent signal,
/// so one node may be visible under several hierarchical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// Top-level input port; the only legal poke target.
    TopInput,
    /// Combinationally driven net or output port.
    Comb,
    /// Clocked state with its reset value.
    Register(Value),
}

#[derive(Debug)]
pub(crate) struct NodeInfo {
    pub name: String,
    pub width: Width,
    pub kind: NodeKind,
}

/// One flattened module instance.
#[derive(Debug)]
pub(crate) struct Cell {
    pub module: ModuleId,
    /// `SignalId -> NodeId`, with bound ports resolved to parent nodes.
    pub sig_node: Vec<NodeId>,
    /// `MemoryId -> flat memory index`.
    pub mem_index: Vec<usize>,
    /// Expression arena length, for evaluation scratch sizing.
    pub arena_len: usize,
}

#[derive(Debug)]
pub(crate) struct FlatWritePort {
    pub cell: usize,
    pub clock: NodeId,
    pub enable: ExprId,
    pub addr: ExprId,
    pub data: ExprId,
}

#[derive(Debug)]
pub(crate) struct FlatMem {
    pub name: String,
    pub depth: u64,
    pub width: Width,
    pub ports: Vec<FlatWritePort>,
}

/// A combinational driver bound to its flattened target.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Driver {
    pub node: NodeId,
    pub cell: usize,
    pub expr: ExprId,
}

/// A flattened clocked process; updates carry the target's reset value so a
/// synchronous reset needs no extra lookup.
#[derive(Debug)]
pub(crate) struct FlatProc {
    pub clock: NodeId,
    pub reset: Option<NodeId>,
    pub cell: usize,
    pub updates: Vec<(NodeId, ExprId, Value)>,
}

#[derive(Debug)]
pub(crate) struct Elaborated {
    pub cells: Vec<Cell>,
    pub nodes: Vec<NodeInfo>,
    pub mems: Vec<FlatMem>,
    /// Drivers in topological order; evaluating once in this order settles
    /// the whole design.
    pub drivers: Vec<Driver>,
    pub procs: Vec<FlatProc>,
    /// Distinct clock nodes, for edge tracking.
    pub clocks: Vec<NodeId>,
    /// Every hierarchical name, aliases included.
    pub names: HashMap<String, NodeId>,
    /// Memory paths for debug access.
    pub mem_names: HashMap<String, usize>,
}

pub(crate) fn elaborate(
    design: &Design,
    top: ModuleId,
) -> Result<Elaborated, ElaborationError> {
    let mut elab = Elaborated {
        cells: Vec::new(),
        nodes: Vec::new(),
        mems: Vec::new(),
        drivers: Vec::new(),
        procs: Vec::new(),
        clocks: Vec::new(),
        names: HashMap::new(),
        mem_names: HashMap::new(),
    };
    instantiate(design, top, String::new(), &HashMap::new(), &mut elab)?;

    let mut seen_clocks = HashMap::new();
    for proc in &elab.procs {
        seen_clocks.entry(proc.clock).or_insert(());
    }
    for mem in &elab.mems {
        for port in &mem.ports {
            seen_clocks.entry(port.clock).or_insert(());
        }
    }
    elab.clocks = seen_clocks.into_keys().collect();
    elab.clocks.sort_by_key(|n| n.0);

    schedule(design, &mut elab)?;
    Ok(elab)
}

/// Recursively flatten `module` under `path`. `bound` maps the module's own
/// port ids to already-created parent nodes.
fn instantiate(
    design: &Design,
    module_id: ModuleId,
    path: String,
    bound: &HashMap<SignalId, NodeId>,
    elab: &mut Elaborated,
) -> Result<(), ElaborationError> {
    let module = design
        .module(module_id)
        .ok_or_else(|| ElaborationError::MissingModule(path.clone()))?;

    let join = |path: &str, name: &str| {
        if path.is_empty() {
            name.to_string()
        } else {
            format!("{path}.{name}")
        }
    };

    let mut sig_node = Vec::with_capacity(module.signals().len());
    for (i, sig) in module.signals().iter().enumerate() {
        let sid = SignalId::from_index(i);
        let full = join(&path, &sig.name);
        let node = match bound.get(&sid) {
            Some(&parent) => parent,
            None => {
                let node = NodeId(elab.nodes.len() as u32);
                let kind = match sig.kind {
                    SignalKind::Register { reset } => NodeKind::Register(reset),
                    SignalKind::Input => NodeKind::TopInput,
                    SignalKind::Output | SignalKind::Wire => NodeKind::Comb,
                };
                elab.nodes.push(NodeInfo {
                    name: full.clone(),
                    width: sig.width,
                    kind,
                });
                node
            }
        };
        elab.names.insert(full, node);
        sig_node.push(node);
    }

    let cell = elab.cells.len();
    let mut mem_index = Vec::with_capacity(module.memories().len());
    for mem in module.memories() {
        let idx = elab.mems.len();
        let full = join(&path, &mem.name);
        elab.mem_names.insert(full.clone(), idx);
        elab.mems.push(FlatMem {
            name: full,
            depth: mem.depth,
            width: mem.width,
            ports: mem
                .write_ports
                .iter()
                .map(|p| FlatWritePort {
                    cell,
                    clock: sig_node[p.clock.index()],
                    enable: p.enable,
                    addr: p.addr,
                    data: p.data,
                })
                .collect(),
        });
        mem_index.push(idx);
    }

    for assign in module.assigns() {
        elab.drivers.push(Driver {
            node: sig_node[assign.target.index()],
            cell,
            expr: assign.expr,
        });
    }

    for proc in module.processes() {
        elab.procs.push(FlatProc {
            clock: sig_node[proc.clock.index()],
            reset: proc.reset.map(|r| sig_node[r.index()]),
            cell,
            updates: proc
                .updates
                .iter()
                .map(|&(reg, expr)| {
                    let reset = match module.signals()[reg.index()].kind {
                        SignalKind::Register { reset } => reset,
                        _ => 0,
                    };
                    (sig_node[reg.index()], expr, reset)
                })
                .collect(),
        });
    }

    elab.cells.push(Cell {
        module: module_id,
        sig_node,
        mem_index,
        arena_len: module.exprs().len(),
    });

    for inst in module.instances() {
        let child = design
            .module(inst.module)
            .ok_or_else(|| ElaborationError::MissingModule(join(&path, &inst.name)))?;
        let mut child_bound = HashMap::new();
        for conn in &inst.connections {
            let (child_sid, _) = child
                .port(&conn.port)
                .ok_or_else(|| ElaborationError::MissingModule(join(&path, &inst.name)))?;
            let parent_node = elab.cells[cell].sig_node[conn.signal.index()];
            child_bound.insert(child_sid, parent_node);
        }
        instantiate(
            design,
            inst.module,
            join(&path, &inst.name),
            &child_bound,
            elab,
        )?;
    }

    Ok(())
}

/// Order drivers topologically (Kahn). A leftover driver after the queue
/// drains sits on a combinational cycle.
fn schedule(design: &Design, elab: &mut Elaborated) -> Result<(), ElaborationError> {
    let n_drivers = elab.drivers.len();

    // Each node has at most one driver.
    let mut driver_of: Vec<Option<usize>> = vec![None; elab.nodes.len()];
    for (i, d) in elab.drivers.iter().enumerate() {
        if driver_of[d.node.index()].replace(i).is_some() {
            return Err(ElaborationError::DuplicateDriver {
                signal: elab.nodes[d.node.index()].name.clone(),
            });
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n_drivers];
    let mut indegree: Vec<usize> = vec![0; n_drivers];

    for (i, d) in elab.drivers.iter().enumerate() {
        let cell = &elab.cells[d.cell];
        let exprs = design.module(cell.module).expect("validated above").exprs();
        let mut visited = vec![false; cell.arena_len];
        let mut stack = vec![d.expr];
        while let Some(e) = stack.pop() {
            if core::mem::replace(&mut visited[e.index()], true) {
                continue;
            }
            match &exprs[e.index()].op {
                Op::Sig(s) => {
                    let node = cell.sig_node[s.index()];
                    if let Some(dep) = driver_of[node.index()] {
                        successors[dep].push(i);
                        indegree[i] += 1;
                    }
                }
                Op::Lit(_) => {}
                Op::Slice { src, .. } | Op::Repeat { src, .. } => stack.push(*src),
                Op::Not(e) | Op::Zext(e) | Op::Sext(e) => stack.push(*e),
                Op::Concat(parts) => stack.extend(parts.iter().copied()),
                Op::Bin { lhs, rhs, .. } => {
                    stack.push(*lhs);
                    stack.push(*rhs);
                }
                Op::Mux {
                    sel,
                    on_true,
                    on_false,
                } => {
                    stack.push(*sel);
                    stack.push(*on_true);
                    stack.push(*on_false);
                }
                Op::Select {
                    index,
                    arms,
                    default,
                } => {
                    stack.push(*index);
                    stack.push(*default);
                    stack.extend(arms.iter().map(|&(_, e)| e));
                }
                // Memory reads observe committed state, not a combinational
                // driver; the address still creates a dependency.
                Op::MemRead { addr, .. } => stack.push(*addr),
            }
        }
    }

    let mut queue: Vec<usize> = indegree
        .iter()
        .enumerate()
        .filter_map(|(i, &deg)| (deg == 0).then_some(i))
        .collect();
    let mut order = Vec::with_capacity(n_drivers);
    while let Some(i) = queue.pop() {
        order.push(i);
        for &succ in &successors[i] {
            indegree[succ] -= 1;
            if indegree[succ] == 0 {
                queue.push(succ);
            }
        }
    }

    if order.len() != n_drivers {
        let stuck = indegree
            .iter()
            .position(|&deg| deg > 0)
            .expect("cycle implies a blocked driver");
        return Err(ElaborationError::CombinationalCycle {
            signal: elab.nodes[elab.drivers[stuck].node.index()].name.clone(),
        });
    }

    let ordered: Vec<Driver> = order.iter().map(|&i| elab.drivers[i]).collect();
    elab.drivers = ordered;
    Ok(())
}
