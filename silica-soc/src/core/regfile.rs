//! The 32-entry register file: memory-backed, asynchronous reads, one
//! synchronous write port with architectural x0 suppression.

use silica_ir::{BinOp, BuildError, Design, ModuleBuilder, ModuleId, Sig};

/// Build the register file.
///
/// Reads are asynchronous; the write port commits on the rising edge with
/// read-before-write semantics, which is exactly what a single-cycle core
/// needs. The `forward`/`fwd_addr`/`fwd_data` ports bypass the array for a
/// same-cycle read-after-write: a pipelined core drives them from its
/// registered writeback stage, the single-cycle core ties them off. The
/// bypass deliberately has its own value port rather than snooping `wdata`,
/// so tying `forward` low leaves no combinational path from writeback back
/// into the read ports.
pub(crate) fn build_regfile(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("regfile");
    let clk = m.input("clk", 1)?;
    let rst = m.input("rst", 1)?;
    let raddr1 = m.input("raddr1", 5)?;
    let raddr2 = m.input("raddr2", 5)?;
    let dbg_addr = m.input("dbg_addr", 5)?;
    let waddr = m.input("waddr", 5)?;
    let wdata = m.input("wdata", 32)?;
    let wen = m.input("wen", 1)?;
    let forward = m.input("forward", 1)?;
    let fwd_addr = m.input("fwd_addr", 5)?;
    let fwd_data = m.input("fwd_data", 32)?;
    let rdata1 = m.output("rdata1", 32)?;
    let rdata2 = m.output("rdata2", 32)?;
    let dbg_data = m.output("dbg_data", 32)?;

    let regs = m.memory("regs", 32, 32)?;

    // x0 is architecturally zero: writes to address 0 are dropped.
    let zero5 = m.lit(0, 5);
    let waddr_is_zero = m.binary(BinOp::Eq, waddr, zero5);
    let waddr_nonzero = m.not(waddr_is_zero);
    let not_rst = m.not(rst);
    let wen_gated = m.binary(BinOp::And, wen, waddr_nonzero);
    let wen_gated = m.binary(BinOp::And, wen_gated, not_rst);
    m.write_port(regs, clk, wen_gated, waddr, wdata)?;

    let read = |m: &mut ModuleBuilder, addr: Sig, out: Sig| -> Result<(), BuildError> {
        let raw = m.mem_read(regs, addr);
        let same = m.binary(BinOp::Eq, fwd_addr, addr);
        let fwd = m.binary(BinOp::And, forward, same);
        let bypassed = m.mux(fwd, fwd_data, raw)?;
        let zero5 = m.lit(0, 5);
        let addr_is_zero = m.binary(BinOp::Eq, addr, zero5);
        let zero32 = m.lit(0, 32);
        let value = m.mux(addr_is_zero, zero32, bypassed)?;
        m.assign(out, value)
    };
    read(&mut m, raddr1, rdata1)?;
    read(&mut m, raddr2, rdata2)?;
    read(&mut m, dbg_addr, dbg_data)?;

    Ok(design.add_module(m.build()?))
}
