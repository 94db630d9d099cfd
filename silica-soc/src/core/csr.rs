//! The CSR file: a 4096-entry memory with alias views for the supervisor
//! registers, an effective-`mip` read path, and dedicated trap write ports.

use crate::consts::{csr, status};
use silica_ir::{BinOp, BuildError, Design, ExprId, ModuleBuilder, ModuleId};

/// Build the CSR file.
///
/// One write port carries CSR-instruction writes, one carries the status
/// push/pop of trap entry and `MRET`/`SRET`, and three carry the
/// `epc`/`cause`/`tval` stores of trap entry. The supervisor registers
/// `sstatus`/`sie`/`sip` are views: reads mask the machine register, writes
/// read-modify-write it, so there is a single storage cell per architectural
/// register and the views can never diverge.
pub(crate) fn build_csrfile(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("csrfile");
    let clk = m.input("clk", 1)?;
    let rst = m.input("rst", 1)?;
    let raddr = m.input("raddr", 12)?;
    let dbg_addr = m.input("dbg_addr", 12)?;
    let w_en = m.input("w_en", 1)?;
    let w_addr = m.input("w_addr", 12)?;
    let w_data = m.input("w_data", 32)?;
    let trap_en = m.input("trap_en", 1)?;
    let epc_addr = m.input("epc_addr", 12)?;
    let epc_data = m.input("epc_data", 32)?;
    let cause_addr = m.input("cause_addr", 12)?;
    let cause_data = m.input("cause_data", 32)?;
    let tval_addr = m.input("tval_addr", 12)?;
    let tval_data = m.input("tval_data", 32)?;
    let status_en = m.input("status_en", 1)?;
    let status_data = m.input("status_data", 32)?;
    let irq_software = m.input("irq_software", 1)?;
    let irq_timer = m.input("irq_timer", 1)?;
    let irq_external = m.input("irq_external", 1)?;

    let rdata = m.output("rdata", 32)?;
    let dbg_data = m.output("dbg_data", 32)?;
    let mstatus_out = m.output("mstatus", 32)?;
    let mie_out = m.output("mie", 32)?;
    let mip_out = m.output("mip", 32)?;
    let mtvec_out = m.output("mtvec", 32)?;
    let stvec_out = m.output("stvec", 32)?;
    let mepc_out = m.output("mepc", 32)?;
    let sepc_out = m.output("sepc", 32)?;
    let medeleg_out = m.output("medeleg", 32)?;
    let mideleg_out = m.output("mideleg", 32)?;
    let satp_out = m.output("satp", 32)?;

    let cells = m.memory("cells", 4096, 32)?;

    let fixed = |m: &mut ModuleBuilder, addr: u64| -> ExprId {
        let a = m.lit(addr, 12);
        m.mem_read(cells, a)
    };
    let mstatus = fixed(&mut m, csr::MSTATUS);
    let mie = fixed(&mut m, csr::MIE);
    let mip_stored = fixed(&mut m, csr::MIP);
    let mideleg = fixed(&mut m, csr::MIDELEG);

    // Pending bits: stored supervisor bits OR'd with the external lines on
    // their machine positions.
    let soft32 = m.zext(irq_software, 32)?;
    let timer32 = m.zext(irq_timer, 32)?;
    let ext32 = m.zext(irq_external, 32)?;
    let three = m.lit(3, 6);
    let seven = m.lit(7, 6);
    let eleven = m.lit(11, 6);
    let soft_shift = m.binary(BinOp::Shl, soft32, three);
    let timer_shift = m.binary(BinOp::Shl, timer32, seven);
    let ext_shift = m.binary(BinOp::Shl, ext32, eleven);
    let lines = m.binary(BinOp::Or, soft_shift, timer_shift);
    let lines = m.binary(BinOp::Or, lines, ext_shift);
    let mip_eff = m.binary(BinOp::Or, mip_stored, lines);
    let mip_eff = m.local("mip_eff", mip_eff)?;

    // Alias resolution for the instruction write port.
    let mstatus_lit = m.lit(csr::MSTATUS, 12);
    let mie_lit = m.lit(csr::MIE, 12);
    let mip_lit = m.lit(csr::MIP, 12);
    let phys_addr = m.select(
        w_addr,
        &[
            (csr::SSTATUS, mstatus_lit),
            (csr::SIE, mie_lit),
            (csr::SIP, mip_lit),
        ],
        w_addr,
    );

    let merge = |m: &mut ModuleBuilder,
                 old: ExprId,
                 new: ExprId,
                 mask: ExprId|
     -> Result<ExprId, BuildError> {
        let keep = m.not(mask);
        let kept = m.binary(BinOp::And, old, keep);
        let taken = m.binary(BinOp::And, new, mask);
        Ok(m.binary(BinOp::Or, kept, taken))
    };

    let sstatus_mask = m.lit(status::SSTATUS_MASK, 32);
    let sstatus_merge = merge(&mut m, mstatus, w_data.into(), sstatus_mask)?;
    let sie_merge = merge(&mut m, mie, w_data.into(), mideleg)?;
    // Software may only pend SSIP through the sip view, and only when it is
    // delegated.
    let ssip_bit = m.lit(0x2, 32);
    let sip_mask = m.binary(BinOp::And, mideleg, ssip_bit);
    let sip_merge = merge(&mut m, mip_stored, w_data.into(), sip_mask)?;
    // The machine-level pending bits mirror the external lines and are
    // read-only; only the supervisor bits have storage.
    let s_pending_bits = m.lit(0x222, 32);
    let mip_direct = m.binary(BinOp::And, w_data, s_pending_bits);

    let w_data_eff = m.select(
        w_addr,
        &[
            (csr::SSTATUS, sstatus_merge),
            (csr::SIE, sie_merge),
            (csr::SIP, sip_merge),
            (csr::MIP, mip_direct),
        ],
        w_data,
    );

    let not_rst = m.not(rst);
    let wp0_en = m.binary(BinOp::And, w_en, not_rst);
    m.write_port(cells, clk, wp0_en, phys_addr, w_data_eff)?;

    let status_gated = m.binary(BinOp::And, status_en, not_rst);
    let mstatus_addr = m.lit(csr::MSTATUS, 12);
    m.write_port(cells, clk, status_gated, mstatus_addr, status_data)?;

    let trap_gated = m.binary(BinOp::And, trap_en, not_rst);
    m.write_port(cells, clk, trap_gated, epc_addr, epc_data)?;
    m.write_port(cells, clk, trap_gated, cause_addr, cause_data)?;
    m.write_port(cells, clk, trap_gated, tval_addr, tval_data)?;

    // Read view shared by the datapath and debug ports.
    let view = |m: &mut ModuleBuilder, addr: ExprId| -> Result<ExprId, BuildError> {
        let raw = m.mem_read(cells, addr);
        let sstatus_view = m.binary(BinOp::And, mstatus, sstatus_mask);
        let sie_view = m.binary(BinOp::And, mie, mideleg);
        let sip_view = m.binary(BinOp::And, mip_eff, mideleg);
        Ok(m.select(
            addr,
            &[
                (csr::SSTATUS, sstatus_view),
                (csr::SIE, sie_view),
                (csr::SIP, sip_view),
                (csr::MIP, mip_eff),
            ],
            raw,
        ))
    };
    let read_main = view(&mut m, raddr.expr)?;
    m.assign(rdata, read_main)?;
    let read_dbg = view(&mut m, dbg_addr.expr)?;
    m.assign(dbg_data, read_dbg)?;

    m.assign(mstatus_out, mstatus)?;
    m.assign(mie_out, mie)?;
    m.assign(mip_out, mip_eff)?;
    let mtvec = fixed(&mut m, csr::MTVEC);
    m.assign(mtvec_out, mtvec)?;
    let stvec = fixed(&mut m, csr::STVEC);
    m.assign(stvec_out, stvec)?;
    let mepc = fixed(&mut m, csr::MEPC);
    m.assign(mepc_out, mepc)?;
    let sepc = fixed(&mut m, csr::SEPC);
    m.assign(sepc_out, sepc)?;
    let medeleg = fixed(&mut m, csr::MEDELEG);
    m.assign(medeleg_out, medeleg)?;
    m.assign(mideleg_out, mideleg)?;
    let satp = fixed(&mut m, csr::SATP);
    m.assign(satp_out, satp)?;

    Ok(design.add_module(m.build()?))
}
