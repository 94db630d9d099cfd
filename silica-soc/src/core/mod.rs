//! The single-cycle RV32IMA + Sv32 + M/S-mode core, assembled in IR.
//!
//! One rising edge retires one instruction; everything between edges
//! settles combinationally from the previous edge's architectural state.

mod alu;
mod csr;
mod decode;
mod mmu;
mod regfile;

use crate::consts::{amo, cause, csr as csr_num, mode, status};
use silica_ir::{BinOp, BuildError, Design, ExprId, ModuleBuilder, ModuleId, Sig};

/// Build the core and every submodule into `design`, returning the id of
/// the `rv32_core` top module.
pub fn build_core(design: &mut Design) -> Result<ModuleId, BuildError> {
    let alu_id = alu::build_alu(design)?;
    let dec_id = decode::build_decoder(design)?;
    let imm_id = decode::build_immgen(design)?;
    let br_id = decode::build_branch(design)?;
    let rf_id = regfile::build_regfile(design)?;
    let csr_id = csr::build_csrfile(design)?;
    let tlb_id = mmu::build_tlb(design)?;
    let sv32_id = mmu::build_sv32(design)?;

    let mut m = ModuleBuilder::new("rv32_core");

    // -- Interface --------------------------------------------------------
    let clk = m.input("clk", 1)?;
    let rst = m.input("rst", 1)?;
    let inst_data = m.input("inst_data", 32)?;
    let mem_rdata = m.input("mem_rdata", 32)?;
    let iptw_pte1 = m.input("iptw_pte1", 32)?;
    let iptw_pte0 = m.input("iptw_pte0", 32)?;
    let dptw_pte1 = m.input("dptw_pte1", 32)?;
    let dptw_pte0 = m.input("dptw_pte0", 32)?;
    let irq_software = m.input("irq_software", 1)?;
    let irq_timer = m.input("irq_timer", 1)?;
    let irq_external = m.input("irq_external", 1)?;
    let dbg_reg_addr = m.input("dbg_reg_addr", 5)?;
    let dbg_csr_addr = m.input("dbg_csr_addr", 12)?;

    let pc_out = m.output("pc_out", 32)?;
    let mode_out = m.output("mode_out", 2)?;
    let inst_addr = m.output("inst_addr", 32)?;
    let iptw_pte1_addr = m.output("iptw_pte1_addr", 32)?;
    let iptw_pte0_addr = m.output("iptw_pte0_addr", 32)?;
    let dptw_pte1_addr = m.output("dptw_pte1_addr", 32)?;
    let dptw_pte0_addr = m.output("dptw_pte0_addr", 32)?;
    let mem_addr = m.output("mem_addr", 32)?;
    let mem_wdata = m.output("mem_wdata", 32)?;
    let mem_read = m.output("mem_read", 1)?;
    let mem_write = m.output("mem_write", 1)?;
    let mem_funct3 = m.output("mem_funct3", 3)?;
    let dbg_reg_data = m.output("dbg_reg_data", 32)?;
    let dbg_csr_data = m.output("dbg_csr_data", 32)?;

    // -- Architectural state ----------------------------------------------
    let pc = m.reg("pc", 32, 0)?;
    let priv_mode = m.reg("priv_mode", 2, mode::MACHINE)?;
    let res_valid = m.reg("res_valid", 1, 0)?;
    let res_addr = m.reg("res_addr", 32, 0)?;

    // -- Instance interconnect (assigned further down) --------------------
    let w1 = |m: &mut ModuleBuilder, n: &str| m.wire(n, 1);
    let dec = DecoderWires::declare(&mut m)?;
    let imm = m.wire("imm", 32)?;
    let rf_rdata1 = m.wire("rf_rdata1", 32)?;
    let rf_rdata2 = m.wire("rf_rdata2", 32)?;
    let rf_dbg = m.wire("rf_dbg", 32)?;
    let alu_result = m.wire("alu_result", 32)?;
    let br_taken = w1(&mut m, "br_taken")?;
    let cf = CsrWires::declare(&mut m)?;
    let itlb_hit = w1(&mut m, "itlb_hit")?;
    let itlb_ppn = m.wire("itlb_ppn", 20)?;
    let itlb_perms = m.wire("itlb_perms", 4)?;
    let dtlb_hit = w1(&mut m, "dtlb_hit")?;
    let dtlb_ppn = m.wire("dtlb_ppn", 20)?;
    let dtlb_perms = m.wire("dtlb_perms", 4)?;
    let i_fault = w1(&mut m, "i_fault")?;
    let ifill_en = w1(&mut m, "ifill_en")?;
    let ifill_ppn = m.wire("ifill_ppn", 20)?;
    let ifill_perms = m.wire("ifill_perms", 4)?;
    let d_fault = w1(&mut m, "d_fault")?;
    let dfill_en = w1(&mut m, "dfill_en")?;
    let dfill_ppn = m.wire("dfill_ppn", 20)?;
    let dfill_perms = m.wire("dfill_perms", 4)?;

    // Wires the control logic drives after the instances are placed.
    let wb_en = w1(&mut m, "wb_en")?;
    let wb_data = m.wire("wb_data", 32)?;
    let csr_we = w1(&mut m, "csr_we")?;
    let csr_wdata = m.wire("csr_wdata", 32)?;
    let trap_taken = w1(&mut m, "trap_taken")?;
    let trap_epc_addr = m.wire("trap_epc_addr", 12)?;
    let trap_cause_addr = m.wire("trap_cause_addr", 12)?;
    let trap_tval_addr = m.wire("trap_tval_addr", 12)?;
    let trap_cause = m.wire("trap_cause", 32)?;
    let trap_tval = m.wire("trap_tval", 32)?;
    let status_we = w1(&mut m, "status_we")?;
    let status_next = m.wire("status_next", 32)?;
    let tlb_flush = w1(&mut m, "tlb_flush")?;
    let i_enabled = w1(&mut m, "i_enabled")?;
    let d_enabled = w1(&mut m, "d_enabled")?;
    let d_is_write = w1(&mut m, "d_is_write")?;
    let dvaddr = m.wire("dvaddr", 32)?;

    // -- Instruction fields -----------------------------------------------
    let rd_field = m.bits(inst_data, 11, 7)?;
    let rs1_field = m.bits(inst_data, 19, 15)?;
    let rs2_field = m.bits(inst_data, 24, 20)?;
    let funct3 = m.bits(inst_data, 14, 12)?;
    let csr_addr = m.bits(inst_data, 31, 20)?;

    // -- Instances ---------------------------------------------------------
    dec.place(&mut m, design, dec_id, inst_data)?;

    m.instance(design, "immgen", imm_id, &[("inst", inst_data.expr), ("imm", imm.expr)])?;

    let zero1 = m.lit(0, 1);
    let zero5l = m.lit(0, 5);
    let zero32l = m.lit(0, 32);
    m.instance(
        design,
        "regfile",
        rf_id,
        &[
            ("clk", clk.expr),
            ("rst", rst.expr),
            ("raddr1", rs1_field),
            ("raddr2", rs2_field),
            ("dbg_addr", dbg_reg_addr.expr),
            ("waddr", rd_field),
            ("wdata", wb_data.expr),
            ("wen", wb_en.expr),
            ("forward", zero1),
            ("fwd_addr", zero5l),
            ("fwd_data", zero32l),
            ("rdata1", rf_rdata1.expr),
            ("rdata2", rf_rdata2.expr),
            ("dbg_data", rf_dbg.expr),
        ],
    )?;

    let alu_a = m.mux(dec.alu_pc, pc, rf_rdata1)?;
    let alu_b = m.mux(dec.alu_src, imm, rf_rdata2)?;
    m.instance(
        design,
        "alu",
        alu_id,
        &[
            ("a", alu_a),
            ("b", alu_b),
            ("op", dec.alu_op.expr),
            ("result", alu_result.expr),
        ],
    )?;

    m.instance(
        design,
        "branch_unit",
        br_id,
        &[
            ("a", rf_rdata1.expr),
            ("b", rf_rdata2.expr),
            ("funct3", funct3),
            ("taken", br_taken.expr),
        ],
    )?;

    cf.place(CsrPlacement {
        m: &mut m,
        design,
        csr_id,
        clk,
        rst,
        raddr: csr_addr,
        dbg_addr: dbg_csr_addr,
        w_en: csr_we,
        w_addr: csr_addr,
        w_data: csr_wdata,
        trap_en: trap_taken,
        epc_addr: trap_epc_addr,
        epc_data: pc.expr,
        cause_addr: trap_cause_addr,
        cause_data: trap_cause,
        tval_addr: trap_tval_addr,
        tval_data: trap_tval,
        status_en: status_we,
        status_data: status_next,
        irq_software,
        irq_timer,
        irq_external,
    })?;

    let root_ppn = m.bits(cf.satp, 21, 0)?;
    let ivpn = m.bits(pc, 31, 12)?;
    m.instance(
        design,
        "itlb",
        tlb_id,
        &[
            ("clk", clk.expr),
            ("rst", rst.expr),
            ("root_ppn", root_ppn),
            ("vpn", ivpn),
            ("fill_en", ifill_en.expr),
            ("fill_ppn", ifill_ppn.expr),
            ("fill_perms", ifill_perms.expr),
            ("flush", tlb_flush.expr),
            ("hit", itlb_hit.expr),
            ("ppn", itlb_ppn.expr),
            ("perms", itlb_perms.expr),
        ],
    )?;
    let dvpn = m.bits(dvaddr, 31, 12)?;
    m.instance(
        design,
        "dtlb",
        tlb_id,
        &[
            ("clk", clk.expr),
            ("rst", rst.expr),
            ("root_ppn", root_ppn),
            ("vpn", dvpn),
            ("fill_en", dfill_en.expr),
            ("fill_ppn", dfill_ppn.expr),
            ("fill_perms", dfill_perms.expr),
            ("flush", tlb_flush.expr),
            ("hit", dtlb_hit.expr),
            ("ppn", dtlb_ppn.expr),
            ("perms", dtlb_perms.expr),
        ],
    )?;

    let sum = m.bit(cf.mstatus, status::SUM_BIT as u32)?;
    let mxr = m.bit(cf.mstatus, status::MXR_BIT as u32)?;
    let one1 = m.lit(1, 1);
    m.instance(
        design,
        "isv32",
        sv32_id,
        &[
            ("enabled", i_enabled.expr),
            ("vaddr", pc.expr),
            ("root_ppn", root_ppn),
            ("priv_mode", priv_mode.expr),
            ("sum", sum),
            ("mxr", mxr),
            ("is_fetch", one1),
            ("is_write", zero1),
            ("pte1", iptw_pte1.expr),
            ("pte0", iptw_pte0.expr),
            ("tlb_hit", itlb_hit.expr),
            ("tlb_ppn", itlb_ppn.expr),
            ("tlb_perms", itlb_perms.expr),
            ("paddr", inst_addr.expr),
            ("fault", i_fault.expr),
            ("pte1_addr", iptw_pte1_addr.expr),
            ("pte0_addr", iptw_pte0_addr.expr),
            ("fill_en", ifill_en.expr),
            ("fill_ppn", ifill_ppn.expr),
            ("fill_perms", ifill_perms.expr),
        ],
    )?;
    m.instance(
        design,
        "dsv32",
        sv32_id,
        &[
            ("enabled", d_enabled.expr),
            ("vaddr", dvaddr.expr),
            ("root_ppn", root_ppn),
            ("priv_mode", priv_mode.expr),
            ("sum", sum),
            ("mxr", mxr),
            ("is_fetch", zero1),
            ("is_write", d_is_write.expr),
            ("pte1", dptw_pte1.expr),
            ("pte0", dptw_pte0.expr),
            ("tlb_hit", dtlb_hit.expr),
            ("tlb_ppn", dtlb_ppn.expr),
            ("tlb_perms", dtlb_perms.expr),
            ("paddr", mem_addr.expr),
            ("fault", d_fault.expr),
            ("pte1_addr", dptw_pte1_addr.expr),
            ("pte0_addr", dptw_pte0_addr.expr),
            ("fill_en", dfill_en.expr),
            ("fill_ppn", dfill_ppn.expr),
            ("fill_perms", dfill_perms.expr),
        ],
    )?;

    // -- Translation gating ------------------------------------------------
    let and2 = |m: &mut ModuleBuilder, a: ExprId, b: ExprId| m.binary(BinOp::And, a, b);
    let or2 = |m: &mut ModuleBuilder, a: ExprId, b: ExprId| m.binary(BinOp::Or, a, b);

    let satp_on = m.bit(cf.satp, 31)?;
    let machine_lit = m.lit(mode::MACHINE, 2);
    let in_machine = m.binary(BinOp::Eq, priv_mode, machine_lit);
    let not_machine = m.not(in_machine);
    let translate_on = and2(&mut m, satp_on, not_machine);
    m.assign(i_enabled, translate_on)?;

    let not_sc = m.not(dec.is_sc);
    let not_lr = m.not(dec.is_lr);
    let amo_read = and2(&mut m, dec.is_amo.expr, not_sc);
    let amo_write = and2(&mut m, dec.is_amo.expr, not_lr);
    let data_read_req = or2(&mut m, dec.mem_read.expr, amo_read);
    let data_write_req = or2(&mut m, dec.mem_write.expr, amo_write);
    let mem_req = or2(&mut m, data_read_req, data_write_req);
    let d_en = and2(&mut m, translate_on, mem_req);
    m.assign(d_enabled, d_en)?;
    m.assign(d_is_write, data_write_req)?;

    let daddr = m.mux(dec.is_amo, rf_rdata1, alu_result)?;
    m.assign(dvaddr, daddr)?;

    // -- CSR instruction ---------------------------------------------------
    let csr_old = cf.rdata;
    let zimm32 = m.zext(rs1_field, 32)?;
    let csr_operand = m.mux(dec.csr_imm, zimm32, rf_rdata1)?;
    let f3_lo = m.bits(funct3, 1, 0)?;
    let set_bits = or2(&mut m, csr_old, csr_operand);
    let not_operand = m.not(csr_operand);
    let clear_bits = and2(&mut m, csr_old, not_operand);
    let csr_new = m.select(
        f3_lo,
        &[(1, csr_operand), (2, set_bits), (3, clear_bits)],
        csr_operand,
    );
    m.assign(csr_wdata, csr_new)?;

    let one2l = m.lit(1, 2);
    let is_rw = m.binary(BinOp::Eq, f3_lo, one2l);
    let zero5 = m.lit(0, 5);
    let src_nonzero = m.binary(BinOp::Ne, rs1_field, zero5);
    let wants_write = or2(&mut m, is_rw, src_nonzero);
    let csr_wen_raw = and2(&mut m, dec.is_csr.expr, wants_write);

    // -- Interrupt arbitration ---------------------------------------------
    let not_mideleg = m.not(cf.mideleg);
    let pending_enabled = and2(&mut m, cf.mip, cf.mie);
    let m_set = and2(&mut m, pending_enabled, not_mideleg);
    let s_set = and2(&mut m, pending_enabled, cf.mideleg);

    let mie_bit = m.bit(cf.mstatus, status::MIE_BIT as u32)?;
    let sie_bit = m.bit(cf.mstatus, status::SIE_BIT as u32)?;
    let zero32 = m.lit(0, 32);
    let m_any = m.binary(BinOp::Ne, m_set, zero32);
    let s_any = m.binary(BinOp::Ne, s_set, zero32);
    let m_take = and2(&mut m, m_any, mie_bit);
    let s_take = and2(&mut m, s_any, sie_bit);
    let irq_take = or2(&mut m, m_take, s_take);
    let not_m_take = m.not(m_take);
    let irq_to_s = and2(&mut m, s_take, not_m_take);
    let irq_set = m.mux(m_take, m_set, s_set)?;

    // Priority within the chosen set: external, then software, then timer.
    let mut irq_num = m.lit(0, 32);
    for bit in [cause::S_TIMER, cause::M_TIMER, cause::S_SOFT, cause::M_SOFT, cause::S_EXT, cause::M_EXT]
    {
        let pending = m.bit(irq_set, bit as u32)?;
        let num = m.lit(bit, 32);
        irq_num = m.mux(pending, num, irq_num)?;
    }
    let interrupt_flag = m.lit(cause::INTERRUPT_BIT, 32);
    let irq_cause = or2(&mut m, interrupt_flag, irq_num);

    // -- Synchronous exceptions --------------------------------------------
    let ecall_u = m.lit(cause::ECALL_U, 32);
    let ecall_s = m.lit(cause::ECALL_S, 32);
    let ecall_m = m.lit(cause::ECALL_M, 32);
    let ecall_cause = m.select(
        priv_mode,
        &[
            (mode::USER, ecall_u),
            (mode::SUPERVISOR, ecall_s),
            (mode::MACHINE, ecall_m),
        ],
        ecall_m,
    );

    let exc = or2(&mut m, i_fault.expr, dec.illegal.expr);
    let exc = or2(&mut m, exc, dec.is_ecall.expr);
    let exc = or2(&mut m, exc, dec.is_ebreak.expr);
    let exc = or2(&mut m, exc, d_fault.expr);

    let store_fault = m.lit(cause::STORE_PAGE_FAULT, 32);
    let load_fault = m.lit(cause::LOAD_PAGE_FAULT, 32);
    let data_cause = m.mux(data_write_req, store_fault, load_fault)?;
    let break_cause = m.lit(cause::BREAKPOINT, 32);
    let illegal_cause = m.lit(cause::ILLEGAL, 32);
    let ifault_cause = m.lit(cause::INST_PAGE_FAULT, 32);
    let exc_cause = m.mux(dec.is_ebreak, break_cause, data_cause)?;
    let exc_cause = m.mux(dec.is_ecall, ecall_cause, exc_cause)?;
    let exc_cause = m.mux(dec.illegal, illegal_cause, exc_cause)?;
    let exc_cause = m.mux(i_fault, ifault_cause, exc_cause)?;

    let exc_tval = m.mux(d_fault, dvaddr, zero32)?;
    let env = or2(&mut m, dec.is_ecall.expr, dec.is_ebreak.expr);
    let exc_tval = m.mux(env, zero32, exc_tval)?;
    let exc_tval = m.mux(dec.illegal, inst_data, exc_tval)?;
    let exc_tval = m.mux(i_fault, pc, exc_tval)?;

    let any_trap = or2(&mut m, irq_take, exc);
    m.assign(trap_taken, any_trap)?;
    let cause_mux = m.mux(irq_take, irq_cause, exc_cause)?;
    m.assign(trap_cause, cause_mux)?;
    let tval_mux = m.mux(irq_take, zero32, exc_tval)?;
    m.assign(trap_tval, tval_mux)?;

    // -- Delegation ---------------------------------------------------------
    let deleg_shift = m.binary(BinOp::Shr, cf.medeleg, exc_cause);
    let exc_deleg = m.bit(deleg_shift, 0)?;
    let exc_to_s = and2(&mut m, exc_deleg, not_machine);
    let to_s = m.mux(irq_take, irq_to_s, exc_to_s)?;
    let trap_to_s = m.local("trap_to_s", to_s)?;

    let sepc_lit = m.lit(csr_num::SEPC, 12);
    let mepc_lit = m.lit(csr_num::MEPC, 12);
    let epc_sel = m.mux(trap_to_s, sepc_lit, mepc_lit)?;
    m.assign(trap_epc_addr, epc_sel)?;
    let scause_lit = m.lit(csr_num::SCAUSE, 12);
    let mcause_lit = m.lit(csr_num::MCAUSE, 12);
    let cause_sel = m.mux(trap_to_s, scause_lit, mcause_lit)?;
    m.assign(trap_cause_addr, cause_sel)?;
    let stval_lit = m.lit(csr_num::STVAL, 12);
    let mtval_lit = m.lit(csr_num::MTVAL, 12);
    let tval_sel = m.mux(trap_to_s, stval_lit, mtval_lit)?;
    m.assign(trap_tval_addr, tval_sel)?;

    // -- Status push/pop ----------------------------------------------------
    let st = StatusFields::extract(&mut m, cf.mstatus)?;

    let m_push_mask = m.lit(
        !((1u64 << status::MIE_BIT) | (1 << status::MPIE_BIT) | (3 << status::MPP_SHIFT))
            & 0xFFFF_FFFF,
        32,
    );
    let kept = and2(&mut m, cf.mstatus, m_push_mask);
    let mie_to_mpie = shift_to(&mut m, mie_bit, status::MPIE_BIT)?;
    let mode_to_mpp = shift_to(&mut m, priv_mode.expr, status::MPP_SHIFT)?;
    let trap_m_status = or2(&mut m, kept, mie_to_mpie);
    let trap_m_status = or2(&mut m, trap_m_status, mode_to_mpp);

    let s_push_mask = m.lit(
        !((1u64 << status::SIE_BIT) | (1 << status::SPIE_BIT) | (1 << status::SPP_BIT))
            & 0xFFFF_FFFF,
        32,
    );
    let kept_s = and2(&mut m, cf.mstatus, s_push_mask);
    let sie_to_spie = shift_to(&mut m, sie_bit, status::SPIE_BIT)?;
    let zero2 = m.lit(0, 2);
    let was_not_user = m.binary(BinOp::Ne, priv_mode, zero2);
    let spp_set = shift_to(&mut m, was_not_user, status::SPP_BIT)?;
    let trap_s_status = or2(&mut m, kept_s, sie_to_spie);
    let trap_s_status = or2(&mut m, trap_s_status, spp_set);

    let mpie_to_mie = shift_to(&mut m, st.mpie, status::MIE_BIT)?;
    let mpie_one = m.lit(1 << status::MPIE_BIT, 32);
    let mret_status = or2(&mut m, kept, mpie_to_mie);
    let mret_status = or2(&mut m, mret_status, mpie_one);

    let spie_to_sie = shift_to(&mut m, st.spie, status::SIE_BIT)?;
    let spie_one = m.lit(1 << status::SPIE_BIT, 32);
    let sret_status = or2(&mut m, kept_s, spie_to_sie);
    let sret_status = or2(&mut m, sret_status, spie_one);

    let trap_status = m.mux(trap_to_s, trap_s_status, trap_m_status)?;
    let ret_status = m.mux(dec.is_mret, mret_status, sret_status)?;
    let status_val = m.mux(trap_taken, trap_status, ret_status)?;
    m.assign(status_next, status_val)?;

    let is_ret = or2(&mut m, dec.is_mret.expr, dec.is_sret.expr);
    let status_en_v = or2(&mut m, trap_taken.expr, is_ret);
    m.assign(status_we, status_en_v)?;

    // -- Privilege transitions ---------------------------------------------
    let s_mode_lit = m.lit(mode::SUPERVISOR, 2);
    let m_mode_lit = m.lit(mode::MACHINE, 2);
    let trap_mode = m.mux(trap_to_s, s_mode_lit, m_mode_lit)?;
    let spp2 = m.zext(st.spp, 2)?;
    let ret_mode = m.mux(dec.is_mret, st.mpp, spp2)?;
    let mode_after_ret = m.mux(is_ret, ret_mode, priv_mode)?;
    let mode_next = m.mux(trap_taken, trap_mode, mode_after_ret)?;

    // -- Next PC ------------------------------------------------------------
    let four = m.lit(4, 32);
    let pc4 = m.binary(BinOp::Add, pc, four);
    let pc_imm = m.binary(BinOp::Add, pc, imm);
    let rs1_imm = m.binary(BinOp::Add, rf_rdata1, imm);
    let not_one = m.lit(0xFFFF_FFFE, 32);
    let jalr_target = and2(&mut m, rs1_imm, not_one);
    let tvec = m.mux(trap_to_s, cf.stvec, cf.mtvec)?;
    let not_three = m.lit(0xFFFF_FFFC, 32);
    let tvec_base = and2(&mut m, tvec, not_three);

    let take_branch = and2(&mut m, dec.branch.expr, br_taken.expr);
    let next_pc = m.mux(take_branch, pc_imm, pc4)?;
    let next_pc = m.mux(dec.jalr, jalr_target, next_pc)?;
    let jal_only = {
        let not_jalr = m.not(dec.jalr);
        and2(&mut m, dec.jump.expr, not_jalr)
    };
    let next_pc = m.mux(jal_only, pc_imm, next_pc)?;
    let next_pc = m.mux(dec.is_sret, cf.sepc, next_pc)?;
    let next_pc = m.mux(dec.is_mret, cf.mepc, next_pc)?;
    let next_pc = m.mux(trap_taken, tvec_base, next_pc)?;
    let next_pc = m.local("next_pc", next_pc)?;

    // -- Atomics ------------------------------------------------------------
    let not_trap = m.not(trap_taken);
    let addr_match = m.binary(BinOp::Eq, res_addr, dvaddr);
    let sc_ok = and2(&mut m, res_valid.expr, addr_match);
    let sc_ok = m.local("sc_ok", sc_ok)?;
    let amo_rmw = and2(&mut m, amo_write, not_sc);

    let amo_new = amo_alu(&mut m, dec.amo_op, mem_rdata, rf_rdata2)?;

    // -- Memory interface ---------------------------------------------------
    // Gated by reset as well: the harness acts on these lines immediately,
    // so a garbage decode during the reset pulse must not reach the bus.
    let not_rst = m.not(rst);
    let read_live = and2(&mut m, data_read_req, not_trap);
    let read_live = and2(&mut m, read_live, not_rst);
    m.assign(mem_read, read_live)?;
    let sc_store = and2(&mut m, dec.is_sc.expr, sc_ok);
    let write_req = or2(&mut m, dec.mem_write.expr, amo_rmw);
    let write_req = or2(&mut m, write_req, sc_store);
    let write_live = and2(&mut m, write_req, not_trap);
    let write_live = and2(&mut m, write_live, not_rst);
    m.assign(mem_write, write_live)?;
    m.assign(mem_funct3, funct3)?;
    let store_data = m.mux(amo_rmw, amo_new, rf_rdata2)?;
    m.assign(mem_wdata, store_data)?;

    // -- Writeback ----------------------------------------------------------
    let sc_fail = m.not(sc_ok);
    let sc_rd = m.zext(sc_fail, 32)?;
    let amo_rd = m.mux(dec.is_sc, sc_rd, mem_rdata)?;
    let wb = m.mux(dec.jump, pc4, alu_result)?;
    let wb = m.mux(dec.mem_to_reg, mem_rdata, wb)?;
    let wb = m.mux(dec.is_csr, csr_old, wb)?;
    let wb = m.mux(dec.is_amo, amo_rd, wb)?;
    m.assign(wb_data, wb)?;
    let wb_live = and2(&mut m, dec.reg_write.expr, not_trap);
    m.assign(wb_en, wb_live)?;

    let csr_we_live = and2(&mut m, csr_wen_raw, not_trap);
    m.assign(csr_we, csr_we_live)?;

    // -- TLB flush ----------------------------------------------------------
    let satp_lit = m.lit(csr_num::SATP, 12);
    let writes_satp = m.binary(BinOp::Eq, csr_addr, satp_lit);
    let satp_flush = and2(&mut m, csr_we_live, writes_satp);
    let sfence_live = and2(&mut m, dec.is_sfence.expr, not_trap);
    let flush = or2(&mut m, satp_flush, sfence_live);
    m.assign(tlb_flush, flush)?;

    // -- Debug and status outputs ------------------------------------------
    m.assign(pc_out, pc)?;
    m.assign(mode_out, priv_mode)?;
    m.assign(dbg_reg_data, rf_dbg)?;
    m.assign(dbg_csr_data, cf.dbg_data)?;

    // -- State advance ------------------------------------------------------
    let proc = m.process(clk);
    m.process_reset(proc, rst);
    m.update(proc, pc, next_pc)?;
    m.update(proc, priv_mode, mode_next)?;

    let lr_live = and2(&mut m, dec.is_lr.expr, not_trap);
    let clears = or2(&mut m, dec.mem_write.expr, amo_rmw);
    let clears = or2(&mut m, clears, dec.is_sc.expr);
    let clears_live = and2(&mut m, clears, not_trap);
    let res_valid_cleared = m.mux(clears_live, zero1, res_valid)?;
    let res_valid_next = m.mux(lr_live, one1, res_valid_cleared)?;
    m.update(proc, res_valid, res_valid_next)?;
    let res_addr_next = m.mux(lr_live, dvaddr, res_addr)?;
    m.update(proc, res_addr, res_addr_next)?;

    Ok(design.add_module(m.build()?))
}

/// Decoder output wires in the parent.
struct DecoderWires {
    reg_write: Sig,
    mem_read: Sig,
    mem_write: Sig,
    mem_to_reg: Sig,
    alu_src: Sig,
    alu_pc: Sig,
    branch: Sig,
    jump: Sig,
    jalr: Sig,
    alu_op: Sig,
    is_csr: Sig,
    csr_imm: Sig,
    is_ecall: Sig,
    is_ebreak: Sig,
    is_mret: Sig,
    is_sret: Sig,
    is_wfi: Sig,
    is_sfence: Sig,
    is_amo: Sig,
    is_lr: Sig,
    is_sc: Sig,
    amo_op: Sig,
    illegal: Sig,
}

impl DecoderWires {
    fn declare(m: &mut ModuleBuilder) -> Result<Self, BuildError> {
        Ok(Self {
            reg_write: m.wire("dec_reg_write", 1)?,
            mem_read: m.wire("dec_mem_read", 1)?,
            mem_write: m.wire("dec_mem_write", 1)?,
            mem_to_reg: m.wire("dec_mem_to_reg", 1)?,
            alu_src: m.wire("dec_alu_src", 1)?,
            alu_pc: m.wire("dec_alu_pc", 1)?,
            branch: m.wire("dec_branch", 1)?,
            jump: m.wire("dec_jump", 1)?,
            jalr: m.wire("dec_jalr", 1)?,
            alu_op: m.wire("dec_alu_op", 5)?,
            is_csr: m.wire("dec_is_csr", 1)?,
            csr_imm: m.wire("dec_csr_imm", 1)?,
            is_ecall: m.wire("dec_is_ecall", 1)?,
            is_ebreak: m.wire("dec_is_ebreak", 1)?,
            is_mret: m.wire("dec_is_mret", 1)?,
            is_sret: m.wire("dec_is_sret", 1)?,
            is_wfi: m.wire("dec_is_wfi", 1)?,
            is_sfence: m.wire("dec_is_sfence", 1)?,
            is_amo: m.wire("dec_is_amo", 1)?,
            is_lr: m.wire("dec_is_lr", 1)?,
            is_sc: m.wire("dec_is_sc", 1)?,
            amo_op: m.wire("dec_amo_op", 5)?,
            illegal: m.wire("dec_illegal", 1)?,
        })
    }

    fn place(
        &self,
        m: &mut ModuleBuilder,
        design: &Design,
        dec_id: ModuleId,
        inst: Sig,
    ) -> Result<(), BuildError> {
        m.instance(
            design,
            "decoder",
            dec_id,
            &[
                ("inst", inst.expr),
                ("reg_write", self.reg_write.expr),
                ("mem_read", self.mem_read.expr),
                ("mem_write", self.mem_write.expr),
                ("mem_to_reg", self.mem_to_reg.expr),
                ("alu_src", self.alu_src.expr),
                ("alu_pc", self.alu_pc.expr),
                ("branch", self.branch.expr),
                ("jump", self.jump.expr),
                ("jalr", self.jalr.expr),
                ("alu_op", self.alu_op.expr),
                ("is_csr", self.is_csr.expr),
                ("csr_imm", self.csr_imm.expr),
                ("is_ecall", self.is_ecall.expr),
                ("is_ebreak", self.is_ebreak.expr),
                ("is_mret", self.is_mret.expr),
                ("is_sret", self.is_sret.expr),
                ("is_wfi", self.is_wfi.expr),
                ("is_sfence", self.is_sfence.expr),
                ("is_amo", self.is_amo.expr),
                ("is_lr", self.is_lr.expr),
                ("is_sc", self.is_sc.expr),
                ("amo_op", self.amo_op.expr),
                ("illegal", self.illegal.expr),
            ],
        )
    }
}

/// CSR-file output wires in the parent.
struct CsrWires {
    rdata: ExprId,
    dbg_data: ExprId,
    mstatus: ExprId,
    mie: ExprId,
    mip: ExprId,
    mtvec: ExprId,
    stvec: ExprId,
    mepc: ExprId,
    sepc: ExprId,
    medeleg: ExprId,
    mideleg: ExprId,
    satp: ExprId,
    rdata_w: Sig,
    dbg_w: Sig,
    mstatus_w: Sig,
    mie_w: Sig,
    mip_w: Sig,
    mtvec_w: Sig,
    stvec_w: Sig,
    mepc_w: Sig,
    sepc_w: Sig,
    medeleg_w: Sig,
    mideleg_w: Sig,
    satp_w: Sig,
}

impl CsrWires {
    fn declare(m: &mut ModuleBuilder) -> Result<Self, BuildError> {
        let rdata_w = m.wire("csr_rdata", 32)?;
        let dbg_w = m.wire("csr_dbg", 32)?;
        let mstatus_w = m.wire("csr_mstatus", 32)?;
        let mie_w = m.wire("csr_mie", 32)?;
        let mip_w = m.wire("csr_mip", 32)?;
        let mtvec_w = m.wire("csr_mtvec", 32)?;
        let stvec_w = m.wire("csr_stvec", 32)?;
        let mepc_w = m.wire("csr_mepc", 32)?;
        let sepc_w = m.wire("csr_sepc", 32)?;
        let medeleg_w = m.wire("csr_medeleg", 32)?;
        let mideleg_w = m.wire("csr_mideleg", 32)?;
        let satp_w = m.wire("csr_satp", 32)?;
        Ok(Self {
            rdata: rdata_w.expr,
            dbg_data: dbg_w.expr,
            mstatus: mstatus_w.expr,
            mie: mie_w.expr,
            mip: mip_w.expr,
            mtvec: mtvec_w.expr,
            stvec: stvec_w.expr,
            mepc: mepc_w.expr,
            sepc: sepc_w.expr,
            medeleg: medeleg_w.expr,
            mideleg: mideleg_w.expr,
            satp: satp_w.expr,
            rdata_w,
            dbg_w,
            mstatus_w,
            mie_w,
            mip_w,
            mtvec_w,
            stvec_w,
            mepc_w,
            sepc_w,
            medeleg_w,
            mideleg_w,
            satp_w,
        })
    }
}

/// Everything the CSR-file instance needs from the top level.
struct CsrPlacement<'a, 'd> {
    m: &'a mut ModuleBuilder,
    design: &'d Design,
    csr_id: ModuleId,
    clk: Sig,
    rst: Sig,
    raddr: ExprId,
    dbg_addr: Sig,
    w_en: Sig,
    w_addr: ExprId,
    w_data: Sig,
    trap_en: Sig,
    epc_addr: Sig,
    epc_data: ExprId,
    cause_addr: Sig,
    cause_data: Sig,
    tval_addr: Sig,
    tval_data: Sig,
    status_en: Sig,
    status_data: Sig,
    irq_software: Sig,
    irq_timer: Sig,
    irq_external: Sig,
}

impl CsrWires {
    fn place(&self, p: CsrPlacement<'_, '_>) -> Result<(), BuildError> {
        p.m.instance(
            p.design,
            "csrfile",
            p.csr_id,
            &[
                ("clk", p.clk.expr),
                ("rst", p.rst.expr),
                ("raddr", p.raddr),
                ("dbg_addr", p.dbg_addr.expr),
                ("w_en", p.w_en.expr),
                ("w_addr", p.w_addr),
                ("w_data", p.w_data.expr),
                ("trap_en", p.trap_en.expr),
                ("epc_addr", p.epc_addr.expr),
                ("epc_data", p.epc_data),
                ("cause_addr", p.cause_addr.expr),
                ("cause_data", p.cause_data.expr),
                ("tval_addr", p.tval_addr.expr),
                ("tval_data", p.tval_data.expr),
                ("status_en", p.status_en.expr),
                ("status_data", p.status_data.expr),
                ("irq_software", p.irq_software.expr),
                ("irq_timer", p.irq_timer.expr),
                ("irq_external", p.irq_external.expr),
                ("rdata", self.rdata_w.expr),
                ("dbg_data", self.dbg_w.expr),
                ("mstatus", self.mstatus_w.expr),
                ("mie", self.mie_w.expr),
                ("mip", self.mip_w.expr),
                ("mtvec", self.mtvec_w.expr),
                ("stvec", self.stvec_w.expr),
                ("mepc", self.mepc_w.expr),
                ("sepc", self.sepc_w.expr),
                ("medeleg", self.medeleg_w.expr),
                ("mideleg", self.mideleg_w.expr),
                ("satp", self.satp_w.expr),
            ],
        )
    }
}

/// Interrupt-enable stack fields of `mstatus`.
struct StatusFields {
    mpie: ExprId,
    spie: ExprId,
    mpp: ExprId,
    spp: ExprId,
}

impl StatusFields {
    fn extract(m: &mut ModuleBuilder, mstatus: ExprId) -> Result<Self, BuildError> {
        Ok(Self {
            mpie: m.bit(mstatus, status::MPIE_BIT as u32)?,
            spie: m.bit(mstatus, status::SPIE_BIT as u32)?,
            mpp: m.bits(
                mstatus,
                status::MPP_SHIFT as u32 + 1,
                status::MPP_SHIFT as u32,
            )?,
            spp: m.bit(mstatus, status::SPP_BIT as u32)?,
        })
    }
}

/// Place a narrow value at `bit` within a 32-bit word.
fn shift_to(m: &mut ModuleBuilder, v: ExprId, bit: u64) -> Result<ExprId, BuildError> {
    let wide = m.zext(v, 32)?;
    let amount = m.lit(bit, 6);
    Ok(m.binary(BinOp::Shl, wide, amount))
}

/// The AMO read-modify-write value: combine the loaded word with rs2.
fn amo_alu(
    m: &mut ModuleBuilder,
    funct5: Sig,
    loaded: Sig,
    rs2: Sig,
) -> Result<ExprId, BuildError> {
    let add = m.binary(BinOp::Add, loaded, rs2);
    let xor = m.binary(BinOp::Xor, loaded, rs2);
    let or = m.binary(BinOp::Or, loaded, rs2);
    let and = m.binary(BinOp::And, loaded, rs2);

    let rs2_lts = m.binary(BinOp::Slt, rs2, loaded);
    let min = m.mux(rs2_lts, rs2, loaded)?;
    let max = m.mux(rs2_lts, loaded, rs2)?;
    let rs2_ltu = m.binary(BinOp::Lt, rs2, loaded);
    let minu = m.mux(rs2_ltu, rs2, loaded)?;
    let maxu = m.mux(rs2_ltu, loaded, rs2)?;

    Ok(m.select(
        funct5,
        &[
            (amo::ADD, add),
            (amo::SWAP, rs2.expr),
            (amo::XOR, xor),
            (amo::OR, or),
            (amo::AND, and),
            (amo::MIN, min),
            (amo::MAX, max),
            (amo::MINU, minu),
            (amo::MAXU, maxu),
        ],
        rs2.expr,
    ))
}
