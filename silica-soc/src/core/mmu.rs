//! Sv32 address translation: a four-entry direct-mapped TLB and the
//! combinational two-level walk/permission unit.

use crate::consts::mode;
use silica_ir::{BinOp, BuildError, Design, ExprId, ModuleBuilder, ModuleId};

/// Build the TLB: four direct-mapped entries indexed by `vpn[1:0]`, tagged
/// with the remaining VPN bits and the translation root so a `satp` switch
/// can never alias. `flush` wins over a same-cycle fill.
pub(crate) fn build_tlb(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("tlb");
    let clk = m.input("clk", 1)?;
    let rst = m.input("rst", 1)?;
    let root_ppn = m.input("root_ppn", 22)?;
    let vpn = m.input("vpn", 20)?;
    let fill_en = m.input("fill_en", 1)?;
    let fill_ppn = m.input("fill_ppn", 20)?;
    let fill_perms = m.input("fill_perms", 4)?;
    let flush = m.input("flush", 1)?;
    let hit = m.output("hit", 1)?;
    let ppn = m.output("ppn", 20)?;
    let perms = m.output("perms", 4)?;

    let index = m.bits(vpn, 1, 0)?;
    let vpn_hi = m.bits(vpn, 19, 2)?;
    let tag = m.concat(&[root_ppn.expr, vpn_hi])?;

    let proc = m.process(clk);
    m.process_reset(proc, rst);

    let mut valid_arms = Vec::new();
    let mut tag_arms = Vec::new();
    let mut ppn_arms = Vec::new();
    let mut perm_arms = Vec::new();
    for i in 0..4u64 {
        let valid_i = m.reg(format!("valid{i}"), 1, 0)?;
        let tag_i = m.reg(format!("tag{i}"), 40, 0)?;
        let ppn_i = m.reg(format!("ppn{i}"), 20, 0)?;
        let perms_i = m.reg(format!("perms{i}"), 4, 0)?;

        let slot = m.lit(i, 2);
        let here = m.binary(BinOp::Eq, index, slot);
        let fill_here = m.binary(BinOp::And, fill_en, here);

        let one1 = m.lit(1, 1);
        let valid_next = m.mux(fill_here, one1, valid_i)?;
        let zero1 = m.lit(0, 1);
        let valid_next = m.mux(flush, zero1, valid_next)?;
        m.update(proc, valid_i, valid_next)?;

        let tag_next = m.mux(fill_here, tag, tag_i)?;
        m.update(proc, tag_i, tag_next)?;
        let ppn_next = m.mux(fill_here, fill_ppn, ppn_i)?;
        m.update(proc, ppn_i, ppn_next)?;
        let perms_next = m.mux(fill_here, fill_perms, perms_i)?;
        m.update(proc, perms_i, perms_next)?;

        valid_arms.push((i, valid_i.expr));
        tag_arms.push((i, tag_i.expr));
        ppn_arms.push((i, ppn_i.expr));
        perm_arms.push((i, perms_i.expr));
    }

    let zero1 = m.lit(0, 1);
    let zero40 = m.lit(0, 40);
    let zero20 = m.lit(0, 20);
    let zero4 = m.lit(0, 4);
    let sel_valid = m.select(index, &valid_arms, zero1);
    let sel_tag = m.select(index, &tag_arms, zero40);
    let sel_ppn = m.select(index, &ppn_arms, zero20);
    let sel_perms = m.select(index, &perm_arms, zero4);

    let tag_match = m.binary(BinOp::Eq, sel_tag, tag);
    let hit_v = m.binary(BinOp::And, sel_valid, tag_match);
    m.assign(hit, hit_v)?;
    m.assign(ppn, sel_ppn)?;
    m.assign(perms, sel_perms)?;

    Ok(design.add_module(m.build()?))
}

/// Build the combinational Sv32 unit shared by the fetch and data paths.
///
/// The two PTE reads go out on `pte1_addr`/`pte0_addr` and come back on
/// `pte1`/`pte0`; the harness services them between settles, so by the time
/// the cycle commits the unit has seen whatever the walk needed. A TLB hit
/// bypasses the walk entirely.
///
/// Permission encoding, here and in the TLB: bit 0 R, bit 1 W, bit 2 X,
/// bit 3 U.
pub(crate) fn build_sv32(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("sv32");
    let enabled = m.input("enabled", 1)?;
    let vaddr = m.input("vaddr", 32)?;
    let root_ppn = m.input("root_ppn", 22)?;
    let priv_mode = m.input("priv_mode", 2)?;
    let sum = m.input("sum", 1)?;
    let mxr = m.input("mxr", 1)?;
    let is_fetch = m.input("is_fetch", 1)?;
    let is_write = m.input("is_write", 1)?;
    let pte1 = m.input("pte1", 32)?;
    let pte0 = m.input("pte0", 32)?;
    let tlb_hit = m.input("tlb_hit", 1)?;
    let tlb_ppn = m.input("tlb_ppn", 20)?;
    let tlb_perms = m.input("tlb_perms", 4)?;

    let paddr = m.output("paddr", 32)?;
    let fault = m.output("fault", 1)?;
    let pte1_addr = m.output("pte1_addr", 32)?;
    let pte0_addr = m.output("pte0_addr", 32)?;
    let fill_en = m.output("fill_en", 1)?;
    let fill_ppn = m.output("fill_ppn", 20)?;
    let fill_perms = m.output("fill_perms", 4)?;

    let vpn1 = m.bits(vaddr, 31, 22)?;
    let vpn0 = m.bits(vaddr, 21, 12)?;
    let offset = m.bits(vaddr, 11, 0)?;

    // Level-1 PTE address: root_ppn * 4096 + vpn1 * 4, truncated to the
    // 32-bit physical space the harness serves.
    let zero2 = m.lit(0, 2);
    let root_lo = m.bits(root_ppn, 19, 0)?;
    let l1_addr = m.concat(&[root_lo, vpn1, zero2])?;
    m.assign(pte1_addr, l1_addr)?;

    let pte_fields = |m: &mut ModuleBuilder,
                      pte: ExprId|
     -> Result<(ExprId, ExprId, ExprId, ExprId, ExprId, ExprId), BuildError> {
        let v = m.bit(pte, 0)?;
        let r = m.bit(pte, 1)?;
        let w = m.bit(pte, 2)?;
        let x = m.bit(pte, 3)?;
        let u = m.bit(pte, 4)?;
        let ppn = m.bits(pte, 29, 10)?;
        Ok((v, r, w, x, u, ppn))
    };
    let (v1, r1, w1, x1, u1, ppn1) = pte_fields(&mut m, pte1.expr)?;
    let (v0, r0, w0, x0, u0, ppn0) = pte_fields(&mut m, pte0.expr)?;

    let rx1 = m.binary(BinOp::Or, r1, x1);
    let leaf1 = m.binary(BinOp::And, v1, rx1);
    let not_rx1 = m.not(rx1);
    let pointer1 = m.binary(BinOp::And, v1, not_rx1);

    let l0_addr = m.concat(&[ppn1, vpn0, zero2])?;
    m.assign(pte0_addr, l0_addr)?;

    let rx0 = m.binary(BinOp::Or, r0, x0);
    let leaf0 = m.binary(BinOp::And, v0, rx0);

    let walk_level0 = m.binary(BinOp::And, pointer1, leaf0);
    let walk_ok = m.binary(BinOp::Or, leaf1, walk_level0);
    let walk_ok = m.local("walk_ok", walk_ok)?;

    // A megapage splices VPN0 into the low PPN bits.
    let ppn1_hi = m.bits(ppn1, 19, 10)?;
    let mega_ppn = m.concat(&[ppn1_hi, vpn0])?;
    let walked_ppn = m.mux(leaf1, mega_ppn, ppn0)?;
    let perms1 = m.concat(&[u1, x1, w1, r1])?;
    let perms0 = m.concat(&[u0, x0, w0, r0])?;
    let walked_perms = m.mux(leaf1, perms1, perms0)?;

    let eff_ppn = m.mux(tlb_hit, tlb_ppn, walked_ppn)?;
    let eff_perms = m.mux(tlb_hit, tlb_perms, walked_perms)?;

    let perm_r = m.bit(eff_perms, 0)?;
    let perm_w = m.bit(eff_perms, 1)?;
    let perm_x = m.bit(eff_perms, 2)?;
    let perm_u = m.bit(eff_perms, 3)?;

    let user_lit = m.lit(mode::USER, 2);
    let is_user = m.binary(BinOp::Eq, priv_mode, user_lit);
    let sup_lit = m.lit(mode::SUPERVISOR, 2);
    let is_sup = m.binary(BinOp::Eq, priv_mode, sup_lit);

    // Supervisor touches user pages only under SUM, and never executes them.
    // Machine mode reaches here only with translation disabled, so it gates
    // nothing.
    let not_u = m.not(perm_u);
    let sup_data_ok = m.binary(BinOp::Or, not_u, sum);
    let one1 = m.lit(1, 1);
    let sup_gate = m.mux(is_sup, sup_data_ok, one1)?;
    let user_ok = m.mux(is_user, perm_u, sup_gate)?;

    let exec_user_gate = m.mux(is_user, perm_u, not_u)?;
    let exec_ok = m.binary(BinOp::And, perm_x, exec_user_gate);

    let mxr_x = m.binary(BinOp::And, mxr, perm_x);
    let readable = m.binary(BinOp::Or, perm_r, mxr_x);
    let read_ok = m.binary(BinOp::And, readable, user_ok);
    let write_ok = m.binary(BinOp::And, perm_w, user_ok);

    let data_ok = m.mux(is_write, write_ok, read_ok)?;
    let perm_ok = m.mux(is_fetch, exec_ok, data_ok)?;

    let translation_ok = m.binary(BinOp::Or, tlb_hit, walk_ok);
    let access_ok = m.binary(BinOp::And, translation_ok, perm_ok);
    let not_ok = m.not(access_ok);
    let fault_v = m.binary(BinOp::And, enabled, not_ok);
    m.assign(fault, fault_v)?;

    let translated = m.concat(&[eff_ppn, offset])?;
    let phys = m.mux(enabled, translated, vaddr)?;
    m.assign(paddr, phys)?;

    let not_hit = m.not(tlb_hit);
    let fill = m.binary(BinOp::And, enabled, not_hit);
    let fill = m.binary(BinOp::And, fill, walk_ok);
    m.assign(fill_en, fill)?;
    m.assign(fill_ppn, walked_ppn)?;
    m.assign(fill_perms, walked_perms)?;

    Ok(design.add_module(m.build()?))
}
