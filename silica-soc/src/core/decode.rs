//! Instruction decode: control lines, immediates and branch conditions.

use crate::consts::{amo, opcode, AluOp};
use silica_ir::{BinOp, BuildError, Design, ExprId, ModuleBuilder, ModuleId};

/// Build the control decoder.
///
/// Emits the standard single-cycle control set from `opcode`/`funct3`/
/// `funct7`, the privileged-instruction strobes for the SYSTEM class, and an
/// `illegal` line for everything else. SYSTEM with `funct3 = 0` decodes one
/// of ECALL/EBREAK/MRET/SRET/WFI/SFENCE.VMA; any other encoding in that
/// class is illegal.
pub(crate) fn build_decoder(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("decoder");
    let inst = m.input("inst", 32)?;

    let reg_write = m.output("reg_write", 1)?;
    let mem_read = m.output("mem_read", 1)?;
    let mem_write = m.output("mem_write", 1)?;
    let mem_to_reg = m.output("mem_to_reg", 1)?;
    let alu_src = m.output("alu_src", 1)?;
    let alu_pc = m.output("alu_pc", 1)?;
    let branch = m.output("branch", 1)?;
    let jump = m.output("jump", 1)?;
    let jalr = m.output("jalr", 1)?;
    let alu_op = m.output("alu_op", 5)?;
    let is_csr = m.output("is_csr", 1)?;
    let csr_imm = m.output("csr_imm", 1)?;
    let is_ecall = m.output("is_ecall", 1)?;
    let is_ebreak = m.output("is_ebreak", 1)?;
    let is_mret = m.output("is_mret", 1)?;
    let is_sret = m.output("is_sret", 1)?;
    let is_wfi = m.output("is_wfi", 1)?;
    let is_sfence = m.output("is_sfence", 1)?;
    let is_amo = m.output("is_amo", 1)?;
    let is_lr = m.output("is_lr", 1)?;
    let is_sc = m.output("is_sc", 1)?;
    let amo_op = m.output("amo_op", 5)?;
    let illegal = m.output("illegal", 1)?;

    let opc = m.bits(inst, 6, 0)?;
    let funct3 = m.bits(inst, 14, 12)?;
    let funct7 = m.bits(inst, 31, 25)?;
    let funct7_5 = m.bit(inst, 30)?;
    let imm12 = m.bits(inst, 31, 20)?;
    let funct5 = m.bits(inst, 31, 27)?;

    let opc_is = |m: &mut ModuleBuilder, tag: u64| -> Result<ExprId, BuildError> {
        let lit = m.lit(tag, 7);
        Ok(m.binary(BinOp::Eq, opc, lit))
    };
    let lui = opc_is(&mut m, opcode::LUI)?;
    let auipc = opc_is(&mut m, opcode::AUIPC)?;
    let jal_i = opc_is(&mut m, opcode::JAL)?;
    let jalr_i = opc_is(&mut m, opcode::JALR)?;
    let branch_i = opc_is(&mut m, opcode::BRANCH)?;
    let load = opc_is(&mut m, opcode::LOAD)?;
    let store = opc_is(&mut m, opcode::STORE)?;
    let op_imm = opc_is(&mut m, opcode::OP_IMM)?;
    let op_reg = opc_is(&mut m, opcode::OP)?;
    let misc_mem = opc_is(&mut m, opcode::MISC_MEM)?;
    let system = opc_is(&mut m, opcode::SYSTEM)?;
    let amo_opc = opc_is(&mut m, opcode::AMO)?;

    let or2 = |m: &mut ModuleBuilder, a: ExprId, b: ExprId| m.binary(BinOp::Or, a, b);
    let and2 = |m: &mut ModuleBuilder, a: ExprId, b: ExprId| m.binary(BinOp::And, a, b);

    // SYSTEM class split.
    let zero3 = m.lit(0, 3);
    let funct3_zero = m.binary(BinOp::Eq, funct3, zero3);
    let four3 = m.lit(4, 3);
    let funct3_four = m.binary(BinOp::Eq, funct3, four3);
    let sys0 = and2(&mut m, system, funct3_zero);
    let not_f3_zero = m.not(funct3_zero);
    let not_f3_four = m.not(funct3_four);
    let csr_f3 = and2(&mut m, not_f3_zero, not_f3_four);
    let csr_op = and2(&mut m, system, csr_f3);

    let imm_is = |m: &mut ModuleBuilder, tag: u64| -> ExprId {
        let lit = m.lit(tag, 12);
        m.binary(BinOp::Eq, imm12, lit)
    };
    let imm_ecall = imm_is(&mut m, 0x000);
    let imm_ebreak = imm_is(&mut m, 0x001);
    let imm_mret = imm_is(&mut m, 0x302);
    let imm_sret = imm_is(&mut m, 0x102);
    let imm_wfi = imm_is(&mut m, 0x105);
    let sfence_f7 = m.lit(0x09, 7);
    let f7_sfence = m.binary(BinOp::Eq, funct7, sfence_f7);

    let ecall = and2(&mut m, sys0, imm_ecall);
    let ebreak = and2(&mut m, sys0, imm_ebreak);
    let mret = and2(&mut m, sys0, imm_mret);
    let sret = and2(&mut m, sys0, imm_sret);
    let wfi = and2(&mut m, sys0, imm_wfi);
    let sfence = and2(&mut m, sys0, f7_sfence);

    let sys0_known = [ebreak, mret, sret, wfi, sfence]
        .iter()
        .fold(ecall, |acc, &x| or2(&mut m, acc, x));
    let sys0_unknown = {
        let not_known = m.not(sys0_known);
        and2(&mut m, sys0, not_known)
    };

    // AMO class requires word width.
    let two3 = m.lit(2, 3);
    let funct3_word = m.binary(BinOp::Eq, funct3, two3);
    let amo_word = and2(&mut m, amo_opc, funct3_word);
    let amo_bad_width = {
        let not_word = m.not(funct3_word);
        and2(&mut m, amo_opc, not_word)
    };
    let lr_tag = m.lit(amo::LR, 5);
    let lr = {
        let eq = m.binary(BinOp::Eq, funct5, lr_tag);
        and2(&mut m, amo_word, eq)
    };
    let sc_tag = m.lit(amo::SC, 5);
    let sc = {
        let eq = m.binary(BinOp::Eq, funct5, sc_tag);
        and2(&mut m, amo_word, eq)
    };

    let known = [
        auipc, jal_i, jalr_i, branch_i, load, store, op_imm, op_reg, misc_mem, system, amo_opc,
    ]
    .iter()
    .fold(lui, |acc, &x| or2(&mut m, acc, x));
    let unknown_opc = m.not(known);
    let bad = or2(&mut m, unknown_opc, sys0_unknown);
    let sys_f3_four = and2(&mut m, system, funct3_four);
    let bad = or2(&mut m, bad, sys_f3_four);
    let bad = or2(&mut m, bad, amo_bad_width);
    m.assign(illegal, bad)?;

    // Register writeback: everything but branches, stores and fences.
    let wr = [auipc, jal_i, jalr_i, load, op_imm, op_reg, csr_op, amo_word]
        .iter()
        .fold(lui, |acc, &x| or2(&mut m, acc, x));
    m.assign(reg_write, wr)?;

    m.assign(mem_read, load)?;
    m.assign(mem_write, store)?;
    m.assign(mem_to_reg, load)?;

    let src_imm = [auipc, load, store, op_imm]
        .iter()
        .fold(lui, |acc, &x| or2(&mut m, acc, x));
    m.assign(alu_src, src_imm)?;
    m.assign(alu_pc, auipc)?;
    m.assign(branch, branch_i)?;
    let jmp = or2(&mut m, jal_i, jalr_i);
    m.assign(jump, jmp)?;
    m.assign(jalr, jalr_i)?;

    m.assign(is_csr, csr_op)?;
    let f3_high = m.bit(inst, 14)?;
    m.assign(csr_imm, f3_high)?;
    m.assign(is_ecall, ecall)?;
    m.assign(is_ebreak, ebreak)?;
    m.assign(is_mret, mret)?;
    m.assign(is_sret, sret)?;
    m.assign(is_wfi, wfi)?;
    m.assign(is_sfence, sfence)?;
    m.assign(is_amo, amo_word)?;
    m.assign(is_lr, lr)?;
    m.assign(is_sc, sc)?;
    m.assign(amo_op, funct5)?;

    // ALU operation table.
    let alu_sel = build_alu_table(&mut m, AluTableIn {
        op_imm,
        op_reg,
        lui,
        funct3,
        funct7,
        funct7_5,
    })?;
    m.assign(alu_op, alu_sel)?;

    Ok(design.add_module(m.build()?))
}

struct AluTableIn {
    op_imm: ExprId,
    op_reg: ExprId,
    lui: ExprId,
    funct3: ExprId,
    funct7: ExprId,
    funct7_5: ExprId,
}

/// Pick the internal ALU operation from the instruction class and function
/// fields. Anything outside the two ALU classes computes an address or a
/// passthrough, so the default is ADD.
fn build_alu_table(m: &mut ModuleBuilder, i: AluTableIn) -> Result<ExprId, BuildError> {
    let code = |m: &mut ModuleBuilder, op: AluOp| m.lit(op.code(), 5);

    let add = code(m, AluOp::Add);
    let sub = code(m, AluOp::Sub);
    let sll = code(m, AluOp::Sll);
    let slt = code(m, AluOp::Slt);
    let sltu = code(m, AluOp::Sltu);
    let xor = code(m, AluOp::Xor);
    let srl = code(m, AluOp::Srl);
    let sra = code(m, AluOp::Sra);
    let or = code(m, AluOp::Or);
    let and = code(m, AluOp::And);
    let pass_b = code(m, AluOp::PassB);

    let shift_right = m.mux(i.funct7_5, sra, srl)?;
    let add_or_sub = m.mux(i.funct7_5, sub, add)?;

    // OP-IMM: immediate shifts take their mode from bit 30, ADDI never
    // subtracts.
    let imm_table = m.select(
        i.funct3,
        &[
            (0, add),
            (1, sll),
            (2, slt),
            (3, sltu),
            (4, xor),
            (5, shift_right),
            (6, or),
            (7, and),
        ],
        add,
    );

    let reg_table = m.select(
        i.funct3,
        &[
            (0, add_or_sub),
            (1, sll),
            (2, slt),
            (3, sltu),
            (4, xor),
            (5, shift_right),
            (6, or),
            (7, and),
        ],
        add,
    );

    let mul = code(m, AluOp::Mul);
    let mulh = code(m, AluOp::Mulh);
    let mulhsu = code(m, AluOp::Mulhsu);
    let mulhu = code(m, AluOp::Mulhu);
    let div = code(m, AluOp::Div);
    let divu = code(m, AluOp::Divu);
    let rem = code(m, AluOp::Rem);
    let remu = code(m, AluOp::Remu);
    let muldiv_table = m.select(
        i.funct3,
        &[
            (0, mul),
            (1, mulh),
            (2, mulhsu),
            (3, mulhu),
            (4, div),
            (5, divu),
            (6, rem),
            (7, remu),
        ],
        mul,
    );

    let one7 = m.lit(1, 7);
    let is_muldiv = m.binary(BinOp::Eq, i.funct7, one7);
    let reg_sel = m.mux(is_muldiv, muldiv_table, reg_table)?;

    let sel = m.mux(i.op_reg, reg_sel, add)?;
    let sel = m.mux(i.op_imm, imm_table, sel)?;
    let sel = m.mux(i.lui, pass_b, sel)?;
    Ok(sel)
}

/// Build the immediate generator: extract and sign-extend the I/S/B/U/J
/// forms, selected by major opcode.
pub(crate) fn build_immgen(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("immgen");
    let inst = m.input("inst", 32)?;
    let imm = m.output("imm", 32)?;

    let opc = m.bits(inst, 6, 0)?;

    let i_bits = m.bits(inst, 31, 20)?;
    let i_imm = m.sext(i_bits, 32)?;

    let s_hi = m.bits(inst, 31, 25)?;
    let s_lo = m.bits(inst, 11, 7)?;
    let s_bits = m.concat(&[s_hi, s_lo])?;
    let s_imm = m.sext(s_bits, 32)?;

    let b_12 = m.bit(inst, 31)?;
    let b_11 = m.bit(inst, 7)?;
    let b_10_5 = m.bits(inst, 30, 25)?;
    let b_4_1 = m.bits(inst, 11, 8)?;
    let zero1 = m.lit(0, 1);
    let b_bits = m.concat(&[b_12, b_11, b_10_5, b_4_1, zero1])?;
    let b_imm = m.sext(b_bits, 32)?;

    let u_hi = m.bits(inst, 31, 12)?;
    let zero12 = m.lit(0, 12);
    let u_imm = m.concat(&[u_hi, zero12])?;

    let j_20 = m.bit(inst, 31)?;
    let j_19_12 = m.bits(inst, 19, 12)?;
    let j_11 = m.bit(inst, 20)?;
    let j_10_1 = m.bits(inst, 30, 21)?;
    let j_bits = m.concat(&[j_20, j_19_12, j_11, j_10_1, zero1])?;
    let j_imm = m.sext(j_bits, 32)?;

    let out = m.select(
        opc,
        &[
            (opcode::LUI, u_imm),
            (opcode::AUIPC, u_imm),
            (opcode::JAL, j_imm),
            (opcode::JALR, i_imm),
            (opcode::BRANCH, b_imm),
            (opcode::LOAD, i_imm),
            (opcode::STORE, s_imm),
            (opcode::OP_IMM, i_imm),
            (opcode::SYSTEM, i_imm),
        ],
        i_imm,
    );
    m.assign(imm, out)?;

    Ok(design.add_module(m.build()?))
}

/// Build the branch condition unit. Signed less-than is composed from the
/// sign bits: differing signs decide directly, equal signs fall back to the
/// unsigned comparison.
pub(crate) fn build_branch(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("branch_unit");
    let a = m.input("a", 32)?;
    let b = m.input("b", 32)?;
    let funct3 = m.input("funct3", 3)?;
    let taken = m.output("taken", 1)?;

    let eq = m.binary(BinOp::Eq, a, b);
    let ne = m.not(eq);
    let ltu = m.binary(BinOp::Lt, a, b);
    let geu = m.not(ltu);

    let sign_a = m.bit(a, 31)?;
    let sign_b = m.bit(b, 31)?;
    let signs_differ = m.binary(BinOp::Xor, sign_a, sign_b);
    let lts = m.mux(signs_differ, sign_a, ltu)?;
    let ges = m.not(lts);

    let zero1 = m.lit(0, 1);
    let out = m.select(
        funct3,
        &[(0, eq), (1, ne), (4, lts), (5, ges), (6, ltu), (7, geu)],
        zero1,
    );
    m.assign(taken, out)?;

    Ok(design.add_module(m.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use silica_sim::Simulator;
    use test_case::test_case;

    fn decode(inst: u64) -> Simulator {
        let mut design = Design::new();
        let id = build_decoder(&mut design).unwrap();
        let mut sim = Simulator::new(design, id).unwrap();
        sim.poke("inst", inst).unwrap();
        sim.settle();
        sim
    }

    #[test]
    fn addi_controls() {
        // addi x1, x0, 5
        let sim = decode(0x0050_0093);
        assert_eq!(sim.peek("reg_write").unwrap(), 1);
        assert_eq!(sim.peek("alu_src").unwrap(), 1);
        assert_eq!(sim.peek("mem_read").unwrap(), 0);
        assert_eq!(sim.peek("alu_op").unwrap(), AluOp::Add.code());
        assert_eq!(sim.peek("illegal").unwrap(), 0);
    }

    #[test]
    fn add_vs_sub_take_funct7_bit() {
        // add x3, x1, x2 / sub x3, x1, x2
        assert_eq!(decode(0x0020_81B3).peek("alu_op").unwrap(), AluOp::Add.code());
        assert_eq!(decode(0x4020_81B3).peek("alu_op").unwrap(), AluOp::Sub.code());
    }

    #[test]
    fn muldiv_selects_m_extension_ops() {
        // mul x5, x6, x7 ; divu x5, x6, x7
        assert_eq!(decode(0x0273_02B3).peek("alu_op").unwrap(), AluOp::Mul.code());
        assert_eq!(decode(0x0273_52B3).peek("alu_op").unwrap(), AluOp::Divu.code());
    }

    #[test_case(0x0000_0073, "is_ecall"; "ecall")]
    #[test_case(0x0010_0073, "is_ebreak"; "ebreak")]
    #[test_case(0x3020_0073, "is_mret"; "mret")]
    #[test_case(0x1020_0073, "is_sret"; "sret")]
    #[test_case(0x1050_0073, "is_wfi"; "wfi")]
    #[test_case(0x1200_0073, "is_sfence"; "sfence vma")]
    fn privileged_system_instructions(inst: u64, line: &str) {
        let sim = decode(inst);
        assert_eq!(sim.peek(line).unwrap(), 1, "{line} should assert");
        assert_eq!(sim.peek("illegal").unwrap(), 0);
    }

    #[test]
    fn unknown_system_zero_encoding_is_illegal() {
        let sim = decode(0x7070_0073);
        assert_eq!(sim.peek("illegal").unwrap(), 1);
    }

    #[test]
    fn unknown_major_opcode_is_illegal() {
        assert_eq!(decode(0x0000_002B).peek("illegal").unwrap(), 1);
    }

    #[test]
    fn lr_and_sc_decode() {
        // lr.w x2, (x1) ; sc.w x3, x4, (x1)
        let lr = decode(0x1000_A12F);
        assert_eq!(lr.peek("is_amo").unwrap(), 1);
        assert_eq!(lr.peek("is_lr").unwrap(), 1);
        let sc = decode(0x1840_A1AF);
        assert_eq!(sc.peek("is_sc").unwrap(), 1);
        assert_eq!(sc.peek("reg_write").unwrap(), 1);
    }

    fn immediate(inst: u64) -> u64 {
        let mut design = Design::new();
        let id = build_immgen(&mut design).unwrap();
        let mut sim = Simulator::new(design, id).unwrap();
        sim.poke("inst", inst).unwrap();
        sim.settle();
        sim.peek("imm").unwrap()
    }

    #[test_case(0x0050_0093, 5; "addi small positive")]
    #[test_case(0xFFF0_0093, 0xFFFF_FFFF; "addi minus one")]
    #[test_case(0xFE20_2E23, 0xFFFF_FFFC; "sw negative offset")]
    #[test_case(0xDEAD_B0B7, 0xDEAD_B000; "lui upper immediate")]
    fn immediates(inst: u64, expected: u64) {
        assert_eq!(immediate(inst), expected);
    }

    #[test]
    fn branch_immediate_is_even_and_signed() {
        // beq x1, x2, -8  => imm[12|10:5]=..., encoded 0xFE208CE3
        assert_eq!(immediate(0xFE20_8CE3), 0xFFFF_FFF8);
    }

    fn branch_taken(a: u64, b: u64, funct3: u64) -> u64 {
        let mut design = Design::new();
        let id = build_branch(&mut design).unwrap();
        let mut sim = Simulator::new(design, id).unwrap();
        sim.poke("a", a).unwrap();
        sim.poke("b", b).unwrap();
        sim.poke("funct3", funct3).unwrap();
        sim.settle();
        sim.peek("taken").unwrap()
    }

    #[test_case(5, 5, 0, 1; "beq equal")]
    #[test_case(5, 6, 0, 0; "beq unequal")]
    #[test_case(5, 6, 1, 1; "bne")]
    #[test_case(0xFFFF_FFFF, 0, 4, 1; "blt signed")]
    #[test_case(0xFFFF_FFFF, 0, 6, 0; "bltu unsigned")]
    #[test_case(0, 0xFFFF_FFFF, 5, 1; "bge signed")]
    #[test_case(7, 7, 5, 1; "bge equal")]
    fn branch_conditions(a: u64, b: u64, funct3: u64, expected: u64) {
        assert_eq!(branch_taken(a, b, funct3), expected);
    }
}
