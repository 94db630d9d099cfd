//! The RV32IM ALU as an IR module.

use crate::consts::AluOp;
use silica_ir::{BinOp, BuildError, Design, ModuleBuilder, ModuleId};

/// Build the 20-operation ALU.
///
/// M-extension division maps straight onto the IR's divider contract:
/// division by zero yields all ones with the dividend as remainder, and
/// `MIN / -1` yields `MIN` with remainder zero.
pub(crate) fn build_alu(design: &mut Design) -> Result<ModuleId, BuildError> {
    let mut m = ModuleBuilder::new("alu");
    let a = m.input("a", 32)?;
    let b = m.input("b", 32)?;
    let op = m.input("op", 5)?;
    let result = m.output("result", 32)?;

    let shamt = m.bits(b, 4, 0)?;

    let add = m.binary(BinOp::Add, a, b);
    let sub = m.binary(BinOp::Sub, a, b);
    let sll = m.binary(BinOp::Shl, a, shamt);
    let slt = m.binary(BinOp::Slt, a, b);
    let sltu = m.binary(BinOp::Lt, a, b);
    let xor = m.binary(BinOp::Xor, a, b);
    let srl = m.binary(BinOp::Shr, a, shamt);
    let sra = m.binary(BinOp::Sra, a, shamt);
    let or = m.binary(BinOp::Or, a, b);
    let and = m.binary(BinOp::And, a, b);

    // Widen once; the three MULH variants differ only in which operand is
    // sign-extended.
    let a_s = m.sext(a, 64)?;
    let b_s = m.sext(b, 64)?;
    let a_u = m.zext(a, 64)?;
    let b_u = m.zext(b, 64)?;
    let mul = m.binary(BinOp::Mul, a, b);
    let mulh_ss = m.binary(BinOp::Mul, a_s, b_s);
    let mulh = m.bits(mulh_ss, 63, 32)?;
    let mulh_su = m.binary(BinOp::Mul, a_s, b_u);
    let mulhsu = m.bits(mulh_su, 63, 32)?;
    let mulh_uu = m.binary(BinOp::Mul, a_u, b_u);
    let mulhu = m.bits(mulh_uu, 63, 32)?;

    let div = m.binary(BinOp::SDiv, a, b);
    let divu = m.binary(BinOp::UDiv, a, b);
    let rem = m.binary(BinOp::SRem, a, b);
    let remu = m.binary(BinOp::URem, a, b);

    let out = m.select(
        op,
        &[
            (AluOp::Add.code(), add),
            (AluOp::Sub.code(), sub),
            (AluOp::Sll.code(), sll),
            (AluOp::Slt.code(), slt),
            (AluOp::Sltu.code(), sltu),
            (AluOp::Xor.code(), xor),
            (AluOp::Srl.code(), srl),
            (AluOp::Sra.code(), sra),
            (AluOp::Or.code(), or),
            (AluOp::And.code(), and),
            (AluOp::PassA.code(), a.expr),
            (AluOp::PassB.code(), b.expr),
            (AluOp::Mul.code(), mul),
            (AluOp::Mulh.code(), mulh),
            (AluOp::Mulhsu.code(), mulhsu),
            (AluOp::Mulhu.code(), mulhu),
            (AluOp::Div.code(), div),
            (AluOp::Divu.code(), divu),
            (AluOp::Rem.code(), rem),
            (AluOp::Remu.code(), remu),
        ],
        add,
    );
    m.assign(result, out)?;

    Ok(design.add_module(m.build()?))
}
