//! Architectural constants: opcodes, CSR numbers, causes, status fields and
//! the physical memory map.

/// Major opcodes (bits 6..0 of an instruction).
pub mod opcode {
    /// LUI.
    pub const LUI: u64 = 0x37;
    /// AUIPC.
    pub const AUIPC: u64 = 0x17;
    /// JAL.
    pub const JAL: u64 = 0x6F;
    /// JALR.
    pub const JALR: u64 = 0x67;
    /// Conditional branches.
    pub const BRANCH: u64 = 0x63;
    /// Loads.
    pub const LOAD: u64 = 0x03;
    /// Stores.
    pub const STORE: u64 = 0x23;
    /// Register-immediate ALU.
    pub const OP_IMM: u64 = 0x13;
    /// Register-register ALU (incl. M extension under funct7 = 1).
    pub const OP: u64 = 0x33;
    /// FENCE; retires as a no-op.
    pub const MISC_MEM: u64 = 0x0F;
    /// CSR and privileged instructions.
    pub const SYSTEM: u64 = 0x73;
    /// LR/SC and AMO read-modify-writes.
    pub const AMO: u64 = 0x2F;
}

/// `funct5` field (bits 31..27) of AMO-class instructions.
pub mod amo {
    /// LR.W.
    pub const LR: u64 = 0x02;
    /// SC.W.
    pub const SC: u64 = 0x03;
    /// AMOSWAP.W.
    pub const SWAP: u64 = 0x01;
    /// AMOADD.W.
    pub const ADD: u64 = 0x00;
    /// AMOXOR.W.
    pub const XOR: u64 = 0x04;
    /// AMOAND.W.
    pub const AND: u64 = 0x0C;
    /// AMOOR.W.
    pub const OR: u64 = 0x08;
    /// AMOMIN.W.
    pub const MIN: u64 = 0x10;
    /// AMOMAX.W.
    pub const MAX: u64 = 0x14;
    /// AMOMINU.W.
    pub const MINU: u64 = 0x18;
    /// AMOMAXU.W.
    pub const MAXU: u64 = 0x1C;
}

/// CSR numbers.
pub mod csr {
    /// Machine status.
    pub const MSTATUS: u64 = 0x300;
    /// Machine exception delegation.
    pub const MEDELEG: u64 = 0x302;
    /// Machine interrupt delegation.
    pub const MIDELEG: u64 = 0x303;
    /// Machine interrupt enable.
    pub const MIE: u64 = 0x304;
    /// Machine trap vector.
    pub const MTVEC: u64 = 0x305;
    /// Machine scratch.
    pub const MSCRATCH: u64 = 0x340;
    /// Machine exception PC.
    pub const MEPC: u64 = 0x341;
    /// Machine trap cause.
    pub const MCAUSE: u64 = 0x342;
    /// Machine trap value.
    pub const MTVAL: u64 = 0x343;
    /// Machine interrupt pending.
    pub const MIP: u64 = 0x344;
    /// Supervisor status; a masked view of `mstatus`.
    pub const SSTATUS: u64 = 0x100;
    /// Supervisor interrupt enable; a `mideleg`-masked view of `mie`.
    pub const SIE: u64 = 0x104;
    /// Supervisor trap vector.
    pub const STVEC: u64 = 0x105;
    /// Supervisor scratch.
    pub const SSCRATCH: u64 = 0x140;
    /// Supervisor exception PC.
    pub const SEPC: u64 = 0x141;
    /// Supervisor trap cause.
    pub const SCAUSE: u64 = 0x142;
    /// Supervisor trap value.
    pub const STVAL: u64 = 0x143;
    /// Supervisor interrupt pending; a `mideleg`-masked view of `mip`.
    pub const SIP: u64 = 0x144;
    /// Supervisor address translation and protection.
    pub const SATP: u64 = 0x180;
}

/// Trap causes. Interrupt causes carry [`INTERRUPT_BIT`](cause::INTERRUPT_BIT).
pub mod cause {
    /// MSB flag distinguishing interrupts from exceptions.
    pub const INTERRUPT_BIT: u64 = 0x8000_0000;
    /// Supervisor software interrupt.
    pub const S_SOFT: u64 = 1;
    /// Machine software interrupt.
    pub const M_SOFT: u64 = 3;
    /// Supervisor timer interrupt.
    pub const S_TIMER: u64 = 5;
    /// Machine timer interrupt.
    pub const M_TIMER: u64 = 7;
    /// Supervisor external interrupt.
    pub const S_EXT: u64 = 9;
    /// Machine external interrupt.
    pub const M_EXT: u64 = 11;
    /// Illegal instruction.
    pub const ILLEGAL: u64 = 2;
    /// Breakpoint.
    pub const BREAKPOINT: u64 = 3;
    /// Environment call from U-mode.
    pub const ECALL_U: u64 = 8;
    /// Environment call from S-mode.
    pub const ECALL_S: u64 = 9;
    /// Environment call from M-mode.
    pub const ECALL_M: u64 = 11;
    /// Instruction page fault.
    pub const INST_PAGE_FAULT: u64 = 12;
    /// Load page fault.
    pub const LOAD_PAGE_FAULT: u64 = 13;
    /// Store/AMO page fault.
    pub const STORE_PAGE_FAULT: u64 = 15;
}

/// `mstatus` bit positions and masks.
pub mod status {
    /// Supervisor interrupt enable.
    pub const SIE_BIT: u64 = 1;
    /// Machine interrupt enable.
    pub const MIE_BIT: u64 = 3;
    /// Supervisor previous interrupt enable.
    pub const SPIE_BIT: u64 = 5;
    /// Machine previous interrupt enable.
    pub const MPIE_BIT: u64 = 7;
    /// Supervisor previous privilege (one bit).
    pub const SPP_BIT: u64 = 8;
    /// Machine previous privilege (two bits).
    pub const MPP_SHIFT: u64 = 11;
    /// Permit supervisor access to user pages.
    pub const SUM_BIT: u64 = 18;
    /// Make executable pages readable.
    pub const MXR_BIT: u64 = 19;
    /// Bits of `mstatus` visible through `sstatus`.
    pub const SSTATUS_MASK: u64 = (1 << SIE_BIT)
        | (1 << SPIE_BIT)
        | (1 << SPP_BIT)
        | (1 << SUM_BIT)
        | (1 << MXR_BIT);
}

/// Privilege encodings held in the core's mode register.
pub mod mode {
    /// User.
    pub const USER: u64 = 0;
    /// Supervisor.
    pub const SUPERVISOR: u64 = 1;
    /// Machine; the reset privilege.
    pub const MACHINE: u64 = 3;
}

/// Internal ALU operation selector, the value carried on the decoder's
/// `alu_op` control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::FromRepr)]
#[repr(u8)]
pub enum AluOp {
    /// `a + b`.
    Add = 0,
    /// `a - b`.
    Sub = 1,
    /// `a << b[4:0]`.
    Sll = 2,
    /// Signed `a < b`.
    Slt = 3,
    /// Unsigned `a < b`.
    Sltu = 4,
    /// `a ^ b`.
    Xor = 5,
    /// `a >> b[4:0]`, logical.
    Srl = 6,
    /// `a >> b[4:0]`, arithmetic.
    Sra = 7,
    /// `a | b`.
    Or = 8,
    /// `a & b`.
    And = 9,
    /// Pass operand `a`.
    PassA = 10,
    /// Pass operand `b`.
    PassB = 11,
    /// Low word of `a * b`.
    Mul = 12,
    /// High word of signed × signed.
    Mulh = 13,
    /// High word of signed × unsigned.
    Mulhsu = 14,
    /// High word of unsigned × unsigned.
    Mulhu = 15,
    /// Signed division.
    Div = 16,
    /// Unsigned division.
    Divu = 17,
    /// Signed remainder.
    Rem = 18,
    /// Unsigned remainder.
    Remu = 19,
}

impl AluOp {
    /// The value placed on the 5-bit `alu_op` control line.
    #[inline]
    pub const fn code(self) -> u64 {
        self as u64
    }
}

bitflags::bitflags! {
    /// Sv32 page-table entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// Valid.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// User-accessible.
        const U = 1 << 4;
        /// Global.
        const G = 1 << 5;
        /// Accessed.
        const A = 1 << 6;
        /// Dirty.
        const D = 1 << 7;
    }
}

/// Bit offset of the PPN within a PTE.
pub const PTE_PPN_SHIFT: u32 = 10;

/// Physical memory map.
pub mod map {
    /// CLINT base.
    pub const CLINT_BASE: u32 = 0x0200_0000;
    /// CLINT span.
    pub const CLINT_SIZE: u32 = 0x0001_0000;
    /// PLIC base.
    pub const PLIC_BASE: u32 = 0x0C00_0000;
    /// PLIC span.
    pub const PLIC_SIZE: u32 = 0x0040_0000;
    /// UART base.
    pub const UART_BASE: u32 = 0x1000_0000;
    /// UART span (eight byte registers).
    pub const UART_SIZE: u32 = 0x0000_0008;
    /// VirtIO MMIO block device base.
    pub const VIRTIO_BASE: u32 = 0x1000_1000;
    /// VirtIO MMIO span.
    pub const VIRTIO_SIZE: u32 = 0x0000_1000;
}

/// PLIC source ids.
pub mod irq {
    /// VirtIO block device.
    pub const VIRTIO: u32 = 1;
    /// UART.
    pub const UART: u32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn alu_op_codes_fit_the_control_line() {
        for op in AluOp::iter() {
            assert!(op.code() < 32, "{op:?} overflows the 5-bit selector");
            assert_eq!(AluOp::from_repr(op.code() as u8), Some(op));
        }
    }

    #[test]
    fn sstatus_mask_covers_the_supervisor_view() {
        assert_eq!(status::SSTATUS_MASK, 0x000C_0122);
    }
}
