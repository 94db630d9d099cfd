//! Trap entry, trap return, interrupts and delegation.

use silica_soc::asm::*;
use silica_soc::consts::{cause, csr, status};
use silica_soc::Machine;

fn machine_with(program: &[u32]) -> Machine {
    let mut machine = Machine::with_defaults().expect("machine builds");
    machine.load_program(program, 0);
    machine
}

/// mtvec <- 0x80 with a spin handler placed there.
fn with_mtvec(machine: &mut Machine) {
    machine.load_program(&[jal(0, 0)], 0x80);
}

#[test]
fn ecall_from_machine_mode() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        ecall(),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(4).unwrap();
    assert_eq!(machine.read_csr(csr::MCAUSE as u32).unwrap(), cause::ECALL_M as u32);
    assert_eq!(machine.read_csr(csr::MEPC as u32).unwrap(), 8);
    assert_eq!(machine.read_csr(csr::MTVAL as u32).unwrap(), 0);
    assert_eq!(machine.read_pc().unwrap(), 0x80);
}

#[test]
fn ebreak_traps_with_cause_three() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        ebreak(),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(4).unwrap();
    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        cause::BREAKPOINT as u32
    );
}

#[test]
fn illegal_instruction_records_the_word() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        0x0000_002B, // unused major opcode
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(4).unwrap();
    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        cause::ILLEGAL as u32
    );
    assert_eq!(machine.read_csr(csr::MTVAL as u32).unwrap(), 0x2B);
    assert_eq!(machine.read_csr(csr::MEPC as u32).unwrap(), 8);
}

#[test]
fn trap_suppresses_register_writeback() {
    // The illegal word would have rd = x1 bits set; x1 must stay 0.
    let mut machine = machine_with(&[
        addi(2, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 2),
        0x0000_00AB, // rd bits point at x1, opcode is unused
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(4).unwrap();
    assert_eq!(machine.read_reg(1).unwrap(), 0);
}

#[test]
fn trap_entry_pushes_the_interrupt_stack() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        csrrsi(0, csr::MSTATUS as u32, 8), // MIE on
        ecall(),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(5).unwrap();
    let mstatus = machine.read_csr(csr::MSTATUS as u32).unwrap();
    assert_eq!(mstatus & (1 << status::MIE_BIT), 0, "MIE cleared");
    assert_ne!(mstatus & (1 << status::MPIE_BIT), 0, "MPIE holds the old MIE");
    let mpp = (mstatus >> status::MPP_SHIFT) & 3;
    assert_eq!(mpp, 3, "trapped from machine mode");
}

#[test]
fn mret_restores_and_returns() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        csrrsi(0, csr::MSTATUS as u32, 8),
        ecall(),
    ]);
    // Handler: bump mepc past the ecall, then mret.
    machine.load_program(
        &[
            csrrs(2, csr::MEPC as u32, 0),
            addi(2, 2, 4),
            csrrw(0, csr::MEPC as u32, 2),
            mret(),
        ],
        0x80,
    );
    // Continuation after the ecall.
    machine.load_program(&[addi(3, 0, 77), jal(0, 0)], 16);
    machine.run_cycles(12).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 77, "execution resumed after mret");
    let mstatus = machine.read_csr(csr::MSTATUS as u32).unwrap();
    assert_ne!(mstatus & (1 << status::MIE_BIT), 0, "MIE restored from MPIE");
    assert_eq!(machine.read_mode().unwrap(), 3);
}

#[test]
fn timer_interrupt_fires_once_at_compare() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        addi(2, 0, 128), // MTIE
        csrrw(0, csr::MIE as u32, 2),
        csrrsi(0, csr::MSTATUS as u32, 8), // MIE
        jal(0, 0),
    ]);
    with_mtvec(&mut machine);
    machine.clint_mut().set_mtimecmp(10);
    machine.run_cycles(30).unwrap();

    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        (cause::INTERRUPT_BIT | cause::M_TIMER) as u32
    );
    assert_eq!(
        machine.read_csr(csr::MEPC as u32).unwrap(),
        20,
        "the interrupted loop instruction"
    );
    assert_eq!(machine.read_pc().unwrap(), 0x80);
    // MIE was cleared on entry, so the still-pending timer cannot re-trap;
    // mepc still points at the loop, not the handler.
    let mstatus = machine.read_csr(csr::MSTATUS as u32).unwrap();
    assert_eq!(mstatus & (1 << status::MIE_BIT), 0);
}

#[test]
fn injected_software_interrupt() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        addi(2, 0, 8), // MSIE
        csrrw(0, csr::MIE as u32, 2),
        csrrsi(0, csr::MSTATUS as u32, 8),
        jal(0, 0),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(6).unwrap();
    machine.set_interrupts(Some(true), None, None);
    machine.run_cycles(3).unwrap();
    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        (cause::INTERRUPT_BIT | cause::M_SOFT) as u32
    );
}

#[test]
fn delegated_software_interrupt_enters_supervisor() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::STVEC as u32, 1),
        addi(2, 0, 8), // machine software bit
        csrrw(0, csr::MIDELEG as u32, 2),
        csrrw(0, csr::MIE as u32, 2),
        csrrsi(0, csr::MSTATUS as u32, 2), // sstatus.SIE
        jal(0, 0),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(7).unwrap();
    machine.set_interrupts(Some(true), None, None);
    machine.run_cycles(3).unwrap();
    assert_eq!(
        machine.read_csr(csr::SCAUSE as u32).unwrap(),
        (cause::INTERRUPT_BIT | cause::M_SOFT) as u32
    );
    assert_eq!(machine.read_pc().unwrap(), 0x80);
    assert_eq!(machine.read_mode().unwrap(), 1, "delegated trap lands in S");
    assert_eq!(
        machine.read_csr(csr::SEPC as u32).unwrap(),
        24,
        "the interrupted loop instruction"
    );
}

#[test]
fn external_interrupt_through_the_plic() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        addi(2, 0, 1),
        slli(2, 2, 11), // MEIE
        csrrw(0, csr::MIE as u32, 2),
        csrrsi(0, csr::MSTATUS as u32, 8),
        // PLIC: priority[10] = 3, enable source 10, threshold 0.
        lui(3, 0x0C00_0000),
        addi(4, 0, 3),
        sw(4, 3, 40),
        lui(5, 0x0C00_2000),
        addi(6, 0, 1024),
        sw(6, 5, 0),
        jal(0, 0),
    ]);
    with_mtvec(&mut machine);
    machine.run_cycles(13).unwrap();
    machine.set_plic_sources(None, Some(true));
    machine.run_cycles(3).unwrap();
    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        (cause::INTERRUPT_BIT | cause::M_EXT) as u32
    );
    assert_eq!(machine.read_pc().unwrap(), 0x80);
}

#[test]
fn ecall_from_user_delegates_to_supervisor() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::STVEC as u32, 1),
        addi(2, 0, 256), // delegate ecall-from-U
        csrrw(0, csr::MEDELEG as u32, 2),
        addi(3, 0, 0x40),
        csrrw(0, csr::MEPC as u32, 3),
        csrrw(0, csr::MSTATUS as u32, 0), // MPP = user
        mret(),
    ]);
    machine.load_program(&[ecall()], 0x40);
    // Supervisor handler: resume past the ecall.
    machine.load_program(
        &[
            csrrs(4, csr::SEPC as u32, 0),
            addi(4, 4, 4),
            csrrw(0, csr::SEPC as u32, 4),
            sret(),
        ],
        0x80,
    );
    // Continuation in user mode.
    machine.load_program(&[addi(5, 0, 88), jal(0, 0)], 0x44);
    machine.run_cycles(9).unwrap();

    assert_eq!(
        machine.read_csr(csr::SCAUSE as u32).unwrap(),
        cause::ECALL_U as u32,
        "delegated ecall from user"
    );
    assert_eq!(machine.read_csr(csr::SEPC as u32).unwrap(), 0x40);
    assert_eq!(machine.read_mode().unwrap(), 1, "trap entered supervisor");
    let sstatus = machine.read_csr(csr::SSTATUS as u32).unwrap();
    assert_eq!(sstatus & (1 << status::SPP_BIT), 0, "came from user");

    machine.run_cycles(6).unwrap();
    assert_eq!(machine.read_mode().unwrap(), 0, "sret dropped back to user");
    assert_eq!(machine.read_reg(5).unwrap(), 88, "resumed after the ecall");
}

#[test]
fn interrupts_wait_for_the_global_enable() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x80),
        csrrw(0, csr::MTVEC as u32, 1),
        addi(2, 0, 8),
        csrrw(0, csr::MIE as u32, 2),
        jal(0, 0), // MIE never set
    ]);
    with_mtvec(&mut machine);
    machine.set_interrupts(Some(true), None, None);
    machine.run_cycles(10).unwrap();
    assert_eq!(machine.read_csr(csr::MCAUSE as u32).unwrap(), 0, "no trap");
    assert_eq!(machine.read_pc().unwrap(), 16, "still spinning at the loop");
}
