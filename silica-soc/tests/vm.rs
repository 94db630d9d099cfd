//! Sv32 translation: walks, TLB fills and flushes, page faults.

use silica_soc::asm::*;
use silica_soc::consts::{cause, csr, PteFlags, PTE_PPN_SHIFT};
use silica_soc::Machine;

const ROOT: u32 = 0x10000; // page table root, ppn = 0x10
const PT0: u32 = 0x11000; // second-level table, ppn = 0x11
const SATP_VALUE: u32 = 0x8000_0010;

fn pte(ppn: u32, flags: PteFlags) -> u32 {
    (ppn << PTE_PPN_SHIFT) | flags.bits()
}

fn rwx() -> PteFlags {
    PteFlags::V | PteFlags::R | PteFlags::W | PteFlags::X
}

/// Identity-map the low 4 KiB through a two-level table, run machine-mode
/// setup at 0x2000 that enters supervisor mode at VA `entry`.
fn supervisor_machine(s_code: &[u32], entry: i32) -> Machine {
    let mut machine = Machine::with_defaults().expect("machine builds");
    // Page table: root[0] points at PT0, PT0[0] identity-maps page zero.
    machine.load_data(&[pte(0x11, PteFlags::V)], ROOT);
    machine.load_data(&[pte(0x0, rwx())], PT0);

    // Reset vector: hop over the supervisor code into machine setup.
    machine.load_program(&[jal(0, 0x2000)], 0);
    machine.load_program(s_code, 4);

    machine.load_program(
        &[
            lui(1, 0x8000_0000),
            addi(1, 1, 0x10), // satp: mode 1, root ppn 0x10
            csrrw(0, csr::SATP as u32, 1),
            addi(3, 0, entry),
            csrrw(0, csr::MEPC as u32, 3),
            lui(6, 0x2000),
            addi(6, 6, 0x100),
            csrrw(0, csr::MTVEC as u32, 6), // handler at 0x2100
            addi(2, 0, 1),
            slli(2, 2, 11), // MPP = supervisor
            csrrw(0, csr::MSTATUS as u32, 2),
            mret(),
        ],
        0x2000,
    );
    machine
}

#[test]
fn instruction_fetch_through_the_identity_map() {
    let mut machine = supervisor_machine(&[addi(1, 0, 7), jal(0, 0)], 4);
    machine.run_cycles(16).unwrap();

    assert_eq!(machine.read_reg(1).unwrap(), 7, "translated fetch executed");
    assert_eq!(machine.read_pc().unwrap(), 8, "spinning at the mapped loop");
    assert_eq!(machine.read_mode().unwrap(), 1);
    assert_eq!(
        machine.simulator().peek("itlb.valid0").unwrap(),
        1,
        "the walk filled the instruction TLB"
    );
}

#[test]
fn translated_loads_and_stores() {
    let mut machine = supervisor_machine(
        &[
            addi(1, 0, 0x300),
            addi(2, 0, 55),
            sw(2, 1, 0),
            lw(3, 1, 0),
            jal(0, 0),
        ],
        4,
    );
    machine.run_cycles(20).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 55);
    assert_eq!(machine.ram().read32(0x300), 55, "identity map hits the same bytes");
    assert_eq!(machine.simulator().peek("dtlb.valid0").unwrap(), 1);
}

#[test]
fn store_to_an_unmapped_page_faults_and_is_squashed() {
    let mut machine = supervisor_machine(
        &[
            addi(1, 0, 0x100),
            lr_w(4, 1), // reservation at 0x100
            addi(2, 0, 1),
            slli(2, 2, 12), // VA 0x1000, PT0[1] is invalid
            addi(3, 0, 55),
            sw(3, 2, 0), // store page fault
        ],
        4,
    );
    // Machine-mode handler: the reservation must have survived the faulting
    // store, so this SC succeeds.
    machine.load_program(&[sc_w(5, 1, 3), jal(0, 0)], 0x2100);
    machine.run_cycles(24).unwrap();

    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        cause::STORE_PAGE_FAULT as u32
    );
    assert_eq!(
        machine.read_csr(csr::MTVAL as u32).unwrap(),
        0x1000,
        "tval is the faulting virtual address"
    );
    assert_eq!(machine.read_csr(csr::MEPC as u32).unwrap(), 24);
    assert_eq!(machine.read_mode().unwrap(), 3, "fault was not delegated");
    assert_eq!(machine.ram().read32(0x1000), 0, "the faulting store is squashed");
    assert_eq!(machine.read_reg(5).unwrap(), 0, "reservation survived the fault");
    assert_eq!(machine.ram().read32(0x100), 55);
}

#[test]
fn load_fault_classifies_as_cause_13() {
    let mut machine = supervisor_machine(
        &[
            addi(2, 0, 1),
            slli(2, 2, 12),
            lw(3, 2, 0), // VA 0x1000 unmapped
        ],
        4,
    );
    machine.load_program(&[jal(0, 0)], 0x2100);
    machine.run_cycles(20).unwrap();
    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        cause::LOAD_PAGE_FAULT as u32
    );
    assert_eq!(machine.read_csr(csr::MTVAL as u32).unwrap(), 0x1000);
    assert_eq!(machine.read_reg(3).unwrap(), 0, "load writeback suppressed");
}

#[test]
fn sfence_vma_flushes_the_tlbs() {
    let mut machine = supervisor_machine(&[addi(1, 0, 7), ecall()], 4);
    // Machine handler: flush, then spin.
    machine.load_program(&[sfence_vma(), jal(0, 0)], 0x2100);
    machine.run_cycles(20).unwrap();

    assert_eq!(
        machine.read_csr(csr::MCAUSE as u32).unwrap(),
        cause::ECALL_S as u32
    );
    assert_eq!(
        machine.simulator().peek("itlb.valid0").unwrap(),
        0,
        "sfence.vma invalidated the entry the fetch had filled"
    );
}

#[test]
fn satp_write_flushes_the_tlbs() {
    let mut machine = supervisor_machine(&[addi(1, 0, 7), ecall()], 4);
    // Machine handler: rewrite satp (same value), which must still flush.
    machine.load_program(
        &[
            lui(1, 0x8000_0000),
            addi(1, 1, 0x10),
            csrrw(0, csr::SATP as u32, 1),
            jal(0, 0),
        ],
        0x2100,
    );
    machine.run_cycles(22).unwrap();
    assert_eq!(machine.simulator().peek("itlb.valid0").unwrap(), 0);
    assert_eq!(machine.read_csr(csr::SATP as u32).unwrap(), SATP_VALUE);
}

#[test]
fn megapage_maps_without_a_second_level() {
    let mut machine = Machine::with_defaults().expect("machine builds");
    // root[0] is itself a leaf: one 4 MiB identity megapage.
    machine.load_data(&[pte(0, rwx())], ROOT);
    machine.load_program(&[jal(0, 0x2000)], 0);
    machine.load_program(&[addi(1, 0, 9), jal(0, 0)], 4);
    machine.load_program(
        &[
            lui(1, 0x8000_0000),
            addi(1, 1, 0x10),
            csrrw(0, csr::SATP as u32, 1),
            addi(3, 0, 4),
            csrrw(0, csr::MEPC as u32, 3),
            addi(2, 0, 1),
            slli(2, 2, 11),
            csrrw(0, csr::MSTATUS as u32, 2),
            mret(),
        ],
        0x2000,
    );
    machine.run_cycles(16).unwrap();
    assert_eq!(machine.read_reg(1).unwrap(), 9);
    assert_eq!(machine.read_mode().unwrap(), 1);
}
