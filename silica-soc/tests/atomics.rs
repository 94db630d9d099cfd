//! LR/SC and AMO read-modify-write behavior.

use silica_soc::asm::*;
use silica_soc::Machine;

fn machine_with(program: &[u32]) -> Machine {
    let mut machine = Machine::with_defaults().expect("machine builds");
    machine.load_program(program, 0);
    machine
}

#[test]
fn lr_sc_succeeds_without_intervening_store() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(4, 0, 42),
        lr_w(2, 1),
        sc_w(3, 1, 4),
    ]);
    machine.load_data(&[77], 0x100);
    machine.run_cycles(4).unwrap();
    assert_eq!(machine.read_reg(2).unwrap(), 77, "lr loads the old value");
    assert_eq!(machine.read_reg(3).unwrap(), 0, "sc reports success");
    assert_eq!(machine.ram().read32(0x100), 42);
}

#[test]
fn lr_sc_fails_after_intervening_store() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(4, 0, 42),
        addi(5, 0, 7),
        lr_w(2, 1),
        sw(5, 1, 0),
        sc_w(3, 1, 4),
    ]);
    machine.run_cycles(6).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 1, "sc reports failure");
    assert_eq!(machine.ram().read32(0x100), 7, "the sc store was dropped");
}

#[test]
fn sc_without_reservation_fails() {
    let mut machine = machine_with(&[addi(1, 0, 0x100), addi(4, 0, 42), sc_w(3, 1, 4)]);
    machine.run_cycles(3).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 1);
    assert_eq!(machine.ram().read32(0x100), 0);
}

#[test]
fn sc_to_a_different_address_fails() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(6, 0, 0x180),
        lr_w(2, 1),
        sc_w(3, 6, 4),
    ]);
    machine.run_cycles(4).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 1);
}

#[test]
fn amo_rmw_clears_the_reservation() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(5, 0, 1),
        lr_w(2, 1),
        amoadd_w(6, 1, 5),
        sc_w(3, 1, 5),
    ]);
    machine.run_cycles(5).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 1, "amo broke the reservation");
    assert_eq!(machine.ram().read32(0x100), 1, "only the amo stored");
}

#[test]
fn amoadd_returns_old_and_stores_sum() {
    let mut machine = machine_with(&[addi(1, 0, 0x100), addi(2, 0, 5), amoadd_w(3, 1, 2)]);
    machine.load_data(&[10], 0x100);
    machine.run_cycles(3).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 10);
    assert_eq!(machine.ram().read32(0x100), 15);
}

#[test]
fn amoswap_exchanges_values() {
    let mut machine = machine_with(&[addi(1, 0, 0x100), addi(2, 0, 5), amoswap_w(3, 1, 2)]);
    machine.load_data(&[99], 0x100);
    machine.run_cycles(3).unwrap();
    assert_eq!(machine.read_reg(3).unwrap(), 99);
    assert_eq!(machine.ram().read32(0x100), 5);
}

#[test]
fn signed_and_unsigned_min_max() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(2, 0, -5),
        amomin_w(3, 1, 2),
        addi(4, 0, 0x140),
        amominu_w(5, 4, 2),
    ]);
    machine.load_data(&[3], 0x100);
    machine.load_data(&[3], 0x140);
    machine.run_cycles(5).unwrap();
    // Signed: min(3, -5) = -5.
    assert_eq!(machine.ram().read32(0x100), (-5i32) as u32);
    // Unsigned: -5 is huge, so min(3, 0xFFFF_FFFB) = 3.
    assert_eq!(machine.ram().read32(0x140), 3);
}

#[test]
fn amo_logical_ops() {
    let mut machine = machine_with(&[
        addi(1, 0, 0x100),
        addi(2, 0, 0x0F),
        amoand_w(3, 1, 2),
        addi(4, 0, 0x140),
        amoor_w(5, 4, 2),
        addi(6, 0, 0x180),
        amoxor_w(7, 6, 2),
    ]);
    machine.load_data(&[0x3C], 0x100);
    machine.load_data(&[0x30], 0x140);
    machine.load_data(&[0xFF], 0x180);
    machine.run_cycles(7).unwrap();
    assert_eq!(machine.ram().read32(0x100), 0x0C);
    assert_eq!(machine.ram().read32(0x140), 0x3F);
    assert_eq!(machine.ram().read32(0x180), 0xF0);
}
