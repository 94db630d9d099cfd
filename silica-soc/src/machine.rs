//! The system harness: one core, its memories and peripherals, and the
//! per-cycle protocol that connects them.

use crate::{
    consts::{irq, map},
    core::build_core,
    devices::{Clint, Plic, Ram, Uart, VirtioBlk},
    error::MachineError,
};
use silica_ir::Design;
use silica_sim::Simulator;
use tracing::{debug, trace};

/// Physical placement of the peripherals. The defaults follow the
/// conventional virt-machine layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineParams {
    /// CLINT base address.
    pub clint_base: u32,
    /// PLIC base address.
    pub plic_base: u32,
    /// UART base address.
    pub uart_base: u32,
    /// VirtIO-MMIO block device base address.
    pub virtio_base: u32,
}

impl Default for MachineParams {
    fn default() -> Self {
        Self {
            clint_base: map::CLINT_BASE,
            plic_base: map::PLIC_BASE,
            uart_base: map::UART_BASE,
            virtio_base: map::VIRTIO_BASE,
        }
    }
}

/// Injected interrupt lines, OR'd with the device-driven ones.
#[derive(Debug, Default, Clone, Copy)]
struct InjectedIrqs {
    software: bool,
    timer: bool,
    external: bool,
    plic_source1: bool,
    plic_source10: bool,
}

/// One simulated system: core, RAM, CLINT, PLIC, UART, VirtIO block.
///
/// Each [`clock_cycle`](Self::clock_cycle) performs the full settle
/// protocol (IRQ aggregation, both page walks, instruction fetch, then the
/// data access with reads before writes, so AMO store data sees the loaded
/// word) and commits one rising edge.
#[derive(Debug)]
pub struct Machine {
    sim: Simulator,
    ram: Ram,
    clint: Clint,
    plic: Plic,
    uart: Uart,
    virtio: VirtioBlk,
    params: MachineParams,
    injected: InjectedIrqs,
}

impl Machine {
    /// Build the core, elaborate it and wire the default peripherals.
    pub fn new(params: MachineParams) -> Result<Self, MachineError> {
        let mut design = Design::new();
        let top = build_core(&mut design)?;
        let sim = Simulator::new(design, top)?;
        Ok(Self {
            sim,
            ram: Ram::new(),
            clint: Clint::new(),
            plic: Plic::new(),
            uart: Uart::new(),
            virtio: VirtioBlk::new(),
            params,
            injected: InjectedIrqs::default(),
        })
    }

    /// `new` with the default memory map.
    pub fn with_defaults() -> Result<Self, MachineError> {
        Self::new(MachineParams::default())
    }

    /// Clear registers to reset values and memories to zero, pulse `rst`
    /// for one cycle, and return the peripherals to power-on state. RAM
    /// contents and the VirtIO disk image survive, so a loaded program can
    /// be re-run.
    pub fn reset(&mut self) -> Result<(), MachineError> {
        self.sim.reset();
        self.sim.poke("rst", 1)?;
        self.clock_cycle()?;
        self.sim.poke("rst", 0)?;

        self.clint = Clint::new();
        self.plic = Plic::new();
        self.uart = Uart::new();
        let disk = std::mem::take(&mut self.virtio);
        self.virtio = VirtioBlk::new();
        self.virtio.load_disk(disk.disk(), 0);
        self.injected = InjectedIrqs::default();
        self.sim.settle();
        Ok(())
    }

    /// Run one full clock cycle.
    pub fn clock_cycle(&mut self) -> Result<(), MachineError> {
        self.sim.poke("clk", 0)?;

        // 1. Interrupt aggregation.
        self.plic.set_source(
            irq::VIRTIO,
            self.virtio.irq_pending() || self.injected.plic_source1,
        );
        self.plic.set_source(
            irq::UART,
            self.uart.irq_pending() || self.injected.plic_source10,
        );
        let software = self.clint.software_pending() || self.injected.software;
        let timer = self.clint.timer_pending() || self.injected.timer;
        let external = self.plic.external_pending() || self.injected.external;
        self.sim.poke("irq_software", software.into())?;
        self.sim.poke("irq_timer", timer.into())?;
        self.sim.poke("irq_external", external.into())?;
        self.sim.settle();

        // 2. Instruction-side page walk, then fetch with the final address.
        let addr = self.sim.peek("iptw_pte1_addr")? as u32;
        let pte = self.ram.read_word(addr);
        self.sim.poke("iptw_pte1", pte.into())?;
        self.sim.settle();
        let addr = self.sim.peek("iptw_pte0_addr")? as u32;
        let pte = self.ram.read_word(addr);
        self.sim.poke("iptw_pte0", pte.into())?;
        self.sim.settle();

        // 3. Fetch. Instruction fetch never targets MMIO.
        let inst_addr = self.sim.peek("inst_addr")? as u32;
        let inst = self.ram.read_word(inst_addr);
        self.sim.poke("inst_data", inst.into())?;
        self.sim.settle();

        // 4. Data-side page walk, now that the instruction is known.
        let addr = self.sim.peek("dptw_pte1_addr")? as u32;
        let pte = self.ram.read_word(addr);
        self.sim.poke("dptw_pte1", pte.into())?;
        self.sim.settle();
        let addr = self.sim.peek("dptw_pte0_addr")? as u32;
        let pte = self.ram.read_word(addr);
        self.sim.poke("dptw_pte0", pte.into())?;
        self.sim.settle();

        // 5. Data access: the read first, so an AMO's store data can be
        // computed from the loaded word before the write goes out.
        if self.sim.peek("mem_read")? != 0 {
            let addr = self.sim.peek("mem_addr")? as u32;
            let funct3 = self.sim.peek("mem_funct3")? as u32;
            let value = self.bus_read(addr, funct3);
            self.sim.poke("mem_rdata", value.into())?;
            self.sim.settle();
        }
        if self.sim.peek("mem_write")? != 0 {
            let addr = self.sim.peek("mem_addr")? as u32;
            let funct3 = self.sim.peek("mem_funct3")? as u32;
            let value = self.sim.peek("mem_wdata")? as u32;
            self.bus_write(addr, funct3, value);
        }

        // 6. Rising edge, then the timer advances.
        self.sim.poke("clk", 1)?;
        self.sim.tick();
        self.clint.tick();
        Ok(())
    }

    /// Run `n` cycles.
    pub fn run_cycles(&mut self, n: usize) -> Result<(), MachineError> {
        for _ in 0..n {
            self.clock_cycle()?;
        }
        Ok(())
    }

    /// Write a little-endian word stream into RAM (instruction image).
    pub fn load_program(&mut self, words: &[u32], addr: u32) {
        self.ram.load_words(words, addr);
    }

    /// Write little-endian words into RAM (data image).
    pub fn load_data(&mut self, words: &[u32], addr: u32) {
        self.ram.load_words(words, addr);
    }

    /// Architectural PC.
    pub fn read_pc(&self) -> Result<u32, MachineError> {
        Ok(self.sim.peek("pc")? as u32)
    }

    /// Architectural register, via the dedicated debug read port.
    pub fn read_reg(&mut self, index: u32) -> Result<u32, MachineError> {
        self.sim.poke("dbg_reg_addr", u64::from(index & 0x1F))?;
        self.sim.settle();
        Ok(self.sim.peek("dbg_reg_data")? as u32)
    }

    /// CSR cell, via the dedicated debug read port (alias views included).
    pub fn read_csr(&mut self, addr: u32) -> Result<u32, MachineError> {
        self.sim.poke("dbg_csr_addr", u64::from(addr & 0xFFF))?;
        self.sim.settle();
        Ok(self.sim.peek("dbg_csr_data")? as u32)
    }

    /// Current privilege mode (0 = U, 1 = S, 3 = M).
    pub fn read_mode(&self) -> Result<u32, MachineError> {
        Ok(self.sim.peek("priv_mode")? as u32)
    }

    /// Inject IRQ lines; `None` leaves a line unchanged.
    pub fn set_interrupts(
        &mut self,
        software: Option<bool>,
        timer: Option<bool>,
        external: Option<bool>,
    ) {
        if let Some(v) = software {
            self.injected.software = v;
        }
        if let Some(v) = timer {
            self.injected.timer = v;
        }
        if let Some(v) = external {
            self.injected.external = v;
        }
    }

    /// Drive the PLIC source lines directly; `None` leaves a line unchanged.
    pub fn set_plic_sources(&mut self, source1: Option<bool>, source10: Option<bool>) {
        if let Some(v) = source1 {
            self.injected.plic_source1 = v;
        }
        if let Some(v) = source10 {
            self.injected.plic_source10 = v;
        }
    }

    /// Enqueue bytes into the UART RX FIFO.
    pub fn uart_receive_bytes(&mut self, bytes: &[u8]) {
        self.uart.receive(bytes);
    }

    /// Bytes the guest wrote to the UART transmitter.
    pub fn uart_tx_bytes(&self) -> &[u8] {
        self.uart.tx_bytes()
    }

    /// Forget observed UART TX bytes.
    pub fn clear_uart_tx_bytes(&mut self) {
        self.uart.clear_tx();
    }

    /// Populate the block-device backing image.
    pub fn load_virtio_disk(&mut self, bytes: &[u8], offset: usize) {
        self.virtio.load_disk(bytes, offset);
    }

    /// Direct access to the simulator, for white-box assertions.
    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    /// Direct access to the CLINT (e.g. to program `mtimecmp` from a test).
    pub fn clint_mut(&mut self) -> &mut Clint {
        &mut self.clint
    }

    /// Direct access to main memory.
    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    /// Mutable access to main memory.
    pub fn ram_mut(&mut self) -> &mut Ram {
        &mut self.ram
    }

    fn bus_read(&mut self, addr: u32, funct3: u32) -> u32 {
        let p = self.params;
        let raw = if in_region(addr, p.clint_base, map::CLINT_SIZE) {
            self.clint.read(addr - p.clint_base)
        } else if in_region(addr, p.plic_base, map::PLIC_SIZE) {
            self.plic.read(addr - p.plic_base)
        } else if in_region(addr, p.uart_base, map::UART_SIZE) {
            u32::from(self.uart.read(addr - p.uart_base))
        } else if in_region(addr, p.virtio_base, map::VIRTIO_SIZE) {
            self.virtio.read(addr - p.virtio_base)
        } else {
            return ram_read_sized(&self.ram, addr, funct3);
        };
        trace!(addr = format_args!("{addr:#010x}"), value = raw, "mmio read");
        extend_sized(raw, funct3)
    }

    fn bus_write(&mut self, addr: u32, funct3: u32, value: u32) {
        let p = self.params;
        if in_region(addr, p.clint_base, map::CLINT_SIZE) {
            trace!(addr = format_args!("{addr:#010x}"), value, "clint write");
            self.clint.write(addr - p.clint_base, value);
        } else if in_region(addr, p.plic_base, map::PLIC_SIZE) {
            trace!(addr = format_args!("{addr:#010x}"), value, "plic write");
            self.plic.write(addr - p.plic_base, value);
        } else if in_region(addr, p.uart_base, map::UART_SIZE) {
            self.uart.write(addr - p.uart_base, value as u8);
        } else if in_region(addr, p.virtio_base, map::VIRTIO_SIZE) {
            debug!(addr = format_args!("{addr:#010x}"), value, "virtio write");
            self.virtio.write(addr - p.virtio_base, value, &mut self.ram);
        } else {
            match funct3 & 0x3 {
                0 => self.ram.write8(addr, value as u8),
                1 => self.ram.write16(addr, value as u16),
                _ => self.ram.write32(addr, value),
            }
        }
    }
}

fn in_region(addr: u32, base: u32, size: u32) -> bool {
    addr >= base && addr < base.wrapping_add(size)
}

/// Size- and sign-adjusted RAM read per the load `funct3` encoding.
fn ram_read_sized(ram: &Ram, addr: u32, funct3: u32) -> u32 {
    match funct3 {
        0 => ram.read8(addr) as i8 as i32 as u32,
        1 => ram.read16(addr) as i16 as i32 as u32,
        4 => u32::from(ram.read8(addr)),
        5 => u32::from(ram.read16(addr)),
        _ => ram.read32(addr),
    }
}

/// The same adjustment for MMIO values already read at device width.
fn extend_sized(value: u32, funct3: u32) -> u32 {
    match funct3 {
        0 => value as u8 as i8 as i32 as u32,
        1 => value as u16 as i16 as i32 as u32,
        4 => u32::from(value as u8),
        5 => u32::from(value as u16),
        _ => value,
    }
}
