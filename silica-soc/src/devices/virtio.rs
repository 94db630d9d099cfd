//! VirtIO-MMIO block device: the queue-0 subset a boot loader and a simple
//! kernel driver need.

use super::ram::Ram;
use tracing::{debug, trace};

const SECTOR_SIZE: usize = 512;

// MMIO register offsets.
const MAGIC: u32 = 0x000;
const VERSION: u32 = 0x004;
const DEVICE_ID: u32 = 0x008;
const VENDOR_ID: u32 = 0x00C;
const DEVICE_FEATURES: u32 = 0x010;
const DEVICE_FEATURES_SEL: u32 = 0x014;
const DRIVER_FEATURES: u32 = 0x020;
const DRIVER_FEATURES_SEL: u32 = 0x024;
const QUEUE_SEL: u32 = 0x030;
const QUEUE_NUM_MAX: u32 = 0x034;
const QUEUE_NUM: u32 = 0x038;
const QUEUE_READY: u32 = 0x044;
const QUEUE_NOTIFY: u32 = 0x050;
const INTERRUPT_STATUS: u32 = 0x060;
const INTERRUPT_ACK: u32 = 0x064;
const STATUS: u32 = 0x070;
const QUEUE_DESC_LO: u32 = 0x080;
const QUEUE_DESC_HI: u32 = 0x084;
const QUEUE_DRIVER_LO: u32 = 0x090;
const QUEUE_DRIVER_HI: u32 = 0x094;
const QUEUE_DEVICE_LO: u32 = 0x0A0;
const QUEUE_DEVICE_HI: u32 = 0x0A4;
const CONFIG: u32 = 0x100;

const MAGIC_VALUE: u32 = 0x7472_6976; // "virt"
const DEVICE_ID_BLOCK: u32 = 2;
const VENDOR: u32 = 0x554D_4551; // "QEMU"
const MAX_QUEUE: u32 = 8;

const DESC_F_NEXT: u16 = 1;
const DESC_F_WRITE: u16 = 2;

const REQ_TYPE_IN: u32 = 0;
const REQ_TYPE_OUT: u32 = 1;

const STATUS_OK: u8 = 0;
const STATUS_IOERR: u8 = 1;
const STATUS_UNSUPPORTED: u8 = 2;

const ISR_USED_BUFFER: u32 = 1;

/// One descriptor as laid out in guest memory.
#[derive(Debug, Clone, Copy)]
struct Desc {
    addr: u32,
    len: u32,
    flags: u16,
    next: u16,
}

/// VirtIO-MMIO block device backed by an in-memory disk image.
///
/// Feature negotiation is accepted and ignored: the select and
/// driver-feature registers are stored so reads round-trip, but no feature
/// bit changes behavior.
#[derive(Debug, Default, Clone)]
pub struct VirtioBlk {
    disk: Vec<u8>,
    device_features_sel: u32,
    driver_features: u32,
    driver_features_sel: u32,
    queue_sel: u32,
    queue_num: u32,
    queue_ready: u32,
    desc_addr: u64,
    driver_addr: u64,
    device_addr: u64,
    isr: u32,
    status: u32,
    /// Next avail-ring index to service.
    last_avail: u16,
}

impl VirtioBlk {
    /// Empty device; the disk image starts zero-length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy bytes into the backing image, growing it to fit.
    pub fn load_disk(&mut self, bytes: &[u8], offset: usize) {
        let end = offset + bytes.len();
        if self.disk.len() < end {
            self.disk.resize(end, 0);
        }
        self.disk[offset..end].copy_from_slice(bytes);
    }

    /// Backing image, for test inspection.
    pub fn disk(&self) -> &[u8] {
        &self.disk
    }

    /// Capacity in 512-byte sectors, as exposed in config space.
    fn capacity_sectors(&self) -> u64 {
        (self.disk.len() / SECTOR_SIZE) as u64
    }

    /// Used-buffer interrupt line.
    pub fn irq_pending(&self) -> bool {
        self.isr != 0
    }

    /// MMIO read at a region-relative offset.
    pub fn read(&self, offset: u32) -> u32 {
        match offset {
            MAGIC => MAGIC_VALUE,
            VERSION => 2,
            DEVICE_ID => DEVICE_ID_BLOCK,
            VENDOR_ID => VENDOR,
            DEVICE_FEATURES => 0,
            DEVICE_FEATURES_SEL => self.device_features_sel,
            DRIVER_FEATURES => self.driver_features,
            DRIVER_FEATURES_SEL => self.driver_features_sel,
            QUEUE_SEL => self.queue_sel,
            QUEUE_NUM_MAX => MAX_QUEUE,
            QUEUE_NUM => self.queue_num,
            QUEUE_READY => self.queue_ready,
            INTERRUPT_STATUS => self.isr,
            STATUS => self.status,
            QUEUE_DESC_LO => self.desc_addr as u32,
            QUEUE_DESC_HI => (self.desc_addr >> 32) as u32,
            QUEUE_DRIVER_LO => self.driver_addr as u32,
            QUEUE_DRIVER_HI => (self.driver_addr >> 32) as u32,
            QUEUE_DEVICE_LO => self.device_addr as u32,
            QUEUE_DEVICE_HI => (self.device_addr >> 32) as u32,
            CONFIG => self.capacity_sectors() as u32,
            o if o == CONFIG + 4 => (self.capacity_sectors() >> 32) as u32,
            _ => 0,
        }
    }

    /// MMIO write at a region-relative offset. A write to `QUEUE_NOTIFY`
    /// services queue 0 synchronously against `ram`.
    pub fn write(&mut self, offset: u32, value: u32, ram: &mut Ram) {
        match offset {
            DEVICE_FEATURES_SEL => self.device_features_sel = value,
            DRIVER_FEATURES => self.driver_features = value,
            DRIVER_FEATURES_SEL => self.driver_features_sel = value,
            QUEUE_SEL => self.queue_sel = value,
            QUEUE_NUM => self.queue_num = value.min(MAX_QUEUE),
            QUEUE_READY => self.queue_ready = value & 1,
            QUEUE_NOTIFY => {
                if value == 0 {
                    self.service_queue(ram);
                }
            }
            INTERRUPT_ACK => self.isr &= !value,
            STATUS => self.status = value,
            QUEUE_DESC_LO => set_lo(&mut self.desc_addr, value),
            QUEUE_DESC_HI => set_hi(&mut self.desc_addr, value),
            QUEUE_DRIVER_LO => set_lo(&mut self.driver_addr, value),
            QUEUE_DRIVER_HI => set_hi(&mut self.driver_addr, value),
            QUEUE_DEVICE_LO => set_lo(&mut self.device_addr, value),
            QUEUE_DEVICE_HI => set_hi(&mut self.device_addr, value),
            _ => {}
        }
    }

    fn desc(&self, ram: &Ram, index: u16) -> Desc {
        let base = self.desc_addr as u32 + u32::from(index) * 16;
        Desc {
            addr: ram.read32(base),
            len: ram.read32(base + 8),
            flags: ram.read16(base + 12),
            next: ram.read16(base + 14),
        }
    }

    /// Walk newly-published avail entries, run each request, and publish
    /// used entries.
    fn service_queue(&mut self, ram: &mut Ram) {
        if self.queue_ready == 0 || self.queue_num == 0 {
            return;
        }
        let qsize = self.queue_num as u16;
        let avail = self.driver_addr as u32;
        let avail_idx = ram.read16(avail + 2);

        while self.last_avail != avail_idx {
            let slot = u32::from(self.last_avail % qsize);
            let head = ram.read16(avail + 4 + slot * 2);
            let written = self.run_chain(ram, head);

            let used = self.device_addr as u32;
            let used_idx = ram.read16(used + 2);
            let entry = used + 4 + u32::from(used_idx % qsize) * 8;
            ram.write32(entry, u32::from(head));
            ram.write32(entry + 4, written);
            ram.write16(used + 2, used_idx.wrapping_add(1));

            self.isr |= ISR_USED_BUFFER;
            self.last_avail = self.last_avail.wrapping_add(1);
        }
    }

    /// Execute one descriptor chain: a 16-byte request header, data
    /// buffers, and a trailing one-byte status. Returns bytes written to
    /// device-writable buffers.
    fn run_chain(&mut self, ram: &mut Ram, head: u16) -> u32 {
        // Gather the chain first; chains are short (header, data*, status).
        let mut chain = Vec::new();
        let mut index = head;
        loop {
            let d = self.desc(ram, index);
            let has_next = d.flags & DESC_F_NEXT != 0;
            chain.push(d);
            if !has_next || chain.len() > 64 {
                break;
            }
            index = d.next;
        }
        if chain.len() < 2 {
            return 0;
        }

        let header = chain[0];
        let req_type = ram.read32(header.addr);
        let sector = u64::from(ram.read32(header.addr + 8))
            | u64::from(ram.read32(header.addr + 12)) << 32;
        let status_desc = chain[chain.len() - 1];
        let data = &chain[1..chain.len() - 1];

        let mut offset = sector as usize * SECTOR_SIZE;
        let mut written = 0u32;
        let mut status = STATUS_OK;

        for d in data {
            let len = d.len as usize;
            if offset + len > self.disk.len() {
                status = STATUS_IOERR;
                break;
            }
            match req_type {
                REQ_TYPE_IN => {
                    // Disk to guest memory.
                    ram.load_bytes(&self.disk[offset..offset + len], d.addr);
                    written += d.len;
                }
                REQ_TYPE_OUT => {
                    for i in 0..len {
                        self.disk[offset + i] = ram.read8(d.addr + i as u32);
                    }
                }
                _ => {
                    status = STATUS_UNSUPPORTED;
                    break;
                }
            }
            offset += len;
            trace!(req_type, sector, len, "virtio segment");
        }

        if status_desc.flags & DESC_F_WRITE != 0 && status_desc.len >= 1 {
            ram.write8(status_desc.addr, status);
            written += 1;
        }
        debug!(req_type, sector, status, "virtio request complete");
        written
    }
}

fn set_lo(reg: &mut u64, value: u32) {
    *reg = (*reg & !0xFFFF_FFFF) | u64::from(value);
}

fn set_hi(reg: &mut u64, value: u32) {
    *reg = (*reg & 0xFFFF_FFFF) | (u64::from(value) << 32);
}

#[cfg(test)]
mod tests {
    use super::*;

    const QSIZE: u32 = 8;
    const DESC: u32 = 0x1000;
    const AVAIL: u32 = 0x2000;
    const USED: u32 = 0x3000;
    const HDR: u32 = 0x4000;
    const DATA: u32 = 0x5000;
    const STATUS_ADDR: u32 = 0x6000;

    fn device_with_queue(ram: &mut Ram) -> VirtioBlk {
        let mut dev = VirtioBlk::new();
        dev.load_disk(&vec![0u8; 4 * SECTOR_SIZE], 0);
        dev.write(QUEUE_NUM, QSIZE, ram);
        dev.write(QUEUE_DESC_LO, DESC, ram);
        dev.write(QUEUE_DRIVER_LO, AVAIL, ram);
        dev.write(QUEUE_DEVICE_LO, USED, ram);
        dev.write(QUEUE_READY, 1, ram);
        dev
    }

    fn write_desc(ram: &mut Ram, i: u32, addr: u32, len: u32, flags: u16, next: u16) {
        let base = DESC + i * 16;
        ram.write32(base, addr);
        ram.write32(base + 8, len);
        ram.write16(base + 12, flags);
        ram.write16(base + 14, next);
    }

    fn push_request(ram: &mut Ram, req_type: u32, sector: u64) {
        ram.write32(HDR, req_type);
        ram.write32(HDR + 8, sector as u32);
        ram.write32(HDR + 12, (sector >> 32) as u32);
        write_desc(ram, 0, HDR, 16, DESC_F_NEXT, 1);
        let data_flags = if req_type == REQ_TYPE_IN {
            DESC_F_NEXT | DESC_F_WRITE
        } else {
            DESC_F_NEXT
        };
        write_desc(ram, 1, DATA, SECTOR_SIZE as u32, data_flags, 2);
        write_desc(ram, 2, STATUS_ADDR, 1, DESC_F_WRITE, 0);

        let avail_idx = ram.read16(AVAIL + 2);
        ram.write16(AVAIL + 4 + u32::from(avail_idx % QSIZE as u16) * 2, 0);
        ram.write16(AVAIL + 2, avail_idx.wrapping_add(1));
    }

    #[test]
    fn identity_registers_read_back() {
        let dev = VirtioBlk::new();
        assert_eq!(dev.read(MAGIC), MAGIC_VALUE);
        assert_eq!(dev.read(VERSION), 2);
        assert_eq!(dev.read(DEVICE_ID), DEVICE_ID_BLOCK);
    }

    #[test]
    fn capacity_tracks_the_loaded_image() {
        let mut dev = VirtioBlk::new();
        dev.load_disk(&vec![0u8; 3 * SECTOR_SIZE], 0);
        assert_eq!(dev.read(CONFIG), 3);
    }

    #[test]
    fn read_request_copies_disk_to_memory() {
        let mut ram = Ram::new();
        let mut dev = device_with_queue(&mut ram);
        let mut sector = vec![0u8; SECTOR_SIZE];
        sector[0] = 0xAB;
        sector[511] = 0xCD;
        dev.load_disk(&sector, SECTOR_SIZE);

        push_request(&mut ram, REQ_TYPE_IN, 1);
        dev.write(QUEUE_NOTIFY, 0, &mut ram);

        assert_eq!(ram.read8(DATA), 0xAB);
        assert_eq!(ram.read8(DATA + 511), 0xCD);
        assert_eq!(ram.read8(STATUS_ADDR), STATUS_OK);
        assert_eq!(ram.read16(USED + 2), 1, "used index advanced");
        assert!(dev.irq_pending());
    }

    #[test]
    fn write_request_copies_memory_to_disk() {
        let mut ram = Ram::new();
        let mut dev = device_with_queue(&mut ram);
        ram.write8(DATA, 0x5A);
        ram.write8(DATA + 100, 0xA5);

        push_request(&mut ram, REQ_TYPE_OUT, 2);
        dev.write(QUEUE_NOTIFY, 0, &mut ram);

        assert_eq!(dev.disk()[2 * SECTOR_SIZE], 0x5A);
        assert_eq!(dev.disk()[2 * SECTOR_SIZE + 100], 0xA5);
        assert_eq!(ram.read8(STATUS_ADDR), STATUS_OK);
    }

    #[test]
    fn out_of_range_sector_reports_ioerr() {
        let mut ram = Ram::new();
        let mut dev = device_with_queue(&mut ram);
        push_request(&mut ram, REQ_TYPE_IN, 1000);
        dev.write(QUEUE_NOTIFY, 0, &mut ram);
        assert_eq!(ram.read8(STATUS_ADDR), STATUS_IOERR);
    }

    #[test]
    fn interrupt_ack_clears_the_line() {
        let mut ram = Ram::new();
        let mut dev = device_with_queue(&mut ram);
        push_request(&mut ram, REQ_TYPE_IN, 0);
        dev.write(QUEUE_NOTIFY, 0, &mut ram);
        assert!(dev.irq_pending());
        let isr = dev.read(INTERRUPT_STATUS);
        dev.write(INTERRUPT_ACK, isr, &mut ram);
        assert!(!dev.irq_pending());
    }
}
