//! Platform-level interrupt controller for two sources.

use crate::consts::irq;

/// Number of modeled source ids (1 and 10 are wired; 0 is reserved).
const NUM_SOURCES: usize = 32;

const PENDING: u32 = 0x0000_1000;
const ENABLE_BASE: u32 = 0x0000_2000;
const ENABLE_STRIDE: u32 = 0x80;
const CONTEXT_BASE: u32 = 0x0020_0000;
const CONTEXT_STRIDE: u32 = 0x1000;

/// PLIC model with a single logical context. Any hart-context window maps
/// onto it, so guests programming either the M or the S context see the
/// same enables and threshold.
#[derive(Debug, Clone)]
pub struct Plic {
    priority: [u32; NUM_SOURCES],
    pending: u32,
    enable: u32,
    threshold: u32,
    /// Source granted by a claim read and not yet completed.
    in_service: Option<u32>,
    level: u32,
}

impl Default for Plic {
    fn default() -> Self {
        Self::new()
    }
}

impl Plic {
    /// All sources idle, priorities zero.
    pub fn new() -> Self {
        Self {
            priority: [0; NUM_SOURCES],
            pending: 0,
            enable: 0,
            threshold: 0,
            in_service: None,
            level: 0,
        }
    }

    /// Drive one source's level. A rising edge latches the pending bit.
    pub fn set_source(&mut self, id: u32, high: bool) {
        let bit = 1u32 << id;
        let was = self.level & bit != 0;
        if high && !was {
            self.pending |= bit;
        }
        if high {
            self.level |= bit;
        } else {
            self.level &= !bit;
        }
    }

    /// The source the external line should present, if any: the
    /// highest-priority pending, enabled source above the threshold, with no
    /// claim in service.
    fn best_candidate(&self) -> Option<u32> {
        if self.in_service.is_some() {
            return None;
        }
        let mut best: Option<u32> = None;
        for id in [irq::VIRTIO, irq::UART] {
            let bit = 1u32 << id;
            if self.pending & bit != 0
                && self.enable & bit != 0
                && self.priority[id as usize] > self.threshold
            {
                match best {
                    Some(b) if self.priority[b as usize] >= self.priority[id as usize] => {}
                    _ => best = Some(id),
                }
            }
        }
        best
    }

    /// External interrupt line toward the core.
    pub fn external_pending(&self) -> bool {
        self.best_candidate().is_some()
    }

    fn context_reg(offset: u32) -> Option<u32> {
        if offset < CONTEXT_BASE {
            return None;
        }
        Some((offset - CONTEXT_BASE) % CONTEXT_STRIDE)
    }

    /// MMIO read at a region-relative offset. Reading claim/complete grants
    /// the best candidate and clears its pending bit.
    pub fn read(&mut self, offset: u32) -> u32 {
        if let Some(reg) = Self::context_reg(offset) {
            return match reg {
                0x0 => self.threshold,
                0x4 => match self.best_candidate() {
                    Some(id) => {
                        self.pending &= !(1 << id);
                        self.in_service = Some(id);
                        id
                    }
                    None => 0,
                },
                _ => 0,
            };
        }
        match offset {
            PENDING => self.pending,
            o if o >= ENABLE_BASE && o < CONTEXT_BASE => {
                let reg = (o - ENABLE_BASE) % ENABLE_STRIDE;
                if reg == 0 {
                    self.enable
                } else {
                    0
                }
            }
            o if o < PENDING => {
                let id = (o / 4) as usize;
                if id < NUM_SOURCES {
                    self.priority[id]
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// MMIO write at a region-relative offset. Writing the in-service id to
    /// claim/complete retires it.
    pub fn write(&mut self, offset: u32, value: u32) {
        if let Some(reg) = Self::context_reg(offset) {
            match reg {
                0x0 => self.threshold = value & 0x7,
                0x4 => {
                    if self.in_service == Some(value) {
                        self.in_service = None;
                    }
                }
                _ => {}
            }
            return;
        }
        match offset {
            o if o >= ENABLE_BASE && o < CONTEXT_BASE => {
                if (o - ENABLE_BASE) % ENABLE_STRIDE == 0 {
                    self.enable = value;
                }
            }
            o if o < PENDING => {
                let id = (o / 4) as usize;
                if id < NUM_SOURCES {
                    self.priority[id] = value & 0x7;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> Plic {
        let mut plic = Plic::new();
        plic.write(4 * irq::UART, 3); // priority
        plic.write(ENABLE_BASE, (1 << irq::UART) | (1 << irq::VIRTIO));
        plic
    }

    #[test]
    fn disabled_sources_never_interrupt() {
        let mut plic = Plic::new();
        plic.write(4 * irq::UART, 3);
        plic.set_source(irq::UART, true);
        assert!(!plic.external_pending());
    }

    #[test]
    fn claim_grants_and_complete_retires() {
        let mut plic = armed();
        plic.set_source(irq::UART, true);
        assert!(plic.external_pending());

        let id = plic.read(CONTEXT_BASE + 4);
        assert_eq!(id, irq::UART);
        assert!(!plic.external_pending(), "claim masks further interrupts");

        plic.write(CONTEXT_BASE + 4, id);
        assert!(!plic.external_pending(), "pending bit was consumed");
    }

    #[test]
    fn threshold_masks_low_priority_sources() {
        let mut plic = armed();
        plic.write(CONTEXT_BASE, 5); // threshold above priority 3
        plic.set_source(irq::UART, true);
        assert!(!plic.external_pending());
        plic.write(CONTEXT_BASE, 0);
        assert!(plic.external_pending());
    }

    #[test]
    fn higher_priority_source_wins_the_claim() {
        let mut plic = armed();
        plic.write(4 * irq::VIRTIO, 7);
        plic.write(4 * irq::UART, 1);
        plic.set_source(irq::UART, true);
        plic.set_source(irq::VIRTIO, true);
        assert_eq!(plic.read(CONTEXT_BASE + 4), irq::VIRTIO);
    }

    #[test]
    fn level_must_fall_and_rise_to_repend() {
        let mut plic = armed();
        plic.set_source(irq::UART, true);
        let id = plic.read(CONTEXT_BASE + 4);
        plic.write(CONTEXT_BASE + 4, id);
        // Line still high: no new pending bit.
        plic.set_source(irq::UART, true);
        assert!(!plic.external_pending());
        plic.set_source(irq::UART, false);
        plic.set_source(irq::UART, true);
        assert!(plic.external_pending());
    }

    #[test]
    fn s_mode_context_window_aliases_the_same_state() {
        let mut plic = armed();
        plic.set_source(irq::UART, true);
        // Context 1 claim (the usual supervisor window).
        let id = plic.read(CONTEXT_BASE + CONTEXT_STRIDE + 4);
        assert_eq!(id, irq::UART);
    }
}
