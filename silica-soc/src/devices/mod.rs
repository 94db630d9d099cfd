//! Host-side peripheral models, exposed to the core through the harness's
//! MMIO dispatch. The testable contract is behavioral, so these live beside
//! the IR rather than inside it.

mod clint;
mod plic;
mod ram;
mod uart;
mod virtio;

pub use clint::Clint;
pub use plic::Plic;
pub use ram::Ram;
pub use uart::Uart;
pub use virtio::VirtioBlk;
