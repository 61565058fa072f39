// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hypervisor control-plane interface.
//!
//! The chipset does not program physical interrupt routing itself.  Guest
//! writes to routing registers are mirrored into calls on a [Hypervisor],
//! which owns the transport to whatever actually delivers interrupts.

use thiserror::Error;

/// Number of PCI interrupt links (PIRQA-PIRQD) which can be routed.
pub const PCI_LINK_COUNT: u8 = 4;

/// Errors reported by the hypervisor control plane.
#[derive(Debug, Error)]
pub enum HvError {
    /// The requested PCI link index does not exist.
    #[error("invalid PCI link {0}")]
    InvalidLink(u8),

    /// The hypervisor refused to carry out the request.
    #[error("hypervisor rejected request: {0}")]
    Rejected(String),
}

/// Control-plane operations consumed by the chipset.
///
/// Calls are synchronous and are not retried by the caller.  Any retry or
/// backoff policy belongs to the implementation of this trait.
pub trait Hypervisor: Send + Sync + 'static {
    /// Route PCI interrupt link `link` (0-3) to ISA IRQ `irq`.  An `irq` of 0
    /// indicates that the link is disabled.
    fn set_pci_link_route(&self, link: u8, irq: u8) -> Result<(), HvError>;

    /// Set the level of a legacy INTx line for the PCI device at
    /// `segment`/`bus`/`device`.  `intx` is 0 for INTA# through 3 for INTD#.
    fn set_pci_intx_level(
        &self,
        segment: u16,
        bus: u8,
        device: u8,
        intx: u8,
        level: bool,
    ) -> Result<(), HvError>;
}

/// A [Hypervisor] which only records requests to its log.
///
/// Used when the chipset runs without a backing VMM, as in the standalone
/// replay tool.
pub struct LogHypervisor {
    log: slog::Logger,
}
impl LogHypervisor {
    pub fn new(log: slog::Logger) -> Self {
        Self { log }
    }
}
impl Hypervisor for LogHypervisor {
    fn set_pci_link_route(&self, link: u8, irq: u8) -> Result<(), HvError> {
        if link >= PCI_LINK_COUNT {
            return Err(HvError::InvalidLink(link));
        }
        slog::info!(self.log, "set PCI link route"; "link" => link, "irq" => irq);
        Ok(())
    }

    fn set_pci_intx_level(
        &self,
        segment: u16,
        bus: u8,
        device: u8,
        intx: u8,
        level: bool,
    ) -> Result<(), HvError> {
        slog::info!(self.log, "set PCI INTx level";
            "segment" => segment,
            "bus" => bus,
            "device" => device,
            "intx" => intx,
            "level" => level
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use slog::{Discard, Logger};

    #[test]
    fn log_hv_rejects_bad_link() {
        let hv = LogHypervisor::new(Logger::root(Discard, slog::o!()));
        assert!(hv.set_pci_link_route(3, 11).is_ok());
        assert!(matches!(
            hv.set_pci_link_route(PCI_LINK_COUNT, 11),
            Err(HvError::InvalidLink(4))
        ));
    }
}
