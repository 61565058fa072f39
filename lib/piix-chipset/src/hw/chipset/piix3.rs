// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PIIX3 PCI-to-ISA bridge.
//!
//! Beyond its identity, the only register block with side effects is the
//! PIRQ route control (PIRQRC) at 0x60-0x63, one byte per PCI interrupt
//! link.  Guest writes there are mirrored into the hypervisor.

use std::sync::Arc;

use crate::common::*;
use crate::hv::{HvError, Hypervisor, PCI_LINK_COUNT};
use crate::hw::ids::pci::{PIIX3_ISA_DEV_ID, VENDOR_INTEL};
use crate::hw::pci::bits::{self, RegCmd, RegStatus};
use crate::hw::pci::cfgspace::migrate::PciCfgV1;
use crate::hw::pci::{
    self, CfgFilter, CfgWrite, DeviceHandle, Ident, Registry, Slot, Width,
};
use crate::migrate::*;

pub const DEV_NAME: &str = "PIIX3";

const PIR_OFFSET: u8 = 0x60;
const PIR_LEN: u8 = PCI_LINK_COUNT;

const PIR_MASK_DISABLE: u8 = 0x80;
const PIR_MASK_IRQ: u8 = 0x0f;

/// IRQ to route a link to for a given PIRQRC byte.  0 means the link is
/// disabled.
fn pir_irq(val: u8) -> u8 {
    if val & PIR_MASK_DISABLE != 0 {
        0
    } else {
        val & PIR_MASK_IRQ
    }
}

const CMD_RESET: u8 =
    RegCmd::IO_EN.union(RegCmd::MMIO_EN).union(RegCmd::BUSMSTR_EN).bits()
        as u8;
const STATUS_HI_RESET: u8 = (RegStatus::DEVSEL_MEDIUM.bits() >> 8) as u8;

/// Register values (beyond identity) held by the ISA bridge after reset.
const ISA_RESET: &[(u8, u8)] = &[
    (bits::OFF_COMMAND, CMD_RESET),
    (bits::OFF_STATUS + 1, STATUS_HI_RESET),
    // ISA I/O recovery timer
    (0x4c, 0x4d),
    // X-bus chip select
    (0x4e, 0x03),
    // PIRQRC[A:D], all links disabled
    (PIR_OFFSET, PIR_MASK_DISABLE),
    (PIR_OFFSET + 1, PIR_MASK_DISABLE),
    (PIR_OFFSET + 2, PIR_MASK_DISABLE),
    (PIR_OFFSET + 3, PIR_MASK_DISABLE),
    // top of memory
    (0x69, 0x02),
    // MBIRQ0
    (0x70, 0x80),
    // MBDMA0/1
    (0x76, 0x0c),
    (0x77, 0x0c),
    // programmable chip select
    (0x78, 0x02),
    // SMI control
    (0xa0, 0x08),
    // system event enable
    (0xa8, 0x0f),
];

fn ident() -> Ident {
    Ident {
        vendor_id: VENDOR_INTEL,
        device_id: PIIX3_ISA_DEV_ID,
        class: bits::CLASS_BRIDGE,
        subclass: bits::SUBCLASS_BRIDGE_ISA,
        header_type: bits::HEADER_TYPE_MULTIFUNC,
        ..Default::default()
    }
}

/// Restore the ISA bridge at `hdl` to its power-on register contents.
///
/// The result depends only on `hdl` being a registered function, never on
/// the prior contents of its config space.  No hypervisor requests are made.
pub fn reset_isa_bridge(
    registry: &Registry,
    hdl: DeviceHandle,
) -> Result<(), pci::Error> {
    registry.with_cfg(hdl, |cfg| {
        cfg.clear();
        cfg.apply(&ident().table());
        cfg.apply(ISA_RESET);
    })
}

/// Config write filter which turns PIRQRC writes into link route requests.
pub struct PirTranslator {
    hv: Arc<dyn Hypervisor>,
    log: slog::Logger,
}
impl PirTranslator {
    pub fn new(hv: Arc<dyn Hypervisor>, log: slog::Logger) -> Self {
        Self { hv, log }
    }
}
impl CfgFilter for PirTranslator {
    fn cfg_write(&self, write: &mut CfgWrite) -> Result<(), HvError> {
        let mut res = Ok(());
        let bytes = write.value.to_le_bytes();
        for (i, val) in bytes.iter().take(write.width.bytes()).enumerate() {
            let off = write.offset as usize + i;
            let link = match off.checked_sub(PIR_OFFSET as usize) {
                Some(l) if l < PIR_LEN as usize => l as u8,
                _ => continue,
            };
            let irq = pir_irq(*val);
            slog::debug!(self.log, "PIRQ route update";
                "link" => link, "raw" => *val, "irq" => irq);
            if let Err(e) = self.hv.set_pci_link_route(link, irq) {
                slog::error!(self.log, "failed to route PCI link";
                    "link" => link, "irq" => irq, "error" => %e);
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }
}

pub struct Piix3Isa {
    hdl: DeviceHandle,
    registry: Arc<Registry>,
    hv: Arc<dyn Hypervisor>,
    log: slog::Logger,
}
impl Piix3Isa {
    /// Register the ISA bridge in the first free slot and bring it to its
    /// reset state.
    pub fn create(
        registry: Arc<Registry>,
        hv: Arc<dyn Hypervisor>,
        log: slog::Logger,
    ) -> Result<Arc<Self>, pci::Error> {
        let log = log.new(slog::o!("dev" => DEV_NAME));
        let pir = Arc::new(PirTranslator::new(hv.clone(), log.clone()));
        let hdl = registry.register_device(
            DEV_NAME,
            Slot::Auto,
            vec![pir as Arc<dyn CfgFilter>],
        )?;
        reset_isa_bridge(&registry, hdl)?;
        slog::info!(log, "ISA bridge created"; "bdf" => %hdl.bdf());

        Ok(Arc::new(Self { hdl, registry, hv, log }))
    }

    pub fn handle(&self) -> DeviceHandle {
        self.hdl
    }

    /// Raw PIRQRC contents, indexed by link.
    pub fn link_routes(&self) -> [u8; PIR_LEN as usize] {
        let val = self
            .registry
            .default_cfg_read(self.hdl, PIR_OFFSET, Width::Dword)
            .unwrap_or(u32::MAX);
        val.to_le_bytes()
    }

    /// Push the route of every link, as held in config space, to the
    /// hypervisor.  All links are attempted; the first failure is returned.
    pub fn sync_routes(&self) -> Result<(), HvError> {
        let mut res = Ok(());
        for (link, val) in self.link_routes().iter().enumerate() {
            let irq = pir_irq(*val);
            if let Err(e) = self.hv.set_pci_link_route(link as u8, irq) {
                slog::error!(self.log, "failed to sync PCI link route";
                    "link" => link, "irq" => irq, "error" => %e);
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        res
    }
}
impl Lifecycle for Piix3Isa {
    fn type_name(&self) -> &'static str {
        "pci-piix3-isa"
    }
    fn reset(&self) {
        if let Err(e) = reset_isa_bridge(&self.registry, self.hdl) {
            slog::error!(self.log, "ISA bridge reset failed"; "error" => %e);
            return;
        }
        // All links are now disabled in config space.  Failures are logged
        // per link by sync_routes and do not fail the reset.
        let _ = self.sync_routes();
    }
    fn migrate(&self) -> Migrator {
        Migrator::Single(self)
    }
}
impl MigrateSingle for Piix3Isa {
    fn export(&self) -> Result<PayloadOutput, MigrateStateError> {
        let regs = self
            .registry
            .with_cfg(self.hdl, |cfg| *cfg.bytes())
            .map_err(|e| MigrateStateError::ExportFailed(e.to_string()))?;
        Ok(PciCfgV1 { regs }.into())
    }

    fn import(&self, mut offer: PayloadOffer) -> Result<(), MigrateStateError> {
        let data: PciCfgV1 = offer.parse()?;
        self.registry
            .with_cfg(self.hdl, |cfg| cfg.load(&data.regs))
            .map_err(|e| MigrateStateError::ImportFailed(e.to_string()))?;

        // Routing lives outside the register file as far as the hypervisor
        // is concerned, so it must be replayed.
        self.sync_routes()
            .map_err(|e| MigrateStateError::ImportFailed(e.to_string()))
    }
}
