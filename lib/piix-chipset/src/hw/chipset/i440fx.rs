// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex};

use crate::common::*;
use crate::hv::{HvError, Hypervisor};
use crate::hw::chipset::Chipset;
use crate::hw::ids::pci::{I440FX_HB_DEV_ID, I440FX_HB_REV_ID, VENDOR_INTEL};
use crate::hw::pci::cfgspace::migrate::PciCfgV1;
use crate::hw::pci::{
    self, Bdf, BusLocation, DeviceHandle, INTxPinID, Ident, PioCfgDecoder,
    Registry, Slot,
};
use crate::intr_pins::IntrPin;
use crate::migrate::*;
use crate::pio::{self, PioBus, PioFn};

pub const DEV_NAME: &str = "i440FX";

const HB_LOCATION: BusLocation = BusLocation::new_unchecked(0, 0);

fn ident() -> Ident {
    Ident {
        vendor_id: VENDOR_INTEL,
        device_id: I440FX_HB_DEV_ID,
        revision_id: I440FX_HB_REV_ID,
        class: pci::bits::CLASS_BRIDGE,
        subclass: pci::bits::SUBCLASS_BRIDGE_HOST,
        header_type: pci::bits::HEADER_TYPE_DEVICE,
        ..Default::default()
    }
}

/// Legacy INTx line of a PCI function, delivered through the hypervisor.
pub struct PciIntxPin {
    hv: Arc<dyn Hypervisor>,
    bdf: Bdf,
    intx: INTxPinID,
    asserted: Mutex<bool>,
    log: slog::Logger,
}
impl PciIntxPin {
    fn new(
        hv: Arc<dyn Hypervisor>,
        bdf: Bdf,
        intx: INTxPinID,
        log: slog::Logger,
    ) -> Self {
        Self { hv, bdf, intx, asserted: Mutex::new(false), log }
    }

    fn set_level(&self, level: bool) {
        let mut asserted = self.asserted.lock().unwrap();
        if *asserted == level {
            return;
        }
        *asserted = level;
        drop(asserted);

        let res = self.hv.set_pci_intx_level(
            0,
            self.bdf.bus.get(),
            self.bdf.devfn() >> 3,
            self.intx.line(),
            level,
        );
        if let Err(e) = res {
            slog::error!(self.log, "failed to set INTx level";
                "bdf" => %self.bdf,
                "intx" => self.intx.line(),
                "level" => level,
                "error" => %e);
        }
    }
}
impl IntrPin for PciIntxPin {
    fn assert(&self) {
        self.set_level(true);
    }
    fn deassert(&self) {
        self.set_level(false);
    }
    fn is_asserted(&self) -> bool {
        *self.asserted.lock().unwrap()
    }
}

/// i440FX host bridge, fixed at 0.0.0, owning the 0xCF8/0xCFC config ports.
pub struct I440FxHostBridge {
    hdl: DeviceHandle,
    registry: Arc<Registry>,
    hv: Arc<dyn Hypervisor>,
    pci_cfg: PioCfgDecoder,
    log: slog::Logger,
}
impl I440FxHostBridge {
    pub fn create(
        registry: Arc<Registry>,
        hv: Arc<dyn Hypervisor>,
        log: slog::Logger,
    ) -> Result<Arc<Self>, pci::Error> {
        let log = log.new(slog::o!("dev" => DEV_NAME));
        let hdl = registry.register_device(
            DEV_NAME,
            Slot::Fixed(HB_LOCATION),
            vec![],
        )?;
        registry.with_cfg(hdl, |cfg| cfg.apply(&ident().table()))?;
        slog::info!(log, "host bridge created"; "bdf" => %hdl.bdf());

        Ok(Arc::new(Self {
            hdl,
            registry,
            hv,
            pci_cfg: PioCfgDecoder::new(),
            log,
        }))
    }

    pub fn handle(&self) -> DeviceHandle {
        self.hdl
    }

    /// Claim the configuration address and data ports on `pio`.
    pub fn attach(self: &Arc<Self>, pio: &PioBus) -> pio::Result<()> {
        let pio_dev = Arc::clone(self);
        let piofn =
            Arc::new(move |port: u16, rwo: RWOp| pio_dev.pio_rw(port, rwo))
                as Arc<PioFn>;
        pio.register(
            pci::bits::PORT_PCI_CONFIG_ADDR,
            pci::bits::LEN_PCI_CONFIG_ADDR,
            Arc::clone(&piofn),
        )?;
        pio.register(
            pci::bits::PORT_PCI_CONFIG_DATA,
            pci::bits::LEN_PCI_CONFIG_DATA,
            piofn,
        )
    }

    fn pio_rw(&self, port: u16, rwo: RWOp) -> Result<(), HvError> {
        match port {
            pci::bits::PORT_PCI_CONFIG_ADDR => {
                self.pci_cfg.service_addr(rwo);
                Ok(())
            }
            pci::bits::PORT_PCI_CONFIG_DATA => {
                self.pci_cfg.service_data(rwo, self.registry.as_ref())
            }
            _ => {
                slog::warn!(self.log, "unexpected port"; "port" => port);
                if let RWOp::Read(ro) = rwo {
                    ro.fill(0xff);
                }
                Ok(())
            }
        }
    }

    /// Current contents of the configuration address register.
    pub fn cfg_addr(&self) -> u32 {
        self.pci_cfg.addr()
    }
}
impl Lifecycle for I440FxHostBridge {
    fn type_name(&self) -> &'static str {
        "pci-i440fx-hb"
    }
    fn reset(&self) {
        let res = self.registry.with_cfg(self.hdl, |cfg| {
            cfg.clear();
            cfg.apply(&ident().table());
        });
        if let Err(e) = res {
            slog::error!(self.log, "host bridge reset failed"; "error" => %e);
        }
        self.pci_cfg.set_addr(0);
    }
    fn migrate(&self) -> Migrator {
        Migrator::Multi(self)
    }
}
impl Chipset for I440FxHostBridge {
    fn intx_pin(&self, bdf: Bdf, pin: INTxPinID) -> Arc<dyn IntrPin> {
        Arc::new(PciIntxPin::new(
            self.hv.clone(),
            bdf,
            pin,
            self.log.new(slog::o!("intx_bdf" => bdf.to_string())),
        ))
    }
}
impl MigrateMulti for I440FxHostBridge {
    fn export(
        &self,
        output: &mut PayloadOutputs,
    ) -> Result<(), MigrateStateError> {
        let regs = self
            .registry
            .with_cfg(self.hdl, |cfg| *cfg.bytes())
            .map_err(|e| MigrateStateError::ExportFailed(e.to_string()))?;
        output.push(PciCfgV1 { regs }.into())?;
        output.push(
            migrate::I440FxHostBridgeV1 { pci_cfg_addr: self.pci_cfg.addr() }
                .into(),
        )
    }

    fn import(
        &self,
        offer: &mut PayloadOffers,
    ) -> Result<(), MigrateStateError> {
        let cfg: PciCfgV1 = offer.take()?;
        let data: migrate::I440FxHostBridgeV1 = offer.take()?;
        self.registry
            .with_cfg(self.hdl, |c| c.load(&cfg.regs))
            .map_err(|e| MigrateStateError::ImportFailed(e.to_string()))?;
        self.pci_cfg.set_addr(data.pci_cfg_addr);
        Ok(())
    }
}

pub mod migrate {
    use crate::migrate::*;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Serialize)]
    pub struct I440FxHostBridgeV1 {
        pub pci_cfg_addr: u32,
    }
    impl Schema<'_> for I440FxHostBridgeV1 {
        fn id() -> SchemaId {
            ("i440fx-hb", 1)
        }
    }
}
