// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use crate::common::Lifecycle;
use crate::hv::Hypervisor;
use crate::hw::pci::{self, Bdf, INTxPinID, Registry};
use crate::intr_pins::IntrPin;
use crate::pio::{self, PioBus};

pub mod i440fx;
pub mod piix3;

use i440fx::I440FxHostBridge;
use piix3::Piix3Isa;

pub trait Chipset {
    /// Legacy interrupt line `pin` of the PCI function at `bdf`.
    fn intx_pin(&self, bdf: Bdf, pin: INTxPinID) -> Arc<dyn IntrPin>;
}

/// Host bridge and ISA bridge, sharing a device registry and hypervisor.
pub struct Piix {
    pub registry: Arc<Registry>,
    pub hb: Arc<I440FxHostBridge>,
    pub isa: Arc<Piix3Isa>,
}
impl Piix {
    pub fn create(
        hv: Arc<dyn Hypervisor>,
        log: slog::Logger,
    ) -> Result<Self, pci::Error> {
        let registry = Arc::new(Registry::new(log.clone()));
        let hb =
            I440FxHostBridge::create(registry.clone(), hv.clone(), log.clone())?;
        let isa = Piix3Isa::create(registry.clone(), hv, log)?;
        Ok(Self { registry, hb, isa })
    }

    pub fn attach(&self, pio: &PioBus) -> pio::Result<()> {
        self.hb.attach(pio)
    }

    /// Devices in the order they are reset and snapshotted, keyed by the
    /// name they are registered under.
    pub fn devices(&self) -> [(&'static str, &dyn Lifecycle); 2] {
        [
            (i440fx::DEV_NAME, self.hb.as_ref() as &dyn Lifecycle),
            (piix3::DEV_NAME, self.isa.as_ref() as &dyn Lifecycle),
        ]
    }

    pub fn reset(&self) {
        for (_name, dev) in self.devices() {
            dev.reset();
        }
    }
}
impl Chipset for Piix {
    fn intx_pin(&self, bdf: Bdf, pin: INTxPinID) -> Arc<dyn IntrPin> {
        self.hb.intx_pin(bdf, pin)
    }
}
