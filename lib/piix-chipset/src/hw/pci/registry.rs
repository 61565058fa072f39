// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of the PCI functions present on bus 0.
//!
//! Each function owns a [CfgSpace] and an ordered chain of [CfgFilter]s.
//! Guest config writes pass through every filter before landing in the
//! register file via the default write handler.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::{
    BusLocation, BusNum, CfgFilter, CfgSpace, CfgTarget, CfgWrite, Error,
    Width,
};
use super::{bits, Bdf};
use crate::hv::HvError;

/// Placement requested when registering a function.
#[derive(Copy, Clone, Debug)]
pub enum Slot {
    Fixed(BusLocation),
    /// Function 0 of the lowest device number with nothing registered.
    Auto,
}

/// Stable reference to a registered function.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceHandle(Bdf);
impl DeviceHandle {
    pub fn bdf(&self) -> Bdf {
        self.0
    }
}

struct Function {
    name: String,
    cfg: Mutex<CfgSpace>,
    filters: Vec<Arc<dyn CfgFilter>>,
}

pub struct Registry {
    funcs: Mutex<BTreeMap<BusLocation, Arc<Function>>>,
    log: slog::Logger,
}
impl Registry {
    const BUS: BusNum = BusNum::new(0);

    pub fn new(log: slog::Logger) -> Self {
        Self { funcs: Mutex::new(BTreeMap::new()), log }
    }

    /// Register a function named `name` with a zeroed config space.
    ///
    /// Writes from the guest are passed through `filters`, in order, before
    /// being stored by the default handler.
    pub fn register_device(
        &self,
        name: &str,
        slot: Slot,
        filters: Vec<Arc<dyn CfgFilter>>,
    ) -> Result<DeviceHandle, Error> {
        let mut funcs = self.funcs.lock().unwrap();
        let location = match slot {
            Slot::Fixed(loc) => {
                if funcs.contains_key(&loc) {
                    return Err(Error::SlotOccupied(Bdf {
                        bus: Self::BUS,
                        location: loc,
                    }));
                }
                loc
            }
            Slot::Auto => (0..=bits::MASK_DEV)
                .find(|dev| !funcs.keys().any(|loc| loc.dev.get() == *dev))
                .and_then(|dev| BusLocation::new(dev, 0))
                .ok_or(Error::NoFreeSlot)?,
        };
        let bdf = Bdf { bus: Self::BUS, location };

        funcs.insert(
            location,
            Arc::new(Function {
                name: name.to_string(),
                cfg: Mutex::new(CfgSpace::new()),
                filters,
            }),
        );
        slog::debug!(self.log, "registered PCI function";
            "name" => name, "bdf" => %bdf);
        Ok(DeviceHandle(bdf))
    }

    fn func(&self, bdf: &Bdf) -> Option<Arc<Function>> {
        if bdf.bus != Self::BUS {
            return None;
        }
        self.funcs.lock().unwrap().get(&bdf.location).cloned()
    }

    fn func_hdl(&self, hdl: DeviceHandle) -> Result<Arc<Function>, Error> {
        self.func(&hdl.0).ok_or(Error::UnknownDevice(hdl.0))
    }

    /// Operate directly on the config space of a function, bypassing its
    /// filters and the write mask.
    pub fn with_cfg<R>(
        &self,
        hdl: DeviceHandle,
        f: impl FnOnce(&mut CfgSpace) -> R,
    ) -> Result<R, Error> {
        let func = self.func_hdl(hdl)?;
        let mut cfg = func.cfg.lock().unwrap();
        Ok(f(&mut cfg))
    }

    pub fn default_cfg_read(
        &self,
        hdl: DeviceHandle,
        off: u8,
        width: Width,
    ) -> Result<u32, Error> {
        self.with_cfg(hdl, |cfg| cfg.read(off, width))
    }

    pub fn default_cfg_write(
        &self,
        hdl: DeviceHandle,
        off: u8,
        val: u32,
        width: Width,
    ) -> Result<(), Error> {
        self.with_cfg(hdl, |cfg| cfg.write(off, val, width))
    }

    pub fn lookup(&self, name: &str) -> Option<DeviceHandle> {
        let funcs = self.funcs.lock().unwrap();
        funcs.iter().find(|(_loc, func)| func.name == name).map(|(loc, _)| {
            DeviceHandle(Bdf { bus: Self::BUS, location: *loc })
        })
    }

    pub fn lookup_bdf(&self, bdf: &Bdf) -> Option<DeviceHandle> {
        self.func(bdf).map(|_| DeviceHandle(*bdf))
    }

    /// Registered functions in BDF order.
    pub fn devices(&self) -> Vec<(DeviceHandle, String)> {
        let funcs = self.funcs.lock().unwrap();
        funcs
            .iter()
            .map(|(loc, func)| {
                let bdf = Bdf { bus: Self::BUS, location: *loc };
                (DeviceHandle(bdf), func.name.clone())
            })
            .collect()
    }
}

impl CfgTarget for Registry {
    fn cfg_read(&self, bdf: &Bdf, off: u8, width: Width) -> Option<u32> {
        let func = self.func(bdf)?;
        let val = func.cfg.lock().unwrap().read(off, width);
        Some(
            func.filters
                .iter()
                .fold(val, |val, filt| filt.cfg_read(off, width, val)),
        )
    }

    fn cfg_write(
        &self,
        bdf: &Bdf,
        off: u8,
        val: u32,
        width: Width,
    ) -> Option<Result<(), HvError>> {
        let func = self.func(bdf)?;

        let mut write = CfgWrite { offset: off, value: val, width };
        let mut res = Ok(());
        for filt in func.filters.iter() {
            if let Err(e) = filt.cfg_write(&mut write) {
                slog::warn!(self.log, "config write filter failed";
                    "bdf" => %bdf, "offset" => off, "error" => %e);
                if res.is_ok() {
                    res = Err(e);
                }
            }
        }
        func.cfg.lock().unwrap().write(write.offset, write.value, write.width);
        Some(res)
    }
}
