// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by unit tests across the crate.

use std::sync::{Arc, Mutex};

use crate::hv::{HvError, Hypervisor};

use slog::{Discard, Logger};

pub(crate) fn test_logger() -> Logger {
    Logger::root(Discard, slog::o!())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum HvCall {
    Route { link: u8, irq: u8 },
    Intx { segment: u16, bus: u8, device: u8, intx: u8, level: bool },
}

/// Hypervisor which records every request made of it.
///
/// Route requests for links listed in `fail_links` are recorded and then
/// rejected.
#[derive(Default)]
pub(crate) struct RecordingHv {
    calls: Mutex<Vec<HvCall>>,
    fail_links: Mutex<Vec<u8>>,
}
impl RecordingHv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_link(&self, link: u8) {
        self.fail_links.lock().unwrap().push(link);
    }

    pub fn take_calls(&self) -> Vec<HvCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Route requests issued since the last take, as (link, irq) pairs.
    pub fn take_routes(&self) -> Vec<(u8, u8)> {
        self.take_calls()
            .into_iter()
            .filter_map(|c| match c {
                HvCall::Route { link, irq } => Some((link, irq)),
                _ => None,
            })
            .collect()
    }
}
impl Hypervisor for RecordingHv {
    fn set_pci_link_route(&self, link: u8, irq: u8) -> Result<(), HvError> {
        self.calls.lock().unwrap().push(HvCall::Route { link, irq });
        if self.fail_links.lock().unwrap().contains(&link) {
            return Err(HvError::Rejected(format!("link {link}")));
        }
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
        self.calls.lock().unwrap().push(HvCall::Intx {
            segment,
            bus,
            device,
            intx,
            level,
        });
        Ok(())
    }
}
