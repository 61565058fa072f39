// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Emulation of the legacy i440FX host bridge and PIIX3 ISA bridge, as seen
//! through the 0xCF8/0xCFC configuration port pair.

#![allow(clippy::style)]

#[macro_use]
extern crate bitflags;

pub mod common;
pub mod hv;
pub mod hw;
pub mod intr_pins;
pub mod lifecycle;
pub mod migrate;
pub mod pio;

#[cfg(test)]
pub(crate) mod test_util;

pub use hw::chipset::Piix;
