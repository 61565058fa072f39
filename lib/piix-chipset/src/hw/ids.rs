// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub mod pci {
    pub const VENDOR_INTEL: u16 = 0x8086;

    pub const I440FX_HB_DEV_ID: u16 = 0x1237;
    pub const I440FX_HB_REV_ID: u8 = 0x02;
    pub const PIIX3_ISA_DEV_ID: u16 = 0x7000;
}
