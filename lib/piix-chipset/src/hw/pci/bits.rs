// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PCI config registers.

pub const LEN_CFG: usize = 0x100;

// Standard header offsets
pub const OFF_VENDOR_ID: u8 = 0x00;
pub const OFF_DEVICE_ID: u8 = 0x02;
pub const OFF_COMMAND: u8 = 0x04;
pub const OFF_STATUS: u8 = 0x06;
pub const OFF_REVISION_ID: u8 = 0x08;
pub const OFF_PROG_IF: u8 = 0x09;
pub const OFF_SUBCLASS: u8 = 0x0a;
pub const OFF_CLASS: u8 = 0x0b;
pub const OFF_HEADER_TYPE: u8 = 0x0e;

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct RegCmd: u16 {
        const IO_EN = 1 << 0;
        const MMIO_EN = 1 << 1;
        const BUSMSTR_EN = 1 << 2;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct RegStatus: u16 {
        const DEVSEL_MEDIUM = 0b01 << 9;
    }
}

pub const CLASS_BRIDGE: u8 = 6;

// Sub-classes under CLASS_BRIDGE
pub const SUBCLASS_BRIDGE_HOST: u8 = 0;
pub const SUBCLASS_BRIDGE_ISA: u8 = 1;

pub const HEADER_TYPE_DEVICE: u8 = 0b0;
pub const HEADER_TYPE_MULTIFUNC: u8 = 0b1000_0000;

pub(super) const MASK_FUNC: u8 = 0x07;
pub(super) const MASK_DEV: u8 = 0x1f;
pub(super) const MASK_BUS: u8 = 0xff;

/// Enable bit of the configuration address register (mechanism #1).
pub(super) const CFG_ADDR_ENABLE: u32 = 1 << 31;
/// Dword-aligned register number field of the configuration address.
pub(super) const MASK_CFG_REG: u32 = 0xfc;

pub const PORT_PCI_CONFIG_ADDR: u16 = 0xcf8;
pub const LEN_PCI_CONFIG_ADDR: u16 = 4;
pub const PORT_PCI_CONFIG_DATA: u16 = 0xcfc;
pub const LEN_PCI_CONFIG_DATA: u16 = 4;
