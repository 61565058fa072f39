// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration space register file and the write filters layered over it.

use std::convert::TryFrom;

use super::bits::*;
use super::Error;
use crate::hv::HvError;

/// Width of a single configuration space access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Width {
    Byte = 1,
    Word = 2,
    Dword = 4,
}
impl Width {
    pub const fn bytes(self) -> usize {
        self as usize
    }
    /// Mask covering the bytes touched by an access of this width.
    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xff,
            Width::Word => 0xffff,
            Width::Dword => 0xffff_ffff,
        }
    }
}
impl TryFrom<usize> for Width {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Width::Byte),
            2 => Ok(Width::Word),
            4 => Ok(Width::Dword),
            n => Err(Error::BadWidth(n)),
        }
    }
}

/// Is the byte at `off` writable through the default write handler?
///
/// Identification fields, BARs, the expansion ROM address and the interrupt
/// pin are fixed for the bridge functions.
pub(super) fn is_writable(off: usize) -> bool {
    !matches!(
        off,
        0x00..=0x03 | 0x08..=0x0b | 0x0e | 0x10..=0x27 | 0x30..=0x33 | 0x3d
    )
}

/// The 256-byte configuration space of a single PCI function.
#[derive(Clone)]
pub struct CfgSpace {
    regs: [u8; LEN_CFG],
}
impl CfgSpace {
    pub fn new() -> Self {
        Self { regs: [0u8; LEN_CFG] }
    }

    /// Read `width` bytes starting at `off`.  Bytes which would fall beyond
    /// the end of config space read as all-ones.
    pub fn read(&self, off: u8, width: Width) -> u32 {
        let mut buf = [0xffu8; 4];
        for (i, b) in buf.iter_mut().take(width.bytes()).enumerate() {
            if let Some(v) = self.regs.get(off as usize + i) {
                *b = *v;
            }
        }
        u32::from_le_bytes(buf) & width.mask()
    }

    /// Default config write handling: store each byte of `val`, skipping
    /// read-only bytes and anything beyond the end of config space.
    pub fn write(&mut self, off: u8, val: u32, width: Width) {
        for (i, b) in val.to_le_bytes().iter().take(width.bytes()).enumerate() {
            let addr = off as usize + i;
            if addr < LEN_CFG && is_writable(addr) {
                self.regs[addr] = *b;
            }
        }
    }

    /// Apply a table of `(offset, value)` pairs, bypassing the write mask.
    pub fn apply(&mut self, table: &[(u8, u8)]) {
        for (off, val) in table {
            self.regs[*off as usize] = *val;
        }
    }

    pub fn clear(&mut self) {
        self.regs = [0u8; LEN_CFG];
    }

    pub fn bytes(&self) -> &[u8; LEN_CFG] {
        &self.regs
    }

    pub fn load(&mut self, regs: &[u8; LEN_CFG]) {
        self.regs = *regs;
    }
}
impl Default for CfgSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// A guest-initiated configuration space write, as it travels through the
/// filter chain of a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CfgWrite {
    pub offset: u8,
    pub value: u32,
    pub width: Width,
}

/// A hook in front of the default config space handlers of a device.
///
/// Filters run in registration order.  Each one may observe or modify the
/// write before it reaches the next filter, and ultimately the register
/// file.  A filter error does not stop the write: it is reported to the
/// initiator once the write has been stored.
pub trait CfgFilter: Send + Sync + 'static {
    fn cfg_write(&self, write: &mut CfgWrite) -> Result<(), HvError>;

    /// Adjust a value produced by the default read handler.
    #[allow(unused_variables)]
    fn cfg_read(&self, offset: u8, width: Width, value: u32) -> u32 {
        value
    }
}

/// Fixed identification of a PCI function.
#[derive(Default)]
pub struct Ident {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub revision_id: u8,
    pub header_type: u8,
}
impl Ident {
    /// The identity registers as `(offset, value)` pairs.
    pub fn table(&self) -> [(u8, u8); 9] {
        let [vid_lo, vid_hi] = self.vendor_id.to_le_bytes();
        let [did_lo, did_hi] = self.device_id.to_le_bytes();
        [
            (OFF_VENDOR_ID, vid_lo),
            (OFF_VENDOR_ID + 1, vid_hi),
            (OFF_DEVICE_ID, did_lo),
            (OFF_DEVICE_ID + 1, did_hi),
            (OFF_REVISION_ID, self.revision_id),
            (OFF_PROG_IF, self.prog_if),
            (OFF_SUBCLASS, self.subclass),
            (OFF_CLASS, self.class),
            (OFF_HEADER_TYPE, self.header_type),
        ]
    }
}

pub mod migrate {
    use crate::hw::pci::bits::LEN_CFG;
    use crate::migrate::*;

    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Serialize)]
    pub struct PciCfgV1 {
        #[serde(with = "serde_arrays")]
        pub regs: [u8; LEN_CFG],
    }
    impl Schema<'_> for PciCfgV1 {
        fn id() -> SchemaId {
            ("pci-cfg", 1)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn width_from_len() {
        assert_eq!(Width::try_from(1).unwrap(), Width::Byte);
        assert_eq!(Width::try_from(2).unwrap(), Width::Word);
        assert_eq!(Width::try_from(4).unwrap(), Width::Dword);
        assert!(matches!(Width::try_from(3), Err(Error::BadWidth(3))));
        assert!(matches!(Width::try_from(0), Err(Error::BadWidth(0))));
    }

    #[test]
    fn write_read_back() {
        let mut cfg = CfgSpace::new();
        cfg.write(0x40, 0xdead_beef, Width::Dword);
        assert_eq!(cfg.read(0x40, Width::Dword), 0xdead_beef);
        assert_eq!(cfg.read(0x41, Width::Word), 0xadbe);
        assert_eq!(cfg.read(0x43, Width::Byte), 0xde);

        cfg.write(0x42, 0x1234, Width::Word);
        assert_eq!(cfg.read(0x40, Width::Dword), 0x1234_beef);
    }

    #[test]
    fn identity_is_read_only() {
        let mut cfg = CfgSpace::new();
        let ident = Ident {
            vendor_id: 0x8086,
            device_id: 0x1237,
            revision_id: 0x02,
            class: CLASS_BRIDGE,
            ..Default::default()
        };
        cfg.apply(&ident.table());

        cfg.write(0x00, 0xffff_ffff, Width::Dword);
        cfg.write(0x08, 0xffff_ffff, Width::Dword);
        cfg.write(0x0e, 0xff, Width::Byte);
        assert_eq!(cfg.read(0x00, Width::Dword), 0x1237_8086);
        assert_eq!(cfg.read(0x08, Width::Dword), 0x0600_0002);
        assert_eq!(cfg.read(0x0e, Width::Byte), 0x00);

        // Neighbouring writable bytes in the same dword still land
        cfg.write(0x0c, 0xffff_ffff, Width::Dword);
        assert_eq!(cfg.read(0x0c, Width::Dword), 0xff00_ffff);
    }

    #[test]
    fn access_past_end() {
        let mut cfg = CfgSpace::new();
        cfg.write(0xfe, 0x4433_2211, Width::Dword);
        assert_eq!(cfg.read(0xfc, Width::Dword), 0x2211_0000);
        assert_eq!(cfg.read(0xfe, Width::Dword), 0xffff_2211);
    }

    #[test]
    fn clear_and_load() {
        let mut cfg = CfgSpace::new();
        cfg.apply(&[(0x60, 0x80), (0xa8, 0x0f)]);
        let saved = *cfg.bytes();
        cfg.clear();
        assert_eq!(cfg.read(0x60, Width::Byte), 0);
        cfg.load(&saved);
        assert_eq!(cfg.read(0x60, Width::Byte), 0x80);
        assert_eq!(cfg.read(0xa8, Width::Byte), 0x0f);
    }
}
