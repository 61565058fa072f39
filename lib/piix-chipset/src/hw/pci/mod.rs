// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::convert::TryFrom;
use std::fmt::Result as FmtResult;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Mutex;

use crate::common::*;
use crate::hv::HvError;

use thiserror::Error;

pub mod bits;
pub mod cfgspace;
pub mod registry;

pub use cfgspace::{CfgFilter, CfgSpace, CfgWrite, Ident, Width};
pub use registry::{DeviceHandle, Registry, Slot};

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported config access width {0}")]
    BadWidth(usize),

    #[error("no free slot on bus 0")]
    NoFreeSlot,

    #[error("slot {0} already occupied")]
    SlotOccupied(Bdf),

    #[error("no device registered at {0}")]
    UnknownDevice(Bdf),

    #[error("invalid BDF: {0}")]
    BadBdf(String),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct BusNum(u8);
impl BusNum {
    pub const fn new(n: u8) -> Self {
        Self(n)
    }
    pub const fn get(&self) -> u8 {
        self.0
    }
}
#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct DevNum(u8);
impl DevNum {
    /// Returns [`Option::None`] if `n` is outside the range for a valid PCI
    /// device.
    pub const fn new(n: u8) -> Option<Self> {
        if n <= bits::MASK_DEV {
            Some(Self(n))
        } else {
            None
        }
    }
    pub const fn get(&self) -> u8 {
        self.0
    }
}
#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct FuncNum(u8);
impl FuncNum {
    /// Returns [`Option::None`] if `n` is outside the range for a valid PCI
    /// function.
    pub const fn new(n: u8) -> Option<Self> {
        if n <= bits::MASK_FUNC {
            Some(Self(n))
        } else {
            None
        }
    }
    pub const fn get(&self) -> u8 {
        self.0
    }
}

/// A device/function located on a specific PCI bus.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct BusLocation {
    pub dev: DevNum,
    pub func: FuncNum,
}
impl BusLocation {
    pub const fn new(dev: u8, func: u8) -> Option<Self> {
        match (DevNum::new(dev), FuncNum::new(func)) {
            (Some(dev), Some(func)) => Some(Self { dev, func }),
            _ => None,
        }
    }
    /// # Panics
    ///
    /// If `dev` or `func` are outside their respective valid ranges
    pub const fn new_unchecked(dev: u8, func: u8) -> Self {
        match Self::new(dev, func) {
            Some(loc) => loc,
            None => panic!("invalid device/function"),
        }
    }
    /// Combined device/function number, as used by legacy firmware tables.
    pub const fn devfn(&self) -> u8 {
        (self.dev.0 << 3) | self.func.0
    }
}

/// Bus, Device, Function.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Ord, PartialOrd)]
pub struct Bdf {
    pub bus: BusNum,
    pub location: BusLocation,
}
impl Bdf {
    /// Returns [`Option::None`] if the values would not fit within a BDF.
    pub const fn new(bus: u8, dev: u8, func: u8) -> Option<Self> {
        match BusLocation::new(dev, func) {
            Some(location) => Some(Self { bus: BusNum::new(bus), location }),
            None => None,
        }
    }
    pub const fn devfn(&self) -> u8 {
        self.location.devfn()
    }
}
impl FromStr for Bdf {
    type Err = Error;

    /// Parse a BDF of the form `bus.dev.func`, all in decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split('.')
            .map(u8::from_str)
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|e| Error::BadBdf(format!("{s}: {e}")))?;
        match fields[..] {
            [bus, dev, func] => Bdf::new(bus, dev, func)
                .ok_or_else(|| Error::BadBdf(format!("{s}: out of range"))),
            _ => Err(Error::BadBdf(format!("{s}: wrong number of fields"))),
        }
    }
}
impl Display for Bdf {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{}.{}.{}",
            self.bus.0, self.location.dev.0, self.location.func.0
        )
    }
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum INTxPinID {
    IntA = 1,
    IntB = 2,
    IntC = 3,
    IntD = 4,
}
impl INTxPinID {
    /// Zero-based line index (INTA# = 0) as used by the hypervisor.
    pub const fn line(self) -> u8 {
        self as u8 - 1
    }
}

/// Something which answers configuration space accesses for the functions it
/// owns.
pub trait CfgTarget {
    /// Returns `None` if no function is present at `bdf`.
    fn cfg_read(&self, bdf: &Bdf, off: u8, width: Width) -> Option<u32>;

    /// Returns `None` if no function is present at `bdf`.  Otherwise the write
    /// has been carried out, and any error raised by its filters is returned.
    fn cfg_write(
        &self,
        bdf: &Bdf,
        off: u8,
        val: u32,
        width: Width,
    ) -> Option<Result<(), HvError>>;
}

/// Split a configuration address (mechanism #1) into the targeted function
/// and the dword-aligned register offset.
fn cfg_addr_parse(addr: u32) -> Option<(Bdf, u8)> {
    if addr & bits::CFG_ADDR_ENABLE == 0 {
        // Enable bit not set
        return None;
    }
    let bdf = Bdf::new(
        (addr >> 16) as u8 & bits::MASK_BUS,
        (addr >> 11) as u8 & bits::MASK_DEV,
        (addr >> 8) as u8 & bits::MASK_FUNC,
    )?;
    Some((bdf, (addr & bits::MASK_CFG_REG) as u8))
}

/// Decoder for the legacy 0xCF8/0xCFC configuration port pair.
pub struct PioCfgDecoder {
    addr: Mutex<u32>,
}
impl PioCfgDecoder {
    pub fn new() -> Self {
        Self { addr: Mutex::new(0) }
    }

    /// Handle an access to the address port.  Only aligned dword accesses
    /// are honored: others read as all-ones and writes are discarded.
    pub fn service_addr(&self, rwop: RWOp) {
        if rwop.len() != 4 || rwop.offset() != 0 {
            if let RWOp::Read(ro) = rwop {
                ro.fill(0xff);
            }
            return;
        }
        let mut addr = self.addr.lock().unwrap();
        match rwop {
            RWOp::Read(ro) => ro.write_u32(*addr),
            RWOp::Write(wo) => *addr = wo.read_u32(),
        }
    }

    /// Handle an access to the data port, forwarding it to `target` at the
    /// function and register selected by the latched address.
    ///
    /// Accesses with the enable bit clear, to functions not present, or
    /// spilling past the end of the data window are master aborts: reads
    /// return all-ones and writes go nowhere.
    pub fn service_data(
        &self,
        rwop: RWOp,
        target: &dyn CfgTarget,
    ) -> Result<(), HvError> {
        let addr = self.addr();

        let lane = rwop.offset();
        let decoded = match (cfg_addr_parse(addr), Width::try_from(rwop.len()))
        {
            (Some((bdf, reg)), Ok(width))
                if lane + width.bytes() <= bits::LEN_PCI_CONFIG_DATA as usize =>
            {
                Some((bdf, reg | lane as u8, width))
            }
            _ => None,
        };

        match rwop {
            RWOp::Read(ro) => {
                match decoded
                    .and_then(|(bdf, off, w)| target.cfg_read(&bdf, off, w))
                {
                    Some(val) => {
                        let len = ro.len();
                        ro.write_bytes(&val.to_le_bytes()[..len]);
                    }
                    None => ro.fill(0xff),
                }
                Ok(())
            }
            RWOp::Write(wo) => match decoded {
                Some((bdf, off, w)) => {
                    let val = wo.read_le();
                    target.cfg_write(&bdf, off, val, w).unwrap_or(Ok(()))
                }
                None => Ok(()),
            },
        }
    }

    pub fn addr(&self) -> u32 {
        *self.addr.lock().unwrap()
    }

    pub(crate) fn set_addr(&self, addr: u32) {
        *self.addr.lock().unwrap() = addr;
    }
}
impl Default for PioCfgDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use proptest::prelude::*;

    /// Target backed by a single flat register file at 0.1.0
    struct Flat {
        cfg: Mutex<CfgSpace>,
        writes: Mutex<Vec<(u8, u32, Width)>>,
    }
    impl Flat {
        fn new() -> Self {
            let mut cfg = CfgSpace::new();
            let pattern: Vec<(u8, u8)> =
                (0..=255u8).map(|i| (i, i)).collect();
            cfg.apply(&pattern);
            Self { cfg: Mutex::new(cfg), writes: Mutex::new(Vec::new()) }
        }
        fn bdf() -> Bdf {
            Bdf::new(0, 1, 0).unwrap()
        }
    }
    impl CfgTarget for Flat {
        fn cfg_read(&self, bdf: &Bdf, off: u8, width: Width) -> Option<u32> {
            if *bdf != Self::bdf() {
                return None;
            }
            Some(self.cfg.lock().unwrap().read(off, width))
        }
        fn cfg_write(
            &self,
            bdf: &Bdf,
            off: u8,
            val: u32,
            width: Width,
        ) -> Option<Result<(), HvError>> {
            if *bdf != Self::bdf() {
                return None;
            }
            self.writes.lock().unwrap().push((off, val, width));
            Some(Ok(()))
        }
    }

    fn data_in(
        dec: &PioCfgDecoder,
        target: &dyn CfgTarget,
        lane: usize,
        len: usize,
    ) -> u32 {
        let mut buf = [0u8; 4];
        let mut ro = ReadOp::from_buf(lane, &mut buf[..len]);
        dec.service_data(RWOp::Read(&mut ro), target).unwrap();
        u32::from_le_bytes(buf)
    }

    fn data_out(
        dec: &PioCfgDecoder,
        target: &dyn CfgTarget,
        lane: usize,
        val: u32,
        len: usize,
    ) {
        let buf = val.to_le_bytes();
        let mut wo = WriteOp::from_buf(lane, &buf[..len]);
        dec.service_data(RWOp::Write(&mut wo), target).unwrap();
    }

    #[test]
    fn parse_addr() {
        assert_eq!(cfg_addr_parse(0x0000_0860), None);
        assert_eq!(
            cfg_addr_parse(0x8000_0860),
            Some((Bdf::new(0, 1, 0).unwrap(), 0x60))
        );
        // low two bits of the register field are ignored
        assert_eq!(
            cfg_addr_parse(0x8012_fb63),
            Some((Bdf::new(0x12, 0x1f, 3).unwrap(), 0x60))
        );
    }

    #[test]
    fn bdf_str() {
        let bdf: Bdf = "0.1.0".parse().unwrap();
        assert_eq!(bdf, Bdf::new(0, 1, 0).unwrap());
        assert_eq!(bdf.devfn(), 0x08);
        assert_eq!(bdf.to_string(), "0.1.0");
        assert!("0.32.0".parse::<Bdf>().is_err());
        assert!("0.1".parse::<Bdf>().is_err());
        assert!("0.1.0.0".parse::<Bdf>().is_err());
        assert!("a.b.c".parse::<Bdf>().is_err());
    }

    #[test]
    fn addr_port_dword_only() {
        let dec = PioCfgDecoder::new();
        let buf = 0x8000_0860u32.to_le_bytes();
        dec.service_addr(RWOp::Write(&mut WriteOp::from_buf(0, &buf)));
        assert_eq!(dec.addr(), 0x8000_0860);

        // Byte and offset writes are dropped
        dec.service_addr(RWOp::Write(&mut WriteOp::from_buf(0, &buf[..1])));
        dec.service_addr(RWOp::Write(&mut WriteOp::from_buf(2, &buf[..2])));
        assert_eq!(dec.addr(), 0x8000_0860);

        let mut out = [0u8; 4];
        dec.service_addr(RWOp::Read(&mut ReadOp::from_buf(0, &mut out)));
        assert_eq!(u32::from_le_bytes(out), 0x8000_0860);

        let mut out = [0u8; 2];
        dec.service_addr(RWOp::Read(&mut ReadOp::from_buf(0, &mut out)));
        assert_eq!(out, [0xff, 0xff]);
    }

    #[test]
    fn data_master_abort() {
        let dec = PioCfgDecoder::new();
        let flat = Flat::new();

        // enable clear
        dec.set_addr(0x0000_0860);
        assert_eq!(data_in(&dec, &flat, 0, 4), 0xffff_ffff);
        data_out(&dec, &flat, 0, 0, 4);

        // nothing at 0.2.0
        dec.set_addr(0x8000_1060);
        assert_eq!(data_in(&dec, &flat, 0, 2), 0xffff);
        data_out(&dec, &flat, 0, 0, 4);

        // word access at lane 3 spills out of the window
        dec.set_addr(0x8000_0860);
        assert_eq!(data_in(&dec, &flat, 3, 2), 0xffff);
        data_out(&dec, &flat, 3, 0, 2);

        assert!(flat.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn data_lanes() {
        let dec = PioCfgDecoder::new();
        let flat = Flat::new();
        dec.set_addr(0x8000_0860);

        assert_eq!(data_in(&dec, &flat, 0, 4), 0x6362_6160);
        assert_eq!(data_in(&dec, &flat, 2, 2), 0x6362);
        assert_eq!(data_in(&dec, &flat, 1, 1), 0x61);

        data_out(&dec, &flat, 2, 0xabcd, 2);
        data_out(&dec, &flat, 3, 0x0b, 1);
        assert_eq!(
            *flat.writes.lock().unwrap(),
            vec![(0x62, 0xabcd, Width::Word), (0x63, 0x0b, Width::Byte)]
        );
    }

    proptest! {
        #[test]
        fn decode_fields(bus in 0u8..=255, dev in 0u8..32, func in 0u8..8,
            reg in 0u8..64, low in 0u8..4)
        {
            let addr = bits::CFG_ADDR_ENABLE
                | (bus as u32) << 16
                | (dev as u32) << 11
                | (func as u32) << 8
                | (reg as u32) << 2
                | low as u32;
            let (bdf, off) = cfg_addr_parse(addr).unwrap();
            prop_assert_eq!(bdf, Bdf::new(bus, dev, func).unwrap());
            prop_assert_eq!(off, reg << 2);
            prop_assert!(cfg_addr_parse(addr & !bits::CFG_ADDR_ENABLE).is_none());
        }

        #[test]
        fn unknown_function_reads_ones(addr in any::<u32>(), lane in 0usize..4) {
            let dec = PioCfgDecoder::new();
            let flat = Flat::new();
            // steer clear of 0.1.0, which the flat target answers
            prop_assume!((addr >> 8) & 0xffff != 0x0008);
            dec.set_addr(addr);
            let len = 4 - lane;
            let len = if len == 3 { 2 } else { len };
            let expect = if len == 4 { u32::MAX } else { (1u32 << (len * 8)) - 1 };
            prop_assert_eq!(data_in(&dec, &flat, lane, len), expect);
        }

        #[test]
        fn addr_port_round_trip(addr in any::<u32>()) {
            let dec = PioCfgDecoder::new();
            let buf = addr.to_le_bytes();
            dec.service_addr(RWOp::Write(&mut WriteOp::from_buf(0, &buf)));

            let mut out = [0u8; 4];
            dec.service_addr(RWOp::Read(&mut ReadOp::from_buf(0, &mut out)));
            prop_assert_eq!(u32::from_le_bytes(out), addr);
        }

        #[test]
        fn data_port_readback(reg in 0u8..64, lane in 0usize..4,
            len in prop::sample::select(vec![1usize, 2, 4]), val in any::<u32>())
        {
            prop_assume!(lane + len <= 4);
            let off = (reg << 2) as usize + lane;
            prop_assume!((off..off + len).all(cfgspace::is_writable));

            let registry =
                Registry::new(slog::Logger::root(slog::Discard, slog::o!()));
            let hdl = registry.register_device("dev", Slot::Auto, vec![]).unwrap();
            let dec = PioCfgDecoder::new();
            dec.set_addr(
                bits::CFG_ADDR_ENABLE
                    | (hdl.bdf().devfn() as u32) << 8
                    | (reg as u32) << 2,
            );

            let expect = if len == 4 { val } else { val & ((1u32 << (len * 8)) - 1) };
            data_out(&dec, &registry, lane, expect, len);
            prop_assert_eq!(data_in(&dec, &registry, lane, len), expect);
        }
    }
}
