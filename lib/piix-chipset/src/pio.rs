// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Port IO dispatch.

use std::collections::BTreeMap;
use std::ops::Bound::{Included, Unbounded};
use std::sync::{Arc, Mutex};

use crate::common::*;
use crate::hv::HvError;

use byteorder::{ByteOrder, LE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("port range {start:#x}+{len:#x} exceeds port space")]
    OutOfRange { start: u16, len: u16 },

    #[error("zero-length port range at {0:#x}")]
    BadLength(u16),

    #[error("port range {start:#x}+{len:#x} conflicts with existing handler")]
    Conflict { start: u16, len: u16 },

    #[error("unsupported access width {0}")]
    BadWidth(u8),

    #[error("port handler failed")]
    Handler(#[from] HvError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Handler for a registered port range.  The port passed in is the start of
/// the registered range, while the operation offset is relative to it.
pub type PioFn = dyn Fn(u16, RWOp<'_, '_>) -> std::result::Result<(), HvError>
    + Send
    + Sync
    + 'static;

/// Port IO bus.
pub struct PioBus {
    // keyed by start port, holding (inclusive end port, handler)
    map: Mutex<BTreeMap<u16, (u16, Arc<PioFn>)>>,
    log: slog::Logger,
}

impl PioBus {
    pub fn new(log: slog::Logger) -> Self {
        Self { map: Mutex::new(BTreeMap::new()), log }
    }

    pub fn register(&self, start: u16, len: u16, func: Arc<PioFn>) -> Result<()> {
        if len == 0 {
            return Err(Error::BadLength(start));
        }
        let end = start
            .checked_add(len - 1)
            .ok_or(Error::OutOfRange { start, len })?;

        let mut map = self.map.lock().unwrap();
        // Do any entries start within the range?
        if map.range((Included(&start), Included(&end))).next().is_some() {
            return Err(Error::Conflict { start, len });
        }
        // Does a preceeding entry spill into the range?
        if let Some((_p_start, ent)) =
            map.range((Unbounded, Included(&start))).next_back()
        {
            if ent.0 >= start {
                return Err(Error::Conflict { start, len });
            }
        }
        map.insert(start, (end, func));
        Ok(())
    }

    pub fn handle_out(&self, port: u16, bytes: u8, val: u32) -> Result<()> {
        let buf = val.to_le_bytes();
        let data = match bytes {
            1 => &buf[0..1],
            2 => &buf[0..2],
            4 => &buf[0..],
            _ => return Err(Error::BadWidth(bytes)),
        };
        let handled = self.do_pio(port, |a, o, func| {
            let mut wo = WriteOp::from_buf(o as usize, data);
            func(a, RWOp::Write(&mut wo))
        });
        match handled {
            Some(res) => Ok(res?),
            None => {
                slog::debug!(self.log, "unhandled PIO";
                    "op" => "out", "port" => port, "bytes" => bytes);
                Ok(())
            }
        }
    }

    pub fn handle_in(&self, port: u16, bytes: u8) -> Result<u32> {
        let mut buf = [0xffu8; 4];
        let data = match bytes {
            1 => &mut buf[0..1],
            2 => &mut buf[0..2],
            4 => &mut buf[0..],
            _ => return Err(Error::BadWidth(bytes)),
        };
        let handled = self.do_pio(port, |a, o, func| {
            let mut ro = ReadOp::from_buf(o as usize, data);
            func(a, RWOp::Read(&mut ro))
        });
        match handled {
            Some(res) => res?,
            None => {
                slog::debug!(self.log, "unhandled PIO";
                    "op" => "in", "port" => port, "bytes" => bytes);
            }
        }

        let val = LE::read_u32(&buf);
        // Upper lanes beyond the access width are not part of the result
        Ok(match bytes {
            1 => val & 0xff,
            2 => val & 0xffff,
            _ => val,
        })
    }

    fn do_pio<F, R>(&self, port: u16, f: F) -> Option<R>
    where
        F: FnOnce(u16, u16, &Arc<PioFn>) -> R,
    {
        let map = self.map.lock().unwrap();
        let (start, func) = match map
            .range((Unbounded, Included(&port)))
            .next_back()
        {
            Some((start, ent)) if ent.0 >= port => (*start, Arc::clone(&ent.1)),
            _ => return None,
        };
        // unlock map before entering handler
        drop(map);
        Some(f(start, port - start, &func))
    }
}
