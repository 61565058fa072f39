// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Represents an abstract requested read operation.
///
/// Exposes an API with various "write" methods, which fulfill the request.
pub struct ReadOp<'a> {
    buf: &'a mut [u8],
    offset: usize,
    write_offset: usize,
}

impl<'a> ReadOp<'a> {
    /// Initializes a new read operation from a buffer.
    ///
    /// # Arguments
    ///
    /// - `op_offset`: An auxiliary offset stored within the operation,
    /// identifying the region which should be accessed to populate `buf`.
    /// - `buffer`: A buffer which represents the "sink" of the read operation.
    pub fn from_buf(op_offset: usize, buffer: &'a mut [u8]) -> Self {
        Self { buf: buffer, offset: op_offset, write_offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn avail(&self) -> usize {
        self.len().checked_sub(self.write_offset).unwrap()
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn write_u8(&mut self, val: u8) {
        self.write_bytes(&val.to_le_bytes()[..]);
    }
    pub fn write_u16(&mut self, val: u16) {
        self.write_bytes(&val.to_le_bytes()[..]);
    }
    pub fn write_u32(&mut self, val: u32) {
        self.write_bytes(&val.to_le_bytes()[..]);
    }
    pub fn write_bytes(&mut self, data: &[u8]) {
        let copy_len = data.len();
        let wr_off = self.write_offset;
        assert!(copy_len <= self.avail());

        self.buf[wr_off..(wr_off + copy_len)].copy_from_slice(data);
        self.write_offset += copy_len;
    }
    pub fn fill(&mut self, val: u8) {
        for b in self.buf[self.write_offset..].iter_mut() {
            *b = val
        }
        self.write_offset = self.len();
    }
}

/// Represents an abstract requested write operation.
///
/// Exposes an API with various "read" methods, which fulfill the request.
pub struct WriteOp<'a> {
    buf: &'a [u8],
    offset: usize,
    read_offset: usize,
}
impl<'a> WriteOp<'a> {
    /// Initializes a new write operation from a buffer.
    ///
    /// # Arguments
    ///
    /// - `op_offset`: An auxiliary offset stored within the operation,
    /// identifying the region within the emulated resource where `buf` should
    /// be stored.
    /// - `buf`: A buffer which represents the "source" of the write operation.
    pub fn from_buf(op_offset: usize, buf: &'a [u8]) -> Self {
        Self { buf, offset: op_offset, read_offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn avail(&self) -> usize {
        self.len().checked_sub(self.read_offset).unwrap()
    }
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_val<const COUNT: usize>(&mut self) -> [u8; COUNT] {
        let mut buf = [0u8; COUNT];
        self.read_bytes(&mut buf);
        buf
    }
    pub fn read_u8(&mut self) -> u8 {
        u8::from_le_bytes(self.read_val())
    }
    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.read_val())
    }
    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.read_val())
    }
    /// Consume the remainder of the operation (at most 4 bytes) as a
    /// little-endian value, zero-extended to 32 bits.
    pub fn read_le(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        let avail = self.avail();
        assert!(avail <= buf.len());
        self.read_bytes(&mut buf[..avail]);
        u32::from_le_bytes(buf)
    }
    pub fn read_bytes(&mut self, data: &mut [u8]) {
        let copy_len = data.len();
        if copy_len == 0 {
            return;
        }
        let rd_off = self.read_offset;
        assert!(copy_len <= self.avail());
        data.copy_from_slice(&self.buf[rd_off..(rd_off + copy_len)]);
        self.read_offset += copy_len;
    }
}

pub enum RWOp<'a, 'b> {
    Read(&'a mut ReadOp<'b>),
    Write(&'a mut WriteOp<'b>),
}
impl RWOp<'_, '_> {
    pub fn offset(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.offset,
            RWOp::Write(wo) => wo.offset,
        }
    }
    pub fn len(&self) -> usize {
        match self {
            RWOp::Read(ro) => ro.len(),
            RWOp::Write(wo) => wo.len(),
        }
    }
}

pub use crate::lifecycle::Lifecycle;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readop_base_size() {
        let mut buf = [0u8; 4];
        let mut ro8 = ReadOp::from_buf(0, &mut buf[0..1]);
        ro8.write_u8(1);
        drop(ro8);
        assert_eq!(buf, [1, 0, 0, 0]);

        let mut ro16 = ReadOp::from_buf(0, &mut buf[0..2]);
        ro16.write_u16(0x2000);
        drop(ro16);
        assert_eq!(buf, [0, 0x20, 0, 0]);

        let mut ro32 = ReadOp::from_buf(0, &mut buf);
        ro32.write_u32(0x4000_0000);
        drop(ro32);
        assert_eq!(buf, [0, 0, 0, 0x40]);
    }

    #[test]
    fn readop_partial_fill() {
        let mut buf = [0u8; 4];
        let mut ro = ReadOp::from_buf(0, &mut buf);
        ro.write_u8(0x12);
        ro.fill(0xff);
        assert_eq!(ro.avail(), 0);
        drop(ro);
        assert_eq!(buf, [0x12, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn writeop_base_size() {
        let buf = [0x10, 0x20, 0x30, 0x40];
        let mut wo8 = WriteOp::from_buf(0, &buf[0..1]);
        assert_eq!(wo8.read_u8(), 0x10);

        let mut wo16 = WriteOp::from_buf(0, &buf[0..2]);
        assert_eq!(wo16.read_u16(), 0x2010);

        let mut wo32 = WriteOp::from_buf(0, &buf);
        assert_eq!(wo32.read_u32(), 0x40302010);
    }

    #[test]
    fn writeop_read_le() {
        let buf = [0x03, 0x80, 0x0a];
        let mut wo = WriteOp::from_buf(0, &buf[..2]);
        assert_eq!(wo.read_le(), 0x8003);
        let mut wo = WriteOp::from_buf(0, &buf);
        assert_eq!(wo.read_le(), 0x000a_8003);
    }

    #[test]
    #[should_panic]
    fn readop_oversize() {
        let mut buf = [0u8];
        let mut ro8 = ReadOp::from_buf(0, &mut buf);
        ro8.write_u16(0x1000);
    }

    #[test]
    #[should_panic]
    fn writeop_oversize() {
        let buf = [0u8];
        let mut wo8 = WriteOp::from_buf(0, &buf);
        let _ = wo8.read_u16();
    }
}
