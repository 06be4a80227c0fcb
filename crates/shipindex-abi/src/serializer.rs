//! Low-level byte reader and writer for the state-history wire format.
//!
//! Everything is little-endian. Lengths and variant indices are `varuint32`
//! (LEB128, at most 5 bytes).

use crate::error::CodecError;

/// Cursor over an input buffer. Every read is bounds-checked.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid("bool", format!("byte {other}"))),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, CodecError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn read_i8(&mut self) -> Result<i8, CodecError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i128(&mut self) -> Result<i128, CodecError> {
        Ok(i128::from_le_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    pub fn read_varuint32(&mut self) -> Result<u32, CodecError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(CodecError::invalid("varuint32", "encoding longer than 5 bytes"));
            }
        }
        u32::try_from(result).map_err(|_| CodecError::invalid("varuint32", "value exceeds 32 bits"))
    }

    pub fn read_varint32(&mut self) -> Result<i32, CodecError> {
        let raw = self.read_varuint32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// A `varuint32` length, checked against the bytes left so a corrupt
    /// prefix cannot trigger a huge allocation.
    pub fn read_length(&mut self) -> Result<usize, CodecError> {
        let len = self.read_varuint32()? as usize;
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        Ok(len)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_length()?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        Ok(String::from_utf8(self.read_blob()?)?)
    }
}

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u128(&mut self, v: u128) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i128(&mut self, v: i128) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_varuint32(&mut self, mut v: u32) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_varint32(&mut self, v: i32) {
        self.write_varuint32(((v << 1) ^ (v >> 31)) as u32);
    }

    pub fn write_length(&mut self, len: usize) -> Result<(), CodecError> {
        let len = u32::try_from(len)
            .map_err(|_| CodecError::invalid("varuint32", "length exceeds 32 bits"))?;
        self.write_varuint32(len);
        Ok(())
    }

    pub fn write_blob(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_length(bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_blob(s.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varuint32_encoding() {
        let mut w = Writer::new();
        w.write_varuint32(0);
        w.write_varuint32(127);
        w.write_varuint32(128);
        w.write_varuint32(u32::MAX);
        assert_eq!(
            w.as_bytes(),
            &[0x00, 0x7f, 0x80, 0x01, 0xff, 0xff, 0xff, 0xff, 0x0f]
        );

        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varuint32().unwrap(), 0);
        assert_eq!(r.read_varuint32().unwrap(), 127);
        assert_eq!(r.read_varuint32().unwrap(), 128);
        assert_eq!(r.read_varuint32().unwrap(), u32::MAX);
        assert!(r.is_empty());
    }

    #[test]
    fn varint32_zigzag() {
        let mut w = Writer::new();
        w.write_varint32(-1);
        w.write_varint32(1);
        w.write_varint32(i32::MIN);
        assert_eq!(&w.as_bytes()[..2], &[0x01, 0x02]);

        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_varint32().unwrap(), -1);
        assert_eq!(r.read_varint32().unwrap(), 1);
        assert_eq!(r.read_varint32().unwrap(), i32::MIN);
    }

    #[test]
    fn short_read_reports_eof() {
        let mut r = Reader::new(&[1, 2, 3]);
        let err = r.read_u64().unwrap_err();
        assert!(matches!(
            err,
            CodecError::UnexpectedEof {
                needed: 8,
                remaining: 3
            }
        ));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        // claims 100 bytes, carries 2
        let mut r = Reader::new(&[100, b'h', b'i']);
        assert!(r.read_string().unwrap_err().is_schema_mismatch());
    }

    #[test]
    fn invalid_bool_byte() {
        let mut r = Reader::new(&[2]);
        assert!(matches!(r.read_bool(), Err(CodecError::InvalidValue { .. })));
    }
}
