use std::io::{Error, ErrorKind, Read, Write};

use ethers::types::H256;

use crate::ProtocolError;

/// Simple trait for types with a canonical encoding
pub trait Encode {
    /// Write the canonical encoding to the writer
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write;

    /// Serialize to a vec
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.write_to(&mut buf).expect("!alloc");
        buf
    }
}

/// Simple trait for types with a canonical encoding
pub trait Decode {
    /// Try to read from some source
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
        Self: Sized;
}

impl Encode for u8 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(&[*self])?;
        Ok(1)
    }
}

impl Decode for u8 {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let mut buf = [0; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl Encode for u32 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(&self.to_le_bytes())?;
        Ok(4)
    }
}

impl Decode for u32 {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let mut buf = [0; 4];
        reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl Encode for u64 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(&self.to_le_bytes())?;
        Ok(8)
    }
}

impl Decode for u64 {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let mut buf = [0; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl Encode for H256 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(self.as_bytes())?;
        Ok(32)
    }
}

impl Decode for H256 {
    fn read_from<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: Read,
    {
        let mut h = H256::zero();
        reader.read_exact(h.as_bytes_mut())?;
        Ok(h)
    }
}

/// Write a compact uint
pub fn write_var_uint<W: Write>(writer: &mut W, value: u64) -> std::io::Result<usize> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
            Ok(1)
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
            Ok(3)
        }
        0x10000..=0xffff_ffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
            Ok(5)
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
            Ok(9)
        }
    }
}

/// Read a compact uint
pub fn read_var_uint<R: Read>(reader: &mut R) -> Result<u64, ProtocolError> {
    let mut marker = [0; 1];
    reader.read_exact(&mut marker)?;
    match marker[0] {
        0xfd => {
            let mut buf = [0; 2];
            reader.read_exact(&mut buf)?;
            Ok(u16::from_le_bytes(buf) as u64)
        }
        0xfe => {
            let mut buf = [0; 4];
            reader.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf) as u64)
        }
        0xff => {
            let mut buf = [0; 8];
            reader.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }
        b => Ok(b as u64),
    }
}

/// Write a length-prefixed byte string
pub fn write_var_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<usize> {
    let written = write_var_uint(writer, bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(written + bytes.len())
}

/// Read a length-prefixed byte string
pub fn read_var_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = read_var_uint(reader)? as usize;
    let mut buf = vec![0; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write a string as varbytes of its UTF-8 encoding
pub fn write_str<W: Write>(writer: &mut W, s: &str) -> std::io::Result<usize> {
    write_var_bytes(writer, s.as_bytes())
}

/// Read a varbytes-encoded UTF-8 string
pub fn read_str<R: Read>(reader: &mut R) -> Result<String, ProtocolError> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "decoded string not utf-8").into())
}

/// Write a 20-byte address
pub fn write_address<W: Write>(writer: &mut W, address: &[u8; 20]) -> std::io::Result<usize> {
    writer.write_all(address)?;
    Ok(20)
}

/// Read a 20-byte address
pub fn read_address<R: Read>(reader: &mut R) -> Result<[u8; 20], ProtocolError> {
    let mut buf = [0; 20];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;

    fn var_uint_roundtrip(value: u64, expected_len: usize) {
        let mut buf = vec![];
        assert_eq!(write_var_uint(&mut buf, value).unwrap(), expected_len);
        assert_eq!(buf.len(), expected_len);
        assert_eq!(read_var_uint(&mut buf.as_slice()).unwrap(), value);
    }

    #[test]
    fn var_uint_boundaries() {
        var_uint_roundtrip(0, 1);
        var_uint_roundtrip(0xfc, 1);
        var_uint_roundtrip(0xfd, 3);
        var_uint_roundtrip(0xffff, 3);
        var_uint_roundtrip(0x10000, 5);
        var_uint_roundtrip(0xffff_ffff, 5);
        var_uint_roundtrip(0x1_0000_0000, 9);
        var_uint_roundtrip(u64::MAX, 9);
    }

    #[test]
    fn var_bytes_roundtrip() {
        let payload = vec![7u8; 300];
        let mut buf = vec![];
        write_var_bytes(&mut buf, &payload).unwrap();
        // 300 needs the 0xfd marker
        assert_eq!(buf[0], 0xfd);
        assert_eq!(read_var_bytes(&mut buf.as_slice()).unwrap(), payload);
    }

    #[test]
    fn str_rejects_bad_utf8() {
        let mut buf = vec![];
        write_var_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        assert!(read_str(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn truncated_input_errors() {
        let mut buf = vec![];
        write_var_bytes(&mut buf, &[1, 2, 3, 4]).unwrap();
        buf.truncate(3);
        assert!(read_var_bytes(&mut buf.as_slice()).is_err());
    }
}
