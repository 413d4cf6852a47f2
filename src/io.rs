use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::{error::DbError, types::DbResult};

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> DbResult<Self>;
}

pub fn read_into<T: Decodeable, R: Read>(reader: &mut R) -> DbResult<T> {
    T::decode_from(reader)
}

pub fn read_exact<R: Read>(reader: &mut R, bytes_count: usize) -> DbResult<Vec<u8>> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .map_err(|_| DbError::io(format!("short read, expected {} bytes", bytes_count)))?;
    Ok(buffer)
}

/// An append-oriented byte sink used to assemble records and page
/// payloads before they hit the file.
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        self.buf.extend_from_slice(obj.encode().as_slice());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// # Format
///
/// - 1 byte (0 for false, 1 for true)
impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> DbResult<Self> {
        Ok(u8::decode_from(reader)? == 1)
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> DbResult<Self> {
                    let bytes = read_exact(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.as_slice().try_into().map_err(
                        |_| DbError::io("decode buffer size mismatch"),
                    )?))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

/// A thin positioned-I/O wrapper over a database file.
pub struct DbFile {
    file: File,
}

impl DbFile {
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn len(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> DbResult {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(dest)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, src: &[u8]) -> DbResult {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(src)?;
        Ok(())
    }

    pub fn append(&mut self, src: &[u8]) -> DbResult<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(src)?;
        Ok(offset)
    }

    pub fn set_len(&mut self, len: u64) -> DbResult {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn sync(&mut self) -> DbResult {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let v: u32 = 0xdeadbeef;
        let bytes = v.encode();
        assert_eq!(bytes, vec![0xef, 0xbe, 0xad, 0xde]);

        let mut reader = std::io::Cursor::new(bytes);
        let back: u32 = read_into(&mut reader).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_byte_writer() {
        let mut w = ByteWriter::new();
        w.write(&1u8);
        w.write(&2u16);
        w.write_bytes(&[3, 4]);
        assert_eq!(w.size(), 5);
        assert_eq!(w.into_bytes(), vec![1, 2, 0, 3, 4]);
    }

    #[test]
    fn test_short_read_is_io_error() {
        let mut reader = std::io::Cursor::new(vec![1u8, 2]);
        let got: DbResult<u64> = read_into(&mut reader);
        assert_eq!(got.unwrap_err().kind(), crate::error::ErrorKind::Io);
    }
}
