use std::{
    convert::TryInto,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
};

use crate::{error::DbError, types::DbResult};

/// A thin wrapper around a read/write file handle, shared by the log file
/// and the table files. All multi-byte values go through the little-endian
/// codec below.
pub struct DbFile {
    file: File,
}

impl DbFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, DbError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;

        Ok(Self { file })
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) -> DbResult {
        self.file.write_all(&obj.encode())?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> DbResult {
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn get_size(&self) -> Result<u64, DbError> {
        let metadata = self.file.metadata()?;
        Ok(metadata.len())
    }

    pub fn get_current_position(&mut self) -> Result<u64, DbError> {
        let offset = self.file.seek(SeekFrom::Current(0))?;
        Ok(offset)
    }

    pub fn set_len(&self, len: u64) -> DbResult {
        self.file.set_len(len)?;
        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, DbError> {
        Ok(self.file.seek(pos)?)
    }

    /// Flush OS buffers and fsync. This is what makes appended log records
    /// durable.
    pub fn force(&mut self) -> DbResult {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Read for DbFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode_from(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|e| panic!("io error, expect {} bytes: {}", bytes_count, e));
    buffer
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

/// Decoding panics on a short or malformed read. The log reader is the only
/// consumer, and a log that cannot be parsed is fatal there.
pub trait Decodeable {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self;
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
                fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64);
