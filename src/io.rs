use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    mem::size_of,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use bit_vec::BitVec;

use crate::{error::DbError, types::DbResult};

/// A page-granular wrapper around the database file. All accesses go
/// through the inner mutex, so concurrent readers of different pages
/// serialize here.
pub struct DbFile {
    file: Mutex<File>,
}

impl DbFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let f = Mutex::new(
            OpenOptions::new()
                .write(true)
                .read(true)
                .create(true)
                .open(file_path)
                .unwrap(),
        );

        Self { file: f }
    }

    pub fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    /// Read the page stored at the given offset. Fails if the file does
    /// not cover the full page, i.e. the page was never flushed.
    pub fn read_page_at(&self, offset: u64, page_size: usize) -> Result<Vec<u8>, DbError> {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))
            .or(Err(DbError::new("io error")))?;

        let mut buf: Vec<u8> = vec![0; page_size];
        file.read_exact(&mut buf)
            .or(Err(DbError::new("io error")))?;
        Ok(buf)
    }

    pub fn write_page_at(&self, offset: u64, data: &[u8]) -> DbResult {
        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))
            .or(Err(DbError::new("io error")))?;
        file.write_all(data).or(Err(DbError::new("io error")))?;
        Ok(())
    }

}

pub fn read_into<T: Decodeable, R: std::io::Read>(reader: &mut R) -> T {
    T::decode(reader)
}

pub fn read_exact<R: std::io::Read>(reader: &mut R, bytes_count: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; bytes_count];
    reader
        .read_exact(&mut buffer)
        .unwrap_or_else(|_| panic!("io error, expect {}", bytes_count));
    buffer
}

pub struct DbWriter {
    buf: Vec<u8>,
}

impl DbWriter {
    pub fn new() -> Self {
        let buf = Vec::new();
        Self { buf }
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

    pub fn to_padded_bytes(&self, size: usize) -> Vec<u8> {
        let mut buf = self.buf.clone();

        if buf.len() > size {
            panic!(
                "buffer size is larger than the given size: {} > {}",
                buf.len(),
                size
            );
        }

        buf.resize(size, 0);
        buf
    }
}

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable {
    fn decode<R: std::io::Read>(reader: &mut R) -> Self;
}

/// # Format
///
/// - 2 bytes: bytes size (range: 0 - 65535) (65535 * 8 = 524280 bits)
/// - n bytes: bit vector
impl Encodeable for BitVec {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        let payload = self.to_bytes();

        // write size
        let len = payload.len() as u16;
        buf.extend_from_slice(&len.to_le_bytes());

        // write payload
        buf.extend_from_slice(&payload);

        buf
    }
}

impl Decodeable for BitVec {
    fn decode<R: std::io::Read>(reader: &mut R) -> Self {
        // read size
        let size = u16::from_le_bytes(read_exact(reader, 2).try_into().unwrap());

        // read payload
        let buf = read_exact(reader, size as usize);

        BitVec::from_bytes(&buf)
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
                fn decode<R: std::io::Read>(reader: &mut R) -> Self {
                    let bytes = read_exact(reader, size_of::<Self>());
                    Self::from_le_bytes(bytes.try_into().unwrap())
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, isize, usize, f32, f64);
