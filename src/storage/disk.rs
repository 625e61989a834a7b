use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use log::debug;

use crate::{error::DbError, storage::buffer_pool::BufferPool, types::DbResult};

/// The backing file of one table: a sequence of page-size blocks, page
/// `n` living at byte offset `n * page_size`.
///
/// Reads and writes move exactly one page and do no caching; the buffer
/// pool above is the only cache. A read past the end of the file is an
/// I/O error, never a silently zeroed page.
pub struct TableFile {
    file: Mutex<File>,
}

impl TableFile {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Result<Self, DbError> {
        let file = OpenOptions::new()
            .write(true)
            .read(true)
            .create(true)
            .open(file_path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn get_file(&self) -> MutexGuard<'_, File> {
        self.file.lock().unwrap()
    }

    pub fn num_pages(&self) -> Result<usize, DbError> {
        let len = self.get_file().metadata()?.len();
        Ok(len as usize / BufferPool::get_page_size())
    }

    pub fn read_page(&self, page_index: u32) -> Result<Vec<u8>, DbError> {
        let page_size = BufferPool::get_page_size();
        let offset = page_index as u64 * page_size as u64;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; page_size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn write_page(&self, page_index: u32, bytes: &[u8]) -> DbResult {
        let page_size = BufferPool::get_page_size();
        if bytes.len() != page_size {
            return Err(DbError::Page(format!(
                "write of {} bytes at page {}, expect {}",
                bytes.len(),
                page_index,
                page_size
            )));
        }

        let offset = page_index as u64 * page_size as u64;

        let mut file = self.get_file();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    /// Extend the file by one zeroed page, returning the new page index.
    /// The file mutex makes concurrent extensions hand out distinct
    /// indexes.
    pub fn append_empty_page(&self) -> Result<u32, DbError> {
        let page_size = BufferPool::get_page_size();

        let mut file = self.get_file();
        let len = file.metadata()?.len();
        let page_index = (len / page_size as u64) as u32;

        file.seek(SeekFrom::Start(len))?;
        file.write_all(&vec![0u8; page_size])?;
        file.flush()?;

        debug!("extended table file with page {}", page_index);
        Ok(page_index)
    }
}
