use crate::error::Result;
use crate::storage::Storage;
use crate::table::{Table, TableDef};
use crate::transactions::{ReadOnlyTransaction, TransactionTracker, WriteTransaction};

use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;

// Size of the mapped region backing a fresh database. Existing files
// are never shrunk below their current length.
const DEFAULT_REGION_SIZE: usize = 4 * 1024 * 1024 * 1024;

pub struct Database {
    storage: Storage,
    tracker: TransactionTracker,
}

impl Database {
    /// Opens the specified file as a bramble database.
    ///
    /// * if the file does not exist, or is an empty file, a new database will be initialized in it
    /// * if the file is a valid bramble database, it will be opened
    /// * otherwise this function will return an error
    ///
    /// # Safety
    /// The returned handle maps the file mutably and assumes exclusive
    /// access; no other process may touch the file while it is live.
    pub unsafe fn open(path: &Path) -> Result<Database> {
        Self::open_with_size(path, DEFAULT_REGION_SIZE)
    }

    /// Like `open`, with a caller-chosen region size.
    pub unsafe fn open_with_size(path: &Path, db_size: usize) -> Result<Database> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut db_size = db_size.max(file.metadata()?.len() as usize);
        // Ensure that db_size is a multiple of the system page size,
        // which is required by mmap.
        db_size -= db_size % page_size::get();
        file.set_len(db_size as u64)?;

        let mmap = MmapMut::map_mut(&file)?;
        let storage = Storage::new(mmap)?;
        Ok(Database {
            storage,
            tracker: TransactionTracker::new(),
        })
    }

    pub fn begin_write(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(&self.storage, &self.tracker)
    }

    pub fn read_transaction(&self) -> ReadOnlyTransaction<'_> {
        ReadOnlyTransaction::new(&self.storage, &self.tracker)
    }

    /// Point lookup on the committed tree.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read_transaction().get(key)
    }

    /// Upsert as its own committed transaction.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.begin_write();
        txn.set(key, value)?;
        txn.commit()
    }

    /// Delete as its own committed transaction; returns whether the
    /// key existed.
    pub fn del(&self, key: &[u8]) -> Result<bool> {
        let mut txn = self.begin_write();
        let existed = txn.remove(key)?;
        txn.commit()?;
        Ok(existed)
    }

    /// Inclusive range of values on the committed tree, in ascending
    /// key order.
    pub fn get_range(&self, start: &[u8], end: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .read_transaction()
            .get_range(start, end)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    pub fn open_table(&self, def: TableDef) -> Result<Table<'_>> {
        Table::new(self, def)
    }
}
