use crate::btree::{collect_blocks, lookup, BIter};
use crate::error::Result;
use crate::page::{KeyEntry, BLOCK_SIZE};
use crate::page_manager::PageManager;
use memmap2::MmapMut;
use std::cell::Cell;
use std::collections::{HashSet, VecDeque};

/// Byte facade over the tree plus the committed-root bookkeeping.
/// Readers pass the root pointer they snapshotted, so a lookup against
/// an old root keeps working after later commits.
pub(crate) struct Storage {
    manager: PageManager,
    root: Cell<u64>,
}

impl Storage {
    pub(crate) fn new(mmap: MmapMut) -> Result<Storage> {
        let manager = PageManager::new(mmap);
        let root = manager.read_root()?;
        let storage = Storage {
            manager,
            root: Cell::new(root),
        };
        storage.rebuild_allocator()?;
        Ok(storage)
    }

    // Allocator state is not persisted. Walk the committed tree:
    // last_free becomes the highest referenced block index plus one,
    // and every unreferenced block below it goes on the free list.
    fn rebuild_allocator(&self) -> Result<()> {
        let mut pointers = Vec::new();
        collect_blocks(&self.manager, self.root.get(), &mut pointers)?;
        let reachable: HashSet<u64> = pointers
            .iter()
            .map(|pointer| pointer / BLOCK_SIZE as u64)
            .collect();
        let last_free = reachable.iter().max().map_or(1, |max| max + 1);
        let mut free_block = VecDeque::new();
        for block in 1..last_free {
            if !reachable.contains(&block) {
                free_block.push_back(block);
            }
        }
        self.manager.restore_state(last_free, free_block);
        Ok(())
    }

    pub(crate) fn manager(&self) -> &PageManager {
        &self.manager
    }

    pub(crate) fn committed_root(&self) -> u64 {
        self.root.get()
    }

    pub(crate) fn get(&self, root: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key = KeyEntry::from_slice(key)?;
        Ok(lookup(&self.manager, root, &key)?.map(|kv| kv.val_bytes().to_vec()))
    }

    /// Inclusive range, ascending. Each value is sized by its decoded
    /// length.
    pub(crate) fn get_range(
        &self,
        root: u64,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = KeyEntry::from_slice(start)?;
        let end = KeyEntry::from_slice(end)?;
        let mut out = Vec::new();
        let mut iter = BIter::seek_ge(&self.manager, root, &start)?;
        while let Some(entry) = iter.entry() {
            if entry.key_entry() > end {
                break;
            }
            out.push((entry.key_bytes().to_vec(), entry.val_bytes().to_vec()));
            iter.next()?;
        }
        Ok(out)
    }

    pub(crate) fn len(&self, root: u64) -> Result<usize> {
        // The empty key is the all-zero array, the smallest possible.
        let mut iter = BIter::seek_ge(&self.manager, root, &KeyEntry::from_slice(&[])?)?;
        let mut entries = 0;
        while iter.entry().is_some() {
            entries += 1;
            iter.next()?;
        }
        Ok(entries)
    }

    /// Publish a new root. All data blocks reach the file before the
    /// metapage names the root; a crash between the two phases leaves
    /// the previous committed tree intact.
    pub(crate) fn commit_root(&self, root: u64) -> Result<()> {
        self.manager.fsync()?;
        self.manager.write_root(root);
        self.manager.fsync()?;
        self.root.set(root);
        Ok(())
    }
}
