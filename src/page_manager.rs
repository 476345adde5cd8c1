use crate::error::{Error, Result};
use crate::page::{PageHeader, BLOCK_SIZE, HEADER_SIZE, META};
use memmap2::MmapMut;
use std::cell::{Cell, Ref, RefCell};
use std::collections::VecDeque;

/// Block 0 is the metapage: the only block that is ever rewritten in
/// place. Everything else is write-once until reclaimed.
pub(crate) const DB_METAPAGE: u64 = 0;

pub(crate) struct PageManager {
    mmap: RefCell<MmapMut>,
    // Next never-used block index. Blocks below it are live, on the
    // free list, or pending a transaction's outcome.
    last_free: Cell<u64>,
    // Reclaimed block indices, handed out FIFO before touching
    // never-used space.
    free_block: RefCell<VecDeque<u64>>,
}

impl PageManager {
    pub(crate) fn new(mmap: MmapMut) -> PageManager {
        PageManager {
            mmap: RefCell::new(mmap),
            last_free: Cell::new(1),
            free_block: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn num_blocks(&self) -> u64 {
        (self.mmap.borrow().len() / BLOCK_SIZE) as u64
    }

    /// Replace the allocator state wholesale; used once at open, after
    /// the committed tree has been walked.
    pub(crate) fn restore_state(&self, last_free: u64, free_block: VecDeque<u64>) {
        self.last_free.set(last_free);
        *self.free_block.borrow_mut() = free_block;
    }

    pub(crate) fn alloc(&self) -> Result<u64> {
        if let Some(block) = self.free_block.borrow_mut().pop_front() {
            return Ok(block * BLOCK_SIZE as u64);
        }
        let block = self.last_free.get();
        if block >= self.num_blocks() {
            return Err(Error::RegionFull);
        }
        self.last_free.set(block + 1);
        Ok(block * BLOCK_SIZE as u64)
    }

    pub(crate) fn free(&self, pointer: u64) {
        self.free_block
            .borrow_mut()
            .push_back(pointer / BLOCK_SIZE as u64);
    }

    /// Borrow the block at `pointer`. The borrow must be dropped
    /// before any write or allocation touches the map.
    pub(crate) fn page(&self, pointer: u64) -> Result<Ref<[u8]>> {
        if pointer == DB_METAPAGE
            || pointer % BLOCK_SIZE as u64 != 0
            || pointer / BLOCK_SIZE as u64 >= self.num_blocks()
        {
            return Err(Error::Corrupted("block pointer out of range"));
        }
        let start = pointer as usize;
        Ok(Ref::map(self.mmap.borrow(), |m| {
            &m[start..start + BLOCK_SIZE]
        }))
    }

    pub(crate) fn write_block(&self, pointer: u64, block: &[u8; BLOCK_SIZE]) {
        let start = pointer as usize;
        self.mmap.borrow_mut()[start..start + BLOCK_SIZE].copy_from_slice(block);
    }

    /// Current root pointer from the metapage; 0 means an empty tree.
    /// A fresh zero-filled file parses as a valid empty metapage.
    pub(crate) fn read_root(&self) -> Result<u64> {
        let mmap = self.mmap.borrow();
        let header = PageHeader::read_from(&mmap[..HEADER_SIZE]);
        if header.page_type != META {
            return Err(Error::Corrupted("metapage has wrong page type"));
        }
        Ok(header.next_page_pointer)
    }

    pub(crate) fn write_root(&self, root: u64) {
        let header = PageHeader {
            page_type: META,
            next_page_pointer: root,
        };
        header.write_to(&mut self.mmap.borrow_mut()[..HEADER_SIZE]);
    }

    pub(crate) fn fsync(&self) -> Result<()> {
        self.mmap.borrow().flush()?;
        Ok(())
    }
}
