//! Block device: the raw byte array backing the image, plus the two
//! free-space bitmaps packed into block 0.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write as _},
    path::{Path, PathBuf},
};

use dataview::PodMethods as _;
use vsfs_types::{bitmap, inode_table_blocks, BlockNo, Inode, BS, NBLOCKS, NINODES};

use crate::error::{Result, StorageError};

/// Number of bytes the block bitmap occupies within block 0.
const BLOCK_BITMAP_LEN: usize = NBLOCKS / 8;
/// Number of bytes the inode bitmap occupies within block 0, right after the block bitmap.
const INODE_BITMAP_LEN: usize = NINODES / 8;

const _: () = assert!(BLOCK_BITMAP_LEN + INODE_BITMAP_LEN <= BS);

/// Converts a byte count to a block count, rounding up. `bytes_to_blocks(0) == 0`.
#[must_use]
pub fn bytes_to_blocks(n: usize) -> usize {
    n.div_ceil(BS)
}

/// The last block reserved for the inode table (block 0 plus the table itself).
#[must_use]
pub fn last_reserved_block() -> usize {
    inode_table_blocks()
}

/// Owns the image's raw byte array and the two bitmaps it carries in block 0.
pub struct BlockDevice {
    path: PathBuf,
    file: File,
    data: Vec<u8>,
}

impl BlockDevice {
    /// Acquires the backing image file, creating and zero-filling it if
    /// absent, and loads it fully into memory. Returns `true` alongside the
    /// device if the image was freshly created (all bitmaps zero) and
    /// therefore still needs formatting by the caller.
    pub fn mount(path: &Path) -> Result<(Self, bool)> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let image_len = (NBLOCKS * BS) as u64;

        let (data, fresh) = if len == image_len {
            let mut data = vec![0u8; NBLOCKS * BS];
            file.read_exact(&mut data)?;
            let fresh = data[..BLOCK_BITMAP_LEN + INODE_BITMAP_LEN]
                .iter()
                .all(|&b| b == 0);
            (data, fresh)
        } else {
            log::debug!("formatting new image at {}", path.display());
            let data = vec![0u8; NBLOCKS * BS];
            file.set_len(image_len)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&data)?;
            (data, true)
        };

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
                data,
            },
            fresh,
        ))
    }

    /// Flushes the in-memory image back to the backing file.
    pub fn sync(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.data)?;
        self.file.flush()?;
        Ok(())
    }

    #[must_use]
    pub fn get_block(&self, i: BlockNo) -> &[u8; BS] {
        let idx = i.as_index();
        assert!(idx < NBLOCKS, "block index out of range: {i}");
        self.data[idx * BS..][..BS].try_into().unwrap()
    }

    pub fn get_block_mut(&mut self, i: BlockNo) -> &mut [u8; BS] {
        let idx = i.as_index();
        assert!(idx < NBLOCKS, "block index out of range: {i}");
        (&mut self.data[idx * BS..][..BS]).try_into().unwrap()
    }

    fn block_bitmap(&self) -> &[u8] {
        &self.data[..BLOCK_BITMAP_LEN]
    }

    fn block_bitmap_mut(&mut self) -> &mut [u8] {
        &mut self.data[..BLOCK_BITMAP_LEN]
    }

    fn inode_bitmap_region_mut(&mut self) -> &mut [u8] {
        &mut self.data[BLOCK_BITMAP_LEN..][..INODE_BITMAP_LEN]
    }

    #[must_use]
    pub fn inode_bitmap_region(&self) -> &[u8] {
        &self.data[BLOCK_BITMAP_LEN..][..INODE_BITMAP_LEN]
    }

    #[must_use]
    pub fn inode_bit(&self, i: usize) -> bool {
        bitmap::bit(self.inode_bitmap_region(), i)
    }

    pub fn set_inode_bit(&mut self, i: usize) {
        bitmap::set_bit(self.inode_bitmap_region_mut(), i);
    }

    pub fn clear_inode_bit(&mut self, i: usize) {
        bitmap::clear_bit(self.inode_bitmap_region_mut(), i);
    }

    #[must_use]
    pub fn is_reserved_block(b: BlockNo) -> bool {
        b.as_index() <= last_reserved_block()
    }

    /// Reserves block 0 and the inode table blocks in the block bitmap.
    /// Idempotent: called once at format time.
    pub fn reserve_meta_blocks(&mut self) {
        let bb = self.block_bitmap_mut();
        for b in 0..=last_reserved_block() {
            bitmap::set_bit(bb, b);
        }
    }

    /// Scans the block bitmap for the lowest clear bit in `[1, NBLOCKS)`,
    /// sets it, zero-fills the block, and returns it.
    pub fn alloc_block(&mut self) -> Result<BlockNo> {
        let bb = self.block_bitmap();
        let Some(bit) = (1..NBLOCKS).find(|&i| !bitmap::bit(bb, i)) else {
            log::warn!("alloc_block: out of space");
            return Err(StorageError::NoSpace);
        };
        bitmap::set_bit(self.block_bitmap_mut(), bit);
        let bn = BlockNo::new(bit as u32);
        self.get_block_mut(bn).fill(0);
        Ok(bn)
    }

    /// Clears bit `b` in the block bitmap. No-op (logged) if already clear.
    pub fn free_block(&mut self, b: BlockNo) {
        assert!(
            !Self::is_reserved_block(b),
            "attempted to free reserved block {b}"
        );
        let idx = b.as_index();
        if !bitmap::bit(self.block_bitmap(), idx) {
            log::debug!("free_block: block {b} already free");
            return;
        }
        bitmap::clear_bit(self.block_bitmap_mut(), idx);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte range of the inode table, a flat array of [`Inode`] records
    /// starting at block 1.
    fn inode_table_region(&self) -> &[u8] {
        let start = BS;
        let len = inode_table_blocks() * BS;
        &self.data[start..][..len]
    }

    fn inode_table_region_mut(&mut self) -> &mut [u8] {
        let start = BS;
        let len = inode_table_blocks() * BS;
        &mut self.data[start..][..len]
    }

    /// Returns the typed view of inode `inum`'s on-disk record.
    ///
    /// Out-of-range indices panic; callers are expected to have already
    /// validated `inum` against `NINODES` (the inode layer's `get_inode`
    /// does this before calling down).
    #[must_use]
    pub fn inode_record(&self, inum: usize) -> &Inode {
        let off = inum * size_of::<Inode>();
        self.inode_table_region()[off..][..size_of::<Inode>()]
            .as_data_view()
            .get(0)
    }

    pub fn inode_record_mut(&mut self, inum: usize) -> &mut Inode {
        let off = inum * size_of::<Inode>();
        self.inode_table_region_mut()[off..][..size_of::<Inode>()]
            .as_data_view_mut()
            .get_mut(0)
    }

    /// Reads entry `i` of the indirect block at `ind_bn`.
    #[must_use]
    pub fn indirect_entry(&self, ind_bn: BlockNo, i: usize) -> u32 {
        let block = self.get_block(ind_bn);
        *block[i * size_of::<u32>()..][..size_of::<u32>()]
            .as_data_view()
            .get(0)
    }

    /// Writes entry `i` of the indirect block at `ind_bn`.
    pub fn set_indirect_entry(&mut self, ind_bn: BlockNo, i: usize, value: u32) {
        let block = self.get_block_mut(ind_bn);
        *block[i * size_of::<u32>()..][..size_of::<u32>()]
            .as_data_view_mut()
            .get_mut(0) = value;
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        if let Err(err) = self.sync() {
            log::warn!("failed to flush image on unmount: {err}");
        }
    }
}
