//! Inode table: allocation, direct/indirect block mapping, and the
//! size-extending/size-reducing `grow`/`shrink` operations.

use vsfs_types::{BlockNo, Inode, InodeNo, ROOT_DIR_MODE, BS, MAX_FILE_SIZE, NDIRECT, NINDIRECT, NINODES};

use crate::{
    block::{bytes_to_blocks, BlockDevice},
    error::{Result, StorageError},
};

/// `true` iff `inum`'s bit is set in the inode bitmap and its on-disk `inum`
/// self-reference agrees: the record is both allocated and sane.
#[must_use]
pub fn inode_valid(bd: &BlockDevice, inum: InodeNo) -> bool {
    let i = inum.as_index();
    i > 0 && i < NINODES && bd.inode_bit(i) && bd.inode_record(i).inum == inum.value()
}

/// Returns a snapshot of inode `inum`'s on-disk record, regardless of
/// whether it is currently allocated. Panics if `inum` is out of `[0, NINODES)`.
#[must_use]
pub fn read_inode(bd: &BlockDevice, inum: InodeNo) -> Inode {
    assert!(inum.as_index() < NINODES, "inode index out of range: {inum}");
    *bd.inode_record(inum.as_index())
}

fn write_inode(bd: &mut BlockDevice, inum: InodeNo, inode: &Inode) {
    *bd.inode_record_mut(inum.as_index()) = *inode;
}

/// Allocates the lowest free inode index `>= 2`, marks it used, and
/// initializes its record with `mode` and zeroed size/links/pointers.
pub fn alloc_inode(bd: &mut BlockDevice, mode: u32) -> Result<InodeNo> {
    let Some(i) = (2..NINODES).find(|&i| !bd.inode_bit(i)) else {
        log::warn!("alloc_inode: out of free inodes");
        return Err(StorageError::NoInodes);
    };
    bd.set_inode_bit(i);
    let inum = InodeNo::new(i as u32);
    write_inode(
        bd,
        inum,
        &Inode {
            inum: inum.value(),
            mode,
            refs: 0,
            links: 0,
            size: 0,
            direct: [0; NDIRECT],
            indirect: 0,
        },
    );
    log::debug!("alloc_inode: allocated inode {inum} mode={mode:o}");
    Ok(inum)
}

/// Frees inode `inum`: shrinks it to zero length (releasing every block it
/// owns) and clears its bitmap bit. Idempotent.
pub fn free_inode(bd: &mut BlockDevice, inum: InodeNo) -> Result<()> {
    let i = inum.as_index();
    if !bd.inode_bit(i) {
        return Ok(());
    }
    shrink_inode(bd, inum, 0)?;
    let mut inode = read_inode(bd, inum);
    inode.inum = 0;
    write_inode(bd, inum, &inode);
    bd.clear_inode_bit(i);
    log::debug!("free_inode: freed inode {inum}");
    Ok(())
}

/// Overwrites the `links` field of `inum`'s on-disk record. Used by the
/// directory layer, which owns link-count bookkeeping.
pub(crate) fn write_links(bd: &mut BlockDevice, inum: InodeNo, links: u32) {
    let mut inode = read_inode(bd, inum);
    inode.links = links;
    write_inode(bd, inum, &inode);
}

/// Force-creates the root directory at inode 1 if it is not already one.
/// Idempotent: a call against an already-bootstrapped root is a no-op.
pub fn bootstrap_root(bd: &mut BlockDevice) {
    let inum = InodeNo::ROOT;
    if inode_valid(bd, inum) && vsfs_types::is_dir_mode(read_inode(bd, inum).mode) {
        return;
    }
    bd.set_inode_bit(inum.as_index());
    write_inode(
        bd,
        inum,
        &Inode {
            inum: inum.value(),
            mode: ROOT_DIR_MODE,
            refs: 0,
            links: 0,
            size: 0,
            direct: [0; NDIRECT],
            indirect: 0,
        },
    );
    log::debug!("bootstrap_root: initialized root directory at inode {inum}");
}

/// Returns the disk block number holding file-block `k` of `inode`, or
/// `None` if that block has not been allocated (or `k` is out of range).
#[must_use]
pub fn block_at(bd: &BlockDevice, inode: &Inode, k: usize) -> Option<BlockNo> {
    if k < NDIRECT {
        let b = inode.direct[k];
        return (b != 0).then(|| BlockNo::new(b));
    }
    let k = k - NDIRECT;
    if k >= NINDIRECT || inode.indirect == 0 {
        return None;
    }
    let b = bd.indirect_entry(BlockNo::new(inode.indirect), k);
    (b != 0).then(|| BlockNo::new(b))
}

/// Extends `inum` to `new_size` bytes, allocating direct and (if needed) the
/// indirect block plus its entries on demand.
///
/// On a mid-grow allocation failure, the inode is left with exactly the
/// blocks successfully allocated and `size` rounded down to the block
/// boundary reached, a specified, observable partial state, not rolled
/// back.
pub fn grow_inode(bd: &mut BlockDevice, inum: InodeNo, new_size: usize) -> Result<()> {
    if !inode_valid(bd, inum) {
        return Err(StorageError::InvalidState(inum));
    }
    let mut inode = read_inode(bd, inum);
    assert!(new_size >= inode.size as usize, "grow_inode: size must not decrease");

    let mut cur = bytes_to_blocks(inode.size as usize);
    let tgt = bytes_to_blocks(new_size);

    while cur < tgt {
        if cur >= NDIRECT + NINDIRECT {
            inode.size = (cur * BS) as u32;
            write_inode(bd, inum, &inode);
            log::warn!("grow_inode: {inum} reached maximum file size");
            return Err(StorageError::NoSpace);
        }

        if cur >= NDIRECT && inode.indirect == 0 {
            match bd.alloc_block() {
                Ok(b) => inode.indirect = b.value(),
                Err(err) => {
                    inode.size = (cur * BS) as u32;
                    write_inode(bd, inum, &inode);
                    log::warn!("grow_inode: out of space allocating indirect block for {inum}");
                    return Err(err);
                }
            }
        }

        let b = match bd.alloc_block() {
            Ok(b) => b,
            Err(err) => {
                inode.size = (cur * BS) as u32;
                write_inode(bd, inum, &inode);
                log::warn!("grow_inode: out of space at block {cur} for {inum}");
                return Err(err);
            }
        };

        if cur < NDIRECT {
            inode.direct[cur] = b.value();
        } else {
            bd.set_indirect_entry(BlockNo::new(inode.indirect), cur - NDIRECT, b.value());
        }
        cur += 1;
    }

    inode.size = new_size as u32;
    write_inode(bd, inum, &inode);
    Ok(())
}

/// Reduces `inum` to `new_size` bytes, freeing every block beyond the new
/// boundary and, if the file no longer needs it, the indirect block itself.
pub fn shrink_inode(bd: &mut BlockDevice, inum: InodeNo, new_size: usize) -> Result<usize> {
    if !inode_valid(bd, inum) {
        return Err(StorageError::InvalidState(inum));
    }
    let mut inode = read_inode(bd, inum);
    assert!(new_size <= inode.size as usize, "shrink_inode: size must not increase");

    let cur = bytes_to_blocks(inode.size as usize);
    let tgt = bytes_to_blocks(new_size);

    for j in (tgt..cur).rev() {
        let b = if j < NDIRECT {
            inode.direct[j]
        } else if inode.indirect == 0 {
            0
        } else {
            bd.indirect_entry(BlockNo::new(inode.indirect), j - NDIRECT)
        };
        if b != 0 {
            bd.free_block(BlockNo::new(b));
            if j < NDIRECT {
                inode.direct[j] = 0;
            } else {
                bd.set_indirect_entry(BlockNo::new(inode.indirect), j - NDIRECT, 0);
            }
        }
    }

    if tgt <= NDIRECT && inode.indirect != 0 {
        bd.free_block(BlockNo::new(inode.indirect));
        inode.indirect = 0;
    }

    inode.size = new_size as u32;
    write_inode(bd, inum, &inode);
    Ok(new_size)
}

/// Copies bytes `[off, min(off + buf.len(), size))` of `inum` into `buf`.
/// Returns the number of bytes copied (`0` if `off >= size`).
pub fn read(bd: &BlockDevice, inum: InodeNo, buf: &mut [u8], off: usize) -> Result<usize> {
    if !inode_valid(bd, inum) {
        return Err(StorageError::InvalidState(inum));
    }
    let inode = read_inode(bd, inum);
    let size = inode.size as usize;
    if off >= size {
        return Ok(0);
    }
    let n = buf.len().min(size - off);

    let mut total = 0;
    while total < n {
        let file_off = off + total;
        let Some(bn) = block_at(bd, &inode, file_off / BS) else {
            break;
        };
        let block = bd.get_block(bn);
        let start = file_off % BS;
        let m = (BS - start).min(n - total);
        buf[total..][..m].copy_from_slice(&block[start..][..m]);
        total += m;
    }
    Ok(total)
}

/// Writes `buf` to `inum` at `off`, growing the file as needed.
///
/// A partially successful [`grow_inode`] still yields a partial write: the
/// return value is the number of bytes actually written, which may be less
/// than `buf.len()`. Only a write that manages to place zero bytes is an
/// error (non-zero writes never return `Ok(0)`).
pub fn write(bd: &mut BlockDevice, inum: InodeNo, buf: &[u8], off: usize) -> Result<usize> {
    if !inode_valid(bd, inum) {
        return Err(StorageError::InvalidState(inum));
    }
    if buf.is_empty() {
        return Err(StorageError::InvalidArgument);
    }
    let requested_end = off.checked_add(buf.len()).ok_or(StorageError::InvalidArgument)?;

    let cur_size = read_inode(bd, inum).size as usize;
    let target = requested_end.max(cur_size);
    let grow_result = grow_inode(bd, inum, target);

    let inode = read_inode(bd, inum);
    let size = inode.size as usize;
    let writable = if off >= size { 0 } else { (size - off).min(buf.len()) };

    if writable == 0 {
        return Err(grow_result.err().unwrap_or(StorageError::NoSpace));
    }

    let mut total = 0;
    while total < writable {
        let file_off = off + total;
        let Some(bn) = block_at(bd, &inode, file_off / BS) else {
            break;
        };
        let block = bd.get_block_mut(bn);
        let start = file_off % BS;
        let m = (BS - start).min(writable - total);
        block[start..][..m].copy_from_slice(&buf[total..][..m]);
        total += m;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsfs_types::S_IFREG;

    fn fresh_device() -> (BlockDevice, tempfile::TempPath) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let (mut bd, fresh) = BlockDevice::mount(&path).unwrap();
        assert!(fresh);
        bd.reserve_meta_blocks();
        bd.set_inode_bit(0);
        (bd, path)
    }

    #[test]
    fn alloc_and_free_inode_round_trips_bitmap() {
        let (mut bd, _path) = fresh_device();
        let popcount_before = (0..NINODES).filter(|&i| bd.inode_bit(i)).count();

        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        assert!(inode_valid(&bd, inum));

        free_inode(&mut bd, inum).unwrap();
        assert!(!inode_valid(&bd, inum));

        let popcount_after = (0..NINODES).filter(|&i| bd.inode_bit(i)).count();
        assert_eq!(popcount_before, popcount_after);
    }

    #[test]
    fn grow_from_zero_to_one_byte_allocates_one_block() {
        let (mut bd, _path) = fresh_device();
        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();

        grow_inode(&mut bd, inum, 1).unwrap();
        let inode = read_inode(&bd, inum);
        assert_eq!(inode.size, 1);
        assert_ne!(inode.direct[0], 0);
        assert_eq!(inode.indirect, 0);
    }

    #[test]
    fn grow_across_ndirect_boundary_allocates_indirect_block() {
        let (mut bd, _path) = fresh_device();
        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();

        grow_inode(&mut bd, inum, NDIRECT * BS + 1).unwrap();
        let inode = read_inode(&bd, inum);
        assert_ne!(inode.indirect, 0);
        assert_ne!(bd.indirect_entry(BlockNo::new(inode.indirect), 0), 0);
    }

    #[test]
    fn shrink_below_ndirect_frees_indirect_block() {
        let (mut bd, _path) = fresh_device();
        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        grow_inode(&mut bd, inum, NDIRECT * BS + 1).unwrap();

        shrink_inode(&mut bd, inum, BS).unwrap();
        let inode = read_inode(&bd, inum);
        assert_eq!(inode.indirect, 0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let (mut bd, _path) = fresh_device();
        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();

        let data = b"hello, world";
        let written = write(&mut bd, inum, data, 0).unwrap();
        assert_eq!(written, data.len());

        let mut buf = vec![0u8; data.len()];
        let read_bytes = read(&bd, inum, &mut buf, 0).unwrap();
        assert_eq!(read_bytes, data.len());
        assert_eq!(&buf, data);
    }

    #[test]
    fn write_exactly_at_max_file_size_succeeds_one_byte_beyond_fails() {
        let (mut bd, _path) = fresh_device();
        let inum = alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();

        grow_inode(&mut bd, inum, MAX_FILE_SIZE).unwrap();
        assert_eq!(read_inode(&bd, inum).size as usize, MAX_FILE_SIZE);

        let err = grow_inode(&mut bd, inum, MAX_FILE_SIZE + 1).unwrap_err();
        assert!(matches!(err, StorageError::NoSpace));
        assert_eq!(read_inode(&bd, inum).size as usize, MAX_FILE_SIZE);
    }
}
