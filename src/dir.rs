//! Directory layer: a directory inode's byte stream read as a dense array
//! of fixed-size [`DirEntry`] slots.

use dataview::PodMethods as _;
use vsfs_types::{DirEntry, InodeNo, DIRENT_SIZE};

use crate::{
    block::BlockDevice,
    error::{Result, StorageError},
    inode,
};

fn slot_count(bd: &BlockDevice, dir: InodeNo) -> usize {
    inode::read_inode(bd, dir).size as usize / DIRENT_SIZE
}

fn get_slot(bd: &BlockDevice, dir: InodeNo, idx: usize) -> Result<DirEntry> {
    let mut buf = [0u8; DIRENT_SIZE];
    let n = inode::read(bd, dir, &mut buf, idx * DIRENT_SIZE)?;
    assert_eq!(n, DIRENT_SIZE, "directory slot {idx} truncated");
    Ok(buf.as_data_view().read(0))
}

fn set_slot(bd: &mut BlockDevice, dir: InodeNo, idx: usize, entry: &DirEntry) -> Result<()> {
    let n = inode::write(bd, dir, entry.as_bytes(), idx * DIRENT_SIZE)?;
    assert_eq!(n, DIRENT_SIZE, "directory slot {idx} write truncated");
    Ok(())
}

/// Bootstraps inode 1 as the root directory if it is not one already.
pub fn directory_init(bd: &mut BlockDevice) {
    inode::bootstrap_root(bd);
}

/// Index of the first slot whose name matches `name` exactly, if any.
#[must_use]
pub fn lookup_slot(bd: &BlockDevice, dir: InodeNo, name: &[u8]) -> Option<usize> {
    (0..slot_count(bd, dir)).find(|&idx| {
        let entry = get_slot(bd, dir, idx).expect("slot count derived from inode size");
        !entry.is_tombstone() && entry.name() == name
    })
}

/// The inode bound to `name` in `dir`, if present.
#[must_use]
pub fn directory_lookup(bd: &BlockDevice, dir: InodeNo, name: &[u8]) -> Option<InodeNo> {
    let idx = lookup_slot(bd, dir, name)?;
    let entry = get_slot(bd, dir, idx).expect("slot count derived from inode size");
    Some(entry.inum())
}

/// Returns the `dnum`-th non-tombstone slot of `dir`, counting from 0.
///
/// `None` if fewer than `dnum + 1` non-tombstone slots exist; used by
/// [`crate::storage::Storage::rmdir`] with `dnum = 0` to test emptiness.
#[must_use]
pub fn directory_read(bd: &BlockDevice, dir: InodeNo, dnum: usize) -> Option<DirEntry> {
    let mut seen = 0;
    for idx in 0..slot_count(bd, dir) {
        let entry = get_slot(bd, dir, idx).expect("slot count derived from inode size");
        if entry.is_tombstone() {
            continue;
        }
        if seen == dnum {
            return Some(entry);
        }
        seen += 1;
    }
    None
}

/// Binds `name` to `inum` in `dir`: reuses the first tombstone slot, or
/// appends a new one. Increments the target's link count.
///
/// Does not check for duplicate names: an older binding to the same name
/// keeps winning lookups, but both entries remain live.
pub fn directory_put(bd: &mut BlockDevice, dir: InodeNo, name: &[u8], inum: InodeNo) -> Result<()> {
    if !inode::inode_valid(bd, dir) {
        return Err(StorageError::InvalidState(dir));
    }
    if !inode::inode_valid(bd, inum) {
        return Err(StorageError::InvalidState(inum));
    }

    let free_idx = (0..slot_count(bd, dir)).find(|&idx| {
        get_slot(bd, dir, idx)
            .expect("slot count derived from inode size")
            .is_tombstone()
    });
    let idx = free_idx.unwrap_or_else(|| slot_count(bd, dir));

    let mut entry: DirEntry = [0u8; DIRENT_SIZE].as_data_view().read(0);
    entry.set_name(name);
    entry.set_inum(inum);
    set_slot(bd, dir, idx, &entry)?;

    let links = inode::read_inode(bd, inum).links + 1;
    inode::write_links(bd, inum, links);
    Ok(())
}

/// Removes the binding for `name` in `dir`, decrementing and possibly
/// freeing the target inode. Fails if `name` is not bound.
pub fn directory_delete(bd: &mut BlockDevice, dir: InodeNo, name: &[u8]) -> Result<()> {
    let Some(idx) = lookup_slot(bd, dir, name) else {
        return Err(StorageError::NotFound);
    };
    let entry = get_slot(bd, dir, idx).expect("slot count derived from inode size");
    let target = entry.inum();

    let mut target_inode = inode::read_inode(bd, target);
    target_inode.links = target_inode.links.saturating_sub(1);
    let links = target_inode.links;
    inode::write_links(bd, target, links);
    if links == 0 {
        inode::free_inode(bd, target)?;
    }

    let tombstone: DirEntry = [0u8; DIRENT_SIZE].as_data_view().read(0);
    set_slot(bd, dir, idx, &tombstone)?;
    Ok(())
}

/// Names of all non-tombstone slots, in ascending slot order.
#[must_use]
pub fn directory_list(bd: &BlockDevice, dir: InodeNo) -> Vec<Vec<u8>> {
    (0..slot_count(bd, dir))
        .filter_map(|idx| {
            let entry = get_slot(bd, dir, idx).expect("slot count derived from inode size");
            (!entry.is_tombstone()).then(|| entry.name().to_vec())
        })
        .collect()
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
        directory_init(&mut bd);
        (bd, path)
    }

    #[test]
    fn put_then_lookup_finds_entry() {
        let (mut bd, _path) = fresh_device();
        let inum = inode::alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        directory_put(&mut bd, InodeNo::ROOT, b"a.txt", inum).unwrap();

        assert_eq!(directory_lookup(&bd, InodeNo::ROOT, b"a.txt"), Some(inum));
        assert_eq!(directory_list(&bd, InodeNo::ROOT), vec![b"a.txt".to_vec()]);
        assert_eq!(inode::read_inode(&bd, inum).links, 1);
    }

    #[test]
    fn delete_tombstones_slot_and_reuses_it() {
        let (mut bd, _path) = fresh_device();
        let a = inode::alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        directory_put(&mut bd, InodeNo::ROOT, b"a", a).unwrap();
        directory_delete(&mut bd, InodeNo::ROOT, b"a").unwrap();

        assert_eq!(directory_lookup(&bd, InodeNo::ROOT, b"a"), None);
        assert!(!inode::inode_valid(&bd, a));

        let b = inode::alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        let size_before = inode::read_inode(&bd, InodeNo::ROOT).size;
        directory_put(&mut bd, InodeNo::ROOT, b"b", b).unwrap();
        let size_after = inode::read_inode(&bd, InodeNo::ROOT).size;
        assert_eq!(size_before, size_after, "tombstone slot should be reused, not appended");
    }

    #[test]
    fn directory_read_zero_detects_emptiness() {
        let (mut bd, _path) = fresh_device();
        assert!(directory_read(&bd, InodeNo::ROOT, 0).is_none());

        let a = inode::alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        directory_put(&mut bd, InodeNo::ROOT, b"a", a).unwrap();
        assert!(directory_read(&bd, InodeNo::ROOT, 0).is_some());
    }
}
