//! Storage façade: the public API consumed by an external FUSE-style
//! bridge (not part of this crate). Resolves paths and delegates to the
//! directory and inode layers.

use std::path::Path;

use vsfs_types::{is_dir_mode, is_reg_mode, InodeNo, BS};

use crate::{
    block::{bytes_to_blocks, BlockDevice},
    dir,
    error::{Result, StorageError},
    inode,
};

/// POSIX-`stat`-shaped snapshot of an inode. Timestamps are always zero and
/// `uid`/`gid` are always zero; both are host services this crate does not
/// provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub inum: u32,
    pub mode: u32,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub block_size: u32,
    pub size: u32,
    pub blocks: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// A mounted volume. Owns the backing image and exposes POSIX-like
/// operations over it.
pub struct Storage {
    bd: BlockDevice,
}

impl Storage {
    /// Mounts the image at `path`, formatting it (reserving metadata blocks
    /// and bootstrapping the root directory) if it is freshly created.
    pub fn mount(path: &Path) -> Result<Self> {
        let (mut bd, fresh) = BlockDevice::mount(path)?;
        if fresh {
            bd.reserve_meta_blocks();
            bd.set_inode_bit(0);
        }
        inode::bootstrap_root(&mut bd);
        Ok(Self { bd })
    }

    /// Flushes the image and releases the backing file.
    pub fn unmount(mut self) -> Result<()> {
        self.bd.sync()
    }

    #[must_use]
    pub fn image_path(&self) -> &Path {
        self.bd.path()
    }

    fn resolve(&self, path: &str) -> Result<InodeNo> {
        crate::path::path_get_inode(&self.bd, path).ok_or(StorageError::NotFound)
    }

    /// `true` iff `path` resolves to an existing inode.
    #[must_use]
    pub fn access(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        let inum = self.resolve(path)?;
        let node = inode::read_inode(&self.bd, inum);
        Ok(Stat {
            inum: inum.value(),
            mode: node.mode,
            links: node.links,
            uid: 0,
            gid: 0,
            block_size: BS as u32,
            size: node.size,
            blocks: bytes_to_blocks(node.size as usize) as u32,
            atime: 0,
            mtime: 0,
            ctime: 0,
        })
    }

    pub fn read(&self, path: &str, buf: &mut [u8], off: usize) -> Result<usize> {
        let inum = self.resolve(path)?;
        inode::read(&self.bd, inum, buf, off)
    }

    pub fn write(&mut self, path: &str, buf: &[u8], off: usize) -> Result<usize> {
        let inum = self.resolve(path)?;
        inode::write(&mut self.bd, inum, buf, off)
    }

    /// Grows or shrinks `path` to exactly `size` bytes; a no-op if already
    /// that size.
    pub fn truncate(&mut self, path: &str, size: usize) -> Result<()> {
        let inum = self.resolve(path)?;
        let cur = inode::read_inode(&self.bd, inum).size as usize;
        match size.cmp(&cur) {
            std::cmp::Ordering::Greater => inode::grow_inode(&mut self.bd, inum, size),
            std::cmp::Ordering::Less => inode::shrink_inode(&mut self.bd, inum, size).map(|_| ()),
            std::cmp::Ordering::Equal => Ok(()),
        }
    }

    /// Creates a new inode with `mode` and binds it to `path`'s leaf name
    /// under `path`'s parent directory. The parent must already exist and be
    /// a directory; a pre-existing leaf with the same name is not rejected
    /// (both entries stay live, per the directory layer's duplicate-name
    /// behavior).
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<()> {
        let (parent, leaf) = crate::path::split_parent(path).ok_or(StorageError::InvalidArgument)?;
        let parent_inum = self.resolve(&parent)?;
        let inum = inode::alloc_inode(&mut self.bd, mode)?;
        dir::directory_put(&mut self.bd, parent_inum, leaf.as_bytes(), inum)?;
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent, leaf) = crate::path::split_parent(path).ok_or(StorageError::InvalidArgument)?;
        let parent_inum = self.resolve(&parent)?;
        dir::directory_delete(&mut self.bd, parent_inum, leaf.as_bytes())
    }

    /// Removes `path`, which must be a directory with no live entries
    /// (tombstones are fine).
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let inum = self.resolve(path)?;
        if dir::directory_read(&self.bd, inum, 0).is_some() {
            return Err(StorageError::InvalidArgument);
        }
        self.unlink(path)
    }

    /// Moves `from` to `to`. If `from` is a regular file and `to` already
    /// resolves to a directory, the move is into that directory under the
    /// original leaf name; otherwise `to` is split into its own parent and
    /// leaf. The target binding is created before the source is removed, so
    /// a crash between the two leaves the file reachable from both names
    /// rather than from neither.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let from_inum = self.resolve(from)?;
        let (from_parent, from_leaf) = crate::path::split_parent(from).ok_or(StorageError::InvalidArgument)?;
        let from_parent_inum = self.resolve(&from_parent)?;

        let from_mode = inode::read_inode(&self.bd, from_inum).mode;
        let into_existing_dir = is_reg_mode(from_mode)
            .then(|| crate::path::path_get_inode(&self.bd, to))
            .flatten()
            .filter(|&to_inum| is_dir_mode(inode::read_inode(&self.bd, to_inum).mode));

        let (to_dir_inum, to_name) = match into_existing_dir {
            Some(to_dir_inum) => (to_dir_inum, from_leaf.to_string()),
            None => {
                let (to_parent, to_leaf) = crate::path::split_parent(to).ok_or(StorageError::InvalidArgument)?;
                (self.resolve(&to_parent)?, to_leaf.to_string())
            }
        };

        dir::directory_put(&mut self.bd, to_dir_inum, to_name.as_bytes(), from_inum)?;
        dir::directory_delete(&mut self.bd, from_parent_inum, from_leaf.as_bytes())?;
        Ok(())
    }

    /// Names of `path`'s live entries, in slot order. `path` must resolve to
    /// a directory (the root, in this spec's scope; see [`crate::dir`]).
    pub fn list(&self, path: &str) -> Result<Vec<Vec<u8>>> {
        let inum = self.resolve(path)?;
        Ok(dir::directory_list(&self.bd, inum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsfs_types::{MAX_FILE_SIZE, NDIRECT, S_IFDIR, S_IFREG};

    fn fresh_storage() -> (Storage, tempfile::TempPath) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path();
        let storage = Storage::mount(&path).unwrap();
        (storage, path)
    }

    #[test]
    fn scenario_create_write_stat_list() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/a.txt", S_IFREG | 0o644).unwrap();
        let n = st.write("/a.txt", b"hello", 0).unwrap();
        assert_eq!(n, 5);

        assert_eq!(st.stat("/a.txt").unwrap().size, 5);
        assert_eq!(st.list("/").unwrap(), vec![b"a.txt".to_vec()]);
    }

    #[test]
    fn scenario_rename_into_directory() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/d", S_IFDIR | 0o755).unwrap();
        st.mknod("/d/x", S_IFREG | 0o644).unwrap();
        st.rename("/d/x", "/y").unwrap();

        assert!(st.list("/d").unwrap().is_empty());
        assert!(st.list("/").unwrap().contains(&b"y".to_vec()));
        assert!(!st.access("/d/x"));
    }

    #[test]
    fn scenario_write_spanning_two_direct_blocks_round_trips() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/big", S_IFREG | 0o644).unwrap();
        let data = vec![0x5au8; 5000];
        st.write("/big", &data, 0).unwrap();

        let mut out = vec![0u8; 5000];
        let n = st.read("/big", &mut out, 0).unwrap();
        assert_eq!(n, 5000);
        assert_eq!(out, data);
    }

    #[test]
    fn scenario_indirect_block_allocated_then_freed_on_truncate() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/huge", S_IFREG | 0o644).unwrap();
        let size = (NDIRECT + 1) * BS as usize;
        st.write("/huge", &vec![1u8; size], 0).unwrap();
        assert_ne!(st.stat("/huge").unwrap().blocks, 0);

        st.truncate("/huge", BS as usize).unwrap();
        assert_eq!(st.stat("/huge").unwrap().size, BS as u32);
    }

    #[test]
    fn scenario_mknod_unlink_remknod_yields_single_entry() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/f", S_IFREG | 0o644).unwrap();
        st.unlink("/f").unwrap();
        st.mknod("/f", S_IFREG | 0o644).unwrap();

        assert_eq!(st.list("/").unwrap(), vec![b"f".to_vec()]);
    }

    #[test]
    fn scenario_write_beyond_max_file_size_truncates_to_boundary() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/a", S_IFREG | 0o644).unwrap();
        let data = vec![7u8; MAX_FILE_SIZE + 1];
        let result = st.write("/a", &data, 0);

        match result {
            Ok(n) => assert!(n <= MAX_FILE_SIZE),
            Err(_) => {}
        }
        assert!(st.stat("/a").unwrap().size as usize <= MAX_FILE_SIZE);
    }

    #[test]
    fn rmdir_rejects_non_empty_directory() {
        let (mut st, _path) = fresh_storage();
        st.mknod("/d", S_IFDIR | 0o755).unwrap();
        st.mknod("/d/x", S_IFREG | 0o644).unwrap();

        assert!(st.rmdir("/d").is_err());
        st.unlink("/d/x").unwrap();
        assert!(st.rmdir("/d").is_ok());
    }
}
