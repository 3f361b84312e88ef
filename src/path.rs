//! Splits absolute slash-delimited paths into components and walks
//! directories from the root to resolve them to inodes.

use vsfs_types::InodeNo;

use crate::{block::BlockDevice, dir};

/// Non-empty, slash-delimited components of `path`. `path` must start with
/// `/`, as checked by callers before splitting.
fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Resolves an absolute path to its inode, walking from the root through
/// `directory_lookup` at each component. `None` if any component is missing
/// or the path is not absolute.
#[must_use]
pub fn path_get_inode(bd: &BlockDevice, path: &str) -> Option<InodeNo> {
    if !path.starts_with('/') {
        return None;
    }
    let mut cur = InodeNo::ROOT;
    for component in components(path) {
        cur = dir::directory_lookup(bd, cur, component.as_bytes())?;
    }
    Some(cur)
}

/// Splits `path` at its last component: `/a/b/c.txt` → (`/a/b`, `c.txt`);
/// `/x` → (`/`, `x`). Returns `None` if `path` is not absolute or is `/`
/// itself (it has no leaf to split off).
#[must_use]
pub fn split_parent(path: &str) -> Option<(String, &str)> {
    if !path.starts_with('/') {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    let slash = trimmed.rfind('/')?;
    let leaf = &trimmed[slash + 1..];
    if leaf.is_empty() {
        return None;
    }
    let parent = if slash == 0 { "/".to_string() } else { trimmed[..slash].to_string() };
    Some((parent, leaf))
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
        dir::directory_init(&mut bd);
        (bd, path)
    }

    #[test]
    fn root_resolves_to_inode_one() {
        let (bd, _path) = fresh_device();
        assert_eq!(path_get_inode(&bd, "/"), Some(InodeNo::ROOT));
    }

    #[test]
    fn nested_lookup_walks_each_component() {
        let (mut bd, _path) = fresh_device();
        let d = crate::inode::alloc_inode(&mut bd, vsfs_types::S_IFDIR | 0o755).unwrap();
        dir::directory_put(&mut bd, InodeNo::ROOT, b"d", d).unwrap();
        let f = crate::inode::alloc_inode(&mut bd, S_IFREG | 0o644).unwrap();
        dir::directory_put(&mut bd, d, b"x", f).unwrap();

        assert_eq!(path_get_inode(&bd, "/d/x"), Some(f));
        assert_eq!(path_get_inode(&bd, "/d/missing"), None);
    }

    #[test]
    fn split_parent_handles_root_level_and_nested_paths() {
        assert_eq!(split_parent("/x"), Some(("/".to_string(), "x")));
        assert_eq!(split_parent("/a/b/c.txt"), Some(("/a/b".to_string(), "c.txt")));
        assert_eq!(split_parent("/"), None);
        assert_eq!(split_parent("relative"), None);
    }
}
