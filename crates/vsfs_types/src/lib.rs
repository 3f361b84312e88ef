//! On-disk record layout for the vsfs block image.
//!
//! The data layout:
//!
//! | block no.            | # of blocks                    | content       | type            |
//! |-----------------------|--------------------------------|---------------|-----------------|
//! | 0                      | 1                               | bitmaps       | [`bitmap`]      |
//! | 1 .. `1 + inode_blocks`| `ceil(NINODES * 72 / BS)`       | inode table   | [`Inode`] array |
//! | remaining              | `NBLOCKS - 1 - inode_blocks`    | data          | `[u8; BS]`      |

use std::fmt;

use dataview::Pod;

/// Block size, in bytes.
pub const BS: usize = 4096;

/// Total number of blocks in a formatted image.
pub const NBLOCKS: usize = 256;

/// Maximum number of inodes the image can hold.
pub const NINODES: usize = 256;

/// Number of direct block pointers stored in an inode.
pub const NDIRECT: usize = 12;

/// Number of block pointers held by a single indirect block.
pub const NINDIRECT: usize = BS / size_of::<u32>();

/// Largest file size representable, in bytes.
pub const MAX_FILE_SIZE: usize = (NDIRECT + NINDIRECT) * BS;

/// Length of the name field in a directory entry, including the NUL terminator.
pub const DIR_NAME_LEN: usize = 48;

/// Size, in bytes, of a single directory entry record.
pub const DIRENT_SIZE: usize = 64;

/// Inode number reserved as "no inode".
pub const NULL_INODE: u32 = 0;

/// Inode number of the root directory, created once at mount time.
pub const ROOT_INODE: u32 = 1;

/// File-type bits within [`Inode::mode`], matching the POSIX `S_IFMT` family.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFREG: u32 = 0o100_000;

/// Default mode for a freshly-bootstrapped root directory.
pub const ROOT_DIR_MODE: u32 = S_IFDIR | 0o755;

#[must_use]
pub const fn is_dir_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFDIR
}

#[must_use]
pub const fn is_reg_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFREG
}

/// Block index within the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct BlockNo(u32);

impl BlockNo {
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inode index within the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct InodeNo(u32);

impl InodeNo {
    pub const ROOT: Self = Self::new(ROOT_INODE);
    pub const NULL: Self = Self::new(NULL_INODE);

    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_INODE
    }
}

impl fmt::Display for InodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-disk inode record. 72 bytes, native-endian, no padding.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct Inode {
    /// Redundant self-reference; 0 on a free inode.
    pub inum: u32,
    /// UNIX-style mode word, including file-type bits.
    pub mode: u32,
    /// In-memory reference-count hint. Reserved; never touched by this crate.
    pub refs: u32,
    /// Link count.
    pub links: u32,
    /// File size in bytes.
    pub size: u32,
    /// Direct data block pointers; 0 ⇔ unallocated.
    pub direct: [u32; NDIRECT],
    /// Single indirect block pointer; 0 ⇔ unallocated.
    pub indirect: u32,
}

const _: () = assert!(size_of::<Inode>() == 72);

impl Inode {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.inum == NULL_INODE
    }
}

/// Number of blocks occupied by the inode table.
///
/// The table is a flat array of [`Inode`] records starting at block 1; since
/// `BS` is not an exact multiple of `size_of::<Inode>()`, individual records
/// may straddle a block boundary, which is harmless because the region is
/// addressed as a contiguous byte range rather than per-block.
#[must_use]
pub fn inode_table_blocks() -> usize {
    (NINODES * size_of::<Inode>()).div_ceil(BS)
}

/// On-disk directory entry record. 64 bytes.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct DirEntry {
    name: [u8; DIR_NAME_LEN],
    inum: u32,
    _reserved: [u8; 12],
}

const _: () = assert!(size_of::<DirEntry>() == DIRENT_SIZE);

impl DirEntry {
    /// `true` for a tombstone (reusable, unused) slot.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.inum == NULL_INODE
    }

    #[must_use]
    pub fn inum(&self) -> InodeNo {
        InodeNo::new(self.inum)
    }

    pub fn set_inum(&mut self, inum: InodeNo) {
        self.inum = inum.value();
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let len = usize::min(name.len(), self.name.len() - 1);
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }

    pub fn clear(&mut self) {
        self.inum = NULL_INODE;
        self.name = [0; DIR_NAME_LEN];
    }
}

/// Number of bits (blocks, or inodes) tracked per bitmap block.
pub const BITS_PER_BLOCK: usize = BS * 8;

/// Bit-per-entry free/in-use map, addressed directly over raw block bytes.
/// LSB-first within each byte, per the on-disk layout.
pub mod bitmap {
    #[must_use]
    pub fn bit(bytes: &[u8], n: usize) -> bool {
        bytes[n / 8] & (1 << (n % 8)) != 0
    }

    pub fn set_bit(bytes: &mut [u8], n: usize) {
        bytes[n / 8] |= 1 << (n % 8);
    }

    pub fn clear_bit(bytes: &mut [u8], n: usize) {
        bytes[n / 8] &= !(1 << (n % 8));
    }
}
