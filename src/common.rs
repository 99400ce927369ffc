//! Shared types for the restore engine: error taxonomy, reserved
//! identifiers, flag sets and the decoded on-flash record structures
//! handed to us by the log scanner.

use onlyerror::Error;

/// Sentinel parent id meaning "this inode has no parent".
pub const LFFS_ID_NONE: u32 = 0xffff_ffff;

/// Sentinel sector id for objects not yet backed by real flash storage
/// (placeholder inodes synthesized for forward references).
pub const LFFS_SECTOR_ID_SCRATCH: u16 = 0xffff;

/// Default inode pool capacity.
pub const LFFS_INODE_POOL: usize = 1024;

/// Default block pool capacity.
pub const LFFS_BLOCK_POOL: usize = 4096;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LffsError {
    /// inode or block pool exhausted
    NoMem,
    /// on-flash state is inconsistent
    Corrupt,
    /// object violates the restore contract
    Invalid,
}

pub type LffsResult<T> = Result<T, LffsError>;

bitflags::bitflags! {
    /// Inode flags as they appear in a disk record. `ROOT` only carries
    /// meaning on disk; in RAM the root inode is tracked by the mount
    /// context instead.
    pub struct LffsInodeFlags: u8 {
        const DELETED   = 0x01;
        const DIRECTORY = 0x02;
        const ROOT      = 0x04;
    }
}

bitflags::bitflags! {
    pub struct LffsBlockFlags: u8 {
        const DELETED = 0x01;
    }
}

/// A decoded inode record. Produced by the disk-record decoder; restore
/// never sees raw flash bytes.
#[derive(Debug, Clone, Copy)]
pub struct LffsDiskInode {
    pub id: u32,
    pub seq: u32,
    /// Owning directory, or [`LFFS_ID_NONE`].
    pub parent_id: u32,
    pub flags: LffsInodeFlags,
}

impl LffsDiskInode {
    pub fn is_root(&self) -> bool {
        self.flags.contains(LffsInodeFlags::ROOT)
    }
}

/// A decoded data-block record. The payload itself stays on flash; the
/// record carries its length and, via [`LffsDiskObject`], its location.
#[derive(Debug, Clone, Copy)]
pub struct LffsDiskBlock {
    pub id: u32,
    pub seq: u32,
    /// Inode this block belongs to.
    pub inode_id: u32,
    pub data_len: u32,
    pub flags: LffsBlockFlags,
}

#[derive(Debug, Clone, Copy)]
pub enum LffsDiskRecord {
    Inode(LffsDiskInode),
    Block(LffsDiskBlock),
}

/// One valid record found during the sector-ordered log scan, with its
/// physical provenance.
#[derive(Debug, Clone, Copy)]
pub struct LffsDiskObject {
    pub sector_id: u16,
    pub offset: u32,
    pub record: LffsDiskRecord,
}
