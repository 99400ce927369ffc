//! lffs — mount-time restore engine for a log-structured flash
//! filesystem. Persistent state is an append-only log of inode and
//! block records spread across erasable sectors; this crate replays
//! that log into the in-RAM object graph the rest of the filesystem
//! operates on, tolerating stale duplicates and forward references.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod common;
pub mod restore;
pub mod store;


use alloc::sync::Arc;

use log::info;
use spin::{Mutex, Once};

pub use common::{
    LffsBlockFlags, LffsDiskBlock, LffsDiskInode, LffsDiskObject, LffsDiskRecord, LffsError,
    LffsInodeFlags, LffsResult, LFFS_ID_NONE, LFFS_SECTOR_ID_SCRATCH,
};
pub use restore::LffsMount;
pub use store::{LffsBlock, LffsInode, LffsInodeState, LffsObject, ObjectStore};

static LFFS: Once<Arc<Mutex<LffsMount>>> = Once::new();

/// Publish a finished mount process-wide for the rest of the
/// filesystem. Later calls are ignored.
pub fn init_lffs(mount: LffsMount) {
    LFFS.call_once(|| Arc::new(Mutex::new(mount)));
}

/// Handle to the published mount.
///
/// Panics if called before [`init_lffs`].
pub fn clone_lffs() -> Arc<Mutex<LffsMount>> {
    LFFS.get().unwrap().clone()
}

/// Drive a full mount attempt from the scanner's decoded output,
/// supplied in ascending physical log order. Replays every record,
/// then runs the sweep once. The first failure aborts the attempt and
/// no partial mount state escapes.
pub fn lffs_mount<I>(scan: I) -> LffsResult<LffsMount>
where
    I: IntoIterator<Item = LffsDiskObject>,
{
    let mut mount = LffsMount::new();
    let mut records = 0usize;
    for obj in scan {
        mount.restore_object(&obj)?;
        records += 1;
    }
    mount.restore_sweep()?;
    info!(
        "mounted: {} records replayed, {} live objects",
        records,
        mount.object_count()
    );
    Ok(mount)
}
