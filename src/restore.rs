//! Mount-time log replay. An external scanner walks every sector and
//! record of the flash log in ascending physical order and feeds each
//! decoded record to [`LffsMount::restore_object`]; once the whole log
//! has been read, [`LffsMount::restore_sweep`] discards obsolete
//! entries and finalizes computed attributes. The result is an object
//! graph indistinguishable from an uninterrupted filesystem.

use log::{debug, error, info};

use crate::common::{
    LffsDiskBlock, LffsDiskInode, LffsDiskObject, LffsDiskRecord, LffsError, LffsResult,
    LFFS_BLOCK_POOL, LFFS_ID_NONE, LFFS_INODE_POOL, LFFS_SECTOR_ID_SCRATCH,
};
use crate::store::{LffsBlock, LffsInode, LffsInodeState, LffsObject, ObjectStore};
use alloc::vec::Vec;

/// Decides whether an incoming inode record supersedes the in-RAM copy
/// sharing its id. A dummy placeholder is always superseded; otherwise
/// the higher sequence number wins, and an equal sequence number is a
/// corruption signal, never tie-broken.
fn inode_gets_replaced(old: &LffsInode, rec: &LffsDiskInode) -> LffsResult<bool> {
    debug_assert_eq!(old.id, rec.id);

    if old.is_dummy() {
        return Ok(true);
    }
    if old.seq < rec.seq {
        return Ok(true);
    }
    if old.seq == rec.seq {
        error!("inode {:#x}: two records claim seq {}", rec.id, rec.seq);
        return Err(LffsError::Corrupt);
    }
    Ok(false)
}

/// Same rule for blocks; there is no dummy-block concept.
fn block_gets_replaced(old: &LffsBlock, rec: &LffsDiskBlock) -> LffsResult<bool> {
    debug_assert_eq!(old.id, rec.id);

    if old.seq < rec.seq {
        return Ok(true);
    }
    if old.seq == rec.seq {
        error!("block {:#x}: two records claim seq {}", rec.id, rec.seq);
        return Err(LffsError::Corrupt);
    }
    Ok(false)
}

/// One mount session. All restore state lives here so independent
/// sessions can coexist; the store is exclusively owned by the session
/// until the sweep completes, after which the rest of the filesystem
/// takes over.
#[derive(Debug)]
pub struct LffsMount {
    store: ObjectStore,
    root: Option<u32>,
    next_id: u32,
    swept: bool,
}

impl LffsMount {
    pub fn new() -> Self {
        Self::with_limits(LFFS_INODE_POOL, LFFS_BLOCK_POOL)
    }

    /// A session with explicit pool capacities.
    pub fn with_limits(max_inodes: usize, max_blocks: usize) -> Self {
        Self {
            store: ObjectStore::with_limits(max_inodes, max_blocks),
            root: None,
            next_id: 0,
            swept: false,
        }
    }

    /// Root directory inode id, once a root-marked record has been
    /// replayed.
    pub fn root(&self) -> Option<u32> {
        self.root
    }

    /// One past the maximum object id observed during the scan.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn object_count(&self) -> usize {
        self.store.len()
    }

    pub fn inode(&self, id: u32) -> Option<&LffsInode> {
        self.store.find_inode(id).ok().flatten()
    }

    pub fn block(&self, id: u32) -> Option<&LffsBlock> {
        self.store.find_block(id).ok().flatten()
    }

    /// Replay one decoded record. Invoked once for every valid record
    /// found during the sector-ordered log scan; decode failures are
    /// filtered out before reaching restore.
    pub fn restore_object(&mut self, obj: &LffsDiskObject) -> LffsResult<()> {
        if self.swept {
            error!("record submitted after the sweep pass");
            return Err(LffsError::Invalid);
        }
        match &obj.record {
            LffsDiskRecord::Inode(rec) => self.restore_inode(rec, obj.sector_id, obj.offset),
            LffsDiskRecord::Block(rec) => self.restore_block(rec, obj.sector_id, obj.offset),
        }
    }

    fn restore_inode(&mut self, rec: &LffsDiskInode, sector_id: u16, offset: u32) -> LffsResult<()> {
        let replaces = match self.store.find_inode(rec.id)? {
            Some(existing) => Some(inode_gets_replaced(existing, rec)?),
            None => None,
        };

        let mut new_inode = false;
        match replaces {
            Some(true) => {
                debug!("inode {:#x}: seq {} replaces in-RAM copy", rec.id, rec.seq);
                self.store.remove_child(rec.id)?;
                self.store
                    .inode_mut(rec.id)?
                    .update_from_disk(rec, sector_id, offset);
            }
            Some(false) => {
                debug!("inode {:#x}: discarding stale seq {}", rec.id, rec.seq);
                self.bump_next_id(rec.id);
                return Ok(());
            }
            None => {
                let mut inode = LffsInode::from_disk(rec, sector_id, offset);
                inode.refcnt = 1;
                self.store.insert_inode(inode)?;
                new_inode = true;
            }
        }

        if let Err(err) = self.link_inode(rec) {
            // A net-new allocation must not survive a failed call.
            if new_inode {
                self.store.remove(rec.id);
            }
            return Err(err);
        }

        self.bump_next_id(rec.id);
        Ok(())
    }

    fn link_inode(&mut self, rec: &LffsDiskInode) -> LffsResult<()> {
        if rec.parent_id != LFFS_ID_NONE {
            if self.store.find_inode(rec.parent_id)?.is_none() {
                self.restore_dummy_inode(rec.parent_id, true)?;
            }
            self.store.add_child(rec.parent_id, rec.id)?;
        }
        if rec.is_root() {
            self.root = Some(rec.id);
        }
        Ok(())
    }

    fn restore_block(&mut self, rec: &LffsDiskBlock, sector_id: u16, offset: u32) -> LffsResult<()> {
        let replaces = match self.store.find_block(rec.id)? {
            Some(existing) => Some(block_gets_replaced(existing, rec)?),
            None => None,
        };

        match replaces {
            Some(true) => {
                debug!("block {:#x}: seq {} replaces in-RAM copy", rec.id, rec.seq);
                self.store
                    .block_mut(rec.id)?
                    .update_from_disk(rec, sector_id, offset);
            }
            Some(false) => {
                debug!("block {:#x}: discarding stale seq {}", rec.id, rec.seq);
                self.bump_next_id(rec.id);
                return Ok(());
            }
            None => {
                let block = LffsBlock::from_disk(rec, sector_id, offset);
                self.store.insert_block(block)?;
                if let Err(err) = self.link_block(rec) {
                    self.store.remove(rec.id);
                    return Err(err);
                }
            }
        }

        self.bump_next_id(rec.id);
        Ok(())
    }

    fn link_block(&mut self, rec: &LffsDiskBlock) -> LffsResult<()> {
        if self.store.find_inode(rec.inode_id)?.is_none() {
            self.restore_dummy_inode(rec.inode_id, false)?;
        }
        self.store.attach_block(rec.inode_id, rec.id)
    }

    /// Synthesize a placeholder inode for a forward reference, linked
    /// into the graph exactly as a real object would be so downstream
    /// logic never special-cases a missing parent or owner.
    fn restore_dummy_inode(&mut self, id: u32, directory: bool) -> LffsResult<()> {
        debug!("inode {:#x}: synthesizing dummy (directory: {})", id, directory);
        self.store.insert_inode(LffsInode {
            id,
            seq: 0,
            sector_id: LFFS_SECTOR_ID_SCRATCH,
            offset: 0,
            refcnt: 1,
            parent: None,
            children: Vec::new(),
            blocks: Vec::new(),
            state: LffsInodeState::Dummy { directory },
        })
    }

    fn bump_next_id(&mut self, id: u32) {
        if id >= self.next_id {
            self.next_id = id + 1;
        }
    }

    /// Post-scan cleanup: delete trash, then finalize computed
    /// attributes against the post-replay steady state. Runs once;
    /// further calls are no-ops.
    pub fn restore_sweep(&mut self) -> LffsResult<()> {
        if self.swept {
            return Ok(());
        }
        self.swept = true;

        let mut removed = 0usize;

        // Trash inodes: deletion-flagged ones and placeholders no real
        // record ever arrived for.
        for id in self.store.ids() {
            let trash = match self.store.get(id) {
                Some(LffsObject::Inode(inode)) => inode.is_deleted() || inode.is_dummy(),
                _ => false,
            };
            if trash {
                self.store.remove_child(id)?;
                let children = match self.store.get(id) {
                    Some(LffsObject::Inode(inode)) => inode.children.clone(),
                    _ => Vec::new(),
                };
                for child in children {
                    self.store.clear_parent(child);
                }
                self.store.remove(id);
                removed += 1;
            }
        }

        // Trash blocks: deletion-flagged ones and any whose owner is
        // gone, including blocks orphaned by the pass above.
        for id in self.store.ids() {
            let trash = match self.store.get(id) {
                Some(LffsObject::Block(block)) => {
                    block.is_deleted()
                        || match block.owner {
                            Some(owner) => self.store.find_inode(owner)?.is_none(),
                            None => true,
                        }
                }
                _ => false,
            };
            if trash {
                self.store.detach_block(id)?;
                self.store.remove(id);
                removed += 1;
            }
        }

        // Recompute file lengths from the surviving block chains.
        for id in self.store.ids() {
            let total = match self.store.get(id) {
                Some(LffsObject::Inode(inode))
                    if !inode.is_dummy() && !inode.is_directory() && !inode.is_deleted() =>
                {
                    let mut total: u32 = 0;
                    for &block_id in &inode.blocks {
                        match self.store.find_block(block_id)? {
                            Some(block) => total += block.data_len,
                            None => {
                                error!("inode {:#x}: chain names missing block {:#x}", id, block_id);
                                return Err(LffsError::Corrupt);
                            }
                        }
                    }
                    Some(total)
                }
                _ => None,
            };
            if let Some(total) = total {
                if let LffsInodeState::Real { data_len, .. } = &mut self.store.inode_mut(id)?.state
                {
                    *data_len = total;
                }
            }
        }

        info!(
            "restore sweep removed {} objects, {} remain",
            removed,
            self.store.len()
        );
        Ok(())
    }
}

impl Default for LffsMount {
    fn default() -> Self {
        Self::new()
    }
}
