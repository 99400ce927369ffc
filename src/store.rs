//! In-RAM object store: one arena of restored objects addressed by
//! object id. Parent/child/owner relations are stored as ids into the
//! arena, never as owning references, so relinking an object touches
//! only the two ends of the edge.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use log::error;

use crate::common::{
    LffsBlockFlags, LffsDiskBlock, LffsDiskInode, LffsError, LffsInodeFlags, LffsResult,
    LFFS_BLOCK_POOL, LFFS_INODE_POOL,
};

/// Whether an inode is backed by a real disk record or is a placeholder
/// synthesized for a forward reference. A placeholder is never
/// authoritative file-tree content; it must be overwritten by a real
/// record or removed by the sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LffsInodeState {
    Dummy { directory: bool },
    Real { flags: LffsInodeFlags, data_len: u32 },
}

#[derive(Debug)]
pub struct LffsInode {
    pub id: u32,
    pub seq: u32,
    pub sector_id: u16,
    pub offset: u32,
    pub refcnt: u32,
    pub parent: Option<u32>,
    /// Child inodes, directories only. Insertion-ordered.
    pub children: Vec<u32>,
    /// Content chain in log order.
    pub blocks: Vec<u32>,
    pub state: LffsInodeState,
}

impl LffsInode {
    pub fn from_disk(rec: &LffsDiskInode, sector_id: u16, offset: u32) -> Self {
        Self {
            id: rec.id,
            seq: rec.seq,
            sector_id,
            offset,
            refcnt: 0,
            parent: None,
            children: Vec::new(),
            blocks: Vec::new(),
            state: LffsInodeState::Real {
                flags: rec.flags,
                data_len: 0,
            },
        }
    }

    /// Overwrite the mutable fields from a newer record, keeping the
    /// identity and every structural link intact. A dummy being
    /// replaced becomes real with its links preserved.
    pub fn update_from_disk(&mut self, rec: &LffsDiskInode, sector_id: u16, offset: u32) {
        self.seq = rec.seq;
        self.sector_id = sector_id;
        self.offset = offset;
        self.state = LffsInodeState::Real {
            flags: rec.flags,
            data_len: 0,
        };
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.state, LffsInodeState::Dummy { .. })
    }

    pub fn is_directory(&self) -> bool {
        match self.state {
            LffsInodeState::Dummy { directory } => directory,
            LffsInodeState::Real { flags, .. } => flags.contains(LffsInodeFlags::DIRECTORY),
        }
    }

    pub fn is_deleted(&self) -> bool {
        match self.state {
            LffsInodeState::Dummy { .. } => false,
            LffsInodeState::Real { flags, .. } => flags.contains(LffsInodeFlags::DELETED),
        }
    }

    pub fn data_len(&self) -> u32 {
        match self.state {
            LffsInodeState::Dummy { .. } => 0,
            LffsInodeState::Real { data_len, .. } => data_len,
        }
    }
}

#[derive(Debug)]
pub struct LffsBlock {
    pub id: u32,
    pub seq: u32,
    pub sector_id: u16,
    pub offset: u32,
    pub data_len: u32,
    pub flags: LffsBlockFlags,
    /// Owning inode. Absent only transiently while the block is being
    /// restored.
    pub owner: Option<u32>,
}

impl LffsBlock {
    pub fn from_disk(rec: &LffsDiskBlock, sector_id: u16, offset: u32) -> Self {
        Self {
            id: rec.id,
            seq: rec.seq,
            sector_id,
            offset,
            data_len: rec.data_len,
            flags: rec.flags,
            owner: None,
        }
    }

    /// Overwrite from a newer record; owner and chain position stay.
    pub fn update_from_disk(&mut self, rec: &LffsDiskBlock, sector_id: u16, offset: u32) {
        self.seq = rec.seq;
        self.sector_id = sector_id;
        self.offset = offset;
        self.data_len = rec.data_len;
        self.flags = rec.flags;
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(LffsBlockFlags::DELETED)
    }
}

#[derive(Debug)]
pub enum LffsObject {
    Inode(LffsInode),
    Block(LffsBlock),
}

impl LffsObject {
    pub fn id(&self) -> u32 {
        match self {
            LffsObject::Inode(inode) => inode.id,
            LffsObject::Block(block) => block.id,
        }
    }
}

/// The arena itself. Pool capacities model the fixed allocation pools
/// of the target device; exhaustion surfaces as `NoMem`.
#[derive(Debug)]
pub struct ObjectStore {
    objects: BTreeMap<u32, LffsObject>,
    inode_count: usize,
    block_count: usize,
    max_inodes: usize,
    max_blocks: usize,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::with_limits(LFFS_INODE_POOL, LFFS_BLOCK_POOL)
    }

    pub fn with_limits(max_inodes: usize, max_blocks: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            inode_count: 0,
            block_count: 0,
            max_inodes,
            max_blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Exact-match inode lookup. An id resolving to a block is a
    /// corruption signal: ids are unique across both object types.
    pub fn find_inode(&self, id: u32) -> LffsResult<Option<&LffsInode>> {
        match self.objects.get(&id) {
            None => Ok(None),
            Some(LffsObject::Inode(inode)) => Ok(Some(inode)),
            Some(LffsObject::Block(_)) => {
                error!("object {:#x} is a block, expected inode", id);
                Err(LffsError::Corrupt)
            }
        }
    }

    pub fn find_block(&self, id: u32) -> LffsResult<Option<&LffsBlock>> {
        match self.objects.get(&id) {
            None => Ok(None),
            Some(LffsObject::Block(block)) => Ok(Some(block)),
            Some(LffsObject::Inode(_)) => {
                error!("object {:#x} is an inode, expected block", id);
                Err(LffsError::Corrupt)
            }
        }
    }

    /// Mutable inode access for an id the caller has already resolved.
    pub fn inode_mut(&mut self, id: u32) -> LffsResult<&mut LffsInode> {
        match self.objects.get_mut(&id) {
            Some(LffsObject::Inode(inode)) => Ok(inode),
            _ => {
                error!("inode {:#x} vanished from the store", id);
                Err(LffsError::Corrupt)
            }
        }
    }

    pub fn block_mut(&mut self, id: u32) -> LffsResult<&mut LffsBlock> {
        match self.objects.get_mut(&id) {
            Some(LffsObject::Block(block)) => Ok(block),
            _ => {
                error!("block {:#x} vanished from the store", id);
                Err(LffsError::Corrupt)
            }
        }
    }

    pub fn insert_inode(&mut self, inode: LffsInode) -> LffsResult<()> {
        if self.inode_count >= self.max_inodes {
            return Err(LffsError::NoMem);
        }
        let id = inode.id;
        if self.objects.insert(id, LffsObject::Inode(inode)).is_some() {
            error!("duplicate insert for object {:#x}", id);
            return Err(LffsError::Corrupt);
        }
        self.inode_count += 1;
        Ok(())
    }

    pub fn insert_block(&mut self, block: LffsBlock) -> LffsResult<()> {
        if self.block_count >= self.max_blocks {
            return Err(LffsError::NoMem);
        }
        let id = block.id;
        if self.objects.insert(id, LffsObject::Block(block)).is_some() {
            error!("duplicate insert for object {:#x}", id);
            return Err(LffsError::Corrupt);
        }
        self.block_count += 1;
        Ok(())
    }

    /// Remove an object, returning its slot to the pool. Links held by
    /// other objects are not touched; callers detach first.
    pub fn remove(&mut self, id: u32) -> Option<LffsObject> {
        let removed = self.objects.remove(&id);
        match removed {
            Some(LffsObject::Inode(_)) => self.inode_count -= 1,
            Some(LffsObject::Block(_)) => self.block_count -= 1,
            None => {}
        }
        removed
    }

    /// Link `child_id` under `parent_id`.
    pub fn add_child(&mut self, parent_id: u32, child_id: u32) -> LffsResult<()> {
        self.inode_mut(child_id)?.parent = Some(parent_id);
        self.inode_mut(parent_id)?.children.push(child_id);
        Ok(())
    }

    /// Unlink `child_id` from its parent, if it has one. Tolerates the
    /// parent already being gone, which happens while sweeping.
    pub fn remove_child(&mut self, child_id: u32) -> LffsResult<()> {
        let parent_id = match self.inode_mut(child_id)?.parent.take() {
            Some(id) => id,
            None => return Ok(()),
        };
        if let Some(LffsObject::Inode(parent)) = self.objects.get_mut(&parent_id) {
            parent.children.retain(|&id| id != child_id);
        }
        Ok(())
    }

    /// Drop a child's back-reference without touching the parent.
    /// Used while sweeping, when the parent may already be gone.
    pub fn clear_parent(&mut self, child_id: u32) {
        if let Some(LffsObject::Inode(inode)) = self.objects.get_mut(&child_id) {
            inode.parent = None;
        }
    }

    /// Append `block_id` to the end of `owner_id`'s content chain.
    pub fn attach_block(&mut self, owner_id: u32, block_id: u32) -> LffsResult<()> {
        self.block_mut(block_id)?.owner = Some(owner_id);
        self.inode_mut(owner_id)?.blocks.push(block_id);
        Ok(())
    }

    pub fn detach_block(&mut self, block_id: u32) -> LffsResult<()> {
        let owner_id = match self.block_mut(block_id)?.owner.take() {
            Some(id) => id,
            None => return Ok(()),
        };
        if let Some(LffsObject::Inode(owner)) = self.objects.get_mut(&owner_id) {
            owner.blocks.retain(|&id| id != block_id);
        }
        Ok(())
    }

    /// Snapshot of every object id, for passes that mutate while
    /// walking.
    pub fn ids(&self) -> Vec<u32> {
        self.objects.keys().copied().collect()
    }

    pub fn get(&self, id: u32) -> Option<&LffsObject> {
        self.objects.get(&id)
    }
}

impl Default for ObjectStore {
    fn default() -> Self {
        Self::new()
    }
}
