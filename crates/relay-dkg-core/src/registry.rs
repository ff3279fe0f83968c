//! Registry of groups known to this node

use crate::types::BlockHeight;
use dashmap::DashMap;
use tracing::info;

/// Groups registered on chain, keyed by group public key, with the block
/// they were registered at.
///
/// Created once per node and shared by reference with the components that
/// need it.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: DashMap<Vec<u8>, BlockHeight>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group. Returns false if it was already registered, keeping
    /// the first registration block.
    pub fn register_group(&self, group_public_key: &[u8], registered_at: BlockHeight) -> bool {
        let mut inserted = false;
        self.groups
            .entry(group_public_key.to_vec())
            .or_insert_with(|| {
                inserted = true;
                registered_at
            });

        if inserted {
            info!(
                group = %hex::encode(group_public_key),
                registered_at,
                "Group registered"
            );
        }
        inserted
    }

    pub fn is_group_registered(&self, group_public_key: &[u8]) -> bool {
        self.groups.contains_key(group_public_key)
    }

    /// Block at which the group was registered
    pub fn registration_block(&self, group_public_key: &[u8]) -> Option<BlockHeight> {
        self.groups.get(group_public_key).map(|entry| *entry)
    }

    /// A group is stale once more than `active_blocks` blocks have passed
    /// since its registration. Unknown groups are stale.
    pub fn is_stale_group(
        &self,
        group_public_key: &[u8],
        current_block: BlockHeight,
        active_blocks: u64,
    ) -> bool {
        self.registration_block(group_public_key)
            .map_or(true, |registered_at| registered_at + active_blocks < current_block)
    }

    /// Drop stale groups, returning how many were removed
    pub fn remove_stale_groups(&self, current_block: BlockHeight, active_blocks: u64) -> usize {
        let before = self.groups.len();
        self.groups
            .retain(|_, registered_at| *registered_at + active_blocks >= current_block);
        before - self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
