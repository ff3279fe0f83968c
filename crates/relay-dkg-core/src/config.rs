//! Protocol configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the result finalization protocol, shared by every member of
/// a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Number of members in the group (N)
    pub group_size: usize,

    /// Minimum number of supporting signatures a submission must carry
    pub honest_threshold: usize,

    /// Assumed upper bound on malicious members (M)
    pub dishonest_threshold: usize,

    /// Blocks between consecutive members' submission eligibility
    pub block_step: u64,

    /// Blocks allotted to conflict resolution
    pub conflict_duration: u64,

    /// Blocks during which result signatures are collected
    pub signature_collection_blocks: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            group_size: 10,
            honest_threshold: 6,
            dishonest_threshold: 4,
            block_step: 2,
            conflict_duration: 10,
            signature_collection_blocks: 3,
        }
    }
}

impl ProtocolConfig {
    /// Create a configuration for a group, deriving thresholds from its size
    pub fn new(group_size: usize, dishonest_threshold: usize) -> Result<Self> {
        let config = Self {
            group_size,
            honest_threshold: group_size.saturating_sub(dishonest_threshold),
            dishonest_threshold,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.group_size == 0 {
            return Err(Error::InvalidConfig("Group size must be at least 1".into()));
        }
        if self.honest_threshold > self.group_size {
            return Err(Error::InvalidConfig(format!(
                "Honest threshold {} cannot exceed group size {}",
                self.honest_threshold, self.group_size
            )));
        }
        if self.dishonest_threshold >= self.group_size {
            return Err(Error::InvalidConfig(format!(
                "Dishonest threshold {} must be below group size {}",
                self.dishonest_threshold, self.group_size
            )));
        }
        if self.block_step == 0 {
            return Err(Error::InvalidConfig("Block step must be at least 1".into()));
        }
        Ok(())
    }
}
