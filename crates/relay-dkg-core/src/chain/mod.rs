//! Chain collaborator
//!
//! The finalization protocol reads block heights, submits results and votes,
//! and watches submission/vote events through these traits only. The chain is
//! treated as a linearizable service: every call returns once its effect is
//! visible to all members.

use crate::result::{DkgResult, DkgResultHash, DkgResultsVotes};
use crate::subscription::EventSubscription;
use crate::types::{
    BlockHeight, MemberIndex, RequestId, ResultSubmittedEvent, ResultVoteEvent, Signatures,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::oneshot;

pub use ::async_trait::async_trait;

/// Reads, counts and waits for chain blocks
#[async_trait]
pub trait BlockCounter: Send + Sync {
    /// Current block height
    fn current_block(&self) -> Result<BlockHeight>;

    /// Fires once `offset` more blocks have been produced
    fn block_waiter(&self, offset: u64) -> Result<oneshot::Receiver<BlockHeight>>;

    /// Fires once the chain reaches `height`, immediately if already there
    fn block_height_waiter(&self, height: BlockHeight) -> Result<oneshot::Receiver<BlockHeight>>;

    /// Wait until the chain reaches `height`
    async fn wait_for_block_height(&self, height: BlockHeight) -> Result<BlockHeight> {
        self.block_height_waiter(height)?
            .await
            .map_err(|_| Error::Chain(format!("block waiter for height {} dropped", height)))
    }
}

/// Result submission, voting and event surface of the chain
#[async_trait]
pub trait Chain: Send + Sync {
    /// Block counter of this chain
    fn block_counter(&self) -> Arc<dyn BlockCounter>;

    /// Submit a result with its supporting signatures. Resolves with the
    /// submission event once the chain recorded it.
    async fn submit_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result: &DkgResult,
        signatures: &Signatures,
    ) -> Result<ResultSubmittedEvent>;

    /// Whether any result has been submitted for the request
    async fn is_result_submitted(&self, request_id: RequestId) -> Result<bool>;

    /// Watch all result submissions
    fn on_result_submitted(&self) -> Result<EventSubscription<ResultSubmittedEvent>>;

    /// Watch all result votes
    fn on_result_vote(&self) -> Result<EventSubscription<ResultVoteEvent>>;

    /// Hash a result the way the chain does
    fn calculate_result_hash(&self, result: &DkgResult) -> Result<DkgResultHash>;

    /// Vote for an already submitted result
    async fn vote_on_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result_hash: DkgResultHash,
    ) -> Result<ResultVoteEvent>;

    /// Snapshot of the vote tally for the request
    async fn results_votes(&self, request_id: RequestId) -> Result<DkgResultsVotes>;
}

/// Local ticking block counter
pub mod block_counter;

/// In-memory chain for tests and simulations
pub mod local;

#[cfg(test)]
pub(crate) mod faulty;

pub use block_counter::LocalBlockCounter;
pub use local::LocalChain;
