//! Chain wrapper with injected delays and failures

use super::{async_trait, BlockCounter, Chain, LocalChain};
use crate::result::{DkgResult, DkgResultHash, DkgResultsVotes};
use crate::subscription::EventSubscription;
use crate::types::{
    BlockHeight, MemberIndex, RequestId, ResultSubmittedEvent, ResultVoteEvent, Signatures,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Which calls misbehave
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Faults {
    /// Blocks a submission takes to confirm
    pub submit_delay: u64,
    pub submission_subscribe: bool,
    pub submission_check: bool,
    pub block_waiters: bool,
    pub hashing: bool,
}

pub(crate) struct FaultyChain {
    inner: Arc<LocalChain>,
    faults: Faults,
}

impl FaultyChain {
    pub(crate) fn new(inner: Arc<LocalChain>, faults: Faults) -> Self {
        Self { inner, faults }
    }
}

struct FaultyBlockCounter {
    inner: Arc<dyn BlockCounter>,
    fail_waiters: bool,
}

#[async_trait]
impl BlockCounter for FaultyBlockCounter {
    fn current_block(&self) -> Result<BlockHeight> {
        self.inner.current_block()
    }

    fn block_waiter(&self, offset: u64) -> Result<oneshot::Receiver<BlockHeight>> {
        if self.fail_waiters {
            return Err(Error::Chain("block counter unavailable".into()));
        }
        self.inner.block_waiter(offset)
    }

    fn block_height_waiter(&self, height: BlockHeight) -> Result<oneshot::Receiver<BlockHeight>> {
        if self.fail_waiters {
            return Err(Error::Chain("block counter unavailable".into()));
        }
        self.inner.block_height_waiter(height)
    }
}

#[async_trait]
impl Chain for FaultyChain {
    fn block_counter(&self) -> Arc<dyn BlockCounter> {
        Arc::new(FaultyBlockCounter {
            inner: self.inner.block_counter(),
            fail_waiters: self.faults.block_waiters,
        })
    }

    async fn submit_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result: &DkgResult,
        signatures: &Signatures,
    ) -> Result<ResultSubmittedEvent> {
        if self.faults.submit_delay > 0 {
            self.inner
                .block_counter()
                .block_waiter(self.faults.submit_delay)?
                .await
                .map_err(|_| Error::Chain("block waiter dropped".into()))?;
        }
        self.inner
            .submit_result(request_id, member_index, result, signatures)
            .await
    }

    async fn is_result_submitted(&self, request_id: RequestId) -> Result<bool> {
        if self.faults.submission_check {
            return Err(Error::Chain("node unreachable".into()));
        }
        self.inner.is_result_submitted(request_id).await
    }

    fn on_result_submitted(&self) -> Result<EventSubscription<ResultSubmittedEvent>> {
        if self.faults.submission_subscribe {
            return Err(Error::Chain("event filter rejected".into()));
        }
        self.inner.on_result_submitted()
    }

    fn on_result_vote(&self) -> Result<EventSubscription<ResultVoteEvent>> {
        self.inner.on_result_vote()
    }

    fn calculate_result_hash(&self, result: &DkgResult) -> Result<DkgResultHash> {
        if self.faults.hashing {
            return Err(Error::Chain("hashing unavailable".into()));
        }
        self.inner.calculate_result_hash(result)
    }

    async fn vote_on_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result_hash: DkgResultHash,
    ) -> Result<ResultVoteEvent> {
        self.inner.vote_on_result(request_id, member_index, result_hash).await
    }

    async fn results_votes(&self, request_id: RequestId) -> Result<DkgResultsVotes> {
        self.inner.results_votes(request_id).await
    }
}
