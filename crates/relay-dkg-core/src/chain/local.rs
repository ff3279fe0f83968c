//! In-memory chain implementation for testing

use super::{async_trait, BlockCounter, Chain, LocalBlockCounter};
use crate::result::{DkgResult, DkgResultHash, DkgResultsVotes};
use crate::subscription::EventSubscription;
use crate::types::{
    BlockHeight, MemberIndex, RequestId, ResultSubmittedEvent, ResultVoteEvent, Signatures,
};
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

type Handlers<E> = Arc<DashMap<u64, mpsc::UnboundedSender<E>>>;

/// Everything the chain knows about one request
#[derive(Default)]
struct RequestState {
    results: Vec<(DkgResult, Signatures)>,
    votes: DkgResultsVotes,
    submitted_or_voted: HashSet<MemberIndex>,
}

/// In-memory chain shared by all members of a simulated group.
///
/// Each request's state sits behind its own map entry, so concurrent
/// submissions and votes are applied one at a time and their events are
/// emitted in the order they were applied.
pub struct LocalChain {
    honest_threshold: usize,
    block_counter: Arc<LocalBlockCounter>,
    requests: DashMap<RequestId, RequestState>,
    submission_handlers: Handlers<ResultSubmittedEvent>,
    vote_handlers: Handlers<ResultVoteEvent>,
    next_handler_id: AtomicU64,
}

impl LocalChain {
    /// Create a chain on top of an existing block counter
    pub fn new(honest_threshold: usize, block_counter: Arc<LocalBlockCounter>) -> Self {
        Self {
            honest_threshold,
            block_counter,
            requests: DashMap::new(),
            submission_handlers: Arc::new(DashMap::new()),
            vote_handlers: Arc::new(DashMap::new()),
            next_handler_id: AtomicU64::new(0),
        }
    }

    /// Create a chain producing one block every `block_time`
    pub fn connect(honest_threshold: usize, block_time: Duration) -> Arc<Self> {
        Arc::new(Self::new(
            honest_threshold,
            Arc::new(LocalBlockCounter::start(block_time)),
        ))
    }

    /// Results submitted for a request, in submission order
    pub fn submitted_results(&self, request_id: RequestId) -> Vec<DkgResult> {
        self.requests
            .get(&request_id)
            .map(|state| state.results.iter().map(|(result, _)| result.clone()).collect())
            .unwrap_or_default()
    }

    /// Last submitted result and the signatures that supported it
    pub fn last_result(&self, request_id: RequestId) -> Option<(DkgResult, Signatures)> {
        self.requests
            .get(&request_id)
            .and_then(|state| state.results.last().cloned())
    }

    /// Submitted result with the given hash and its supporting signatures
    pub fn submission(
        &self,
        request_id: RequestId,
        result_hash: &DkgResultHash,
    ) -> Option<(DkgResult, Signatures)> {
        self.requests.get(&request_id).and_then(|state| {
            state
                .results
                .iter()
                .find(|(result, _)| result.hash() == *result_hash)
                .cloned()
        })
    }

    /// Active submission event subscriptions
    pub fn submission_subscriber_count(&self) -> usize {
        self.submission_handlers.len()
    }

    /// Active vote event subscriptions
    pub fn vote_subscriber_count(&self) -> usize {
        self.vote_handlers.len()
    }

    fn subscribe<E: Send + 'static>(&self, handlers: &Handlers<E>) -> EventSubscription<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler_id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        handlers.insert(handler_id, sender);

        let handlers = handlers.clone();
        EventSubscription::new(receiver, move || {
            handlers.remove(&handler_id);
        })
    }

    fn emit<E: Clone>(handlers: &Handlers<E>, event: &E) {
        for handler in handlers.iter() {
            let _ = handler.value().send(event.clone());
        }
    }

    fn current_block(&self) -> Result<BlockHeight> {
        self.block_counter.current_block()
    }
}

#[async_trait]
impl Chain for LocalChain {
    fn block_counter(&self) -> Arc<dyn BlockCounter> {
        self.block_counter.clone()
    }

    async fn submit_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result: &DkgResult,
        signatures: &Signatures,
    ) -> Result<ResultSubmittedEvent> {
        if signatures.len() < self.honest_threshold {
            return Err(Error::Chain(format!(
                "failed to submit result with [{}] signatures for honest threshold [{}]",
                signatures.len(),
                self.honest_threshold
            )));
        }

        let block_number = self.current_block()?;
        let result_hash = result.hash();

        let mut state = self.requests.entry(request_id).or_default();
        if state.submitted_or_voted.contains(&member_index) {
            return Err(Error::Chain(
                "member already submitted or voted on a result for given request id".into(),
            ));
        }
        if state.votes.contains(&result_hash) {
            return Err(Error::Chain("result already submitted".into()));
        }

        state.results.push((result.clone(), signatures.clone()));
        state.votes.vote(result_hash);
        state.submitted_or_voted.insert(member_index);

        let event = ResultSubmittedEvent {
            request_id,
            member_index,
            result_hash,
            group_public_key: result.group_public_key.clone(),
            block_number,
        };
        Self::emit(&self.submission_handlers, &event);
        drop(state);

        info!(
            request_id,
            member_index,
            block_number,
            result_hash = %result_hash,
            "Result submitted"
        );
        Ok(event)
    }

    async fn is_result_submitted(&self, request_id: RequestId) -> Result<bool> {
        Ok(self
            .requests
            .get(&request_id)
            .map_or(false, |state| !state.results.is_empty()))
    }

    fn on_result_submitted(&self) -> Result<EventSubscription<ResultSubmittedEvent>> {
        Ok(self.subscribe(&self.submission_handlers))
    }

    fn on_result_vote(&self) -> Result<EventSubscription<ResultVoteEvent>> {
        Ok(self.subscribe(&self.vote_handlers))
    }

    fn calculate_result_hash(&self, result: &DkgResult) -> Result<DkgResultHash> {
        Ok(result.hash())
    }

    async fn vote_on_result(
        &self,
        request_id: RequestId,
        member_index: MemberIndex,
        result_hash: DkgResultHash,
    ) -> Result<ResultVoteEvent> {
        let block_number = self.current_block()?;

        let mut state = self.requests.get_mut(&request_id).ok_or_else(|| {
            Error::Chain("no registered submissions or votes for given request id".into())
        })?;
        if !state.votes.contains(&result_hash) {
            return Err(Error::Chain(
                "result hash is not registered in results votes".into(),
            ));
        }
        if state.submitted_or_voted.contains(&member_index) {
            return Err(Error::Chain(
                "member already submitted or voted on a result for given request id".into(),
            ));
        }

        let votes = state.votes.vote(result_hash);
        state.submitted_or_voted.insert(member_index);

        let event = ResultVoteEvent {
            request_id,
            member_index,
            result_hash,
            block_number,
        };
        Self::emit(&self.vote_handlers, &event);
        drop(state);

        debug!(
            request_id,
            member_index,
            block_number,
            votes,
            result_hash = %result_hash,
            "Vote recorded"
        );
        Ok(event)
    }

    async fn results_votes(&self, request_id: RequestId) -> Result<DkgResultsVotes> {
        Ok(self
            .requests
            .get(&request_id)
            .map(|state| state.votes.clone())
            .unwrap_or_default())
    }
}
