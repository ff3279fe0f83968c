//! Result publication
//!
//! Members take turns to submit: member `i` becomes eligible
//! `(i - 1) * block_step` blocks after publication starts, and stands down as
//! soon as anyone's submission for the request shows up on chain. When
//! several results end up submitted, [`Publisher::resolve_conflict`] runs the
//! voting window.

mod conflict;

pub use conflict::Resolution;

use crate::chain::Chain;
use crate::config::ProtocolConfig;
use crate::result::DkgResult;
use crate::subscription::EventSubscription;
use crate::types::{BlockHeight, MemberIndex, RequestId, ResultSubmittedEvent, Signatures};
use crate::{Error, Result};
use tracing::{debug, info, instrument};

/// Publication state of one member for one DKG execution
#[derive(Debug)]
pub struct Publisher {
    /// DKG execution the result belongs to
    request_id: RequestId,
    /// 1-based rank deciding when this member may submit
    publishing_index: MemberIndex,
    /// Blocks between consecutive members' eligibility
    block_step: u64,
    /// Blocks allotted to conflict resolution
    conflict_duration: u64,
    /// Upper bound on malicious members
    dishonest_threshold: usize,
    /// Members get one submission or vote per execution
    already_submitted: bool,
}

impl Publisher {
    /// Create a publisher for a member of the group
    pub fn new(request_id: RequestId, publishing_index: MemberIndex, config: &ProtocolConfig) -> Self {
        Self {
            request_id,
            publishing_index,
            block_step: config.block_step,
            conflict_duration: config.conflict_duration,
            dishonest_threshold: config.dishonest_threshold,
            already_submitted: false,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn publishing_index(&self) -> MemberIndex {
        self.publishing_index
    }

    /// Whether this member already used its submission or vote
    pub fn already_submitted(&self) -> bool {
        self.already_submitted
    }

    /// Submit `result` once this member's turn comes, unless someone else's
    /// submission for the request shows up first.
    ///
    /// Returns the block at which a result for the request was recorded, or
    /// the current block when one was already there on entry.
    #[instrument(skip_all, fields(request_id = self.request_id, index = self.publishing_index))]
    pub async fn publish_result(
        &mut self,
        result: &DkgResult,
        signatures: &Signatures,
        chain: &dyn Chain,
    ) -> Result<BlockHeight> {
        if self.publishing_index < 1 {
            return Err(Error::InvalidIndex(self.publishing_index));
        }

        let mut submissions = chain
            .on_result_submitted()
            .map_err(|e| Error::Chain(format!("could not watch for result submissions [{}]", e)))?;

        let published = self
            .race_submission(result, signatures, chain, &mut submissions)
            .await;
        submissions.unsubscribe();

        published
    }

    async fn race_submission(
        &mut self,
        result: &DkgResult,
        signatures: &Signatures,
        chain: &dyn Chain,
        submissions: &mut EventSubscription<ResultSubmittedEvent>,
    ) -> Result<BlockHeight> {
        let block_counter = chain.block_counter();

        let already_published = chain.is_result_submitted(self.request_id).await.map_err(|e| {
            Error::Chain(format!("could not check if the result is already submitted [{}]", e))
        })?;
        if already_published {
            let current_block = block_counter.current_block()?;
            info!(current_block, "Result already submitted, standing down");
            return Ok(current_block);
        }

        let offset = (self.publishing_index as u64 - 1) * self.block_step;
        let mut eligible = block_counter
            .block_waiter(offset)
            .map_err(|e| Error::Chain(format!("block waiter failure [{}]", e)))?;
        debug!(offset, "Waiting for submission turn");

        loop {
            tokio::select! {
                biased;

                event = submissions.recv() => match event {
                    Some(event) if event.request_id == self.request_id => {
                        info!(
                            submitter = event.member_index,
                            block_number = event.block_number,
                            "Result submitted by another member"
                        );
                        return Ok(event.block_number);
                    }
                    Some(_) => continue,
                    None => {
                        return Err(Error::Chain("result submission subscription closed".into()))
                    }
                },

                height = &mut eligible => {
                    let height = height
                        .map_err(|_| Error::Chain("block waiter dropped".into()))?;
                    debug!(height, "Eligible to submit");

                    match chain
                        .submit_result(self.request_id, self.publishing_index, result, signatures)
                        .await
                    {
                        Ok(event) => {
                            self.already_submitted = true;
                            info!(block_number = event.block_number, "Result submitted");
                            return Ok(event.block_number);
                        }
                        Err(e) => return self.lost_submission_race(chain, submissions, e).await,
                    }
                }
            }
        }
    }

    /// Block height of a submission that confirmed while this member's own
    /// submission was in flight. `submit_error` is returned when there is none.
    async fn lost_submission_race(
        &self,
        chain: &dyn Chain,
        submissions: &mut EventSubscription<ResultSubmittedEvent>,
        submit_error: Error,
    ) -> Result<BlockHeight> {
        let submitted = chain.is_result_submitted(self.request_id).await.map_err(|e| {
            Error::Chain(format!("could not check if the result is already submitted [{}]", e))
        })?;
        if !submitted {
            return Err(submit_error);
        }

        while let Some(event) = submissions.try_recv() {
            if event.request_id == self.request_id {
                info!(
                    submitter = event.member_index,
                    block_number = event.block_number,
                    error = %submit_error,
                    "Result submitted by another member first"
                );
                return Ok(event.block_number);
            }
        }

        Err(submit_error)
    }

    /// Publish `result` and settle any conflicting submissions
    #[instrument(skip_all, fields(request_id = self.request_id, index = self.publishing_index))]
    pub async fn execute_publishing(
        &mut self,
        result: &DkgResult,
        signatures: &Signatures,
        chain: &dyn Chain,
    ) -> Result<Resolution> {
        let published_at = self.publish_result(result, signatures, chain).await?;
        self.resolve_conflict(result, signatures, chain, published_at)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::faulty::{Faults, FaultyChain};
    use crate::chain::LocalChain;
    use std::sync::Arc;
    use std::time::Duration;

    pub(super) const BLOCK_TIME: Duration = Duration::from_millis(100);

    pub(super) fn config() -> ProtocolConfig {
        ProtocolConfig {
            block_step: 2,
            conflict_duration: 10,
            dishonest_threshold: 4,
            ..ProtocolConfig::default()
        }
    }

    pub(super) fn chain() -> Arc<LocalChain> {
        LocalChain::connect(0, BLOCK_TIME)
    }

    pub(super) fn result(key: u8) -> DkgResult {
        DkgResult {
            success: true,
            group_public_key: vec![key; 4],
            disqualified: vec![false; 4],
            inactive: vec![false; 4],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_race() {
        let chain = chain();
        let signatures = Signatures::new();
        let agreed = result(1);
        let mut first = Publisher::new(1, 1, &config());
        let mut fourth = Publisher::new(1, 4, &config());

        let (first_height, fourth_height) = tokio::join!(
            first.publish_result(&agreed, &signatures, chain.as_ref()),
            fourth.publish_result(&agreed, &signatures, chain.as_ref()),
        );

        assert_eq!(first_height.unwrap(), 0);
        assert_eq!(fourth_height.unwrap(), 0);
        assert!(first.already_submitted());
        assert!(!fourth.already_submitted());
        assert_eq!(chain.submitted_results(1), vec![result(1)]);
        assert_eq!(chain.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_member_submits_on_its_turn() {
        let chain = chain();
        let mut publisher = Publisher::new(1, 3, &config());

        let height = publisher
            .publish_result(&result(1), &Signatures::new(), chain.as_ref())
            .await
            .unwrap();

        assert_eq!(height, 4);
        assert!(publisher.already_submitted());
        assert_eq!(chain.submitted_results(1), vec![result(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stand_down_when_already_submitted() {
        let chain = chain();
        chain
            .submit_result(1, 1, &result(1), &Signatures::new())
            .await
            .unwrap();
        chain.block_counter().wait_for_block_height(3).await.unwrap();

        let mut publisher = Publisher::new(1, 2, &config());
        let height = publisher
            .publish_result(&result(2), &Signatures::new(), chain.as_ref())
            .await
            .unwrap();

        assert_eq!(height, 3);
        assert!(!publisher.already_submitted());
        assert_eq!(chain.submitted_results(1), vec![result(1)]);
        assert_eq!(chain.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_requests_do_not_stop_the_wait() {
        let chain = chain();
        let signatures = Signatures::new();
        let own = result(1);
        let unrelated = result(9);
        let mut publisher = Publisher::new(1, 2, &config());

        let (height, _) = tokio::join!(
            publisher.publish_result(&own, &signatures, chain.as_ref()),
            chain.submit_result(2, 1, &unrelated, &signatures),
        );

        assert_eq!(height.unwrap(), 2);
        assert!(publisher.already_submitted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_index() {
        let chain = chain();
        let mut publisher = Publisher::new(1, 0, &config());

        let err = publisher
            .publish_result(&result(1), &Signatures::new(), chain.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidIndex(0)));
        assert!(!err.is_retryable());
        assert_eq!(chain.submission_subscriber_count(), 0);
        assert!(chain.submitted_results(1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_failure_releases_subscription() {
        let chain = LocalChain::connect(3, BLOCK_TIME);
        let mut publisher = Publisher::new(1, 1, &config());

        let err = publisher
            .publish_result(&result(1), &Signatures::new(), chain.as_ref())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Chain(_)));
        assert!(!publisher.already_submitted());
        assert_eq!(chain.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_publishing_agrees_on_single_result() {
        let chain = chain();
        let signatures = Signatures::new();
        let agreed = result(1);
        let mut publishers: Vec<_> = (1..=3).map(|i| Publisher::new(7, i, &config())).collect();

        let outcomes = futures_util::future::join_all(
            publishers
                .iter_mut()
                .map(|publisher| publisher.execute_publishing(&agreed, &signatures, chain.as_ref())),
        )
        .await;

        for outcome in outcomes {
            assert_eq!(outcome.unwrap().agreed_hash(), Some(result(1).hash()));
        }
        assert_eq!(chain.submitted_results(7).len(), 1);
        assert_eq!(chain.submission_subscriber_count(), 0);
        assert_eq!(chain.vote_subscriber_count(), 0);
    }

    fn faulty(faults: Faults) -> (Arc<LocalChain>, FaultyChain) {
        let local = chain();
        let chain = FaultyChain::new(local.clone(), faults);
        (local, chain)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_submission_loses_to_earlier_one() {
        let (local, chain) = faulty(Faults {
            submit_delay: 3,
            ..Faults::default()
        });
        let config = ProtocolConfig {
            block_step: 1,
            ..config()
        };
        let signatures = Signatures::new();
        let agreed = result(1);
        let mut first = Publisher::new(1, 1, &config);
        let mut second = Publisher::new(1, 2, &config);

        let (first_height, second_height) = tokio::join!(
            first.publish_result(&agreed, &signatures, &chain),
            second.publish_result(&agreed, &signatures, &chain),
        );

        assert_eq!(first_height.unwrap(), 3);
        assert_eq!(second_height.unwrap(), 3);
        assert!(first.already_submitted());
        assert!(!second.already_submitted());
        assert_eq!(local.submitted_results(1), vec![result(1)]);
        assert_eq!(local.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscription_is_reported() {
        let (local, chain) = faulty(Faults {
            submission_subscribe: true,
            ..Faults::default()
        });
        let mut publisher = Publisher::new(1, 1, &config());

        let err = publisher
            .publish_result(&result(1), &Signatures::new(), &chain)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("could not watch for result submissions"));
        assert!(local.submitted_results(1).is_empty());
        assert_eq!(local.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_submission_check_releases_subscription() {
        let (local, chain) = faulty(Faults {
            submission_check: true,
            ..Faults::default()
        });
        let mut publisher = Publisher::new(1, 1, &config());

        let err = publisher
            .publish_result(&result(1), &Signatures::new(), &chain)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Chain(_)));
        assert!(err.to_string().contains("could not check if the result is already submitted"));
        assert!(err.is_retryable());
        assert_eq!(local.submission_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_block_waiter_releases_subscription() {
        let (local, chain) = faulty(Faults {
            block_waiters: true,
            ..Faults::default()
        });
        let mut publisher = Publisher::new(1, 2, &config());

        let err = publisher
            .publish_result(&result(1), &Signatures::new(), &chain)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("block waiter failure"));
        assert!(!publisher.already_submitted());
        assert!(local.submitted_results(1).is_empty());
        assert_eq!(local.submission_subscriber_count(), 0);
    }
}
