//! Conflict resolution between submitted results

use super::Publisher;
use crate::chain::Chain;
use crate::result::{DkgResult, DkgResultHash, DkgResultsVotes};
use crate::subscription::EventSubscription;
use crate::types::{BlockHeight, ResultSubmittedEvent, ResultVoteEvent, Signatures};
use crate::{Error, Result};
use tracing::{debug, info, instrument, warn};

/// Outcome of a conflict resolution window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A single result leads the tally
    Agreed {
        block_height: BlockHeight,
        result_hash: DkgResultHash,
    },
    /// The window closed without a single leader. The caller decides whether
    /// to extend, retry or abandon.
    Unresolved {
        block_height: BlockHeight,
        elapsed_blocks: u64,
        votes: DkgResultsVotes,
    },
}

impl Resolution {
    /// Block at which the outcome was observed
    pub fn block_height(&self) -> BlockHeight {
        match self {
            Resolution::Agreed { block_height, .. } | Resolution::Unresolved { block_height, .. } => {
                *block_height
            }
        }
    }

    /// Hash of the winning result, if any
    pub fn agreed_hash(&self) -> Option<DkgResultHash> {
        match self {
            Resolution::Agreed { result_hash, .. } => Some(*result_hash),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn is_agreed(&self) -> bool {
        matches!(self, Resolution::Agreed { .. })
    }
}

impl Publisher {
    /// Settle the result for the request after publication.
    ///
    /// Returns at once when the tally holds a single result or the leading
    /// result has more votes than the dishonest members could cast. Otherwise
    /// the member supports its own result once, voting for it when already
    /// submitted and submitting it when not, then follows the tally until a
    /// single result leads or `conflict_duration` blocks after `window_start`
    /// have passed.
    #[instrument(skip_all, fields(request_id = self.request_id, index = self.publishing_index))]
    pub async fn resolve_conflict(
        &mut self,
        own_result: &DkgResult,
        signatures: &Signatures,
        chain: &dyn Chain,
        window_start: BlockHeight,
    ) -> Result<Resolution> {
        let own_hash = chain
            .calculate_result_hash(own_result)
            .map_err(|e| Error::HashComputation(e.to_string()))?;

        let mut votes = chain
            .on_result_vote()
            .map_err(|e| Error::Chain(format!("could not watch for result votes [{}]", e)))?;
        let mut submissions = chain
            .on_result_submitted()
            .map_err(|e| Error::Chain(format!("could not watch for result submissions [{}]", e)))?;

        let resolution = self
            .follow_tally(
                own_result,
                own_hash,
                signatures,
                chain,
                window_start,
                &mut votes,
                &mut submissions,
            )
            .await;

        votes.unsubscribe();
        submissions.unsubscribe();

        resolution
    }

    #[allow(clippy::too_many_arguments)]
    async fn follow_tally(
        &mut self,
        own_result: &DkgResult,
        own_hash: DkgResultHash,
        signatures: &Signatures,
        chain: &dyn Chain,
        window_start: BlockHeight,
        votes: &mut EventSubscription<ResultVoteEvent>,
        submissions: &mut EventSubscription<ResultSubmittedEvent>,
    ) -> Result<Resolution> {
        let block_counter = chain.block_counter();

        let tally = chain.results_votes(self.request_id).await?;
        if tally.is_empty() {
            return Err(Error::NothingSubmitted(self.request_id));
        }

        if tally.len() == 1 || tally.lead_has_enough_votes(self.dishonest_threshold) {
            if let Some(result_hash) = tally.only_lead() {
                let block_height = block_counter.current_block()?;
                debug!(result_hash = %result_hash, block_height, "No conflict to resolve");
                return Ok(Resolution::Agreed {
                    block_height,
                    result_hash,
                });
            }
        }

        let window_end = window_start + self.conflict_duration;
        let mut window_closed = block_counter
            .block_height_waiter(window_end)
            .map_err(|e| Error::Chain(format!("block waiter failure [{}]", e)))?;
        info!(window_start, window_end, results = tally.len(), "Resolving result conflict");

        let current_block = block_counter.current_block()?;
        if let Some(resolution) = self
            .support_own_result(own_result, own_hash, signatures, chain, current_block)
            .await?
        {
            return Ok(resolution);
        }

        loop {
            let block_height = tokio::select! {
                biased;

                event = votes.recv() => match event {
                    Some(event) if event.request_id == self.request_id => event.block_number,
                    Some(_) => continue,
                    None => return Err(Error::Chain("result vote subscription closed".into())),
                },

                event = submissions.recv() => match event {
                    Some(event) if event.request_id == self.request_id => event.block_number,
                    Some(_) => continue,
                    None => {
                        return Err(Error::Chain("result submission subscription closed".into()))
                    }
                },

                height = &mut window_closed => {
                    let block_height = height
                        .map_err(|_| Error::Chain("block waiter dropped".into()))?;
                    let votes = chain.results_votes(self.request_id).await?;
                    warn!(
                        block_height,
                        leads = votes.leads().len(),
                        "Conflict resolution window closed without a single leader"
                    );
                    return Ok(Resolution::Unresolved {
                        block_height,
                        elapsed_blocks: block_height.saturating_sub(window_start),
                        votes,
                    });
                }
            };

            if let Some(resolution) = self
                .support_own_result(own_result, own_hash, signatures, chain, block_height)
                .await?
            {
                return Ok(resolution);
            }
        }
    }

    /// Check the tally and use this member's single action if its result
    /// does not lead alone.
    async fn support_own_result(
        &mut self,
        own_result: &DkgResult,
        own_hash: DkgResultHash,
        signatures: &Signatures,
        chain: &dyn Chain,
        block_height: BlockHeight,
    ) -> Result<Option<Resolution>> {
        let tally = chain.results_votes(self.request_id).await?;

        if tally.lead_has_enough_votes(self.dishonest_threshold) {
            if let Some(result_hash) = tally.only_lead() {
                info!(result_hash = %result_hash, "Lead has enough votes");
                return Ok(Some(Resolution::Agreed {
                    block_height,
                    result_hash,
                }));
            }
        }

        if tally.is_only_lead(&own_hash) {
            info!(result_hash = %own_hash, "Own result is the only lead");
            return Ok(Some(Resolution::Agreed {
                block_height,
                result_hash: own_hash,
            }));
        }

        if !self.already_submitted {
            if tally.contains(&own_hash) {
                debug!(result_hash = %own_hash, "Voting for own result");
                chain
                    .vote_on_result(self.request_id, self.publishing_index, own_hash)
                    .await?;
            } else {
                debug!(result_hash = %own_hash, "Submitting own result");
                if let Err(e) = chain
                    .submit_result(self.request_id, self.publishing_index, own_result, signatures)
                    .await
                {
                    // Someone else may have submitted the same result meanwhile
                    let refreshed = chain.results_votes(self.request_id).await?;
                    if !refreshed.contains(&own_hash) {
                        return Err(e);
                    }
                    chain
                        .vote_on_result(self.request_id, self.publishing_index, own_hash)
                        .await?;
                }
            }
            self.already_submitted = true;
            return Ok(None);
        }

        Ok(tally.only_lead().map(|result_hash| Resolution::Agreed {
            block_height,
            result_hash,
        }))
    }
}
