//! Result signing state machine
//!
//! Sequences the finalization phases of one member:
//!
//! 1. [`SigningState::ResultSigning`]: sign the result, broadcast the
//!    signature and collect peers' signatures for
//!    `signature_collection_blocks` blocks.
//! 2. [`SigningState::SignaturesVerification`]: verify what was collected.
//! 3. [`SigningState::ResultSubmission`]: publish and settle the result.
//!
//! A state is initiated once on entry, receives group messages while its
//! blocks run and then hands over to its successor. Only a run ending in the
//! submission state is a success.

use crate::chain::Chain;
use crate::config::ProtocolConfig;
use crate::net::{BroadcastChannel, ProtocolMessage, RESULT_HASH_SIGNATURE_TAG};
use crate::publish::{Publisher, Resolution};
use crate::result::DkgResult;
use crate::signing::{DkgResultHashSignatureMessage, SigningMember};
use crate::subscription::EventSubscription;
use crate::types::RequestId;
use crate::{Error, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Phases of result signing and submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    ResultSigning,
    SignaturesVerification,
    ResultSubmission,
}

impl SigningState {
    /// Blocks during which the state stays active after initiation
    pub fn active_blocks(&self, config: &ProtocolConfig) -> u64 {
        match self {
            SigningState::ResultSigning => config.signature_collection_blocks,
            SigningState::SignaturesVerification | SigningState::ResultSubmission => 0,
        }
    }

    pub fn is_submission(&self) -> bool {
        matches!(self, SigningState::ResultSubmission)
    }
}

impl fmt::Display for SigningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SigningState::ResultSigning => "result signing",
            SigningState::SignaturesVerification => "signatures verification",
            SigningState::ResultSubmission => "result submission",
        };
        f.write_str(name)
    }
}

/// Drives one member through result signing and submission
pub struct SigningStateMachine {
    config: ProtocolConfig,
    member: SigningMember,
    publisher: Publisher,
    result: DkgResult,
    chain: Arc<dyn Chain>,
    channel: Arc<dyn BroadcastChannel>,
    messages: EventSubscription<ProtocolMessage>,
    received: Vec<DkgResultHashSignatureMessage>,
    resolution: Option<Resolution>,
}

impl SigningStateMachine {
    /// Prepare the state machine of `member` for `request_id`.
    ///
    /// Starts listening on the group channel right away, so messages from
    /// members that start earlier are not lost.
    pub fn new(
        config: ProtocolConfig,
        request_id: RequestId,
        member: SigningMember,
        result: DkgResult,
        chain: Arc<dyn Chain>,
        channel: Arc<dyn BroadcastChannel>,
    ) -> Result<Self> {
        config.validate()?;
        channel.register_unmarshaler(RESULT_HASH_SIGNATURE_TAG)?;
        let messages = channel.recv()?;
        let publisher = Publisher::new(request_id, member.index(), &config);

        Ok(Self {
            config,
            member,
            publisher,
            result,
            chain,
            channel,
            messages,
            received: Vec::new(),
            resolution: None,
        })
    }

    pub fn member(&self) -> &SigningMember {
        &self.member
    }

    /// Run every state to completion
    #[instrument(skip_all, fields(request_id = self.publisher.request_id(), member = self.member.index()))]
    pub async fn run(mut self) -> Result<Resolution> {
        let outcome = self.run_states().await;
        self.messages.unsubscribe();
        outcome
    }

    async fn run_states(&mut self) -> Result<Resolution> {
        let block_counter = self.chain.block_counter();
        let mut state = SigningState::ResultSigning;

        loop {
            debug!(%state, "Entering state");
            self.initiate(state).await?;

            let active_blocks = state.active_blocks(&self.config);
            if active_blocks > 0 {
                let mut done = block_counter.block_waiter(active_blocks)?;
                loop {
                    tokio::select! {
                        height = &mut done => {
                            height.map_err(|_| Error::Chain("block waiter dropped".into()))?;
                            break;
                        }
                        message = self.messages.recv() => match message {
                            Some(message) => self.receive(state, message),
                            None => return Err(Error::Broadcast("group channel closed".into())),
                        },
                    }
                }
            }

            if state == SigningState::ResultSigning {
                // Later states take no group messages
                self.messages.unsubscribe();
            }

            match self.next(state) {
                Some(next) => state = next,
                None => break,
            }
        }

        if !state.is_submission() {
            return Err(Error::UnexpectedFinalState(format!(
                "{} with {} of {} required signatures",
                state,
                self.member.received_valid_signatures().len(),
                self.config.honest_threshold
            )));
        }

        self.resolution
            .take()
            .ok_or_else(|| Error::UnexpectedFinalState(format!("{} without outcome", state)))
    }

    async fn initiate(&mut self, state: SigningState) -> Result<()> {
        match state {
            SigningState::ResultSigning => {
                let message = self
                    .member
                    .sign_result(&self.result, self.chain.as_ref())?;
                self.channel
                    .send(&ProtocolMessage::ResultHashSignature(message))
                    .await?;
            }
            SigningState::SignaturesVerification => {
                self.member.verify_signatures(&self.received)?;
                info!(
                    valid = self.member.received_valid_signatures().len(),
                    received = self.received.len(),
                    "Result signatures verified"
                );
            }
            SigningState::ResultSubmission => {
                let signatures = self.member.received_valid_signatures().clone();
                let resolution = self
                    .publisher
                    .execute_publishing(&self.result, &signatures, self.chain.as_ref())
                    .await?;
                self.resolution = Some(resolution);
            }
        }
        Ok(())
    }

    fn receive(&mut self, state: SigningState, message: ProtocolMessage) {
        match (state, message) {
            (SigningState::ResultSigning, ProtocolMessage::ResultHashSignature(message)) => {
                self.received.push(message);
            }
            (state, message) => {
                warn!(%state, sender = message.sender_index(), "Unexpected message");
            }
        }
    }

    fn next(&self, state: SigningState) -> Option<SigningState> {
        match state {
            SigningState::ResultSigning => Some(SigningState::SignaturesVerification),
            SigningState::SignaturesVerification => {
                let collected = self.member.received_valid_signatures().len();
                if collected >= self.config.honest_threshold {
                    Some(SigningState::ResultSubmission)
                } else {
                    warn!(
                        collected,
                        required = self.config.honest_threshold,
                        "Not enough signatures supporting the result"
                    );
                    None
                }
            }
            SigningState::ResultSubmission => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::faulty::{Faults, FaultyChain};
    use crate::chain::LocalChain;
    use crate::crypto;
    use crate::net::MemoryBroadcastHub;
    use crate::types::MemberIndex;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use std::collections::HashMap;
    use std::time::Duration;

    const REQUEST: RequestId = 42;

    fn config(group_size: usize, dishonest_threshold: usize) -> ProtocolConfig {
        ProtocolConfig {
            block_step: 1,
            conflict_duration: 6,
            signature_collection_blocks: 2,
            ..ProtocolConfig::new(group_size, dishonest_threshold).unwrap()
        }
    }

    fn result(key: u8) -> DkgResult {
        DkgResult {
            success: true,
            group_public_key: vec![key; 8],
            disqualified: vec![false; 5],
            inactive: vec![false; 5],
        }
    }

    fn local_chain(config: &ProtocolConfig) -> Arc<LocalChain> {
        LocalChain::connect(config.honest_threshold, Duration::from_millis(100))
    }

    fn machines(
        config: &ProtocolConfig,
        chain: Arc<dyn Chain>,
        hub: &MemoryBroadcastHub,
        results: Vec<DkgResult>,
    ) -> Vec<SigningStateMachine> {
        let keys: Vec<SigningKey> = results.iter().map(|_| SigningKey::random(&mut OsRng)).collect();
        let public_keys: HashMap<MemberIndex, Vec<u8>> = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (i + 1, crypto::public_key_bytes(key)))
            .collect();

        keys.into_iter()
            .zip(results)
            .enumerate()
            .map(|(i, (key, result))| {
                let member = SigningMember::new(i + 1, key, public_keys.clone());
                SigningStateMachine::new(
                    config.clone(),
                    REQUEST,
                    member,
                    result,
                    chain.clone(),
                    hub.channel("group"),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_state_durations() {
        let config = config(5, 2);
        assert_eq!(SigningState::ResultSigning.active_blocks(&config), 2);
        assert_eq!(SigningState::SignaturesVerification.active_blocks(&config), 0);
        assert!(SigningState::ResultSubmission.is_submission());
        assert!(!SigningState::SignaturesVerification.is_submission());
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_agrees_on_result() {
        let config = config(5, 2);
        let chain = local_chain(&config);
        let hub = MemoryBroadcastHub::new();
        let machines = machines(&config, chain.clone(), &hub, vec![result(1); 5]);

        let outcomes = futures_util::future::join_all(machines.into_iter().map(|m| m.run())).await;

        for outcome in outcomes {
            assert_eq!(outcome.unwrap().agreed_hash(), Some(result(1).hash()));
        }

        let submitted = chain.submitted_results(REQUEST);
        assert_eq!(submitted, vec![result(1)]);
        let (_, signatures) = chain.last_result(REQUEST).unwrap();
        assert_eq!(signatures.len(), 5);
        assert_eq!(chain.submission_subscriber_count(), 0);
        assert_eq!(chain.vote_subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_minority_without_support_stops_before_submission() {
        let config = config(5, 2);
        let mut results = vec![result(1); 4];
        results.push(result(2));
        let chain = local_chain(&config);
        let hub = MemoryBroadcastHub::new();
        let machines = machines(&config, chain.clone(), &hub, results);

        let outcomes = futures_util::future::join_all(machines.into_iter().map(|m| m.run())).await;

        for outcome in &outcomes[..4] {
            assert!(outcome.as_ref().unwrap().is_agreed());
        }
        assert!(matches!(
            outcomes[4],
            Err(Error::UnexpectedFinalState(_))
        ));
        assert_eq!(chain.submitted_results(REQUEST), vec![result(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_channel_released_after_signing() {
        let config = config(5, 2);
        let local = local_chain(&config);
        let chain = Arc::new(FaultyChain::new(
            local.clone(),
            Faults {
                submit_delay: 3,
                ..Faults::default()
            },
        ));
        let hub = MemoryBroadcastHub::new();
        let group = hub.channel("group");
        let machines = machines(&config, chain, &hub, vec![result(1); 5]);
        assert_eq!(group.receiver_count(), 5);

        let handles: Vec<_> = machines
            .into_iter()
            .map(|machine| tokio::spawn(machine.run()))
            .collect();

        // Signing ends at block 2, the first submission confirms at block 5
        local.block_counter().wait_for_block_height(4).await.unwrap();
        assert!(local.submitted_results(REQUEST).is_empty());
        assert_eq!(group.receiver_count(), 0);

        for outcome in futures_util::future::join_all(handles).await {
            assert_eq!(outcome.unwrap().unwrap().agreed_hash(), Some(result(1).hash()));
        }
        assert_eq!(local.submitted_results(REQUEST), vec![result(1)]);
        assert_eq!(local.submission_subscriber_count(), 0);
    }
}
