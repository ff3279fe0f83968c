//! Signing member

use super::DkgResultHashSignatureMessage;
use crate::chain::Chain;
use crate::crypto;
use crate::result::{DkgResult, DkgResultHash};
use crate::types::{MemberIndex, Signatures};
use crate::{Error, Result};
use k256::ecdsa::SigningKey;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// A group member signing its preferred result and collecting peers'
/// signatures over the same result.
///
/// State is mutated only by the protocol driver owning the member, so no
/// internal locking is done.
pub struct SigningMember {
    /// 1-based member index
    index: MemberIndex,
    /// Operator key used to sign the result hash
    signing_key: SigningKey,
    /// SEC1 public keys of the group members, by index
    peer_public_keys: HashMap<MemberIndex, Vec<u8>>,
    /// Hash of the result this member signed
    preferred_result_hash: Option<DkgResultHash>,
    /// Valid signatures over `preferred_result_hash`, own included
    received_valid_signatures: Signatures,
}

impl SigningMember {
    /// Create a member with the public keys of its peers
    pub fn new(
        index: MemberIndex,
        signing_key: SigningKey,
        peer_public_keys: HashMap<MemberIndex, Vec<u8>>,
    ) -> Self {
        Self {
            index,
            signing_key,
            peer_public_keys,
            preferred_result_hash: None,
            received_valid_signatures: Signatures::new(),
        }
    }

    pub fn index(&self) -> MemberIndex {
        self.index
    }

    /// Compressed SEC1 public key of this member
    pub fn public_key(&self) -> Vec<u8> {
        crypto::public_key_bytes(&self.signing_key)
    }

    pub fn preferred_result_hash(&self) -> Option<DkgResultHash> {
        self.preferred_result_hash
    }

    pub fn received_valid_signatures(&self) -> &Signatures {
        &self.received_valid_signatures
    }

    /// Sign the hash of `result` and register the signature as this member's
    /// own contribution.
    #[instrument(skip_all, fields(member = self.index))]
    pub fn sign_result(
        &mut self,
        result: &DkgResult,
        chain: &dyn Chain,
    ) -> Result<DkgResultHashSignatureMessage> {
        let result_hash = chain
            .calculate_result_hash(result)
            .map_err(|e| Error::HashComputation(e.to_string()))?;

        if let Some(preferred) = self.preferred_result_hash {
            if preferred != result_hash {
                return Err(Error::InvalidState(format!(
                    "member {} already signed result {}",
                    self.index, preferred
                )));
            }
        }

        let signature = crypto::sign(result_hash.as_bytes(), &self.signing_key)?;

        self.preferred_result_hash = Some(result_hash);
        self.received_valid_signatures
            .insert(self.index, signature.clone());

        debug!(result_hash = %result_hash, "Result signed");

        Ok(DkgResultHashSignatureMessage {
            sender_index: self.index,
            result_hash,
            signature,
            public_key: self.public_key(),
        })
    }

    /// Verify a batch of peers' signature messages and keep the valid ones
    /// supporting this member's preferred result.
    ///
    /// A sender that appears more than once in the batch gets no credit from
    /// it. Per-message problems are logged and skipped; an error is returned
    /// only when the member has not signed a result yet.
    #[instrument(skip_all, fields(member = self.index, messages = messages.len()))]
    pub fn verify_signatures(&mut self, messages: &[DkgResultHashSignatureMessage]) -> Result<()> {
        let preferred = self.preferred_result_hash.ok_or_else(|| {
            Error::InvalidState("cannot verify signatures before signing a result".into())
        })?;

        let mut senders: HashMap<MemberIndex, usize> = HashMap::new();
        for message in messages {
            *senders.entry(message.sender_index).or_default() += 1;
        }

        for message in messages {
            let sender = message.sender_index;
            if sender == self.index {
                continue;
            }

            if senders.get(&sender).copied().unwrap_or_default() > 1 {
                info!(sender, "Multiple messages from sender, rejecting all of them");
                continue;
            }

            if message.result_hash != preferred {
                info!(
                    sender,
                    result_hash = %message.result_hash,
                    preferred = %preferred,
                    "Sender supports a different result"
                );
                continue;
            }

            match self.peer_public_keys.get(&sender) {
                Some(key) if *key == message.public_key => {}
                Some(_) => {
                    info!(
                        sender,
                        public_key = %hex::encode(&message.public_key),
                        "Public key does not match the sender's registered key"
                    );
                    continue;
                }
                None => {
                    info!(sender, "Unknown sender");
                    continue;
                }
            }

            if let Err(e) = crypto::verify(&message.public_key, preferred.as_bytes(), &message.signature) {
                info!(sender, error = %e, "Invalid signature");
                continue;
            }

            self.received_valid_signatures
                .insert(sender, message.signature.clone());
        }

        debug!(
            valid = self.received_valid_signatures.len(),
            "Signatures verified"
        );
        Ok(())
    }
}
