//! Result signing phase
//!
//! Each member signs the hash of the result it computed, broadcasts the
//! signature and collects valid signatures from peers that prefer the same
//! result. The collected set travels with the result when it is submitted.

mod member;
mod messages;

pub use member::SigningMember;
pub use messages::DkgResultHashSignatureMessage;
