//! # Relay DKG Core
//!
//! Finalization of distributed key generation results for threshold relay
//! groups.
//!
//! Once key generation produced a result, every member of the group:
//! - signs the result hash and collects peers' signatures over the same hash
//! - submits the result on its turn, or stands down when another member did
//! - votes in a bounded window when different results were submitted
//!
//! The chain and the group broadcast channel are reached through the
//! [`chain::Chain`] and [`net::BroadcastChannel`] traits. In-memory versions
//! of both are included for tests and local simulations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_dkg_core::{state::SigningStateMachine, ProtocolConfig};
//!
//! let machine = SigningStateMachine::new(config, request_id, member, result, chain, channel)?;
//! let resolution = machine.run().await?;
//! ```

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod publish;
pub mod registry;
pub mod result;
pub mod signing;
pub mod state;
pub mod subscription;
pub mod types;

pub use config::ProtocolConfig;
pub use error::{Error, Result};
pub use publish::{Publisher, Resolution};
pub use registry::GroupRegistry;
pub use result::{DkgResult, DkgResultHash, DkgResultsVotes};
pub use signing::{DkgResultHashSignatureMessage, SigningMember};
pub use types::{BlockHeight, MemberIndex, RequestId, Signatures};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
