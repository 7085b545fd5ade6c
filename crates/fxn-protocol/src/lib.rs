//! fxn Protocol - Core types and message definitions
//!
//! Every message exchanged between fxn nodes is a JSON object carrying a
//! `type` discriminator next to the payload fields. This crate defines the
//! payloads, the request and result model, response codes and peer identity.

pub mod codes;
pub mod consensus;
pub mod constants;
pub mod error;
pub mod execute;
pub mod identity;
pub mod messages;

pub use codes::*;
pub use consensus::*;
pub use constants::*;
pub use error::*;
pub use execute::*;
pub use identity::*;
pub use messages::*;
