//! OCPP-J 1.6 protocol layer
//!
//! - `types`: request/response payloads and decision mapping
//! - `messages`: JSON array framing (CALL, CALLRESULT, CALLERROR)

pub mod types;
pub mod messages;

pub use types::*;
pub use messages::*;
