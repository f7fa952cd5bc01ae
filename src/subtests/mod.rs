//! Sub-tests run after negotiation.
//!
//! - `s2c`: server-to-client throughput over a secondary data connection
//! - `meta`: free-form metadata sent by the client over the control channel

pub mod meta;
pub mod s2c;
