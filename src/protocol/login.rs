//! Extended login handling and test negotiation.

use super::codec::read_frame;
use super::{MessageType, TestSet};
use crate::error::{ProtocolError, Result};
use serde::Deserialize;
use tokio::io::AsyncRead;
use tracing::debug;

/// Extended login body as it appears on the wire.
#[derive(Debug, Deserialize)]
struct ExtendedLoginBody {
    msg: String,
    tests: String,
}

/// A validated extended login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedLogin {
    pub client_version: String,
    pub requested: TestSet,
}

impl ExtendedLoginBody {
    /// Parse the decimal bitmask and require the STATUS capability.
    fn validate(self) -> Result<ExtendedLogin> {
        let value: i64 = self.tests.parse().map_err(|_| {
            ProtocolError::MalformedBody(format!("invalid tests bitmask: {:?}", self.tests))
        })?;
        // Only the low bits name tests; sign and high bits are ignored
        let bits = value as u32;
        let requested = TestSet::from_bits(bits);

        if !requested.contains(TestSet::STATUS) {
            return Err(ProtocolError::MissingCapability(bits));
        }

        Ok(ExtendedLogin {
            client_version: self.msg,
            requested,
        })
    }
}

/// Read and validate the client's extended login frame.
pub async fn read_extended_login<R>(reader: &mut R) -> Result<ExtendedLogin>
where
    R: AsyncRead + Unpin,
{
    let frame = read_frame(reader).await?;
    if frame.msg_type != MessageType::ExtendedLogin as u8 {
        return Err(ProtocolError::UnexpectedMessageType {
            expected: MessageType::ExtendedLogin,
            actual: frame.msg_type,
            during_login: true,
        });
    }

    let body: ExtendedLoginBody = serde_json::from_slice(&frame.body)?;
    debug!(client_version = %body.msg, tests = %body.tests, "Extended login");

    body.validate()
}

/// Intersect the requested tests with the ones this server implements.
pub fn negotiate(requested: TestSet) -> TestSet {
    requested & TestSet::IMPLEMENTED
}

/// Format the negotiated tests for the test-list message.
///
/// S2C always comes first and carries a trailing space, so a set with
/// only S2C renders as `"4 "`. Clients match this byte for byte.
pub fn describe_tests(negotiated: TestSet) -> String {
    let mut out = String::new();
    if negotiated.contains(TestSet::S2C) {
        out.push_str(&TestSet::S2C.bits().to_string());
        out.push(' ');
    }
    if negotiated.contains(TestSet::META) {
        out.push_str(&TestSet::META.bits().to_string());
    }
    out
}
