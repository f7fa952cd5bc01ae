//! NDT control protocol.
//!
//! The control channel carries typed, length-prefixed frames:
//!
//! ```text
//! +------+-------------+------------------+
//! | type | length (BE) | body             |
//! | 1 B  | 2 B         | `length` bytes   |
//! +------+-------------+------------------+
//! ```
//!
//! Bodies are JSON, almost always `{"msg": "..."}`. The only unframed bytes
//! on the control channel are the legacy kickoff line sent right after login.

pub mod codec;
pub mod login;

pub use codec::{read_standard_message, write_frame, write_raw_string, write_standard_message};
pub use login::{describe_tests, negotiate, read_extended_login};

use std::ops::{BitAnd, BitOr};

/// Maximum body length representable by the 16-bit length field.
pub const MAX_BODY_LENGTH: usize = u16::MAX as usize;

/// Unframed legacy line written after a successful login.
pub const KICKOFF_MESSAGE: &str = "123456 654321";

/// Product name advertised in the version string.
pub const PRODUCT: &str = concat!("botticelli/", env!("CARGO_PKG_VERSION"));

/// Queue position meaning "not queued".
pub const QUEUE_NOT_QUEUED: &str = "0";

/// Version string advertised to clients.
pub fn server_version() -> String {
    format!("v3.7.0 ({})", PRODUCT)
}

/// Control message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    CommFailure = 0,
    SrvQueue = 1,
    Login = 2,
    TestPrepare = 3,
    TestStart = 4,
    TestMsg = 5,
    TestFinalize = 6,
    Error = 7,
    Results = 8,
    Logout = 9,
    Waiting = 10,
    ExtendedLogin = 11,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => MessageType::CommFailure,
            1 => MessageType::SrvQueue,
            2 => MessageType::Login,
            3 => MessageType::TestPrepare,
            4 => MessageType::TestStart,
            5 => MessageType::TestMsg,
            6 => MessageType::TestFinalize,
            7 => MessageType::Error,
            8 => MessageType::Results,
            9 => MessageType::Logout,
            10 => MessageType::Waiting,
            11 => MessageType::ExtendedLogin,
            other => return Err(other),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

/// Bitmask of sub-tests, as exchanged in the extended login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestSet(u32);

#[allow(dead_code)]
impl TestSet {
    pub const MID: TestSet = TestSet(1);
    pub const C2S: TestSet = TestSet(2);
    pub const S2C: TestSet = TestSet(4);
    pub const SFW: TestSet = TestSet(8);
    pub const STATUS: TestSet = TestSet(16);
    pub const META: TestSet = TestSet(32);

    /// Sub-tests this server can run.
    pub const IMPLEMENTED: TestSet = TestSet(Self::S2C.0 | Self::META.0);

    pub const fn from_bits(bits: u32) -> Self {
        TestSet(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: TestSet) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitAnd for TestSet {
    type Output = TestSet;

    fn bitand(self, rhs: TestSet) -> TestSet {
        TestSet(self.0 & rhs.0)
    }
}

impl BitOr for TestSet {
    type Output = TestSet;

    fn bitor(self, rhs: TestSet) -> TestSet {
        TestSet(self.0 | rhs.0)
    }
}
