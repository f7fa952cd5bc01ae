//! Metadata exchange test.
//!
//! After TEST_PREPARE and TEST_START the client sends any number of
//! TEST_MSG frames, each carrying one free-form item (by convention
//! `key=value`), terminated by an empty message.
//!
//! There is no limit on the number of items and no read timeout: a client
//! that never sends the terminator keeps the connection task waiting.

use crate::error::{ProtocolError, Result};
use crate::protocol::{read_standard_message, write_standard_message, MessageType};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

/// Run the META test, returning the items sent by the client.
pub async fn run<R, W>(reader: &mut R, writer: &mut W) -> Result<Vec<String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_standard_message(writer, MessageType::TestPrepare, "").await?;
    write_standard_message(writer, MessageType::TestStart, "").await?;

    let mut items = Vec::new();
    loop {
        let (msg_type, msg) = read_standard_message(reader).await?;
        if msg_type != MessageType::TestMsg as u8 {
            return Err(ProtocolError::UnexpectedMessageType {
                expected: MessageType::TestMsg,
                actual: msg_type,
                during_login: false,
            });
        }
        if msg.is_empty() {
            break;
        }
        info!(item = %msg, "Metadata from client");
        items.push(msg);
    }

    write_standard_message(writer, MessageType::TestFinalize, "").await?;
    Ok(items)
}
