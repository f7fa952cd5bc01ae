//! Per-connection protocol driver.
//!
//! A connection walks through a fixed sequence of states:
//!
//! ```text
//! LOGIN -> QUEUE_ANNOUNCE -> VERSION_EXCHANGE -> TEST_LIST_ANNOUNCE
//!       -> [RUN_S2C] -> [RUN_META] -> LOGOUT -> CLOSED
//! ```
//!
//! There is no retry and no branching back. The first error ends the
//! sequence; the caller logs it and drops the socket. Only a completed
//! sequence sends MSG_LOGOUT.

use crate::config::S2cSettings;
use crate::error::Result;
use crate::protocol::{
    describe_tests, negotiate, read_extended_login, server_version, write_raw_string,
    write_standard_message, MessageType, TestSet, KICKOFF_MESSAGE, QUEUE_NOT_QUEUED,
};
use crate::subtests::{meta, s2c};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Where a connection is in its sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Login,
    QueueAnnounce,
    VersionExchange,
    TestListAnnounce,
    RunS2c,
    RunMeta,
    Logout,
    Closed,
}

/// Control channel session for one client.
pub struct Connection<R, W> {
    reader: R,
    writer: W,
    bind_ip: IpAddr,
    settings: Arc<S2cSettings>,
    negotiated: TestSet,
    state: ConnectionState,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// `bind_ip` is the address the S2C data listener binds to.
    pub fn new(reader: R, writer: W, bind_ip: IpAddr, settings: Arc<S2cSettings>) -> Self {
        Connection {
            reader,
            writer,
            bind_ip,
            settings,
            negotiated: TestSet::default(),
            state: ConnectionState::Login,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Tests agreed at login. Empty until the login succeeds.
    pub fn negotiated(&self) -> TestSet {
        self.negotiated
    }

    /// Drive the whole sequence. On error, [`Connection::state`] tells
    /// which step failed.
    pub async fn run(&mut self) -> Result<()> {
        let login = read_extended_login(&mut self.reader).await?;
        self.negotiated = negotiate(login.requested);
        info!(
            client_version = %login.client_version,
            requested = login.requested.bits(),
            negotiated = self.negotiated.bits(),
            "Client logged in"
        );

        write_raw_string(&mut self.writer, KICKOFF_MESSAGE).await?;

        // No admission control: every client is told it is not queued
        self.state = ConnectionState::QueueAnnounce;
        write_standard_message(&mut self.writer, MessageType::SrvQueue, QUEUE_NOT_QUEUED).await?;

        self.state = ConnectionState::VersionExchange;
        write_standard_message(&mut self.writer, MessageType::Login, &server_version()).await?;

        self.state = ConnectionState::TestListAnnounce;
        let tests = describe_tests(self.negotiated);
        write_standard_message(&mut self.writer, MessageType::Login, &tests).await?;

        if self.negotiated.contains(TestSet::S2C) {
            self.state = ConnectionState::RunS2c;
            let outcome =
                s2c::run(&mut self.reader, &mut self.writer, self.bind_ip, &self.settings).await?;
            debug!(
                server_kbits = %outcome.result.throughput_kbits,
                client_kbits = %outcome.client_throughput,
                "S2C test finished"
            );
        }

        if self.negotiated.contains(TestSet::META) {
            self.state = ConnectionState::RunMeta;
            let items = meta::run(&mut self.reader, &mut self.writer).await?;
            debug!(items = items.len(), "META test finished");
        }

        // MSG_RESULTS is part of the vocabulary but is never sent
        self.state = ConnectionState::Logout;
        write_standard_message(&mut self.writer, MessageType::Logout, "").await?;

        self.state = ConnectionState::Closed;
        Ok(())
    }
}

/// Serve one accepted control connection to completion.
pub async fn handle_connection(stream: TcpStream, settings: Arc<S2cSettings>) -> Result<()> {
    let bind_ip = stream.local_addr()?.ip();
    let (reader, writer) = stream.into_split();
    let mut connection = Connection::new(
        BufReader::new(reader),
        BufWriter::new(writer),
        bind_ip,
        settings,
    );

    match connection.run().await {
        Ok(()) => {
            debug!("Connection complete");
            Ok(())
        }
        Err(e) => {
            warn!(
                state = ?connection.state(),
                negotiated = connection.negotiated().bits(),
                kind = ?e.kind(),
                error = %e,
                "Connection aborted"
            );
            Err(e)
        }
    }
}
