//! Server-to-client throughput test.
//!
//! The server opens a second listener, tells the client its port over the
//! control channel, then streams a fixed buffer over the data connection
//! for the configured window. The data connection carries raw bytes only.
//!
//! ```text
//! server                                client
//!   | -- TEST_PREPARE {"msg":"3010"} -->  |
//!   | <========= data connect =========== |
//!   | -- TEST_START ------------------->  |
//!   | ========= payload (window) ======>  |
//!   | -- TEST_MSG {S2C result} -------->  |
//!   | <-- TEST_MSG {client speed} ------  |
//!   | -- TEST_FINALIZE ---------------->  |
//! ```

use crate::config::{FillMode, S2cSettings};
use crate::error::{ProtocolError, Result};
use crate::protocol::{read_standard_message, write_frame, write_standard_message, MessageType};
use rand::Rng;
use serde::Serialize;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Size of the buffer written on every iteration.
pub const SEND_BUFFER_SIZE: usize = 8192;

/// Filler byte for [`FillMode::Pattern`].
const FILLER: u8 = b'A';

/// Measurement reported to the client in the TEST_MSG frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct S2cResult {
    #[serde(rename = "ThroughputValue")]
    pub throughput_kbits: String,
    #[serde(rename = "UnsentDataAmount")]
    pub unsent_bytes: String,
    #[serde(rename = "TotalSentByte")]
    pub total_bytes_sent: String,
}

impl S2cResult {
    fn new(bytes_sent: u64, elapsed: Duration) -> Self {
        S2cResult {
            throughput_kbits: throughput_kbits(bytes_sent, elapsed.as_secs_f64()).to_string(),
            // No send backlog is tracked
            unsent_bytes: "0".to_string(),
            total_bytes_sent: bytes_sent.to_string(),
        }
    }
}

/// Outcome of a completed S2C run.
#[derive(Debug, Clone)]
pub struct S2cOutcome {
    pub result: S2cResult,
    /// Throughput as measured and reported by the client
    pub client_throughput: String,
}

/// Throughput in kbit/s.
pub fn throughput_kbits(bytes_sent: u64, elapsed_secs: f64) -> f64 {
    8.0 * bytes_sent as f64 / 1000.0 / elapsed_secs
}

/// Run the S2C test over the given control channel halves.
///
/// The data listener is bound on `bind_ip` at the configured port and is
/// closed before this function returns, whatever the outcome.
pub async fn run<R, W>(
    reader: &mut R,
    writer: &mut W,
    bind_ip: IpAddr,
    settings: &S2cSettings,
) -> Result<S2cOutcome>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let addr = SocketAddr::new(bind_ip, settings.port);
    let listener = bind_data_listener(addr).map_err(|e| ProtocolError::Bind(addr, e))?;
    let port = listener.local_addr()?.port();
    debug!(port, "S2C listener bound");

    write_standard_message(writer, MessageType::TestPrepare, &port.to_string()).await?;

    let (stream, peer) = listener
        .accept()
        .await
        .map_err(ProtocolError::DataConnect)?;
    drop(listener);
    debug!(peer = %peer, "S2C data connection accepted");

    let buffer = fill_buffer(settings.fill);

    write_standard_message(writer, MessageType::TestStart, "").await?;

    let mut data = BufWriter::new(stream);
    let start = Instant::now();
    let mut bytes_sent: u64 = 0;
    loop {
        if let Err(e) = data.write_all(&buffer).await {
            warn!(error = %e, "Failed to write to client");
            break;
        }
        if let Err(e) = data.flush().await {
            warn!(error = %e, "Cannot flush connection with client");
            break;
        }
        bytes_sent += buffer.len() as u64;
        if start.elapsed() > settings.duration {
            debug!("Measurement window elapsed");
            break;
        }
    }

    // Close explicitly so the client sees EOF at the end of the window
    if let Err(e) = data.shutdown().await {
        debug!(error = %e, "Data connection shutdown failed");
    }
    drop(data);
    let elapsed = start.elapsed();

    let result = S2cResult::new(bytes_sent, elapsed);
    info!(
        bytes_sent,
        elapsed_ms = elapsed.as_millis() as u64,
        throughput_kbits = %result.throughput_kbits,
        "S2C measurement complete"
    );

    let body = serde_json::to_vec(&result)?;
    write_frame(writer, MessageType::TestMsg.into(), &body).await?;

    let (msg_type, client_throughput) = read_standard_message(reader).await?;
    if msg_type != MessageType::TestMsg as u8 {
        return Err(ProtocolError::UnexpectedMessageType {
            expected: MessageType::TestMsg,
            actual: msg_type,
            during_login: false,
        });
    }
    info!(client_throughput = %client_throughput, "Client measured speed");

    write_standard_message(writer, MessageType::TestFinalize, "").await?;

    Ok(S2cOutcome {
        result,
        client_throughput,
    })
}

/// Bind the data listener with SO_REUSEADDR so the fixed port can be reused
/// by the next test while the previous socket sits in TIME_WAIT.
fn bind_data_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;

    TcpListener::from_std(socket.into())
}

fn fill_buffer(mode: FillMode) -> Vec<u8> {
    match mode {
        FillMode::Pattern => vec![FILLER; SEND_BUFFER_SIZE],
        FillMode::Random => {
            let mut buffer = vec![0u8; SEND_BUFFER_SIZE];
            rand::thread_rng().fill(&mut buffer[..]);
            buffer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::read_frame;
    use tokio::io::{split, AsyncReadExt, DuplexStream};
    use tokio::net::TcpStream;

    const LOOPBACK: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

    fn short_settings(fill: FillMode) -> S2cSettings {
        S2cSettings {
            port: 0,
            duration: Duration::from_millis(200),
            fill,
        }
    }

    #[test]
    fn test_throughput_arithmetic() {
        assert_eq!(throughput_kbits(8_192_000, 10.0), 6553.6);
        assert_eq!(throughput_kbits(0, 1.5), 0.0);
    }

    #[test]
    fn test_result_encoding() {
        let result = S2cResult::new(8_192_000, Duration::from_secs(10));
        assert_eq!(result.throughput_kbits, "6553.6");
        assert_eq!(result.unsent_bytes, "0");
        assert_eq!(result.total_bytes_sent, "8192000");

        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(
            json,
            r#"{"ThroughputValue":"6553.6","UnsentDataAmount":"0","TotalSentByte":"8192000"}"#
        );

        // Whole numbers carry no fraction or exponent
        let result = S2cResult::new(1_000_000, Duration::from_secs(8));
        assert_eq!(result.throughput_kbits, "1000");
    }

    #[test]
    fn test_fill_buffer() {
        let pattern = fill_buffer(FillMode::Pattern);
        assert_eq!(pattern.len(), SEND_BUFFER_SIZE);
        assert!(pattern.iter().all(|&b| b == b'A'));

        let random = fill_buffer(FillMode::Random);
        assert_eq!(random.len(), SEND_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_s2c_run() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server_io);
            run(
                &mut reader,
                &mut writer,
                LOOPBACK,
                &short_settings(FillMode::Pattern),
            )
            .await
        });

        let (mut reader, mut writer) = split(client_io);

        let (msg_type, port) = read_standard_message(&mut reader).await.unwrap();
        assert_eq!(msg_type, MessageType::TestPrepare as u8);
        let port: u16 = port.parse().unwrap();

        let mut data = TcpStream::connect((LOOPBACK, port)).await.unwrap();

        let (msg_type, msg) = read_standard_message(&mut reader).await.unwrap();
        assert_eq!(msg_type, MessageType::TestStart as u8);
        assert_eq!(msg, "");

        let mut received = Vec::new();
        data.read_to_end(&mut received).await.unwrap();
        assert!(!received.is_empty());
        assert_eq!(received.len() % SEND_BUFFER_SIZE, 0);
        assert!(received.iter().all(|&b| b == b'A'));

        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.msg_type, MessageType::TestMsg as u8);
        let report: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
        assert_eq!(report["UnsentDataAmount"], "0");
        assert_eq!(
            report["TotalSentByte"].as_str().unwrap(),
            received.len().to_string()
        );
        let kbits: f64 = report["ThroughputValue"].as_str().unwrap().parse().unwrap();
        assert!(kbits > 0.0);

        write_standard_message(&mut writer, MessageType::TestMsg, "12345.6")
            .await
            .unwrap();

        let (msg_type, msg) = read_standard_message(&mut reader).await.unwrap();
        assert_eq!(msg_type, MessageType::TestFinalize as u8);
        assert_eq!(msg, "");

        let outcome = server.await.unwrap().unwrap();
        assert_eq!(outcome.client_throughput, "12345.6");
        assert_eq!(
            outcome.result.total_bytes_sent,
            received.len().to_string()
        );
    }

    #[tokio::test]
    async fn test_s2c_rejects_unexpected_client_report() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server_io);
            run(
                &mut reader,
                &mut writer,
                LOOPBACK,
                &short_settings(FillMode::Random),
            )
            .await
        });

        let (mut reader, mut writer) = split(client_io);
        let (_, port) = read_standard_message(&mut reader).await.unwrap();
        let mut data = TcpStream::connect((LOOPBACK, port.parse::<u16>().unwrap()))
            .await
            .unwrap();
        read_standard_message(&mut reader).await.unwrap();

        let mut sink = Vec::new();
        data.read_to_end(&mut sink).await.unwrap();
        read_frame(&mut reader).await.unwrap();

        write_standard_message(&mut writer, MessageType::Logout, "")
            .await
            .unwrap();

        match server.await.unwrap() {
            Err(ProtocolError::UnexpectedMessageType {
                expected: MessageType::TestMsg,
                actual: 9,
                during_login: false,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_s2c_bind_failure() {
        let occupied = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();
        let settings = S2cSettings {
            port,
            ..short_settings(FillMode::Pattern)
        };

        let mut reader: &[u8] = &[];
        let mut writer = Vec::new();
        match run(&mut reader, &mut writer, LOOPBACK, &settings).await {
            Err(ProtocolError::Bind(addr, _)) => assert_eq!(addr.port(), port),
            other => panic!("unexpected: {:?}", other),
        }
        // Nothing is announced when the bind fails
        assert!(writer.is_empty());
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Play the client side through the data phase, then answer the
    /// report with a message of `report_type`.
    async fn play_client(client_io: DuplexStream, report_type: MessageType) {
        let (mut reader, mut writer) = split(client_io);
        let (_, port) = read_standard_message(&mut reader).await.unwrap();
        let mut data = TcpStream::connect((LOOPBACK, port.parse::<u16>().unwrap()))
            .await
            .unwrap();
        read_standard_message(&mut reader).await.unwrap();

        let mut sink = Vec::new();
        data.read_to_end(&mut sink).await.unwrap();
        read_frame(&mut reader).await.unwrap();

        write_standard_message(&mut writer, report_type, "100")
            .await
            .unwrap();
        if report_type == MessageType::TestMsg {
            let (msg_type, _) = read_standard_message(&mut reader).await.unwrap();
            assert_eq!(msg_type, MessageType::TestFinalize as u8);
        }
    }

    #[tokio::test]
    async fn test_s2c_client_closes_data_connection_early() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let settings = S2cSettings {
            port: 0,
            duration: Duration::from_secs(30),
            fill: FillMode::Pattern,
        };

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server_io);
            run(&mut reader, &mut writer, LOOPBACK, &settings).await
        });

        let (mut reader, mut writer) = split(client_io);
        let (_, port) = read_standard_message(&mut reader).await.unwrap();
        let data = TcpStream::connect((LOOPBACK, port.parse::<u16>().unwrap()))
            .await
            .unwrap();
        let (msg_type, _) = read_standard_message(&mut reader).await.unwrap();
        assert_eq!(msg_type, MessageType::TestStart as u8);
        drop(data);

        // Write failures end the window long before the 30 s deadline
        let frame = tokio::time::timeout(Duration::from_secs(10), read_frame(&mut reader))
            .await
            .expect("report not sent after data connection closed")
            .unwrap();
        assert_eq!(frame.msg_type, MessageType::TestMsg as u8);
        let report: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
        let total: u64 = report["TotalSentByte"].as_str().unwrap().parse().unwrap();
        assert_eq!(total % SEND_BUFFER_SIZE as u64, 0);
        assert_eq!(report["UnsentDataAmount"], "0");

        write_standard_message(&mut writer, MessageType::TestMsg, "0")
            .await
            .unwrap();
        let (msg_type, _) = read_standard_message(&mut reader).await.unwrap();
        assert_eq!(msg_type, MessageType::TestFinalize as u8);

        let outcome = server.await.unwrap().unwrap();
        assert_eq!(outcome.result.total_bytes_sent, total.to_string());
    }

    #[tokio::test]
    async fn test_s2c_releases_listener_after_success() {
        let port = free_port();
        let settings = S2cSettings {
            port,
            ..short_settings(FillMode::Pattern)
        };
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server_io);
            run(&mut reader, &mut writer, LOOPBACK, &settings).await
        });
        play_client(client_io, MessageType::TestMsg).await;

        server.await.unwrap().unwrap();
        std::net::TcpListener::bind((LOOPBACK, port)).unwrap();
    }

    #[tokio::test]
    async fn test_s2c_releases_listener_after_error() {
        let port = free_port();
        let settings = S2cSettings {
            port,
            ..short_settings(FillMode::Pattern)
        };
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let (mut reader, mut writer) = split(server_io);
            run(&mut reader, &mut writer, LOOPBACK, &settings).await
        });
        play_client(client_io, MessageType::Error).await;

        assert!(server.await.unwrap().is_err());
        std::net::TcpListener::bind((LOOPBACK, port)).unwrap();
    }
}
