//! 端点模块测试
//!
//! 使用 `tokio::io::duplex` 作为内存传输

use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const SHORT: Duration = Duration::from_millis(50);

fn pair(kind: EndpointKind) -> (Endpoint, DuplexStream) {
    let (local, remote) = tokio::io::duplex(256);
    (Endpoint::from_stream("test", kind, local), remote)
}

// ============================================================================
// 读
// ============================================================================

#[tokio::test]
async fn test_read_returns_data() {
    let (mut endpoint, mut remote) = pair(EndpointKind::Tcp);
    remote.write_all(b"hello").await.unwrap();

    let mut buf = [0u8; 16];
    let outcome = endpoint.read_timeout(&mut buf, SHORT).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Data(5));
    assert_eq!(&buf[..5], b"hello");
}

#[tokio::test]
async fn test_read_respects_max_bytes() {
    let (mut endpoint, mut remote) = pair(EndpointKind::Tcp);
    remote.write_all(b"0123456789").await.unwrap();

    let mut buf = [0u8; 4];
    let outcome = endpoint.read_timeout(&mut buf, SHORT).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Data(4));
    assert_eq!(&buf, b"0123");
}

#[tokio::test]
async fn test_read_times_out_without_data() {
    let (mut endpoint, _remote) = pair(EndpointKind::Tcp);
    let mut buf = [0u8; 16];
    let outcome = endpoint.read_timeout(&mut buf, SHORT).await.unwrap();
    assert_eq!(outcome, ReadOutcome::TimedOut);
}

#[tokio::test]
async fn test_socket_eof_is_disconnect() {
    let (mut endpoint, remote) = pair(EndpointKind::Bluetooth);
    drop(remote);

    let mut buf = [0u8; 16];
    let err = endpoint.read_timeout(&mut buf, SHORT).await.unwrap_err();
    assert!(matches!(err, EndpointError::Disconnected(_)), "{err:?}");
}

#[tokio::test]
async fn test_serial_eof_is_disconnect() {
    // 串口挂断（USB 拔出）后读返回 0 字节
    let (mut endpoint, remote) = pair(EndpointKind::Serial);
    drop(remote);

    let mut buf = [0u8; 16];
    let err = endpoint.read_timeout(&mut buf, SHORT).await.unwrap_err();
    assert!(matches!(err, EndpointError::Disconnected(_)), "{err:?}");
}

#[tokio::test]
async fn test_zero_capacity_read_is_empty() {
    let (mut endpoint, _remote) = pair(EndpointKind::Serial);
    let outcome = endpoint.read_timeout(&mut [], SHORT).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Empty);
}

/// 每次读都被中断的读端
struct InterruptedReader;

impl AsyncRead for InterruptedReader {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Err(io::ErrorKind::Interrupted.into()))
    }
}

#[tokio::test]
async fn test_interrupted_read_is_empty() {
    let (_, writer) = tokio::io::duplex(8);
    let mut endpoint = Endpoint::new("serial", EndpointKind::Serial, InterruptedReader, writer);
    let mut buf = [0u8; 16];
    let outcome = endpoint.read_timeout(&mut buf, SHORT).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Empty);
}

// ============================================================================
// 写
// ============================================================================

#[tokio::test]
async fn test_write_reaches_remote() {
    let (mut endpoint, mut remote) = pair(EndpointKind::Serial);
    endpoint.write(&[0x7e, 0x00, 0xff]).await.unwrap();

    let mut buf = [0u8; 3];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [0x7e, 0x00, 0xff]);
}

#[tokio::test]
async fn test_write_to_dropped_remote_fails() {
    let (mut endpoint, remote) = pair(EndpointKind::Tcp);
    drop(remote);

    let err = endpoint.write(b"data").await.unwrap_err();
    assert!(matches!(err, EndpointError::Io { .. }), "{err:?}");
}

/// 记录 flush / shutdown 调用次数的写端
#[derive(Clone, Default)]
struct RecordingWriter {
    flushes: Arc<std::sync::atomic::AtomicUsize>,
    shutdowns: Arc<std::sync::atomic::AtomicUsize>,
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        std::task::Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_serial_write_never_drains() {
    let recorder = RecordingWriter::default();
    let (reader, _remote) = tokio::io::duplex(8);
    let endpoint = Endpoint::new("serial", EndpointKind::Serial, reader, recorder.clone());
    let (_reader, mut writer) = endpoint.into_split();

    writer.write(b"chunk one").await.unwrap();
    writer.write(b"chunk two").await.unwrap();
    writer.finish().await;

    assert_eq!(recorder.flushes.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_socket_finish_half_closes() {
    let recorder = RecordingWriter::default();
    let (reader, _remote) = tokio::io::duplex(8);
    let endpoint = Endpoint::new("tcp", EndpointKind::Tcp, reader, recorder.clone());
    let (_reader, mut writer) = endpoint.into_split();

    writer.finish().await;
    assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);
}

// ============================================================================
// 关闭
// ============================================================================

#[test]
fn test_close_is_idempotent() {
    let (local, _remote) = tokio::io::duplex(8);
    let endpoint = Endpoint::from_stream("idem", EndpointKind::Tcp, local);
    let handle = endpoint.handle();

    assert!(!handle.is_closed());
    assert!(endpoint.close());
    assert!(!endpoint.close());
    assert!(!handle.close());
    assert!(handle.is_closed());
}

#[tokio::test]
async fn test_io_after_close_fails() {
    let (mut endpoint, mut remote) = pair(EndpointKind::Tcp);
    remote.write_all(b"pending").await.unwrap();
    endpoint.close();

    let mut buf = [0u8; 16];
    assert!(endpoint.read_timeout(&mut buf, SHORT).await.unwrap_err().is_closed());
    assert!(endpoint.write(b"x").await.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_close_wakes_blocked_read() {
    let (endpoint, _remote) = pair(EndpointKind::Tcp);
    let handle = endpoint.handle();
    let (mut reader, _writer) = endpoint.into_split();

    let read = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        reader.read_timeout(&mut buf, Duration::from_secs(30)).await
    });

    tokio::time::sleep(SHORT).await;
    handle.close();

    let result = tokio::time::timeout(Duration::from_secs(1), read)
        .await
        .expect("close should wake the reader")
        .unwrap();
    assert!(result.unwrap_err().is_closed());
}

#[tokio::test]
async fn test_handle_reports_identity() {
    let (endpoint, _remote) = pair(EndpointKind::Serial);
    let handle = endpoint.handle();
    assert_eq!(handle.label(), "test");
    assert_eq!(handle.kind(), EndpointKind::Serial);
    assert_eq!(endpoint.kind().to_string(), "serial");
}
