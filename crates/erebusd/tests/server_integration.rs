//! Integration tests for the endpoint server.
//!
//! These tests drive a real DeviceServer over its Unix socket endpoints
//! with raw frames: session lifecycle, snapshot exchange, overflow
//! reporting and implicit release when a connection drops.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use erebus_core::{ClientIdentity, MemoryTable, TaskEntry};
use erebus_protocol::{
    frame_codec, Frame, ListHeader, OpenRequest, Opcode, ProcessList, ProtocolVersion, Status,
    VersionStamp, MAGIC,
};
use erebusd::server::{device_path, DeviceServer};
use erebusd::service::ServiceInstance;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server endpoints to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between endpoint existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period for the server to notice a dropped connection
const RELEASE_GRACE_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    root: PathBuf,
    service: Arc<ServiceInstance>,
    table: Arc<MemoryTable>,
    cancel_token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn_with(devices: u32, tasks: Vec<TaskEntry>) -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let root = temp_dir.path().to_path_buf();

        let table = Arc::new(MemoryTable::new(tasks));
        let service = Arc::new(ServiceInstance::new(table.clone()));
        let cancel_token = CancellationToken::new();

        let server = DeviceServer::new(&root, devices, Arc::clone(&service), cancel_token.clone());
        let handle = tokio::spawn(async move {
            server.run().await.expect("server run");
        });

        let last = device_path(&root, devices - 1);
        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if last.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(
            last.exists(),
            "Endpoint did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        TestServer {
            root,
            service,
            table,
            cancel_token,
            handle,
            _temp_dir: temp_dir,
        }
    }

    async fn spawn() -> Self {
        Self::spawn_with(
            1,
            vec![
                TaskEntry::new(1, 10, 2),
                TaskEntry::new(2, 0, 0),
                TaskEntry::new(9, 100, 50),
            ],
        )
        .await
    }

    async fn connect(&self, devno: u32) -> TestClient {
        let stream = UnixStream::connect(device_path(&self.root, devno))
            .await
            .expect("connect to endpoint");
        TestClient {
            framed: Framed::new(stream, frame_codec()),
        }
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        self.handle.await.expect("server task");
    }
}

/// Raw frame client.
struct TestClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
}

impl TestClient {
    async fn call(&mut self, opcode: u8, body: impl Into<Bytes>) -> Frame {
        let frame = Frame::reply(opcode, Status::Ok, body);
        self.framed.send(frame.encode()).await.expect("send frame");
        let payload = self
            .framed
            .next()
            .await
            .expect("reply before EOF")
            .expect("read reply");
        Frame::decode(payload).expect("decode reply")
    }

    async fn open(&mut self, tid: u64) -> Frame {
        self.call(Opcode::Open as u8, OpenRequest::new(tid).encode()).await
    }

    async fn close(&mut self) -> Frame {
        self.call(Opcode::Close as u8, Bytes::new()).await
    }

    async fn get_process_list(&mut self, header: ListHeader) -> Frame {
        let mut body = BytesMut::new();
        header.encode(&mut body);
        self.call(Opcode::GetProcessList as u8, body.freeze()).await
    }
}

fn own_identity(tid: u64) -> ClientIdentity {
    ClientIdentity::new(std::process::id(), tid)
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_open_and_close() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    let reply = client.open(1001).await;
    assert_eq!(reply.status, Status::Ok);
    let stamp = VersionStamp::decode_checked(&reply.body).expect("server stamp");
    assert_eq!(stamp.version, ProtocolVersion::CURRENT);

    let session = server
        .service
        .registry()
        .find(&own_identity(1001))
        .expect("session registered");
    assert_eq!(session.devno, 0);

    let reply = client.close().await;
    assert_eq!(reply.status, Status::Ok);
    assert!(server.service.registry().is_empty());

    // Connection ends after Close
    assert!(client.framed.next().await.is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_open_from_same_thread_rejected() {
    let server = TestServer::spawn().await;

    let mut first = server.connect(0).await;
    assert_eq!(first.open(7).await.status, Status::Ok);

    let mut second = server.connect(0).await;
    assert_eq!(second.open(7).await.status, Status::AlreadyOpen);

    // Same connection opening twice
    assert_eq!(first.open(8).await.status, Status::AlreadyOpen);

    // The rejected connection going away must not release the first session
    drop(second);
    sleep(RELEASE_GRACE_PERIOD).await;
    assert!(server.service.registry().find(&own_identity(7)).is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_distinct_threads_hold_distinct_sessions() {
    let server = TestServer::spawn().await;

    let mut a = server.connect(0).await;
    let mut b = server.connect(0).await;
    assert_eq!(a.open(10).await.status, Status::Ok);
    assert_eq!(b.open(20).await.status, Status::Ok);
    assert_eq!(server.service.registry().len(), 2);

    assert_eq!(a.close().await.status, Status::Ok);

    let reply = b.get_process_list(ListHeader::request(8)).await;
    assert_eq!(reply.status, Status::Ok);
    assert!(server.service.registry().find(&own_identity(20)).is_some());

    server.shutdown().await;
}

#[tokio::test]
async fn test_close_without_open() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    assert_eq!(client.close().await.status, Status::NotOpen);

    // Connection stays usable
    assert_eq!(client.open(3).await.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_dropped_connection_releases_session() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;
    assert_eq!(client.open(55).await.status, Status::Ok);

    drop(client);
    sleep(RELEASE_GRACE_PERIOD).await;

    assert!(server.service.registry().is_empty());

    // The identity can open again
    let mut again = server.connect(0).await;
    assert_eq!(again.open(55).await.status, Status::Ok);

    server.shutdown().await;
}

// ============================================================================
// Snapshot exchange
// ============================================================================

#[tokio::test]
async fn test_snapshot_requires_session() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    let reply = client.get_process_list(ListHeader::request(8)).await;
    assert_eq!(reply.status, Status::NotOpen);

    server.shutdown().await;
}

#[tokio::test]
async fn test_overflow_then_complete() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;
    client.open(1).await;

    let mut list = ProcessList::with_capacity(1).unwrap();
    let reply = client.get_process_list(list.request()).await;
    assert_eq!(reply.status, Status::Overflow);
    let required = list.read_overflow(&reply.body).unwrap();
    assert_eq!(required, 3);

    list.grow(required + 256).unwrap();
    let reply = client.get_process_list(list.request()).await;
    assert_eq!(reply.status, Status::Ok);
    assert_eq!(list.fill(&reply.body).unwrap(), 3);

    let entries: Vec<TaskEntry> = list.entries().collect();
    assert_eq!(
        entries,
        vec![
            TaskEntry::new(1, 10, 2),
            TaskEntry::new(2, 0, 0),
            TaskEntry::new(9, 100, 50),
        ]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_snapshot_follows_table_changes() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;
    client.open(1).await;

    server.table.spawn(TaskEntry::new(40, 1, 1));
    assert!(server.table.exit(2));

    let mut list = ProcessList::with_capacity(16).unwrap();
    let reply = client.get_process_list(list.request()).await;
    assert_eq!(reply.status, Status::Ok);
    list.fill(&reply.body).unwrap();

    let pids: Vec<u64> = list.entries().map(|t| t.pid).collect();
    assert_eq!(pids, vec![1, 9, 40]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_limits() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;
    client.open(1).await;

    for limit in [-1, erebus_protocol::MAX_LIST_SIZE + 1] {
        let reply = client.get_process_list(ListHeader::request(limit)).await;
        assert_eq!(reply.status, Status::InvalidArgument, "limit {limit}");
        assert!(reply.body.is_empty());
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_foreign_magic_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    let mut body = BytesMut::new();
    VersionStamp {
        magic: MAGIC ^ 0xFFFF,
        version: ProtocolVersion::CURRENT,
    }
    .encode(&mut body);
    body.extend_from_slice(&1u64.to_le_bytes());

    let reply = client.call(Opcode::Open as u8, body.freeze()).await;
    assert_eq!(reply.status, Status::VersionMismatch);
    assert!(server.service.registry().is_empty());

    server.shutdown().await;
}

// ============================================================================
// Framing robustness
// ============================================================================

#[tokio::test]
async fn test_unknown_opcode_is_unsupported() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    let reply = client.call(99, Bytes::new()).await;
    assert_eq!(reply.opcode, 99);
    assert_eq!(reply.status, Status::Unsupported);

    // Still serving
    assert_eq!(client.open(1).await.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_short_frame_is_bad_message() {
    let server = TestServer::spawn().await;
    let mut client = server.connect(0).await;

    client
        .framed
        .send(Bytes::from_static(&[1u8]))
        .await
        .unwrap();
    let payload = client.framed.next().await.unwrap().unwrap();
    let reply = Frame::decode(payload).unwrap();
    assert_eq!(reply.status, Status::BadMessage);

    server.shutdown().await;
}

// ============================================================================
// Endpoints
// ============================================================================

#[tokio::test]
async fn test_multiple_endpoints_share_registry() {
    let server = TestServer::spawn_with(2, vec![TaskEntry::new(1, 0, 0)]).await;

    let mut on_zero = server.connect(0).await;
    let mut on_one = server.connect(1).await;

    assert_eq!(on_zero.open(5).await.status, Status::Ok);
    assert_eq!(on_one.open(5).await.status, Status::AlreadyOpen);
    assert_eq!(on_one.open(6).await.status, Status::Ok);

    let devnos: Vec<u32> = server
        .service
        .registry()
        .sessions()
        .iter()
        .map(|s| s.devno)
        .collect();
    assert_eq!(devnos, vec![0, 1]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_removes_endpoints() {
    let server = TestServer::spawn_with(2, vec![]).await;
    let paths = vec![device_path(&server.root, 0), device_path(&server.root, 1)];

    server.shutdown().await;

    for path in paths {
        assert!(!path.exists(), "{} left behind", path.display());
    }
}

#[tokio::test]
async fn test_endpoint_mode_restricted_by_default() {
    use std::os::unix::fs::PermissionsExt;

    // Endpoint 0 is fully set up once endpoint 1 exists
    let server = TestServer::spawn_with(2, vec![]).await;
    let mode = std::fs::metadata(device_path(&server.root, 0))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    server.shutdown().await;
}
