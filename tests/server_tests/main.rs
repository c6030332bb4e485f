//! End-to-end tests against a running server on a loopback port

mod api_tests;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stratakv::config::{Config, ConfigBuilder};
use stratakv::engine::Engine;
use stratakv::governor::Governor;
use stratakv::network::{Server, ShutdownHandle};
use stratakv::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

// =============================================================================
// Helper Functions
// =============================================================================

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_config(dir: &Path) -> ConfigBuilder {
    Config::builder()
        .data_dir(dir)
        .listen_addr("127.0.0.1:0")
        .worker_threads(4)
        .queue_depth(16)
        .memtable_size_limit(64 * 1024)
        .compaction_trigger(0)
        .idle_timeout_ms(5_000)
        .request_timeout_ms(5_000)
}

/// A server running on its own task
pub struct TestServer {
    pub addr: SocketAddr,
    pub governor: Arc<Governor>,
    engine: Option<Arc<Engine>>,
    shutdown: ShutdownHandle,
    task: Option<JoinHandle<stratakv::Result<()>>>,
}

impl TestServer {
    pub async fn start(config: Config) -> Self {
        let engine = Arc::new(Engine::open(config.clone()).unwrap());
        let server = Server::bind(config, Arc::clone(&engine)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let governor = server.governor();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.run());

        Self {
            addr,
            governor,
            engine: Some(engine),
            shutdown,
            task: Some(task),
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.addr.to_string()).with_timeout(IO_TIMEOUT)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        self.engine.as_ref().unwrap()
    }

    /// Stop serving and hand back the engine once nothing else holds it
    pub async fn stop(mut self) -> Engine {
        self.shutdown.shutdown();
        let task = self.task.take().unwrap();
        tokio::time::timeout(IO_TIMEOUT, task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();

        let engine = self.engine.take().unwrap();
        Arc::try_unwrap(engine).ok().expect("engine still shared after shutdown")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

/// Open a plain TCP connection
pub async fn connect_raw(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).await.unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

/// Head of one raw response: status code and whether it closes the connection
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub closing: bool,
}

/// Read until the end of one response head
///
/// `None` when the server closed the connection before answering.
pub async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> Option<RawResponse> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let read = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut byte))
            .await
            .expect("no response within timeout")
            .ok()?;
        if read == 0 {
            return None;
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8(head).unwrap().to_ascii_lowercase();
    let status = head.split(' ').nth(1).unwrap().parse().unwrap();
    let closing = head.contains("\r\nconnection: close\r\n");
    Some(RawResponse { status, closing })
}

/// Write raw request bytes and read the head of the answer
pub async fn send_raw(stream: &mut TcpStream, raw: &[u8]) -> RawResponse {
    stream.write_all(raw).await.unwrap();
    read_head(stream).await.expect("connection closed without a response")
}

/// Whether the server has closed `stream`, waiting up to `within`
pub async fn closed_within<R: AsyncRead + Unpin>(stream: &mut R, within: Duration) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match tokio::time::timeout(within, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            // Drain whatever answer came first
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}

/// Poll `condition` for up to ten seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + IO_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
