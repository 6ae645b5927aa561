//! TCP 电机桥接传输
//!
//! 与电机桥接进程之间使用换行分隔的 JSON：
//! - `{"op":"set","positions":[...]}` 写入目标位置，不回复
//! - `{"op":"read"}` 请求当前位置，回复 `{"positions":[...]}`
//! - `{"op":"drag","enabled":true}` 开启/关闭自由拖动，不回复
//!
//! 连接断开后由后台任务重连，控制循环的调用不会等待连接建立：
//! 断开期间每次调用立即返回 `AppError::Transport`。

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{AppError, Result};
use crate::models::JointCommand;
use crate::transport::{HandTransport, JointLayout};

/// 首次重连前的等待
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// 重连等待上限
const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum BridgeRequest<'a> {
    Set { positions: &'a [f64] },
    Read,
    Drag { enabled: bool },
}

#[derive(Deserialize)]
struct BridgeReply {
    positions: Vec<f64>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Connection {
    fn new(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }
}

/// 链路状态
enum Link {
    Up(Connection),
    /// 后台连接任务进行中
    Connecting(JoinHandle<Result<TcpStream>>),
    /// 等待到 `retry_at` 再发起下一次连接
    Down { retry_at: Instant },
}

/// 电机桥接传输
pub struct BridgeTransport {
    addr: String,
    layout: JointLayout,
    connect_timeout: Duration,
    io_timeout: Duration,
    backoff: Duration,
    link: Link,
}

async fn open_stream(addr: String, connect_timeout: Duration) -> Result<TcpStream> {
    tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| AppError::Transport(format!("连接 {} 超时", addr)))?
        .map_err(|e| AppError::Transport(format!("无法连接 {}: {}", addr, e)))
}

impl BridgeTransport {
    /// 建立连接；启动时连接失败由调用方视为致命错误
    pub async fn connect(config: &TransportConfig, layout: JointLayout) -> Result<Self> {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let stream = open_stream(config.bridge_addr.clone(), connect_timeout).await?;
        info!("Connected to motor bridge at {}", config.bridge_addr);

        Ok(Self {
            addr: config.bridge_addr.clone(),
            layout,
            connect_timeout,
            io_timeout: Duration::from_millis(config.io_timeout_ms.max(1)),
            backoff: INITIAL_BACKOFF,
            link: Link::Up(Connection::new(stream)),
        })
    }

    /// 链路是否可用
    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Up(_))
    }

    fn schedule_retry(&mut self) {
        self.link = Link::Down {
            retry_at: Instant::now() + self.backoff,
        };
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
    }

    /// 推进重连状态机，不等待任何网络操作
    fn poll_link(&mut self) -> Result<&mut Connection> {
        if let Link::Down { retry_at } = self.link {
            if Instant::now() >= retry_at {
                debug!("Reconnecting to motor bridge at {}", self.addr);
                let task = tokio::spawn(open_stream(self.addr.clone(), self.connect_timeout));
                self.link = Link::Connecting(task);
            }
        }

        if let Link::Connecting(task) = &mut self.link {
            match task.now_or_never() {
                None => {}
                Some(Ok(Ok(stream))) => {
                    info!("Reconnected to motor bridge at {}", self.addr);
                    self.backoff = INITIAL_BACKOFF;
                    self.link = Link::Up(Connection::new(stream));
                }
                Some(Ok(Err(e))) => {
                    warn!("Motor bridge reconnect failed: {}", e);
                    self.schedule_retry();
                }
                Some(Err(e)) => {
                    warn!("Motor bridge connect task ended: {}", e);
                    self.schedule_retry();
                }
            }
        }

        match &mut self.link {
            Link::Up(connection) => Ok(connection),
            _ => Err(AppError::Transport(format!("桥接 {} 未连接", self.addr))),
        }
    }

    async fn request(&mut self, request: &BridgeRequest<'_>, expect_reply: bool) -> Result<Option<String>> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        let io_timeout = self.io_timeout;

        let connection = self.poll_link()?;
        let outcome = tokio::time::timeout(io_timeout, async {
            connection.writer.write_all(line.as_bytes()).await?;
            if !expect_reply {
                return Ok::<_, std::io::Error>(None);
            }
            let mut reply = String::new();
            let read = connection.reader.read_line(&mut reply).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "bridge closed connection",
                ));
            }
            Ok(Some(reply))
        })
        .await;

        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                warn!("Motor bridge link lost: {}", e);
                self.schedule_retry();
                Err(AppError::Transport(e.to_string()))
            }
            Err(_) => {
                // 超时后连接上可能残留半条回复，丢弃连接
                self.schedule_retry();
                Err(AppError::Transport(format!(
                    "桥接 IO 超过 {}ms",
                    io_timeout.as_millis()
                )))
            }
        }
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if let Link::Connecting(task) = &self.link {
            task.abort();
        }
    }
}

#[async_trait]
impl HandTransport for BridgeTransport {
    async fn send(&mut self, command: &JointCommand) -> Result<()> {
        let motor = self.layout.to_motor(command)?;
        self.request(&BridgeRequest::Set { positions: &motor }, false)
            .await
            .map(|_| ())
    }

    async fn read_position(&mut self) -> Result<JointCommand> {
        let reply = self
            .request(&BridgeRequest::Read, true)
            .await?
            .unwrap_or_default();
        let reply: BridgeReply = serde_json::from_str(reply.trim())
            .map_err(|e| AppError::Transport(format!("桥接回复无法解析: {}", e)))?;
        Ok(JointCommand::new(self.layout.from_motor(&reply.positions)?))
    }

    async fn set_free_drag(&mut self, enabled: bool) -> Result<()> {
        self.request(&BridgeRequest::Drag { enabled }, false)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlConfig;
    use tokio::net::{TcpListener, TcpSocket};

    fn config(addr: String) -> TransportConfig {
        TransportConfig {
            kind: "bridge".into(),
            bridge_addr: addr,
            connect_timeout_ms: 500,
            io_timeout_ms: 500,
            reorder: vec![1, 0],
            offset: 1.0,
        }
    }

    #[tokio::test]
    async fn test_send_drag_and_read_through_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let bridge = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let set = lines.next_line().await.unwrap().unwrap();
            let drag = lines.next_line().await.unwrap().unwrap();
            let read_req = lines.next_line().await.unwrap().unwrap();
            write
                .write_all(b"{\"positions\":[1.5,1.25]}\n")
                .await
                .unwrap();
            (set, drag, read_req)
        });

        let layout = JointLayout::new(vec![1, 0], 1.0).unwrap();
        let mut transport = BridgeTransport::connect(&config(addr), layout).await.unwrap();
        transport
            .send(&JointCommand::new(vec![0.1, 0.2]))
            .await
            .unwrap();
        transport.set_free_drag(true).await.unwrap();
        let position = transport.read_position().await.unwrap();

        let (set, drag, read_req) = bridge.await.unwrap();
        let set: serde_json::Value = serde_json::from_str(&set).unwrap();
        assert_eq!(set["op"], "set");
        assert_eq!(set["positions"], serde_json::json!([1.2, 1.1]));
        assert_eq!(drag, r#"{"op":"drag","enabled":true}"#);
        assert_eq!(read_req, r#"{"op":"read"}"#);
        assert_eq!(position.into_inner(), vec![0.25, 0.5]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = BridgeTransport::connect(&config(addr), JointLayout::identity(2)).await;
        assert!(matches!(result, Err(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn test_closed_bridge_reports_transport_error_on_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut transport = BridgeTransport::connect(&config(addr), JointLayout::identity(2))
            .await
            .unwrap();
        accept.await.unwrap();

        let result = transport.read_position().await;
        assert!(matches!(result, Err(AppError::Transport(_))));
    }

    #[tokio::test]
    async fn test_send_does_not_wait_for_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = config(addr.to_string());
        config.connect_timeout_ms = 5000;

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            drop(listener);
        });
        let mut transport = BridgeTransport::connect(&config, JointLayout::identity(2))
            .await
            .unwrap();
        accept.await.unwrap();

        // 同一端口重新监听但积压队列占满，新的握手会一直挂起
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_reuseaddr(true).unwrap();
        socket.bind(addr).unwrap();
        let _backlog = socket.listen(0).unwrap();
        let mut fillers = Vec::new();
        for _ in 0..4 {
            if let Ok(Ok(stream)) =
                tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
            {
                fillers.push(stream);
            }
        }

        let tick = Duration::from_secs_f64(1.0 / f64::from(ControlConfig::default().tick_hz));
        let command = JointCommand::new(vec![0.1, 0.2]);
        let mut failures = 0;
        for _ in 0..6 {
            let started = std::time::Instant::now();
            if transport.send(&command).await.is_err() {
                failures += 1;
            }
            assert!(
                started.elapsed() < tick,
                "send blocked for {:?}",
                started.elapsed()
            );
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        assert!(failures > 0);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_reconnects_in_background_after_link_loss() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let bridge = tokio::spawn(async move {
            let (first, _) = listener.accept().await.unwrap();
            drop(first);
            let (second, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(second).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let mut transport = BridgeTransport::connect(&config(addr), JointLayout::identity(2))
            .await
            .unwrap();
        let command = JointCommand::new(vec![0.1, 0.2]);
        for _ in 0..150 {
            if bridge.is_finished() {
                break;
            }
            transport.send(&command).await.ok();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let line = tokio::time::timeout(Duration::from_secs(1), bridge)
            .await
            .unwrap()
            .unwrap();
        assert!(line.contains(r#""op":"set""#));
        assert!(transport.is_connected());
    }
}
