//! TCP 接入
//!
//! 绑定并监听（backlog 为 1），每次运行只接受**一个**客户端。
//! `accept_one` 消耗 `Acceptor`，接受后监听套接字随即关闭，
//! 之后的连接尝试会被拒绝，不会被悄悄桥接。

use log::info;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};

use crate::endpoint::Endpoint;
use crate::shutdown::ShutdownSignal;
use crate::transport::tcp;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to start TCP server on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Error accepting TCP connection: {0}")]
    Accept(#[source] std::io::Error),

    #[error("No TCP client connected within {0:?}")]
    TimedOut(Duration),

    #[error("Accept cancelled")]
    Cancelled,
}

#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    pub async fn bind(address: &str, port: u16) -> Result<Self, ListenerError> {
        let display = format!("{address}:{port}");
        let bind_err = |source: std::io::Error| ListenerError::Bind {
            addr: display.clone(),
            source,
        };

        let addr = tokio::net::lookup_host((address, port))
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(1).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        info!("Listening for TCP connections on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// 实际绑定的地址（端口 0 时由系统分配）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 等待一个客户端。`timeout` 为 `None` 时一直等到连接或关闭信号。
    pub async fn accept_one(
        self,
        timeout: Option<Duration>,
        shutdown: &ShutdownSignal,
    ) -> Result<Endpoint, ListenerError> {
        let Self { listener, .. } = self;

        let accept = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, listener.accept())
                    .await
                    .map_err(|_| ListenerError::TimedOut(limit))?
                    .map_err(ListenerError::Accept),
                None => listener.accept().await.map_err(ListenerError::Accept),
            }
        };

        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => return Err(ListenerError::Cancelled),
            res = accept => res?,
        };

        drop(listener);
        info!("TCP client connected from {peer}; listener closed");
        Ok(tcp::endpoint(stream, peer))
    }
}
