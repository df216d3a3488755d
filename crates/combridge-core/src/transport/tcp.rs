//! TCP 端点

use log::warn;
use std::net::SocketAddr;
use tokio::net::TcpStream;

use crate::endpoint::{Endpoint, EndpointKind};

/// 包装一个已建立的连接。关闭 Nagle 以降低转发延迟。
pub fn endpoint(stream: TcpStream, peer: SocketAddr) -> Endpoint {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {peer}: {e}");
    }
    let (reader, writer) = stream.into_split();
    Endpoint::new(format!("tcp {peer}"), EndpointKind::Tcp, reader, writer)
}

/// 主动连接（用于测试和工具）
pub async fn connect(addr: SocketAddr) -> std::io::Result<Endpoint> {
    let stream = TcpStream::connect(addr).await?;
    Ok(endpoint(stream, addr))
}
