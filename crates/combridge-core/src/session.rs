//! 会话启动
//!
//! 按模式定位并打开两个端点，然后交给 [`Bridge`] 运行。
//! 启动阶段的任何失败都在进入桥接之前返回给调用者。
//!
//! | 模式 | 端点 A | 端点 B |
//! |------|--------|--------|
//! | `BluetoothSerial` | 蓝牙 RFCOMM（发现或已知地址） | 串口 |
//! | `SerialTcp` | 串口 | 唯一的 TCP 客户端 |
//! | `BluetoothTcp` | 蓝牙 RFCOMM | 唯一的 TCP 客户端 |

use log::info;
use std::fmt;
#[cfg(any(feature = "bluetooth", test))]
use std::future::Future;

use crate::bridge::{Bridge, BridgeReport};
use crate::config::{BridgeConfig, SerialSettings, TcpSettings};
use crate::discovery::{DiscoveryError, ScanError};
use crate::endpoint::Endpoint;
use crate::listener::{Acceptor, ListenerError};
use crate::shutdown::ShutdownSignal;
use crate::transport::serial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeMode {
    #[cfg(feature = "bluetooth")]
    BluetoothSerial,
    SerialTcp,
    #[cfg(feature = "bluetooth")]
    BluetoothTcp,
}

impl BridgeMode {
    pub fn needs_bluetooth(self) -> bool {
        match self {
            #[cfg(feature = "bluetooth")]
            BridgeMode::BluetoothSerial | BridgeMode::BluetoothTcp => true,
            BridgeMode::SerialTcp => false,
        }
    }
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "bluetooth")]
            BridgeMode::BluetoothSerial => f.write_str("bluetooth ↔ serial"),
            BridgeMode::SerialTcp => f.write_str("serial ↔ tcp"),
            #[cfg(feature = "bluetooth")]
            BridgeMode::BluetoothTcp => f.write_str("bluetooth ↔ tcp"),
        }
    }
}

/// 启动阶段错误，决定进程退出码
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Scanner(#[from] ScanError),

    #[error("Failed to open {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("Startup cancelled")]
    Cancelled,
}

impl SessionError {
    /// 启动期间收到关闭信号，不算失败
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SessionError::Cancelled
                | SessionError::Discovery(DiscoveryError::Cancelled)
                | SessionError::Listener(ListenerError::Cancelled)
        )
    }
}

/// 打开两个端点并运行一个桥接会话
pub async fn run(
    mode: BridgeMode,
    config: &BridgeConfig,
    shutdown: &ShutdownSignal,
) -> Result<BridgeReport, SessionError> {
    info!("Starting {mode} bridge");

    let (a, b) = match mode {
        #[cfg(feature = "bluetooth")]
        BridgeMode::BluetoothSerial => {
            let radio = bluetooth::connect_peer(&config.bluetooth, shutdown).await?;
            let port = open_serial(&config.serial)?;
            (radio, port)
        }
        BridgeMode::SerialTcp => {
            let port = open_serial(&config.serial)?;
            let client = accept_client(&config.tcp, shutdown).await?;
            (port, client)
        }
        #[cfg(feature = "bluetooth")]
        BridgeMode::BluetoothTcp => {
            let radio = bluetooth::connect_peer(&config.bluetooth, shutdown).await?;
            let client = accept_client(&config.tcp, shutdown).await?;
            (radio, client)
        }
    };

    let bridge = Bridge::new(config.bridge.options());
    Ok(bridge.run(a, b, shutdown).await)
}

fn open_serial(settings: &SerialSettings) -> Result<Endpoint, SessionError> {
    serial::open(&settings.port, settings.baud_rate).map_err(|source| SessionError::Open {
        target: format!("serial port {}", settings.port),
        source,
    })
}

async fn accept_client(
    settings: &TcpSettings,
    shutdown: &ShutdownSignal,
) -> Result<Endpoint, SessionError> {
    let acceptor = Acceptor::bind(&settings.bind_address, settings.port).await?;
    Ok(acceptor.accept_one(None, shutdown).await?)
}

/// 在关闭信号置位时放弃一个启动步骤
#[cfg(any(feature = "bluetooth", test))]
async fn cancellable<T, F>(shutdown: &ShutdownSignal, step: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::select! {
        () = shutdown.cancelled() => Err(SessionError::Cancelled),
        res = step => res,
    }
}

#[cfg(feature = "bluetooth")]
mod bluetooth {
    use async_trait::async_trait;
    use std::io;

    use super::SessionError;
    use super::peer::{self, PeerConnector};
    use crate::config::BluetoothSettings;
    use crate::discovery::BluezScanner;
    use crate::endpoint::Endpoint;
    use crate::shutdown::ShutdownSignal;
    use crate::transport::bluetooth;

    struct RfcommConnector;

    #[async_trait]
    impl PeerConnector for RfcommConnector {
        async fn connect(&self, address: &str, channel: u8) -> io::Result<Endpoint> {
            bluetooth::connect(address, channel).await
        }
    }

    /// BlueZ 扫描器只在需要发现时才创建
    pub(super) async fn connect_peer(
        settings: &BluetoothSettings,
        shutdown: &ShutdownSignal,
    ) -> Result<Endpoint, SessionError> {
        peer::connect_peer(settings, &RfcommConnector, BluezScanner::new(), shutdown).await
    }
}

#[cfg(any(feature = "bluetooth", test))]
mod peer {
    use async_trait::async_trait;
    use log::{info, warn};
    use std::future::Future;
    use std::io;

    use super::{SessionError, cancellable};
    use crate::config::BluetoothSettings;
    use crate::discovery::{CachedPeer, DeviceScanner, Discovery, ScanError};
    use crate::endpoint::Endpoint;
    use crate::shutdown::ShutdownSignal;

    /// 按地址和通道打开对端连接
    #[async_trait]
    pub(super) trait PeerConnector: Send + Sync {
        async fn connect(&self, address: &str, channel: u8) -> io::Result<Endpoint>;
    }

    /// 解析对端地址并连接：显式地址 → 缓存地址 → 扫描发现。
    ///
    /// `scanner` 只在需要扫描时才被 await。缓存只在连接成功后更新。
    pub(super) async fn connect_peer<C, S, F>(
        settings: &BluetoothSettings,
        connector: &C,
        scanner: F,
        shutdown: &ShutdownSignal,
    ) -> Result<Endpoint, SessionError>
    where
        C: PeerConnector,
        S: DeviceScanner,
        F: Future<Output = Result<S, ScanError>>,
    {
        if let Some(address) = &settings.address {
            let endpoint = connect(connector, address, settings.channel, shutdown).await?;
            remember(settings, &CachedPeer {
                address: address.clone(),
                name: None,
            });
            return Ok(endpoint);
        }

        if settings.use_cache {
            if let Some(cached) = settings.peer_cache().load() {
                info!("Trying cached device {}", cached.address);
                match connect(connector, &cached.address, settings.channel, shutdown).await {
                    Ok(endpoint) => return Ok(endpoint),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => warn!("{e}; falling back to discovery"),
                }
            }
        }

        let scanner = cancellable(shutdown, async { Ok(scanner.await?) }).await?;
        let discovery = Discovery::new(scanner, settings.discovery_options());
        let peer = discovery
            .find(&settings.candidate_names(), shutdown)
            .await?;

        let endpoint = connect(connector, &peer.address, settings.channel, shutdown).await?;
        remember(settings, &CachedPeer::from(&peer));
        Ok(endpoint)
    }

    async fn connect<C: PeerConnector>(
        connector: &C,
        address: &str,
        channel: u8,
        shutdown: &ShutdownSignal,
    ) -> Result<Endpoint, SessionError> {
        cancellable(shutdown, async {
            connector
                .connect(address, channel)
                .await
                .map_err(|source| SessionError::Open {
                    target: format!("Bluetooth device {address} (channel {channel})"),
                    source,
                })
        })
        .await
    }

    fn remember(settings: &BluetoothSettings, peer: &CachedPeer) {
        if !settings.use_cache {
            return;
        }
        if let Err(e) = settings.peer_cache().save(peer) {
            warn!("{e}");
        }
    }

}
