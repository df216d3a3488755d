//! Combridge Core Library
//!
//! 双向字节中继：把两个独立寻址的传输端点（蓝牙 RFCOMM、串口、TCP）连接起来，
//! 写入一端的字节按顺序出现在另一端。不做分帧，也不解析负载。
//!
//! # 模块
//!
//! - **endpoint**: 端点抽象（有超时上限的读、写、幂等关闭）
//! - **transport**: RFCOMM / 串口 / TCP 端点
//! - **discovery**: 按名称片段扫描蓝牙设备，带重试；上次连接地址缓存
//! - **listener**: 只接受一个客户端的 TCP 接入
//! - **bridge**: 两个方向的转发任务
//! - **shutdown**: 取消信号和有序拆除
//! - **session**: 各模式的启动流程
//! - **config**: TOML 配置
//! - **logging**: 流量日志
//!
//! # 使用示例
//!
//! ```ignore
//! use combridge_core::{BridgeConfig, BridgeMode, ShutdownSignal, session};
//!
//! let config = BridgeConfig::load(None)?;
//! let shutdown = ShutdownSignal::new();
//!
//! // 在别处: shutdown.request_shutdown(ShutdownReason::Signal);
//! let report = session::run(BridgeMode::SerialTcp, &config, &shutdown).await?;
//! println!("forwarded {} bytes", report.total_bytes());
//! ```

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod listener;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod transport;

// Bridge re-exports
pub use bridge::{Bridge, BridgeOptions, BridgeReport, Direction, FlowExit, FlowReport};

// Endpoint re-exports
pub use endpoint::{Endpoint, EndpointError, EndpointHandle, EndpointKind, ReadOutcome};

// Discovery re-exports
#[cfg(feature = "bluetooth")]
pub use discovery::BluezScanner;
pub use discovery::{
    CandidateNames, DeviceScanner, DiscoveredPeer, Discovery, DiscoveryError, DiscoveryOptions,
    PeerCache, ScanError, ScannedDevice,
};

pub use config::{BridgeConfig, ConfigError};
pub use listener::{Acceptor, ListenerError};
pub use logging::TraceFormat;
pub use session::{BridgeMode, SessionError};
pub use shutdown::{ShutdownReason, ShutdownSignal};
