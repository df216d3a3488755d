//! 配置
//!
//! 启动时读取一次的静态配置，运行期间不再改变。
//! TOML 文件提供基础值，命令行参数在其上覆盖。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::BridgeOptions;
use crate::discovery::{CandidateNames, DiscoveryOptions, PeerCache, is_valid_address};
use crate::logging::TraceFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 蓝牙侧设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothSettings {
    /// 候选设备名称（大小写不敏感的子串）
    pub names: Vec<String>,
    /// RFCOMM 通道
    pub channel: u8,
    /// 已知地址，设置后跳过扫描
    pub address: Option<String>,
    pub scan_retries: u32,
    pub scan_timeout_secs: u64,
    /// 优先尝试上次连接成功的地址
    pub use_cache: bool,
    /// 缓存文件位置，默认 `<cache_dir>/combridge/last_peer.toml`
    pub cache_path: Option<PathBuf>,
}

impl Default for BluetoothSettings {
    fn default() -> Self {
        Self {
            names: vec![
                "UV-PRO".to_string(),
                "VR-N76".to_string(),
                "GA-5WB".to_string(),
            ],
            channel: 3,
            address: None,
            scan_retries: 3,
            scan_timeout_secs: 10,
            use_cache: true,
            cache_path: None,
        }
    }
}

impl BluetoothSettings {
    pub fn candidate_names(&self) -> CandidateNames {
        CandidateNames::new(self.names.iter().cloned())
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            retries: self.scan_retries,
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
        }
    }

    pub fn peer_cache(&self) -> PeerCache {
        PeerCache::new(
            self.cache_path
                .clone()
                .unwrap_or_else(PeerCache::default_path),
        )
    }
}

/// 串口设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// TCP 监听设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSettings {
    pub bind_address: String,
    pub port: u16,
}

impl Default for TcpSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// 转发设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub poll_interval_ms: u64,
    pub max_chunk: usize,
    pub idle_backoff_ms: u64,
    pub teardown_grace_ms: u64,
    pub trace: TraceFormat,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            max_chunk: 1024,
            idle_backoff_ms: 10,
            teardown_grace_ms: 2000,
            trace: TraceFormat::Hex,
        }
    }
}

impl BridgeSettings {
    pub fn options(&self) -> BridgeOptions {
        BridgeOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_chunk: self.max_chunk,
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            teardown_grace: Duration::from_millis(self.teardown_grace_ms),
            trace: self.trace,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bluetooth: BluetoothSettings,
    pub serial: SerialSettings,
    pub tcp: TcpSettings,
    pub bridge: BridgeSettings,
}

impl BridgeConfig {
    /// `<config_dir>/combridge/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("combridge")
            .join("config.toml")
    }

    /// 读取配置。
    ///
    /// 显式给出的路径必须存在且能解析；默认路径不存在时使用默认值，
    /// 解析失败时记录警告并使用默认值。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let path = Self::default_path();
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        match Self::from_file(&path) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("{}, using defaults", e);
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 蓝牙相关的检查只在需要蓝牙的模式下有意义，由 `require_bluetooth` 控制
    pub fn validate(&self, require_bluetooth: bool) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if require_bluetooth {
            let bt = &self.bluetooth;
            match &bt.address {
                Some(address) if !is_valid_address(address) => {
                    return Err(ConfigError::Invalid(format!(
                        "'{address}' is not a valid Bluetooth address"
                    )));
                }
                Some(_) => {}
                None if bt.candidate_names().is_empty() => {
                    return invalid("at least one device name is required when no address is set");
                }
                None => {}
            }
            if bt.scan_retries == 0 {
                return invalid("scan_retries must be at least 1");
            }
        }
        if self.serial.baud_rate == 0 {
            return invalid("baud_rate must be non-zero");
        }
        if self.bridge.max_chunk == 0 {
            return invalid("max_chunk must be non-zero");
        }
        if self.bridge.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be non-zero");
        }
        Ok(())
    }
}
