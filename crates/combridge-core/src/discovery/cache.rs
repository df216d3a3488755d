//! 上次连接成功的对端地址缓存
//!
//! 缓存存在且有效时可以跳过扫描直接连接。读写失败只记录日志。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::{DiscoveredPeer, is_valid_address};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedPeer {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&DiscoveredPeer> for CachedPeer {
    fn from(peer: &DiscoveredPeer) -> Self {
        Self {
            address: peer.address.clone(),
            name: Some(peer.name.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Peer cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode peer cache: {0}")]
    Encode(#[from] toml::ser::Error),
}

#[derive(Debug, Clone)]
pub struct PeerCache {
    path: PathBuf,
}

impl PeerCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<cache_dir>/combridge/last_peer.toml`
    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("combridge")
            .join("last_peer.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取缓存；文件不存在、损坏或地址无效时返回 `None`
    pub fn load(&self) -> Option<CachedPeer> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read peer cache {:?}: {}", self.path, e);
                return None;
            }
        };

        match toml::from_str::<CachedPeer>(&content) {
            Ok(peer) if is_valid_address(&peer.address) => {
                debug!("Loaded cached peer {} from {:?}", peer.address, self.path);
                Some(peer)
            }
            Ok(peer) => {
                warn!("Ignoring invalid cached address '{}'", peer.address);
                None
            }
            Err(e) => {
                warn!("Failed to parse peer cache: {}", e);
                None
            }
        }
    }

    pub fn save(&self, peer: &CachedPeer) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(peer)?;
        fs::write(&self.path, content)?;
        debug!("Saved peer {} to {:?}", peer.address, self.path);
        Ok(())
    }
}
