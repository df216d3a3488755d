//! 设备发现
//!
//! 只知道名称片段时，通过扫描把对端设备解析为可连接的地址。
//!
//! # 匹配规则
//!
//! - 跳过没有广播名称的设备
//! - 候选名称按顺序做大小写不敏感的子串匹配
//! - 按扫描结果顺序返回**第一个**匹配任一候选的设备（不做最佳匹配排序）
//!
//! # 重试
//!
//! 每次扫描有超时上限。扫描出错（适配器不可用、权限不足）只算一次失败的尝试，
//! 不会中止剩余的重试。用尽重试后返回 [`DiscoveryError::NotFound`]，这是正常结果。

#[cfg(feature = "bluetooth")]
mod bluez;
mod cache;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezScanner;
pub use cache::{CacheError, CachedPeer, PeerCache};

use async_trait::async_trait;
use log::{info, warn};
use std::fmt;
use std::time::Duration;

use crate::shutdown::ShutdownSignal;

/// 扫描超时之外允许扫描器收尾（例如枚举适配器缓存）的额外时间
const SCAN_GRACE: Duration = Duration::from_secs(5);

/// 有序的候选名称集合，运行期间不可变
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateNames {
    names: Vec<String>,
    lowered: Vec<String>,
}

impl CandidateNames {
    /// 空白名称会被忽略
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|n| !n.trim().is_empty())
            .collect();
        let lowered = names.iter().map(|n| n.to_lowercase()).collect();
        Self { names, lowered }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// 返回第一个作为子串出现在 `device_name` 中的候选名称
    pub fn matching(&self, device_name: &str) -> Option<&str> {
        if device_name.is_empty() {
            return None;
        }
        let device_name = device_name.to_lowercase();
        self.lowered
            .iter()
            .position(|candidate| device_name.contains(candidate.as_str()))
            .map(|i| self.names[i].as_str())
    }
}

impl fmt::Display for CandidateNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

/// 一次扫描中看到的设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub address: String,
    pub name: Option<String>,
}

impl ScannedDevice {
    pub fn new(address: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
        }
    }
}

/// 发现成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub address: String,
    /// 设备广播的名称
    pub name: String,
    /// 命中的候选名称
    pub matched: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Scan timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Scan failed: {0}")]
    Failed(String),

    #[cfg(feature = "bluetooth")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("No Bluetooth device matching {names} found after {attempts} attempt(s)")]
    NotFound { names: String, attempts: u32 },

    #[error("Discovery cancelled")]
    Cancelled,
}

/// 扫描器接口，生产环境由 BlueZ 实现
#[async_trait]
pub trait DeviceScanner: Send + Sync {
    /// 扫描 `timeout` 时长，按首次出现的顺序返回可见设备
    async fn scan(&self, timeout: Duration) -> Result<Vec<ScannedDevice>, ScanError>;
}

/// 在扫描结果中按顺序找第一个匹配
pub fn first_match(devices: &[ScannedDevice], names: &CandidateNames) -> Option<DiscoveredPeer> {
    devices.iter().find_map(|device| {
        let name = device.name.as_deref()?;
        let matched = names.matching(name)?;
        Some(DiscoveredPeer {
            address: device.address.clone(),
            name: name.to_string(),
            matched: matched.to_string(),
        })
    })
}

/// 校验蓝牙地址格式：六组以冒号分隔的两位十六进制数
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 17
        && address.split(':').count() == 6
        && address
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub retries: u32,
    pub scan_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            scan_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Discovery<S> {
    scanner: S,
    options: DiscoveryOptions,
}

impl<S: DeviceScanner> Discovery<S> {
    pub fn new(scanner: S, options: DiscoveryOptions) -> Self {
        Self { scanner, options }
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    /// 扫描直到找到匹配，或用尽重试次数
    pub async fn find(
        &self,
        names: &CandidateNames,
        shutdown: &ShutdownSignal,
    ) -> Result<DiscoveredPeer, DiscoveryError> {
        let retries = self.options.retries;

        for attempt in 1..=retries {
            if shutdown.is_shutdown_requested() {
                return Err(DiscoveryError::Cancelled);
            }
            info!("Scanning for Bluetooth devices (attempt {attempt}/{retries})...");

            let scan = tokio::time::timeout(
                self.options.scan_timeout + SCAN_GRACE,
                self.scanner.scan(self.options.scan_timeout),
            );
            let result = tokio::select! {
                () = shutdown.cancelled() => return Err(DiscoveryError::Cancelled),
                res = scan => res.unwrap_or(Err(ScanError::TimedOut(self.options.scan_timeout))),
            };

            match result {
                Ok(devices) => {
                    for device in &devices {
                        info!(
                            "Found Bluetooth device: {} - {}",
                            device.name.as_deref().unwrap_or("<unknown>"),
                            device.address
                        );
                    }
                    if let Some(peer) = first_match(&devices, names) {
                        info!("Matched device '{}' with {}", peer.name, peer.matched);
                        return Ok(peer);
                    }
                    info!("No matching devices found in this attempt");
                }
                Err(e) => warn!("Error during Bluetooth scan: {e}"),
            }
        }

        warn!("Failed to find any matching Bluetooth device after {retries} attempts");
        Err(DiscoveryError::NotFound {
            names: names.to_string(),
            attempts: retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownReason;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 按脚本逐次返回扫描结果，脚本用完后返回空列表
    #[derive(Default)]
    struct ScriptedScanner {
        script: Mutex<Vec<Result<Vec<ScannedDevice>, ScanError>>>,
        calls: AtomicU32,
    }

    impl ScriptedScanner {
        fn new(mut script: Vec<Result<Vec<ScannedDevice>, ScanError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeviceScanner for ScriptedScanner {
        async fn scan(&self, _timeout: Duration) -> Result<Vec<ScannedDevice>, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(Ok(Vec::new()))
        }
    }

    fn radio_names() -> CandidateNames {
        CandidateNames::new(["UV-PRO", "GA-5WB"])
    }

    fn options(retries: u32) -> DiscoveryOptions {
        DiscoveryOptions {
            retries,
            scan_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_substring_match_is_case_insensitive() {
        let names = radio_names();
        assert_eq!(names.matching("My-UV-PRO-Radio"), Some("UV-PRO"));
        assert_eq!(names.matching("my-uv-pro-radio"), Some("UV-PRO"));
        assert_eq!(names.matching("ga-5wb"), Some("GA-5WB"));
        assert_eq!(names.matching("VR-N76"), None);
        assert_eq!(names.matching(""), None);
    }

    #[test]
    fn test_candidates_checked_in_order() {
        let names = CandidateNames::new(["PRO", "UV"]);
        assert_eq!(names.matching("UV-PRO"), Some("PRO"));
    }

    #[test]
    fn test_blank_candidates_ignored() {
        let names = CandidateNames::new(["", "  ", "UV-PRO"]);
        assert_eq!(names.len(), 1);
        assert_eq!(names.to_string(), "[UV-PRO]");
    }

    #[test]
    fn test_first_match_in_scan_order() {
        let devices = vec![
            ScannedDevice::new("AA:AA:AA:AA:AA:AA", None),
            ScannedDevice::new("BB:BB:BB:BB:BB:BB", Some("Headphones")),
            ScannedDevice::new("CC:CC:CC:CC:CC:CC", Some("GA-5WB")),
            ScannedDevice::new("DD:DD:DD:DD:DD:DD", Some("UV-PRO")),
        ];
        let peer = first_match(&devices, &radio_names()).unwrap();
        // 第一个匹配获胜，即使 UV-PRO 在候选列表中更靠前
        assert_eq!(peer.address, "CC:CC:CC:CC:CC:CC");
        assert_eq!(peer.matched, "GA-5WB");
    }

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address("38:D2:00:01:0A:ff"));
        assert!(!is_valid_address("38:D2:00:01:0A"));
        assert!(!is_valid_address("38-D2-00-01-0A-FF"));
        assert!(!is_valid_address("38:D2:00:01:0A:FG"));
        assert!(!is_valid_address("38:D2:00:01:0AF:F"));
    }

    #[tokio::test]
    async fn test_find_returns_partial_name_match() {
        let scanner = ScriptedScanner::new(vec![Ok(vec![
            ScannedDevice::new("11:22:33:44:55:66", Some("Speaker")),
            ScannedDevice::new("38:D2:00:01:0A:FF", Some("My-UV-PRO-Radio")),
        ])]);
        let discovery = Discovery::new(scanner, options(3));

        let peer = discovery
            .find(&radio_names(), &ShutdownSignal::new())
            .await
            .unwrap();

        assert_eq!(peer.address, "38:D2:00:01:0A:FF");
        assert_eq!(peer.name, "My-UV-PRO-Radio");
        assert_eq!(discovery.scanner().calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_after_exact_retry_count() {
        let scanner = ScriptedScanner::new(vec![
            Ok(vec![ScannedDevice::new("11:22:33:44:55:66", Some("Speaker"))]),
            Ok(vec![]),
        ]);
        let discovery = Discovery::new(scanner, options(3));

        let err = discovery
            .find(&radio_names(), &ShutdownSignal::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DiscoveryError::NotFound { attempts: 3, .. }));
        assert_eq!(discovery.scanner().calls(), 3);
    }

    #[tokio::test]
    async fn test_scan_error_counts_as_failed_attempt() {
        let scanner = ScriptedScanner::new(vec![
            Err(ScanError::NoAdapter),
            Err(ScanError::Failed("permission denied".into())),
            Ok(vec![ScannedDevice::new("38:D2:00:01:0A:FF", Some("UV-PRO"))]),
        ]);
        let discovery = Discovery::new(scanner, options(3));

        let peer = discovery
            .find(&radio_names(), &ShutdownSignal::new())
            .await
            .unwrap();

        assert_eq!(peer.matched, "UV-PRO");
        assert_eq!(discovery.scanner().calls(), 3);
    }

    #[tokio::test]
    async fn test_find_cancelled_by_shutdown() {
        let discovery = Discovery::new(ScriptedScanner::default(), options(5));
        let shutdown = ShutdownSignal::new();
        shutdown.request_shutdown(ShutdownReason::Signal);

        let err = discovery.find(&radio_names(), &shutdown).await.unwrap_err();

        assert!(matches!(err, DiscoveryError::Cancelled));
        assert_eq!(discovery.scanner().calls(), 0);
    }
}
