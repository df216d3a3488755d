//! 流量日志
//!
//! 每个被转发的数据块都以 debug 级别记录到 [`TRAFFIC_TARGET`]，
//! 仅供诊断，不影响转发本身。

use log::{Level, debug, log_enabled};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 流量日志使用的 target，可单独用 `RUST_LOG` 过滤
pub const TRAFFIC_TARGET: &str = "combridge_core::traffic";

/// 负载的呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    /// 十六进制
    #[default]
    Hex,
    /// 可打印 ASCII，其余字节转义
    Text,
    /// 不记录负载
    Off,
}

impl TraceFormat {
    pub fn name(&self) -> &'static str {
        match self {
            TraceFormat::Hex => "hex",
            TraceFormat::Text => "text",
            TraceFormat::Off => "off",
        }
    }
}

impl std::str::FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hex" => Ok(TraceFormat::Hex),
            "text" => Ok(TraceFormat::Text),
            "off" | "none" => Ok(TraceFormat::Off),
            other => Err(format!(
                "unknown trace format '{other}' (expected hex, text or off)"
            )),
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 按格式渲染负载
pub fn format_payload(data: &[u8], format: TraceFormat) -> String {
    match format {
        TraceFormat::Hex => hex::encode(data),
        TraceFormat::Text => data.escape_ascii().to_string(),
        TraceFormat::Off => String::new(),
    }
}

/// 记录一个转发的数据块
pub fn trace_chunk(flow: &str, data: &[u8], format: TraceFormat) {
    if format == TraceFormat::Off || !log_enabled!(target: TRAFFIC_TARGET, Level::Debug) {
        return;
    }
    debug!(
        target: TRAFFIC_TARGET,
        "{flow}: {} bytes {}",
        data.len(),
        format_payload(data, format)
    );
}
