//! 命令行参数
//!
//! 每个参数都是可选的，给出时覆盖配置文件中的对应值。

use clap::{Args, Parser, Subcommand};
use combridge_core::TraceFormat;
use combridge_core::config::{BluetoothSettings, BridgeSettings, SerialSettings, TcpSettings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "combridge",
    version,
    about = "蓝牙 / 串口 / TCP 双向字节桥接"
)]
pub struct Cli {
    /// 配置文件路径 (默认: ~/.config/combridge/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 输出更详细的日志 (-v 为 trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 蓝牙 ↔ 串口
    #[cfg(feature = "bluetooth")]
    BtSerial {
        #[command(flatten)]
        bluetooth: BluetoothArgs,
        #[command(flatten)]
        serial: SerialArgs,
        #[command(flatten)]
        bridge: BridgeArgs,
    },
    /// 串口 ↔ TCP 客户端
    SerialTcp {
        #[command(flatten)]
        serial: SerialArgs,
        #[command(flatten)]
        tcp: TcpArgs,
        #[command(flatten)]
        bridge: BridgeArgs,
    },
    /// 蓝牙 ↔ TCP 客户端
    #[cfg(feature = "bluetooth")]
    BtTcp {
        #[command(flatten)]
        bluetooth: BluetoothArgs,
        #[command(flatten)]
        tcp: TcpArgs,
        #[command(flatten)]
        bridge: BridgeArgs,
    },
    /// 扫描附近的蓝牙设备
    #[cfg(feature = "bluetooth")]
    Scan {
        /// 扫描超时时间 (秒，默认取配置中的 scan_timeout_secs)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

#[derive(Args, Debug, Default)]
pub struct BluetoothArgs {
    /// 候选设备名称片段，可重复 (替换配置中的列表)
    #[arg(short, long = "name")]
    pub names: Vec<String>,

    /// 设备地址，设置后跳过扫描
    #[arg(short, long)]
    pub address: Option<String>,

    /// RFCOMM 通道
    #[arg(long)]
    pub channel: Option<u8>,

    /// 扫描次数
    #[arg(long)]
    pub retries: Option<u32>,

    /// 每次扫描的时长 (秒)
    #[arg(long)]
    pub scan_timeout: Option<u64>,

    /// 不使用上次连接的地址
    #[arg(long)]
    pub no_cache: bool,
}

impl BluetoothArgs {
    pub fn apply(self, settings: &mut BluetoothSettings) {
        if !self.names.is_empty() {
            settings.names = self.names;
        }
        if self.address.is_some() {
            settings.address = self.address;
        }
        if let Some(channel) = self.channel {
            settings.channel = channel;
        }
        if let Some(retries) = self.retries {
            settings.scan_retries = retries;
        }
        if let Some(secs) = self.scan_timeout {
            settings.scan_timeout_secs = secs;
        }
        if self.no_cache {
            settings.use_cache = false;
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct SerialArgs {
    /// 串口设备
    #[arg(long)]
    pub port: Option<String>,

    /// 波特率
    #[arg(short, long)]
    pub baud: Option<u32>,
}

impl SerialArgs {
    pub fn apply(self, settings: &mut SerialSettings) {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct TcpArgs {
    /// 监听地址
    #[arg(long)]
    pub bind: Option<String>,

    /// 监听端口
    #[arg(short = 'p', long = "listen-port")]
    pub listen_port: Option<u16>,
}

impl TcpArgs {
    pub fn apply(self, settings: &mut TcpSettings) {
        if let Some(bind) = self.bind {
            settings.bind_address = bind;
        }
        if let Some(port) = self.listen_port {
            settings.port = port;
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct BridgeArgs {
    /// 读超时 / 关闭检查间隔 (毫秒)
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// 流量日志格式: hex | text | off
    #[arg(long)]
    pub trace: Option<TraceFormat>,
}

impl BridgeArgs {
    pub fn apply(self, settings: &mut BridgeSettings) {
        if let Some(ms) = self.poll_interval_ms {
            settings.poll_interval_ms = ms;
        }
        if let Some(trace) = self.trace {
            settings.trace = trace;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serial_tcp_overrides() {
        let cli = Cli::try_parse_from([
            "combridge",
            "serial-tcp",
            "--port",
            "/dev/ttyACM0",
            "-b",
            "115200",
            "-p",
            "9000",
            "--trace",
            "text",
        ])
        .unwrap();

        let Commands::SerialTcp {
            serial,
            tcp,
            bridge,
        } = cli.command
        else {
            panic!("expected serial-tcp");
        };

        let mut config = combridge_core::BridgeConfig::default();
        serial.apply(&mut config.serial);
        tcp.apply(&mut config.tcp);
        bridge.apply(&mut config.bridge);

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.tcp.port, 9000);
        assert_eq!(config.tcp.bind_address, "0.0.0.0");
        assert_eq!(config.bridge.trace, TraceFormat::Text);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["combridge", "serial-tcp", "-v", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }

    #[cfg(feature = "bluetooth")]
    #[test]
    fn test_bluetooth_overrides() {
        let cli = Cli::try_parse_from([
            "combridge",
            "bt-serial",
            "-n",
            "UV-PRO",
            "-n",
            "GA-5WB",
            "--channel",
            "1",
            "--scan-timeout",
            "4",
            "--no-cache",
        ])
        .unwrap();

        let Commands::BtSerial { bluetooth, .. } = cli.command else {
            panic!("expected bt-serial");
        };
        let mut settings = BluetoothSettings::default();
        bluetooth.apply(&mut settings);

        assert_eq!(settings.names, ["UV-PRO", "GA-5WB"]);
        assert_eq!(settings.channel, 1);
        assert!(!settings.use_cache);
        assert_eq!(settings.scan_timeout_secs, 4);
        assert_eq!(settings.scan_retries, 3);
    }

    #[cfg(feature = "bluetooth")]
    #[test]
    fn test_scan_timeout_defaults_to_config() {
        let cli = Cli::try_parse_from(["combridge", "scan"]).unwrap();
        let Commands::Scan { timeout } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(timeout, None);

        let cli = Cli::try_parse_from(["combridge", "scan", "-t", "3"]).unwrap();
        let Commands::Scan { timeout } = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(timeout, Some(3));
    }
}
