use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xshell::{Shell, cmd};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "xtask", about = "Combridge 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建 combridge (release)
    Build,
    /// 运行桥接 (开发模式)
    Run {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
        /// 传给 combridge 的参数，例如: serial-tcp --port /dev/ttyUSB1
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// 不带蓝牙支持检查构建 (无 D-Bus 环境)
    CheckSerialOnly,
    /// 安装到 /usr/local/bin 并写入示例配置
    Install,
    /// 卸载
    Uninstall,
    /// 设置 capabilities (免 sudo 打开 RFCOMM)
    SetupCaps,
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 运行 clippy
    Clippy,
    /// 运行测试并生成覆盖率报告
    Coverage,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = match std::env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Run { log_level, args } => run(&sh, &log_level, &args)?,
        Commands::CheckSerialOnly => check_serial_only(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::SetupCaps => setup_caps(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Clippy => clippy(&sh)?,
        Commands::Coverage => coverage(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建 combridge...");
    cmd!(sh, "cargo build --release -p combridge-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn run(sh: &Shell, log_level: &str, args: &[String]) -> Result<()> {
    println!("🚀 启动开发模式桥接...");
    println!("   日志级别: {}", log_level);

    let rust_log = format!(
        "{level},combridge_core={level},bluer=info",
        level = log_level
    );
    let _env = sh.push_env("RUST_LOG", rust_log);
    cmd!(sh, "cargo run -p combridge-cli -- {args...}").run()?;
    Ok(())
}

fn check_serial_only(sh: &Shell) -> Result<()> {
    println!("🔍 检查无蓝牙构建...");
    cmd!(
        sh,
        "cargo check -p combridge-core -p combridge-cli --no-default-features"
    )
    .run()?;
    cmd!(sh, "cargo test -p combridge-core --no-default-features").run()?;
    println!("✅ 无蓝牙构建通过");
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 combridge...");

    build(sh)?;

    println!("📋 复制二进制文件...");
    cmd!(sh, "sudo cp target/release/combridge /usr/local/bin/").run()?;

    // 示例配置，已存在则保留
    if let Some(target) = user_config_file() {
        if target.exists() {
            println!("   保留现有配置: {}", target.display());
        } else {
            if let Some(dir) = target.parent() {
                sh.create_dir(dir)?;
            }
            sh.copy_file("assets/config.example.toml", &target)?;
            println!("   已写入示例配置: {}", target.display());
        }
    }

    println!("✅ 安装完成");
    println!("   使用 'combridge --help' 查看命令");
    println!("   使用 'combridge scan' 查找附近的电台");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 combridge...");
    let _ = cmd!(sh, "sudo rm /usr/local/bin/combridge").run();
    println!("✅ 卸载完成 (配置和缓存未删除)");
    Ok(())
}

fn setup_caps(sh: &Shell) -> Result<()> {
    println!("🔐 设置 capabilities (免 sudo 蓝牙操作)...");

    build(sh)?;

    // CAP_NET_RAW: RFCOMM 套接字
    // CAP_NET_ADMIN: 打开适配器电源
    cmd!(
        sh,
        "sudo setcap 'cap_net_admin,cap_net_raw+eip' target/release/combridge"
    )
    .run()?;

    println!("✅ Capabilities 设置完成");
    println!("   串口仍需要当前用户属于 dialout 组");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    let dist_name = format!("combridge-{}-linux-x86_64", VERSION);

    cmd!(sh, "mkdir -p dist/{dist_name}").run()?;
    cmd!(sh, "cp target/release/combridge dist/{dist_name}/").run()?;
    cmd!(sh, "cp assets/config.example.toml dist/{dist_name}/").run()?;
    let _ = cmd!(sh, "cp README.md dist/{dist_name}/").run();

    sh.change_dir("dist");
    cmd!(sh, "tar -czvf {dist_name}.tar.gz {dist_name}").run()?;

    println!("✅ 打包完成: dist/{}.tar.gz", dist_name);
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("📎 运行 clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets").run()?;
    println!("✅ clippy 通过");
    Ok(())
}

fn coverage(sh: &Shell) -> Result<()> {
    println!("📊 运行测试覆盖率分析...");

    // 检查 cargo-tarpaulin 是否安装
    if cmd!(sh, "cargo tarpaulin --version").run().is_err() {
        println!("📦 安装 cargo-tarpaulin...");
        cmd!(sh, "cargo install cargo-tarpaulin").run()?;
    }

    println!("🔍 分析中...");
    cmd!(
        sh,
        "cargo tarpaulin --packages combridge-core --out Html --output-dir target/coverage"
    )
    .run()?;

    println!("✅ 覆盖率报告已生成");
    println!("   HTML 报告: target/coverage/tarpaulin-report.html");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    cmd!(sh, "rm -rf dist").run()?;
    println!("✅ 清理完成");
    Ok(())
}

/// 与 combridge 读取的默认位置一致: `<config_dir>/combridge/config.toml`
fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("combridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_config_file_uses_platform_config_dir() {
        let Some(base) = dirs::config_dir() else {
            return;
        };
        let target = user_config_file().unwrap();
        assert!(target.starts_with(&base));
        assert!(target.ends_with("combridge/config.toml"));
    }
}
