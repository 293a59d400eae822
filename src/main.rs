//! Chips Init 命令行入口
//!
//! # 命令概览
//!
//! - `demo` - 运行 `tbase` / `tdep` 示例
//! - `run` - 按清单注册并初始化模块
//! - `order` - 打印清单解析出的初始化顺序
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 正确顺序
//! chips-init demo
//!
//! # 强制 tdep 先于 tbase 初始化，进程在 tdep 使用 tbase 时终止
//! chips-init demo --force-order
//!
//! # 按清单初始化
//! chips-init -c init.yaml run -m modules.yaml
//! ```
//!
//! 诊断行写到标准输出，运行日志写到标准错误。

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use chips_init::module::fixture::{forced_misorder, register_fixture, FixtureLayout};
use chips_init::{
    InitConfig, InitCoordinator, Logger, LoggerConfig, ManifestLoader, ModuleLoader,
    ModuleRegistry,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

const DEFAULT_CONFIG: &str = "chips-init.yaml";

/// Chips Init - 薯片模块初始化协调器
///
/// 按依赖顺序初始化模块，检测到初始化前使用时立即终止进程。
#[derive(Parser)]
#[command(name = "chips-init")]
#[command(version, about = "薯片模块初始化协调器", long_about = None)]
#[command(author = "Chips Team")]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = DEFAULT_CONFIG, global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 运行 tbase / tdep 示例
    ///
    /// 默认按正确顺序初始化后调用 tdep 的 use。
    Demo {
        /// tdep 先注册且漏掉对 tbase 的依赖声明
        #[arg(long, conflicts_with = "force_order")]
        misconfigured: bool,

        /// 强制 tdep 先于 tbase 初始化（关闭依赖校验）
        #[arg(long)]
        force_order: bool,
    },

    /// 按清单注册并初始化模块，输出 JSON 格式的初始化报告
    Run {
        /// 模块清单路径（默认取配置文件中的 manifest）
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// 打印清单解析出的初始化顺序
    Order {
        /// 模块清单路径（默认取配置文件中的 manifest）
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// 验证配置文件（路径取全局 --config）
    CheckConfig,

    /// 查看版本信息
    Version,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            print_version();
            return Ok(());
        }
        Some(Commands::CheckConfig) => return check_config(&cli.config).await,
        _ => {}
    }

    let (mut config, loaded) = load_config(&cli.config).await?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
        config.validate()?;
    }

    let _guard = Logger::init(LoggerConfig::from_log_config(&config.logging))?;
    if loaded {
        info!(path = %cli.config.display(), "已加载配置文件");
    } else {
        debug!(path = %cli.config.display(), "配置文件不存在，使用默认配置");
    }

    match cli.command {
        Some(Commands::Demo {
            misconfigured,
            force_order,
        }) => run_demo(&config, misconfigured, force_order),
        Some(Commands::Run { manifest }) => {
            let path = manifest_path(manifest, &config)?;
            run_manifest(&config, &path).await
        }
        Some(Commands::Order { manifest }) => {
            let path = manifest_path(manifest, &config)?;
            show_order(&config, &path).await
        }
        None => run_demo(&config, false, false),
        Some(Commands::Version) | Some(Commands::CheckConfig) => Ok(()),
    }
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path) -> CliResult<(InitConfig, bool)> {
    if path.exists() {
        Ok((InitConfig::from_file(path).await?, true))
    } else {
        Ok((InitConfig::default(), false))
    }
}

fn manifest_path(arg: Option<PathBuf>, config: &InitConfig) -> CliResult<PathBuf> {
    arg.or_else(|| config.manifest.clone())
        .ok_or_else(|| "未指定模块清单，请使用 --manifest 或在配置文件中设置 manifest".into())
}

fn registry_for(config: &InitConfig) -> ModuleRegistry {
    ModuleRegistry::with_context(Arc::new(config.coordinator.context()))
}

/// 运行示例
fn run_demo(config: &InitConfig, misconfigured: bool, force_order: bool) -> CliResult<()> {
    let registry = registry_for(config);
    let layout = if misconfigured {
        FixtureLayout::Misconfigured
    } else {
        FixtureLayout::Correct
    };
    let fixture = register_fixture(&registry, layout)?;
    let set = registry.finalize()?;

    let coordinator = if force_order {
        warn!("强制 tdep 先于 tbase 初始化");
        InitCoordinator::with_order(set, &forced_misorder())?
            .with_config(&config.coordinator)
            .verify_dependencies(false)
    } else {
        InitCoordinator::new(set).with_config(&config.coordinator)
    };

    coordinator.run()?;
    fixture.tdep.use_module();
    Ok(())
}

/// 按清单初始化
async fn run_manifest(config: &InitConfig, path: &Path) -> CliResult<()> {
    let loader = ManifestLoader::from_file(path).await?;
    let registry = registry_for(config);
    loader.load(&registry)?;

    let coordinator = InitCoordinator::new(registry.finalize()?).with_config(&config.coordinator);
    let report = coordinator.run()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// 打印初始化顺序
async fn show_order(config: &InitConfig, path: &Path) -> CliResult<()> {
    let loader = ManifestLoader::from_file(path).await?;
    let registry = registry_for(config);
    loader.load(&registry)?;

    let set = registry.finalize()?;
    for (index, id) in set.order().iter().enumerate() {
        let deps = set
            .get(id)
            .map(|h| h.descriptor().dependency_ids().join(", "))
            .unwrap_or_default();
        if deps.is_empty() {
            println!("{:>3}. {}", index + 1, id);
        } else {
            println!("{:>3}. {} (依赖: {})", index + 1, id, deps);
        }
    }
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> CliResult<()> {
    println!("检查配置文件: {}", path.display());
    println!();

    let config = if path.exists() {
        match InitConfig::from_file(path).await {
            Ok(config) => {
                println!("✅ 配置文件有效！");
                config
            }
            Err(e) => {
                println!("❌ 配置文件无效: {}", e);
                return Err(Box::new(e));
            }
        }
    } else {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        InitConfig::default()
    };

    println!();
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [协调器配置]");
    println!("    依赖校验:       {}", if config.coordinator.verify_dependencies { "启用" } else { "禁用" });
    println!("    违规处理:       {:?}", config.coordinator.on_violation);
    if let Some(ref manifest) = config.manifest {
        println!();
        println!("  [模块清单]");
        println!("    路径:           {}", manifest.display());
    }
    println!("────────────────────────────────────────");
    Ok(())
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Init - 薯片模块初始化协调器");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_init::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}
