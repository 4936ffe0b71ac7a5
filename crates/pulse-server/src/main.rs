use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use pulse_config::ConfigManager;
use pulse_rule::RuleLoader;
use pulse_server::{logging, shutdown, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 配置文件路径（TOML）；缺省时只用默认值与 PULSE__ 环境变量
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 校验配置与规则文件后打印生效配置并退出
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let manager = ConfigManager::load(args.config.clone()).context("failed to load configuration")?;
    let config = manager.current();

    if args.check_config {
        let rules = RuleLoader::new(config.rules.files.clone(), config.rules.evaluation_interval)
            .load()
            .context("failed to load alert rules")?;
        print!("{}", config.to_toml()?);
        eprintln!("configuration OK, {} rule(s) in {} group(s)", rules.len(), rules.groups().len());
        return Ok(());
    }

    logging::init(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "Starting Pulse"
    );

    let pipeline = Arc::new(Pipeline::build(Arc::new(manager)).await?);
    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());

    pipeline.run(cancel).await
}
