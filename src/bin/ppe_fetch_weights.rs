// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/bin/ppe_fetch_weights.rs - 获取模型权重
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 PPE Compliance Contributors

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use ppe_compliance::config::AppConfig;
use ppe_compliance::weights::sha256_file;

/// 按配置获取并校验模型权重，输出本地路径
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径，默认 .streamlit/secrets.toml
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 丢弃已有缓存，重新获取
  #[arg(long)]
  pub force: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = AppConfig::load(args.config.as_deref())?;
  let provider = config.weights_provider();
  info!("模型权重目标路径: {}", provider.target().display());
  for (idx, source) in provider.sources().iter().enumerate() {
    info!("权重来源 {}: {}", idx, source);
  }

  let acquired = if args.force {
    provider.reacquire(None)?
  } else {
    provider.acquire()?
  };

  info!("SHA-256: {}", sha256_file(&acquired.path)?);
  println!("{}", acquired.path.display());
  Ok(())
}
