// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/bin/ppe_batch.rs - 批量图像合规检测
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
use tracing::{info, warn};
use url::Url;

use ppe_compliance::{
  FromUrl,
  config::{AppConfig, MODEL_URI_SCHEME},
  input::ImageListInput,
  output::OutputWrapper,
  parse_url_or_path,
  service::ComplianceService,
  task::{BatchTask, Task},
};

/// 使用同一个检测模型依次处理多张图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像列表（URL 或路径），支持 jpg、jpeg、png
  #[arg(long, value_name = "SOURCE", num_args = 1.., required = true)]
  pub input: Vec<String>,
  /// 输出位置：folder://<目录>、image://<文件> 或 none:，默认保存到 DETECTIONS_DIR
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<String>,
  /// 配置文件路径，默认 .streamlit/secrets.toml
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 检测模型（yolov5:///path/best.onnx?conf=0.2&iou=0.45&size=640 或直接给出路径），
  /// 指定后跳过权重获取，覆盖 MODEL_URI
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,
  /// 最多处理的图像数量
  #[arg(long, value_name = "COUNT")]
  pub limit: Option<usize>,
  /// 启动时立即加载模型，而不是等到第一张图像
  #[arg(long)]
  pub warm_up: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut config = AppConfig::load(args.config.as_deref())?;
  if let Some(model) = &args.model {
    config.model_uri = Some(parse_url_or_path(model, MODEL_URI_SCHEME)?);
  }

  let urls = args
    .input
    .iter()
    .map(|input| parse_url_or_path(input, "image"))
    .collect::<Result<Vec<Url>, _>>()?;
  let output_url = match &args.output {
    Some(output) => parse_url_or_path(output, "folder")?,
    None => parse_url_or_path(&config.detections_dir.display().to_string(), "folder")?,
  };
  info!("输入图像数量: {}", urls.len());
  info!("输出路径: {}", output_url);

  let output = OutputWrapper::from_url(&output_url)?;
  let service = ComplianceService::from_config(&config, output)?;
  if args.warm_up {
    service.warm_up()?;
  }

  let summary = BatchTask::default()
    .with_limit(args.limit)
    .run_task(ImageListInput::new(urls), &service)?;

  for report in &summary.reports {
    println!("{}", report.source);
    println!("  {}", report.detected_objects);
    println!("  {}", report.status_line);
  }
  for failure in &summary.failures {
    println!("FAILED {}", failure);
  }

  if summary.has_failures() {
    warn!("{} 张图像处理失败", summary.failures.len());
    anyhow::bail!("{} 张图像处理失败", summary.failures.len());
  }
  Ok(())
}
