// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/task.rs - 任务定义
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

use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{error, info, warn};

use crate::compliance::ComplianceStatus;
use crate::input::{InputError, Upload};
use crate::model::{DetectResult, Model, PpeLabel};
use crate::service::{ComplianceReport, ComplianceService, ServiceError};

pub trait Task<I, M>: Sized {
  type Error;
  fn run_task(self, input: I, service: &ComplianceService<M>) -> Result<TaskSummary, Self::Error>;
}

/// 单张图像的展示结果（不含图像数据）
#[derive(Debug, Clone)]
pub struct ReportLine {
  pub source: String,
  pub detected_objects: String,
  pub status_line: String,
  pub status: ComplianceStatus,
  pub saved: Vec<PathBuf>,
}

impl From<&ComplianceReport> for ReportLine {
  fn from(report: &ComplianceReport) -> Self {
    ReportLine {
      source: report.source.clone(),
      detected_objects: report.detected_objects_line(),
      status_line: report.status_line(),
      status: report.status(),
      saved: report.saved.clone(),
    }
  }
}

#[derive(Debug, Default)]
pub struct TaskSummary {
  pub reports: Vec<ReportLine>,
  /// 处理失败的图像及原因
  pub failures: Vec<String>,
  pub elapsed: Duration,
}

impl TaskSummary {
  pub fn has_failures(&self) -> bool {
    !self.failures.is_empty()
  }
}

pub struct OneShotTask;

impl<I, M, E> Task<I, M> for OneShotTask
where
  I: Iterator<Item = Result<Upload, InputError>>,
  M: Model<Input = RgbImage, Output = DetectResult<PpeLabel>, Error = E>,
  E: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, service: &ComplianceService<M>) -> Result<TaskSummary, Self::Error> {
    info!("开始任务...");
    let upload = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))??;
    info!("输入图像获取成功: {}, 开始检测...", upload.name);
    let now = Instant::now();
    let report = service.process(upload)?;
    let elapsed = now.elapsed();
    info!("检测完成，耗时: {:.2?}", elapsed);

    Ok(TaskSummary {
      reports: vec![ReportLine::from(&report)],
      failures: Vec::new(),
      elapsed,
    })
  }
}

/// 依次处理多张图像，共享同一个模型。
///
/// 单张图像的错误记录后继续；致命错误（配置、权重、模型加载）立即终止。
#[derive(Default, Debug)]
pub struct BatchTask {
  limit: Option<usize>,
}

impl BatchTask {
  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }
}

impl<I, M, E> Task<I, M> for BatchTask
where
  I: Iterator<Item = Result<Upload, InputError>>,
  M: Model<Input = RgbImage, Output = DetectResult<PpeLabel>, Error = E>,
  E: StdError + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, service: &ComplianceService<M>) -> Result<TaskSummary, Self::Error> {
    info!("开始批量任务...");
    let start = Instant::now();
    let mut summary = TaskSummary::default();
    let mut times = Vec::new();

    for (index, upload) in input.enumerate() {
      if self.limit.is_some_and(|n| index >= n) {
        info!("达到指定数量 {}, 退出任务循环", index);
        break;
      }

      let outcome = upload
        .map_err(ServiceError::from)
        .and_then(|upload| {
          info!("处理第 {} 张图像: {}", index + 1, upload.name);
          let now = Instant::now();
          let report = service.process(upload)?;
          times.push(now.elapsed());
          Ok(report)
        });

      match outcome {
        Ok(report) => summary.reports.push(ReportLine::from(&report)),
        Err(e) if e.is_fatal() => {
          error!("致命错误, 终止任务: {}", e);
          return Err(e.into());
        }
        Err(e) => {
          warn!("第 {} 张图像处理失败: {}", index + 1, e);
          summary.failures.push(format!("#{}: {}", index + 1, e));
        }
      }
    }

    if !times.is_empty() {
      info!(
        "平均处理时间: {:.2?}",
        times.iter().sum::<Duration>() / times.len() as u32
      );
    }
    summary.elapsed = start.elapsed();
    info!(
      "批量任务完成: 成功 {}, 失败 {}, 总耗时 {:.2?}",
      summary.reports.len(),
      summary.failures.len(),
      summary.elapsed
    );
    Ok(summary)
  }
}
