// 该文件是 PPE Compliance （安全装备合规检测） 项目的一部分。
// src/weights/http_fetch.rs - HTTP 下载
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};
use url::Url;

use super::{Fetch, FetchError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpFetcher {
  agent: ureq::Agent,
}

impl Default for HttpFetcher {
  fn default() -> Self {
    let agent = ureq::AgentBuilder::new()
      .timeout_connect(CONNECT_TIMEOUT)
      .redirects(10)
      .build();
    Self { agent }
  }
}

impl Fetch for HttpFetcher {
  fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
    let response = self
      .agent
      .request_url("GET", url)
      .call()
      .map_err(Box::new)?;

    debug!(
      "响应: {} {}, Content-Type: {}",
      response.status(),
      response.status_text(),
      response.content_type()
    );
    if let Some(length) = response.header("Content-Length") {
      info!("模型权重大小: {} 字节", length);
    }

    let mut reader = response.into_reader();
    let mut writer = BufWriter::new(File::create(dest)?);
    let size = std::io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    Ok(size)
  }
}
