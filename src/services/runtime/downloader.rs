//! 运行时压缩包下载
//!
//! 流式写入临时文件，按固定间隔上报进度（而不是每个数据块都上报），
//! 并用 Content-Length 校验下载是否完整。

use crate::core::error::ProvisionError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// 下载进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    /// 0.0 ~ 100.0，总长度未知时为 None
    pub percent: Option<f32>,
}

impl DownloadProgress {
    pub fn new(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        let percent = total_bytes.map(|total| {
            if total > 0 {
                (bytes_downloaded as f32 / total as f32) * 100.0
            } else {
                0.0
            }
        });
        Self {
            bytes_downloaded,
            total_bytes,
            percent,
        }
    }
}

/// 进度回调
pub type ProgressCallback<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// 进度节流：首尾必报，中间至少间隔 `interval`
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_report(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// 压缩包下载接口（测试中替换为内存实现）
#[async_trait]
pub trait ArchiveDownloader: Send + Sync {
    /// 下载到 `dest`，返回写入的字节数
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<u64, ProvisionError>;
}

/// 基于 reqwest 的下载器
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    progress_interval: Duration,
}

impl HttpDownloader {
    pub fn new(client: Client, progress_interval: Duration) -> Self {
        Self {
            client,
            progress_interval,
        }
    }
}

#[async_trait]
impl ArchiveDownloader for HttpDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<u64, ProvisionError> {
        tracing::info!(url, dest = %dest.display(), "开始下载运行时");

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProvisionError::io(parent, e))?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProvisionError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total_bytes = response.content_length();
        tracing::debug!(content_length = ?total_bytes, "收到响应");

        let mut file = File::create(dest)
            .await
            .map_err(|e| ProvisionError::io(dest, e))?;
        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut throttle = ProgressThrottle::new(self.progress_interval);

        throttle.should_report(Instant::now());
        on_progress(DownloadProgress::new(0, total_bytes));

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(url, received, error = %e, "下载数据流中断");
                    drop(file);
                    let _ = tokio::fs::remove_file(dest).await;
                    return Err(ProvisionError::Truncated {
                        received,
                        expected: total_bytes,
                    });
                }
            };
            file.write_all(&chunk)
                .await
                .map_err(|e| ProvisionError::io(dest, e))?;
            received += chunk.len() as u64;

            if throttle.should_report(Instant::now()) {
                on_progress(DownloadProgress::new(received, total_bytes));
            }
        }

        file.flush().await.map_err(|e| ProvisionError::io(dest, e))?;

        if let Some(expected) = total_bytes {
            if received != expected {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(ProvisionError::Truncated {
                    received,
                    expected: Some(expected),
                });
            }
        }
        on_progress(DownloadProgress::new(received, total_bytes));

        tracing::info!(url, bytes = received, "运行时下载完成");
        Ok(received)
    }
}
