//! 凭据缓存模块
//!
//! 内存中只保存一份凭据，读取无锁；每次更新后写回本地 JSON 文件，
//! 进程重启后可继续使用尚未过期的凭据。文件读写失败只记录日志，不影响调用方。

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wsaa_common::{CredentialPair, Result};

/// 凭据缓存
pub struct CredentialCache {
    /// 当前凭据
    slot: ArcSwapOption<CredentialPair>,
    /// 持久化文件
    path: PathBuf,
}

impl CredentialCache {
    /// 空缓存
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            path: path.into(),
        }
    }

    /// 从文件恢复缓存
    ///
    /// 文件不存在时为空缓存；内容损坏时保留文件并以空缓存启动；
    /// 凭据已过期时删除文件。
    pub async fn load(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        let cache = Self::empty(path);

        let content = match tokio::fs::read_to_string(&cache.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!(path = %cache.path.display(), "缓存文件不存在");
                return cache;
            }
            Err(e) => {
                warn!(path = %cache.path.display(), error = %e, "无法读取缓存文件");
                return cache;
            }
        };

        let pair = match serde_json::from_str::<CredentialPair>(&content) {
            Ok(pair) if pair.is_complete() => pair,
            Ok(_) => {
                warn!(path = %cache.path.display(), "缓存文件中的凭据不完整，忽略");
                return cache;
            }
            Err(e) => {
                warn!(path = %cache.path.display(), error = %e, "缓存文件已损坏，忽略");
                return cache;
            }
        };

        if pair.is_expired(now) {
            info!(expiration_time = %pair.expiration_time, "缓存的凭据已过期，删除缓存文件");
            if let Err(e) = tokio::fs::remove_file(&cache.path).await {
                warn!(path = %cache.path.display(), error = %e, "无法删除过期的缓存文件");
            }
            return cache;
        }

        info!(
            expiration_time = %pair.expiration_time,
            remaining_minutes = pair.remaining(now).num_minutes(),
            "从缓存文件恢复凭据"
        );
        cache.slot.store(Some(Arc::new(pair)));
        cache
    }

    /// 当前凭据
    pub fn current(&self) -> Option<Arc<CredentialPair>> {
        self.slot.load_full()
    }

    /// 替换当前凭据并写回文件
    pub async fn store(&self, pair: CredentialPair) -> Arc<CredentialPair> {
        let pair = Arc::new(pair);
        self.slot.store(Some(pair.clone()));

        match self.persist(&pair).await {
            Ok(()) => debug!(path = %self.path.display(), "凭据已写入缓存文件"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "无法写入缓存文件，仅保留内存中的凭据"),
        }
        pair
    }

    /// 持久化文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, pair: &CredentialPair) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_vec_pretty(pair)?;
        let tmp_path = temp_path(&self.path);
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
