//! 凭据管理器
//!
//! 对外只有一个操作：[`CredentialManager::get_credentials`]。缓存凭据足够新鲜时直接返回；
//! 否则签名新的票据请求并与认证服务交换。同一时刻最多只有一次续期在进行，
//! 等待中的调用方在拿到续期锁后先重新检查缓存；若等待期间已有一次续期结束，
//! 直接沿用那次的结果（成功、回退的缓存凭据或错误），不再另发请求。
//!
//! 续期失败时的处理：
//! - 远端报告已有有效票据且本地有缓存：返回缓存；缓存已过期时延长其过期时间并写回
//! - 远端报告已有有效票据但本地没有缓存：返回 `OrphanedRemoteTicket`
//! - 其他响应或通信故障：缓存仍未过期时返回缓存，否则上报错误
//! - 身份与签名错误：直接上报

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use wsaa_common::{CredentialPair, Error, Result};

use crate::cache::CredentialCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, DEFAULT_TARGET_SERVICE};
use crate::gateway::AuthGateway;
use crate::signer::TicketSigner;
use crate::ticket::TicketRequest;

/// 缓存槽状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 没有凭据
    Absent,
    /// 距离过期超过安全余量
    Fresh,
    /// 仍未过期，但已进入安全余量
    NearExpiry,
    /// 已过期
    Expired,
}

impl SlotState {
    /// 判断凭据在 `now` 时刻的状态
    pub fn of(pair: Option<&CredentialPair>, now: DateTime<Utc>, margin: Duration) -> Self {
        match pair {
            None => SlotState::Absent,
            Some(pair) if pair.is_expired(now) => SlotState::Expired,
            Some(pair) if pair.is_fresh(now, margin) => SlotState::Fresh,
            Some(_) => SlotState::NearExpiry,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Absent => "absent",
            SlotState::Fresh => "fresh",
            SlotState::NearExpiry => "near_expiry",
            SlotState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// 续期策略
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    /// 新鲜度安全余量
    pub freshness_margin: Duration,
    /// 冲突时对已过期缓存凭据的延长时长
    pub conflict_extension: Duration,
    /// 单次交换的总超时
    pub exchange_timeout: std::time::Duration,
    /// 目标服务
    pub target_service: String,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self {
            freshness_margin: Duration::minutes(2),
            conflict_extension: Duration::minutes(8),
            exchange_timeout: std::time::Duration::from_secs(30),
            target_service: DEFAULT_TARGET_SERVICE.to_string(),
        }
    }
}

impl RenewalPolicy {
    /// 由配置生成
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            freshness_margin: config.freshness_margin(),
            conflict_extension: config.conflict_extension(),
            exchange_timeout: config.request_timeout(),
            target_service: config.target_service.clone(),
        }
    }
}

/// 凭据管理器
pub struct CredentialManager {
    /// 凭据缓存
    cache: CredentialCache,
    /// 票据签名器
    signer: Arc<dyn TicketSigner>,
    /// 认证网关
    gateway: Arc<dyn AuthGateway>,
    /// 时间源
    clock: Arc<dyn Clock>,
    /// 续期策略
    policy: RenewalPolicy,
    /// 续期锁，保护最近一次续期的结果
    renewal: Mutex<Option<Result<Arc<CredentialPair>>>>,
    /// 已完成的续期次数
    attempts: AtomicU64,
}

impl CredentialManager {
    /// 创建凭据管理器
    pub fn new(
        cache: CredentialCache,
        signer: Arc<dyn TicketSigner>,
        gateway: Arc<dyn AuthGateway>,
        policy: RenewalPolicy,
    ) -> Self {
        Self {
            cache,
            signer,
            gateway,
            clock: Arc::new(SystemClock),
            policy,
            renewal: Mutex::new(None),
            attempts: AtomicU64::new(0),
        }
    }

    /// 替换时间源
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 当前缓存槽状态
    pub fn state(&self) -> SlotState {
        SlotState::of(self.cache.current().as_deref(), self.clock.now(), self.policy.freshness_margin)
    }

    /// 当前缓存的凭据（不触发续期）
    pub fn cached(&self) -> Option<Arc<CredentialPair>> {
        self.cache.current()
    }

    /// 续期策略
    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    /// 获取可用的访问凭据，必要时续期
    pub async fn get_credentials(&self) -> Result<Arc<CredentialPair>> {
        if let Some(pair) = self.fresh_pair() {
            debug!("使用缓存的凭据");
            return Ok(pair);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let mut last_outcome = self.renewal.lock().await;

        // 等锁期间其他调用方可能已完成续期
        if let Some(pair) = self.fresh_pair() {
            debug!("其他调用方已完成续期，使用新凭据");
            return Ok(pair);
        }
        if self.attempts.load(Ordering::Acquire) != observed {
            if let Some(outcome) = last_outcome.as_ref() {
                debug!(success = outcome.is_ok(), "沿用等待期间完成的续期结果");
                return replicate(outcome);
            }
        }

        let current = self.cache.current();
        let state = SlotState::of(current.as_deref(), self.clock.now(), self.policy.freshness_margin);
        info!(%state, "开始续期凭据");

        let outcome = match self.renew().await {
            Ok(pair) => {
                info!(
                    token_len = pair.token.len(),
                    sign_len = pair.sign.len(),
                    expiration_time = %pair.expiration_time,
                    "凭据续期成功"
                );
                Ok(self.cache.store(pair).await)
            }
            Err(e) => self.reconcile(e, current).await,
        };

        let shared = replicate(&outcome);
        *last_outcome = Some(outcome);
        self.attempts.fetch_add(1, Ordering::Release);
        shared
    }

    fn fresh_pair(&self) -> Option<Arc<CredentialPair>> {
        self.cache
            .current()
            .filter(|pair| pair.is_fresh(self.clock.now(), self.policy.freshness_margin))
    }

    async fn renew(&self) -> Result<CredentialPair> {
        let request = TicketRequest::build(self.clock.now(), &self.policy.target_service);
        let envelope = self.signer.sign(&request)?;

        let pair = tokio::time::timeout(self.policy.exchange_timeout, self.gateway.exchange(&envelope))
            .await
            .map_err(|_| Error::CommunicationFault {
                message: format!("交换在 {:?} 内未完成", self.policy.exchange_timeout),
                source: None,
            })??;

        if !pair.is_complete() {
            return Err(Error::IncompleteCredentials {
                token_len: pair.token.len(),
                sign_len: pair.sign.len(),
            });
        }
        Ok(pair)
    }

    async fn reconcile(&self, error: Error, current: Option<Arc<CredentialPair>>) -> Result<Arc<CredentialPair>> {
        let now = self.clock.now();

        match (error, current) {
            (Error::ConflictFault { .. }, Some(pair)) if pair.is_expired(now) => {
                let extended = CredentialPair {
                    expiration_time: now + self.policy.conflict_extension,
                    ..(*pair).clone()
                };
                warn!(
                    previous = %pair.expiration_time,
                    extended = %extended.expiration_time,
                    "远端已有有效票据，延长已过期的缓存凭据"
                );
                Ok(self.cache.store(extended).await)
            }
            (Error::ConflictFault { .. }, Some(pair)) => {
                warn!(expiration_time = %pair.expiration_time, "远端已有有效票据，继续使用缓存凭据");
                Ok(pair)
            }
            (Error::ConflictFault { reason }, None) => {
                error!(%reason, "远端已有有效票据，但本地没有缓存副本");
                Err(Error::orphaned(reason))
            }
            (error, Some(pair)) if error.is_fallback_eligible() && !pair.is_expired(now) => {
                warn!(
                    kind = %error.kind(),
                    error = %error,
                    expiration_time = %pair.expiration_time,
                    "续期失败，使用尚未过期的缓存凭据"
                );
                Ok(pair)
            }
            (error, _) => {
                error!(kind = %error.kind(), error = %error, "续期失败");
                Err(error)
            }
        }
    }
}

fn replicate(outcome: &Result<Arc<CredentialPair>>) -> Result<Arc<CredentialPair>> {
    match outcome {
        Ok(pair) => Ok(pair.clone()),
        Err(e) => Err(e.replicate()),
    }
}
