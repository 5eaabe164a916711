//! 凭证对模型
//!
//! 认证服务在票据交换成功后签发的 token/sign 凭证对，以及判断其新鲜度的辅助方法。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 凭证对
///
/// 持久化到磁盘缓存时只包含这三个字段。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    /// 访问令牌
    pub token: String,
    /// 令牌签名
    pub sign: String,
    /// 过期时间
    pub expiration_time: DateTime<Utc>,
}

impl CredentialPair {
    /// 创建新的凭证对
    pub fn new(token: impl Into<String>, sign: impl Into<String>, expiration_time: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            sign: sign.into(),
            expiration_time,
        }
    }

    /// token 与 sign 是否都非空
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.sign.is_empty()
    }

    /// 在安全余量之外仍然有效
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expiration_time > now + margin
    }

    /// 按原始过期时间判断是否已过期（不含余量）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time <= now
    }

    /// 距离过期的剩余时间，已过期时为负
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expiration_time - now
    }
}

// token 与 sign 不得出现在日志中
impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("token_len", &self.token.len())
            .field("sign_len", &self.sign.len())
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}
