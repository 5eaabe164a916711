//! 主体标识符模型
//!
//! 进程始终以一个固定的 11 位主体标识符（CUIT）进行认证。
//! 该标识符在启动时从证书中提取一次；提取失败时使用配置的占位值，
//! 并通过 [`PrincipalSource::Fallback`] 显式标记降级状态。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// 主体标识符的位数
pub const PRINCIPAL_ID_DIGITS: usize = 11;

/// 标识符来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalSource {
    /// 证书主题中的 CN 或 serialNumber 属性
    Subject,
    /// 证书序列号的前 11 位数字
    CertificateSerial,
    /// 配置的占位值（降级模式）
    Fallback,
}

/// 11 位主体标识符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalId {
    /// 标识符数值
    pub value: String,
    /// 标识符来源
    pub source: PrincipalSource,
}

impl PrincipalId {
    /// 创建新的主体标识符，要求恰好 11 位数字
    pub fn new(value: &str, source: PrincipalSource) -> Result<Self> {
        if !is_principal_digits(value) {
            return Err(Error::Config(format!(
                "主体标识符必须是 {} 位数字: {}",
                PRINCIPAL_ID_DIGITS, value
            )));
        }

        Ok(Self {
            value: value.to_string(),
            source,
        })
    }

    /// 是否处于降级模式
    pub fn is_fallback(&self) -> bool {
        self.source == PrincipalSource::Fallback
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// 检查字符串是否恰好由 11 位 ASCII 数字组成
pub fn is_principal_digits(value: &str) -> bool {
    value.len() == PRINCIPAL_ID_DIGITS && value.bytes().all(|b| b.is_ascii_digit())
}
