//! 认证网关
//!
//! 将签名信封发送给远端认证服务，并把响应映射为凭据或分类错误。

mod client;
mod response;

pub use client::{soap_request, HttpAuthGateway};
pub use response::{
    classify_fault, parse_expiration, parse_login_response, parse_ticket_fragment, CONFLICT_CODE_SUFFIX,
    CONFLICT_REASON_MARKER, DEFAULT_TICKET_LIFETIME_MINUTES,
};

use async_trait::async_trait;
use wsaa_common::{CredentialPair, Result};

/// 认证网关：一次签名信封交换
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// 提交 Base64 签名信封，返回新签发的凭据
    async fn exchange(&self, envelope: &str) -> Result<CredentialPair>;
}
