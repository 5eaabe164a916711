//! WSAA Client - 访问票据的获取、缓存与续期
//!
//! 使用本地证书签名登录票据请求，向 WSAA LoginCms 服务换取 token/sign 凭据，
//! 并在凭据有效期内复用。调用方只需持有 [`CredentialManager`] 并调用
//! [`CredentialManager::get_credentials`]。

pub mod cache;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod identity;
pub mod manager;
pub mod signer;
pub mod ticket;

#[cfg(test)]
mod testutil;

pub use cache::CredentialCache;
pub use clock::{Clock, SystemClock};
pub use config::ClientConfig;
pub use gateway::{AuthGateway, HttpAuthGateway};
pub use identity::{extract_principal_id, fallback_principal, Identity};
pub use manager::{CredentialManager, RenewalPolicy, SlotState};
pub use signer::{CmsTicketSigner, TicketSigner};
pub use ticket::TicketRequest;
pub use wsaa_common::{CredentialPair, Error, ErrorKind, PrincipalId, PrincipalSource, Result};

use std::sync::Arc;
use tracing::{info, warn};

/// 初始化凭据管理系统
///
/// 身份加载失败不会阻止启动：主体标识符进入降级模式，之后每次续期都返回
/// `IdentityUnavailable`，已缓存且仍有效的凭据照常可用。
pub async fn init_credential_system(config: &ClientConfig) -> Result<(Arc<CredentialManager>, PrincipalId)> {
    info!(
        identity_path = %config.identity_path.display(),
        endpoint = %config.endpoint,
        target_service = %config.target_service,
        "初始化凭据管理系统"
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (signer, principal) = match Identity::load(&config.identity_path, &config.identity_secret) {
        Ok(identity) => {
            let principal = extract_principal_id(&identity, &config.fallback_principal_id);
            (CmsTicketSigner::new(Arc::new(identity)), principal)
        }
        Err(e) => {
            warn!(error = %e, "身份加载失败，续期将不可用");
            (
                CmsTicketSigner::unavailable(config.identity_path.clone()),
                fallback_principal(&config.fallback_principal_id),
            )
        }
    };

    let gateway = HttpAuthGateway::new(config, clock.clone())?;
    let cache = CredentialCache::load(config.cache_path.clone(), clock.now()).await;

    let manager = CredentialManager::new(
        cache,
        Arc::new(signer),
        Arc::new(gateway),
        RenewalPolicy::from_config(config),
    )
    .with_clock(clock);

    info!(principal = %principal, state = %manager.state(), "凭据管理系统初始化完成");
    Ok((Arc::new(manager), principal))
}
