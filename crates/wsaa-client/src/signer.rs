//! 票据签名模块
//!
//! 将票据请求的规范字节封装为 CMS SignedData（内嵌签名者证书，不含证书链），
//! DER 编码后再进行 Base64 编码。签名在本地完成，失败不重试。

use base64::{engine::general_purpose::STANDARD, Engine};
use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use const_oid::db::{rfc5911, rfc5912};
use der::{Any, Encode, Tag};
use rsa::pkcs1v15::{Signature, SigningKey};
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};
use wsaa_common::{Error, Result};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::identity::Identity;
use crate::ticket::TicketRequest;

/// 票据签名器
#[cfg_attr(test, mockall::automock)]
pub trait TicketSigner: Send + Sync {
    /// 签名票据请求，返回 Base64 编码的签名信封
    fn sign(&self, request: &TicketRequest) -> Result<String>;
}

/// 基于本地身份的 CMS 签名器
pub struct CmsTicketSigner {
    /// 已加载的身份；加载失败时为 None
    identity: Option<Arc<Identity>>,
    /// 身份文件路径
    identity_path: PathBuf,
}

impl CmsTicketSigner {
    /// 使用已加载的身份创建签名器
    pub fn new(identity: Arc<Identity>) -> Self {
        let identity_path = identity.source_path().to_path_buf();
        Self {
            identity: Some(identity),
            identity_path,
        }
    }

    /// 身份未能加载时的签名器，每次签名都返回 `IdentityUnavailable`
    pub fn unavailable(identity_path: PathBuf) -> Self {
        Self {
            identity: None,
            identity_path,
        }
    }
}

impl TicketSigner for CmsTicketSigner {
    fn sign(&self, request: &TicketRequest) -> Result<String> {
        let identity = self.identity.as_ref().ok_or_else(|| Error::IdentityUnavailable {
            path: self.identity_path.clone(),
            reason: "启动时未能加载身份，无法签名票据".to_string(),
        })?;

        let xml = request.to_xml();
        debug!(xml = %xml, "待签名的票据请求");

        let envelope = sign_content(identity, xml.as_bytes()).map_err(|e| {
            error!(error = %e, "票据签名失败");
            e
        })?;

        let encoded = STANDARD.encode(envelope);
        info!(cms_len = encoded.len(), "票据签名完成");
        Ok(encoded)
    }
}

/// 生成包含 `content` 的 CMS SignedData（DER）
pub fn sign_content(identity: &Identity, content: &[u8]) -> Result<Vec<u8>> {
    let certificate = identity.certificate();

    let econtent = Any::new(Tag::OctetString, content.to_vec())
        .map_err(|e| Error::signing("封装票据内容", e))?;
    let encapsulated = EncapsulatedContentInfo {
        econtent_type: rfc5911::ID_DATA,
        econtent: Some(econtent),
    };

    let signer_id = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
        issuer: certificate.tbs_certificate.issuer.clone(),
        serial_number: certificate.tbs_certificate.serial_number.clone(),
    });
    let digest_algorithm = AlgorithmIdentifierOwned {
        oid: rfc5912::ID_SHA_256,
        parameters: None,
    };

    let signing_key = SigningKey::<Sha256>::new(identity.private_key().clone());
    let signer_info = SignerInfoBuilder::new(
        &signing_key,
        signer_id,
        digest_algorithm.clone(),
        &encapsulated,
        None,
    )
    .map_err(|e| Error::signing("构建签名者信息", e))?;

    let mut builder = SignedDataBuilder::new(&encapsulated);
    builder
        .add_digest_algorithm(digest_algorithm)
        .map_err(|e| Error::signing("添加摘要算法", e))?;
    builder
        .add_certificate(CertificateChoices::Certificate(certificate.clone()))
        .map_err(|e| Error::signing("嵌入签名者证书", e))?;
    builder
        .add_signer_info::<SigningKey<Sha256>, Signature>(signer_info)
        .map_err(|e| Error::signing("计算签名", e))?;

    let content_info = builder.build().map_err(|e| Error::signing("生成 SignedData", e))?;
    content_info.to_der().map_err(|e| Error::signing("DER 编码", e))
}
