//! 身份加载模块
//!
//! 从本地 PEM 文件加载证书与私钥。文件中应包含一个 `CERTIFICATE` 块，
//! 以及一个 `ENCRYPTED PRIVATE KEY`（PKCS#8，用密码解密）、`PRIVATE KEY`
//! 或 `RSA PRIVATE KEY` 块。PKCS#12（`.pfx`/`.p12`）文件需先用 openssl 转换，
//! 加载失败的原因中会给出转换命令。

use chrono::{DateTime, Utc};
use der::Decode;
use pkcs8::DecodePrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use wsaa_common::{Error, Result};
use x509_cert::Certificate;

/// PKCS#12 转换为 PEM 的命令
pub const PKCS12_CONVERSION_HINT: &str =
    "请先转换为 PEM: openssl pkcs12 -in certificado_arca.pfx -out certificado_arca.pem";

/// DER 编码以 SEQUENCE 标签开头
const DER_SEQUENCE_TAG: u8 = 0x30;

/// 已加载的身份：证书 + 私钥
///
/// 加载后不可变，生命周期与进程相同。
pub struct Identity {
    /// X.509 证书
    certificate: Certificate,
    /// RSA 私钥
    private_key: RsaPrivateKey,
    /// 来源文件
    source_path: PathBuf,
}

impl Identity {
    /// 从 PEM 文件加载身份
    pub fn load(path: &Path, secret: &str) -> Result<Self> {
        let unavailable = |reason: String| Error::IdentityUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| unavailable(format!("无法读取身份文件: {}", e)))?;
        if looks_like_pkcs12(path, &bytes) {
            return Err(unavailable(format!("文件是 PKCS#12 格式，仅支持 PEM。{}", PKCS12_CONVERSION_HINT)));
        }
        let content = String::from_utf8(bytes)
            .map_err(|_| unavailable(format!("文件不是 PEM 文本。{}", PKCS12_CONVERSION_HINT)))?;
        let blocks = pem::parse_many(&content)
            .map_err(|e| unavailable(format!("PEM 格式错误: {}", e)))?;
        if blocks.is_empty() {
            return Err(unavailable(format!("文件中没有 PEM 块。{}", PKCS12_CONVERSION_HINT)));
        }

        let mut certificate = None;
        let mut private_key = None;

        for block in &blocks {
            match block.tag() {
                "CERTIFICATE" if certificate.is_none() => {
                    let cert = Certificate::from_der(block.contents())
                        .map_err(|e| unavailable(format!("证书解析失败: {}", e)))?;
                    certificate = Some(cert);
                }
                "CERTIFICATE" => debug!("忽略证书链中的附加证书"),
                "ENCRYPTED PRIVATE KEY" => {
                    let key = RsaPrivateKey::from_pkcs8_encrypted_der(block.contents(), secret.as_bytes())
                        .map_err(|e| unavailable(format!("私钥解密失败（密码错误？）: {}", e)))?;
                    private_key = Some(key);
                }
                "PRIVATE KEY" => {
                    let key = RsaPrivateKey::from_pkcs8_der(block.contents())
                        .map_err(|e| unavailable(format!("PKCS#8 私钥解析失败: {}", e)))?;
                    private_key = Some(key);
                }
                "RSA PRIVATE KEY" => {
                    let key = RsaPrivateKey::from_pkcs1_der(block.contents())
                        .map_err(|e| unavailable(format!("PKCS#1 私钥解析失败: {}", e)))?;
                    private_key = Some(key);
                }
                other => debug!(tag = other, "忽略未知 PEM 块"),
            }
        }

        let certificate = certificate.ok_or_else(|| unavailable("文件中没有证书".to_string()))?;
        let private_key = private_key.ok_or_else(|| unavailable("文件中没有私钥".to_string()))?;

        let identity = Self::from_parts(certificate, private_key, path.to_path_buf())?;

        info!(
            path = %path.display(),
            subject = %identity.subject(),
            "证书加载成功"
        );
        match identity.not_after() {
            Some(not_after) if not_after <= Utc::now() => {
                warn!(%not_after, "证书已过期，认证服务将拒绝签名请求");
            }
            Some(not_after) => debug!(%not_after, "证书有效期"),
            None => {}
        }

        Ok(identity)
    }

    /// 由证书与私钥组装身份，校验私钥与证书公钥匹配
    pub fn from_parts(certificate: Certificate, private_key: RsaPrivateKey, source_path: PathBuf) -> Result<Self> {
        let spki_der = der::Encode::to_der(&certificate.tbs_certificate.subject_public_key_info)
            .map_err(|e| Error::IdentityUnavailable {
                path: source_path.clone(),
                reason: format!("证书公钥编码失败: {}", e),
            })?;

        let certificate_key = RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| Error::IdentityUnavailable {
            path: source_path.clone(),
            reason: format!("证书公钥不是 RSA 密钥: {}", e),
        })?;

        if certificate_key != RsaPublicKey::from(&private_key) {
            return Err(Error::IdentityUnavailable {
                path: source_path,
                reason: "私钥与证书不匹配".to_string(),
            });
        }

        Ok(Self {
            certificate,
            private_key,
            source_path,
        })
    }

    /// 证书
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// 私钥
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// 来源文件路径
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// 证书主题（RFC 4514 格式）
    pub fn subject(&self) -> String {
        self.certificate.tbs_certificate.subject.to_string()
    }

    /// 证书到期时间
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        let since_epoch = self.certificate.tbs_certificate.validity.not_after.to_unix_duration();
        DateTime::from_timestamp(i64::try_from(since_epoch.as_secs()).ok()?, 0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject())
            .field("source_path", &self.source_path)
            .finish_non_exhaustive()
    }
}

fn looks_like_pkcs12(path: &Path, bytes: &[u8]) -> bool {
    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pfx") || e.eq_ignore_ascii_case("p12"))
        .unwrap_or(false);
    by_extension || bytes.first() == Some(&DER_SEQUENCE_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, TEST_SUBJECT};
    use rstest::rstest;
    use std::io::Write;
    use wsaa_common::ErrorKind;

    #[test]
    fn test_load_encrypted_identity() {
        let cert = testutil::certificate(TEST_SUBJECT, testutil::TEST_SERIAL);
        let file = testutil::identity_file(&cert, Some("1234"));

        let identity = Identity::load(file.path(), "1234").unwrap();
        assert!(identity.subject().contains("20123456789"));
        assert_eq!(identity.source_path(), file.path());
        assert!(identity.not_after().unwrap() > Utc::now());
    }

    #[test]
    fn test_load_plain_identity_ignores_secret() {
        let cert = testutil::certificate(TEST_SUBJECT, testutil::TEST_SERIAL);
        let file = testutil::identity_file(&cert, None);

        assert!(Identity::load(file.path(), "anything").is_ok());
    }

    #[test]
    fn test_wrong_secret_is_identity_unavailable() {
        let cert = testutil::certificate(TEST_SUBJECT, testutil::TEST_SERIAL);
        let file = testutil::identity_file(&cert, Some("1234"));

        let err = Identity::load(file.path(), "4321").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
    }

    #[test]
    fn test_missing_file_is_identity_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = Identity::load(&dir.path().join("nope.pem"), "1234").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
    }

    #[rstest]
    #[case(".pfx", &[0x30, 0x82, 0x0a, 0x1b, 0x02, 0x01, 0x03])]
    #[case(".p12", b"not really pkcs12")]
    #[case(".bin", &[0x30, 0x82, 0x0a, 0x1b, 0x02, 0x01, 0x03])]
    #[case(".pem", &[0xff, 0xfe, 0x00, 0x41])]
    #[case(".pem", b"just some text")]
    fn test_non_pem_identity_names_conversion(#[case] suffix: &str, #[case] content: &[u8]) {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content).unwrap();

        let err = Identity::load(file.path(), "1234").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
        assert!(err.to_string().contains("openssl pkcs12"));
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let cert = testutil::certificate(TEST_SUBJECT, testutil::TEST_SERIAL);
        let other_key = testutil::other_key();

        let err = Identity::from_parts(cert, other_key, PathBuf::from("mem")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdentityUnavailable);
    }
}
