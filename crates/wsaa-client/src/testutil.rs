//! 测试辅助：自签名证书、身份文件与 SOAP 响应样例

use der::{Decode, EncodePem};
use once_cell::sync::Lazy;
use pkcs8::pkcs5::pbes2;
use pkcs8::{EncodePrivateKey, LineEnding, PrivateKeyInfo};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tempfile::NamedTempFile;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::identity::Identity;

pub(crate) const TEST_SUBJECT: &str = "CN=Empresa Prueba,serialNumber=CUIT 20123456789";
pub(crate) const TEST_SERIAL: &[u8] = &[0x01, 0x02, 0x03];

static TEST_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("生成测试密钥"));

static OTHER_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("生成测试密钥"));

pub(crate) fn test_key() -> RsaPrivateKey {
    TEST_KEY.clone()
}

pub(crate) fn other_key() -> RsaPrivateKey {
    OTHER_KEY.clone()
}

/// 用测试密钥自签名的证书
pub(crate) fn certificate(subject: &str, serial: &[u8]) -> Certificate {
    let key = test_key();
    let public_der = key.to_public_key().to_public_key_der().unwrap();
    let spki = SubjectPublicKeyInfoOwned::from_der(public_der.as_bytes()).unwrap();
    let signer = SigningKey::<Sha256>::new(key);

    CertificateBuilder::new(
        Profile::Root,
        SerialNumber::new(serial).unwrap(),
        Validity::from_now(Duration::from_secs(3600)).unwrap(),
        Name::from_str(subject).unwrap(),
        spki,
        &signer,
    )
    .unwrap()
    .build::<rsa::pkcs1v15::Signature>()
    .unwrap()
}

pub(crate) fn identity(certificate: Certificate) -> Identity {
    Identity::from_parts(certificate, test_key(), PathBuf::from("memoria.pem")).unwrap()
}

/// 写出 PEM 身份文件；提供密码时私钥以 PKCS#8 加密形式保存
pub(crate) fn identity_file(certificate: &Certificate, secret: Option<&str>) -> NamedTempFile {
    let mut content = certificate.to_pem(LineEnding::LF).unwrap();

    let key_der = test_key().to_pkcs8_der().unwrap();
    match secret {
        Some(secret) => {
            let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(2048, b"saltsalt", b"0123456789abcdef").unwrap();
            let encrypted = PrivateKeyInfo::try_from(key_der.as_bytes())
                .unwrap()
                .encrypt_with_params(params, secret)
                .unwrap();
            content.push_str(&pem::encode(&pem::Pem::new("ENCRYPTED PRIVATE KEY", encrypted.as_bytes())));
        }
        None => {
            content.push_str(&pem::encode(&pem::Pem::new("PRIVATE KEY", key_der.as_bytes())));
        }
    }

    let mut file = tempfile::Builder::new().suffix(".pem").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

/// loginTicketResponse 片段
pub(crate) fn ticket_fragment(token: &str, sign: &str, expiration: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<loginTicketResponse version="1.0"><header>"#,
            "<source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source>",
            "<destination>SERIALNUMBER=CUIT 20123456789, CN=empresa prueba</destination>",
            "<uniqueId>1714564800</uniqueId>",
            "<generationTime>2024-05-01T08:58:00.000-03:00</generationTime>",
            "<expirationTime>{}</expirationTime>",
            "</header><credentials><token>{}</token><sign>{}</sign></credentials></loginTicketResponse>"
        ),
        expiration, token, sign
    )
}

/// 成功的 loginCms SOAP 响应，片段以转义文本形式嵌入
pub(crate) fn login_response(token: &str, sign: &str, expiration: &str) -> String {
    let escaped = ticket_fragment(token, sign, expiration)
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soapenv:Body>",
            r#"<loginCmsResponse xmlns="http://wsaa.view.sua.dvadac.desein.afip.gov">"#,
            "<loginCmsReturn>{}</loginCmsReturn>",
            "</loginCmsResponse></soapenv:Body></soapenv:Envelope>"
        ),
        escaped
    )
}

/// SOAP 1.1 Fault 响应
pub(crate) fn soap_fault(code: &str, reason: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">"#,
            "<soapenv:Body><soapenv:Fault>",
            r#"<faultcode xmlns:ns1="http://xml.apache.org/axis/">{}</faultcode>"#,
            "<faultstring>{}</faultstring>",
            "<detail/>",
            "</soapenv:Fault></soapenv:Body></soapenv:Envelope>"
        ),
        code, reason
    )
}
