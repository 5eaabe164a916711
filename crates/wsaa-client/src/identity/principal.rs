//! 主体标识符提取
//!
//! 依次尝试：证书主题中的 CN / serialNumber 属性（去掉非数字字符后恰好 11 位），
//! 证书序列号十六进制表示中的前 11 位数字，最后退回配置的占位值。
//! 提取不会失败；降级结果通过 [`PrincipalSource`] 标记。

use const_oid::db::rfc4519;
use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use der::Any;
use tracing::{info, warn};
use wsaa_common::{PrincipalId, PrincipalSource, PRINCIPAL_ID_DIGITS};

use super::loader::Identity;

/// 从身份证书中提取主体标识符
pub fn extract_principal_id(identity: &Identity, fallback: &str) -> PrincipalId {
    let subject = &identity.certificate().tbs_certificate.subject;

    let candidates = subject
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|atv| atv.oid == rfc4519::CN || atv.oid == rfc4519::SERIAL_NUMBER)
        .filter_map(|atv| attribute_text(&atv.value));

    if let Some(value) = principal_from_subject_values(candidates) {
        info!(principal = %value, "从证书主题提取主体标识符");
        return PrincipalId {
            value,
            source: PrincipalSource::Subject,
        };
    }

    let serial_hex = serial_to_hex(identity.certificate().tbs_certificate.serial_number.as_bytes());
    if let Some(value) = principal_from_serial(&serial_hex) {
        info!(principal = %value, "从证书序列号提取主体标识符");
        return PrincipalId {
            value,
            source: PrincipalSource::CertificateSerial,
        };
    }

    warn!(subject = %identity.subject(), "无法从证书提取主体标识符，使用占位值");
    fallback_principal(fallback)
}

/// 降级模式下的主体标识符
pub fn fallback_principal(fallback: &str) -> PrincipalId {
    warn!(principal = fallback, "主体标识符处于降级模式，请在配置中核对 fallback_principal_id");
    PrincipalId {
        value: fallback.to_string(),
        source: PrincipalSource::Fallback,
    }
}

/// 第一个去掉非数字字符后恰好 11 位的候选值
fn principal_from_subject_values(values: impl IntoIterator<Item = String>) -> Option<String> {
    values
        .into_iter()
        .map(|value| digits_only(&value))
        .find(|digits| digits.len() == PRINCIPAL_ID_DIGITS)
}

/// 序列号中的前 11 位数字
fn principal_from_serial(serial_hex: &str) -> Option<String> {
    let digits = digits_only(serial_hex);
    if digits.len() >= PRINCIPAL_ID_DIGITS {
        Some(digits[..PRINCIPAL_ID_DIGITS].to_string())
    } else {
        None
    }
}

fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn serial_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

fn attribute_text(value: &Any) -> Option<String> {
    if let Ok(s) = PrintableStringRef::try_from(value) {
        Some(s.to_string())
    } else if let Ok(s) = Utf8StringRef::try_from(value) {
        Some(s.to_string())
    } else if let Ok(s) = Ia5StringRef::try_from(value) {
        Some(s.to_string())
    } else {
        None
    }
}
