//! loginCms 响应解析
//!
//! 响应是 SOAP 信封：成功时 `loginCmsReturn` 中包含转义后的 loginTicketResponse 片段，
//! 失败时包含 SOAP Fault。字段按名称做结构化查找，缺失节点视为空字符串。

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use roxmltree::Document;
use tracing::{debug, error, info, warn};
use wsaa_common::{CredentialPair, Error, Result};

/// 远端已持有有效票据时的故障原因
pub const CONFLICT_REASON_MARKER: &str = "El CEE ya posee un TA valido";

/// 远端已持有有效票据时的故障代码后缀
pub const CONFLICT_CODE_SUFFIX: &str = "alreadyAuthenticated";

/// 过期时间无法解析时采用的默认有效期（分钟）
pub const DEFAULT_TICKET_LIFETIME_MINUTES: i64 = 10;

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// 解析 loginCms 的 SOAP 响应体
pub fn parse_login_response(body: &str, issued_at: DateTime<Utc>, strict_expiration: bool) -> Result<CredentialPair> {
    if body.trim().is_empty() {
        error!("认证服务响应体为空");
        return Err(Error::EmptyResponse);
    }

    let envelope = Document::parse(body).map_err(|e| {
        error!(error = %e, "SOAP 响应解析失败");
        Error::MalformedResponse(format!("SOAP 信封解析失败: {}", e))
    })?;

    if let Some(fault) = envelope.descendants().find(|n| n.has_tag_name("Fault")) {
        return Err(classify_fault(&text_of(fault, "faultcode"), &text_of(fault, "faultstring")));
    }

    let fragment = match envelope.descendants().find(|n| n.has_tag_name("loginCmsReturn")) {
        Some(node) => node_text(node),
        None => {
            error!("响应中没有 loginCmsReturn");
            return Err(Error::EmptyResponse);
        }
    };

    parse_ticket_fragment(&fragment, issued_at, strict_expiration)
}

/// 解析 loginTicketResponse 片段
pub fn parse_ticket_fragment(fragment: &str, issued_at: DateTime<Utc>, strict_expiration: bool) -> Result<CredentialPair> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        error!("loginCmsReturn 为空");
        return Err(Error::MalformedResponse("loginCmsReturn 片段为空".to_string()));
    }
    debug!(len = fragment.len(), "收到票据响应片段");

    let document = Document::parse(fragment).map_err(|e| {
        error!(error = %e, "票据响应片段解析失败");
        Error::MalformedResponse(format!("票据响应片段解析失败: {}", e))
    })?;
    let root = document.root();

    let token = text_of(root, "token");
    let sign = text_of(root, "sign");
    let expiration_raw = text_of(root, "expirationTime");

    if token.is_empty() || sign.is_empty() {
        error!(token_len = token.len(), sign_len = sign.len(), "响应中 token 或 sign 为空");
        return Err(Error::IncompleteCredentials {
            token_len: token.len(),
            sign_len: sign.len(),
        });
    }

    let default_expiration = issued_at + Duration::minutes(DEFAULT_TICKET_LIFETIME_MINUTES);
    let expiration_time = match parse_expiration(&expiration_raw) {
        Some(expiration) if expiration > issued_at => expiration,
        // 可解析但不晚于签发时刻：严格模式下同样保留票据
        Some(expiration) => {
            warn!(
                %expiration,
                %issued_at,
                fallback = %default_expiration,
                "过期时间不晚于签发时刻（时钟偏差？），使用默认有效期"
            );
            default_expiration
        }
        None if strict_expiration => {
            return Err(Error::MalformedResponse(format!(
                "无法解析的过期时间: {:?}",
                expiration_raw
            )));
        }
        None => {
            warn!(raw = %expiration_raw, fallback = %default_expiration, "无法解析过期时间，使用默认有效期");
            default_expiration
        }
    };

    info!(
        token_len = token.len(),
        sign_len = sign.len(),
        %expiration_time,
        "成功解析票据响应"
    );

    Ok(CredentialPair {
        token,
        sign,
        expiration_time,
    })
}

/// 将 SOAP Fault 映射为错误类别
pub fn classify_fault(code: &str, reason: &str) -> Error {
    if reason.contains(CONFLICT_REASON_MARKER) || code.ends_with(CONFLICT_CODE_SUFFIX) {
        warn!(code, reason, "认证服务报告已存在有效票据");
        return Error::ConflictFault {
            reason: reason.to_string(),
        };
    }

    error!(code, reason, "认证服务返回 SOAP Fault");
    Error::GenericProtocolFault {
        code: code.to_string(),
        reason: reason.to_string(),
    }
}

/// 解析带偏移的 RFC 3339 时间，或按本地时间解释的民用时间
pub fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

fn text_of(scope: roxmltree::Node<'_, '_>, name: &str) -> String {
    scope
        .descendants()
        .find(|n| n.has_tag_name(name))
        .map(node_text)
        .unwrap_or_default()
}

fn node_text(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{login_response, soap_fault, ticket_fragment};
    use chrono::TimeZone;
    use rstest::rstest;
    use wsaa_common::ErrorKind;

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_success() {
        let body = login_response("dG9rZW4=", "c2lnbg==", "2024-05-01T21:10:00.000-03:00");
        let pair = parse_login_response(&body, issued_at(), false).unwrap();

        assert_eq!(pair.token, "dG9rZW4=");
        assert_eq!(pair.sign, "c2lnbg==");
        assert_eq!(pair.expiration_time, Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap());
    }

    #[rstest]
    #[case("")]
    #[case("   \n")]
    #[case(r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body/></soapenv:Envelope>"#)]
    fn test_empty_response(#[case] body: &str) {
        let err = parse_login_response(body, issued_at(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyResponse);
    }

    #[rstest]
    #[case("<soapenv:Envelope")]
    #[case(r#"<Envelope><Body><loginCmsReturn>   </loginCmsReturn></Body></Envelope>"#)]
    #[case(r#"<Envelope><Body><loginCmsReturn>&lt;loginTicketResponse&gt;&lt;header&gt;</loginCmsReturn></Body></Envelope>"#)]
    fn test_malformed_response(#[case] body: &str) {
        let err = parse_login_response(body, issued_at(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[rstest]
    #[case("", "c2lnbg==")]
    #[case("dG9rZW4=", "")]
    fn test_incomplete_credentials(#[case] token: &str, #[case] sign: &str) {
        let body = login_response(token, sign, "2024-05-01T21:10:00.000-03:00");
        let err = parse_login_response(&body, issued_at(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompleteCredentials);
    }

    #[test]
    fn test_missing_nodes_read_as_empty() {
        let fragment = "<loginTicketResponse><credentials><sign>c2lnbg==</sign></credentials></loginTicketResponse>";
        let err = parse_ticket_fragment(fragment, issued_at(), false).unwrap_err();
        assert!(matches!(err, Error::IncompleteCredentials { token_len: 0, .. }));
    }

    #[test]
    fn test_unparseable_expiration_uses_default_lifetime() {
        let fragment = ticket_fragment("dG9rZW4=", "c2lnbg==", "mañana");
        let pair = parse_ticket_fragment(&fragment, issued_at(), false).unwrap();
        assert_eq!(pair.expiration_time, issued_at() + Duration::minutes(10));
    }

    #[test]
    fn test_unparseable_expiration_fails_when_strict() {
        let fragment = ticket_fragment("dG9rZW4=", "c2lnbg==", "mañana");
        let err = parse_ticket_fragment(&fragment, issued_at(), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn test_expiration_not_after_issue_keeps_ticket(#[case] strict: bool) {
        // 08:00-03:00 即 11:00Z，早于 12:00Z 的签发时刻
        let fragment = ticket_fragment("dG9rZW4=", "c2lnbg==", "2024-05-01T08:00:00-03:00");
        let pair = parse_ticket_fragment(&fragment, issued_at(), strict).unwrap();
        assert_eq!(pair.token, "dG9rZW4=");
        assert_eq!(pair.expiration_time, issued_at() + Duration::minutes(10));
    }

    #[test]
    fn test_conflict_fault() {
        let body = soap_fault(
            "ns1:coe.alreadyAuthenticated",
            "El CEE ya posee un TA valido para el acceso al WSN solicitado",
        );
        let err = parse_login_response(&body, issued_at(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictFault);
    }

    #[test]
    fn test_conflict_recognized_by_code_alone() {
        let err = classify_fault("ns1:coe.alreadyAuthenticated", "");
        assert_eq!(err.kind(), ErrorKind::ConflictFault);
    }

    #[test]
    fn test_generic_fault() {
        let body = soap_fault("ns1:cms.cert.expired", "Certificado expirado");
        match parse_login_response(&body, issued_at(), false).unwrap_err() {
            Error::GenericProtocolFault { code, reason } => {
                assert_eq!(code, "ns1:cms.cert.expired");
                assert_eq!(reason, "Certificado expirado");
            }
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[rstest]
    #[case("2024-05-01T21:10:00-03:00", Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap()))]
    #[case("2024-05-02T00:10:00Z", Some(Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap()))]
    #[case("", None)]
    #[case("not a date", None)]
    fn test_parse_expiration(#[case] raw: &str, #[case] expected: Option<DateTime<Utc>>) {
        assert_eq!(parse_expiration(raw), expected);
    }

    #[test]
    fn test_naive_expiration_is_local_time() {
        let parsed = parse_expiration("2024-05-01T21:10:00").unwrap();
        let naive = NaiveDateTime::parse_from_str("2024-05-01T21:10:00", "%Y-%m-%dT%H:%M:%S").unwrap();
        assert_eq!(parsed.with_timezone(&Local).naive_local(), naive);
    }
}
