//! 基于 HTTP 的 SOAP 1.1 认证网关

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use wsaa_common::{CredentialPair, Error, Result};

use super::response::parse_login_response;
use super::AuthGateway;
use crate::clock::Clock;
use crate::config::ClientConfig;

/// 认证服务的 SOAP 命名空间
const WSAA_NAMESPACE: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";

/// HTTP 认证网关
pub struct HttpAuthGateway {
    /// HTTP 客户端（TLS 1.2 及以上）
    client: reqwest::Client,
    /// 服务端点
    endpoint: String,
    /// 响应体大小上限（字节）
    max_response_bytes: usize,
    /// 过期时间无法解析时是否视为错误
    strict_expiration: bool,
    /// 记录签发时刻
    clock: Arc<dyn Clock>,
}

impl HttpAuthGateway {
    /// 根据配置创建网关
    pub fn new(config: &ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .user_agent(concat!("wsaa-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            max_response_bytes: config.max_response_bytes,
            strict_expiration: config.strict_expiration,
            clock,
        })
    }

    /// 服务端点
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_body(&self, mut response: reqwest::Response) -> Result<Vec<u8>> {
        let limit = self.max_response_bytes;
        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(response_too_large(limit));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::communication("读取响应失败", e))?
        {
            if body.len() + chunk.len() > limit {
                return Err(response_too_large(limit));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    #[instrument(skip(self, envelope), fields(endpoint = %self.endpoint, cms_len = envelope.len()))]
    async fn exchange(&self, envelope: &str) -> Result<CredentialPair> {
        let issued_at = self.clock.now();
        info!("请求新的访问凭据");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "\"\"")
            .body(soap_request(envelope))
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        debug!(%status, "收到认证服务响应");

        let body = self.read_body(response).await?;
        let text = String::from_utf8(body)
            .map_err(|e| Error::MalformedResponse(format!("响应不是有效的 UTF-8: {}", e)))?;

        let outcome = parse_login_response(&text, issued_at, self.strict_expiration);
        if status.is_success() {
            return outcome;
        }

        match outcome {
            Err(e @ Error::ConflictFault { .. }) | Err(e @ Error::GenericProtocolFault { .. }) => Err(e),
            other => {
                if other.is_ok() {
                    error!(%status, "认证服务返回非成功状态，不采用响应中的凭据");
                } else {
                    error!(%status, "认证服务返回非成功状态且没有 SOAP Fault");
                }
                Err(Error::UnclassifiedFault {
                    message: format!("认证服务返回 HTTP {}", status),
                    source: None,
                })
            }
        }
    }
}

/// 包装 loginCms 调用的 SOAP 1.1 信封
pub fn soap_request(envelope: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:wsaa="{}">"#,
            "<soapenv:Header/>",
            "<soapenv:Body><wsaa:loginCms><wsaa:in0>{}</wsaa:in0></wsaa:loginCms></soapenv:Body>",
            "</soapenv:Envelope>"
        ),
        WSAA_NAMESPACE, envelope
    )
}

fn classify_transport_error(e: reqwest::Error) -> Error {
    if e.is_builder() {
        error!(error = %e, "无法构建请求");
        return Error::UnclassifiedFault {
            message: "无法构建认证请求".to_string(),
            source: Some(Box::new(e)),
        };
    }

    let message = if e.is_timeout() {
        "认证服务请求超时"
    } else if e.is_connect() {
        "无法连接认证服务"
    } else {
        "认证服务通信失败"
    };
    error!(error = %e, "{}", message);
    Error::communication(message, e)
}

fn response_too_large(limit: usize) -> Error {
    error!(limit, "响应体超过大小上限");
    Error::CommunicationFault {
        message: format!("响应体超过 {} 字节上限", limit),
        source: None,
    }
}
