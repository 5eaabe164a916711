//! 错误处理模块
//!
//! 该模块提供凭证管理器的统一错误类型。远端认证服务的故障被显式分类
//! （冲突、协议、通信、未分类），调用方据此决定稍后重试还是作为硬错误上报。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 可携带任意底层原因的错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 凭证管理统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 身份文件缺失、密码错误或私钥与证书不匹配
    #[error("身份不可用 ({path}): {reason}")]
    IdentityUnavailable {
        /// 身份文件路径
        path: PathBuf,
        /// 失败原因
        reason: String,
    },

    /// 私钥无法生成签名
    #[error("签名失败: {context}: {cause}")]
    SigningFailure {
        /// 出错的签名步骤
        context: String,
        /// 底层原因
        cause: String,
    },

    /// 认证服务返回空响应
    #[error("认证服务返回空响应")]
    EmptyResponse,

    /// 响应 XML 无法解析或片段为空
    #[error("认证服务响应格式错误: {0}")]
    MalformedResponse(String),

    /// 响应中缺少 token 或 sign
    #[error("认证服务响应缺少凭证: token 长度 {token_len}, sign 长度 {sign_len}")]
    IncompleteCredentials {
        /// token 长度
        token_len: usize,
        /// sign 长度
        sign_len: usize,
    },

    /// 远端已为该身份/服务持有有效票据
    #[error("远端已存在有效票据: {reason}")]
    ConflictFault {
        /// 远端故障原因
        reason: String,
    },

    /// 其他结构化协议故障
    #[error("认证服务协议故障 [{code}]: {reason}")]
    GenericProtocolFault {
        /// 故障代码
        code: String,
        /// 故障原因
        reason: String,
    },

    /// 传输或连接故障（超时、TLS 协商、DNS 等）
    #[error("与认证服务通信失败: {message}")]
    CommunicationFault {
        /// 错误描述
        message: String,
        /// 底层原因
        #[source]
        source: Option<BoxError>,
    },

    /// 无法归类的故障
    #[error("未分类的认证服务故障: {message}")]
    UnclassifiedFault {
        /// 错误描述
        message: String,
        /// 底层原因
        #[source]
        source: Option<BoxError>,
    },

    /// 远端持有有效票据，但本地没有任何缓存副本
    #[error("远端存在有效票据但本地缓存中没有副本 ({reason})。{remediation}")]
    OrphanedRemoteTicket {
        /// 远端故障原因
        reason: String,
        /// 处理建议
        remediation: String,
    },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// 凭证管理结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

/// 错误类别标签，调用方据此分支处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IdentityUnavailable,
    SigningFailure,
    EmptyResponse,
    MalformedResponse,
    IncompleteCredentials,
    ConflictFault,
    GenericProtocolFault,
    CommunicationFault,
    UnclassifiedFault,
    OrphanedRemoteTicket,
    Config,
    Io,
    Json,
}

impl ErrorKind {
    /// 类别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IdentityUnavailable => "IdentityUnavailable",
            ErrorKind::SigningFailure => "SigningFailure",
            ErrorKind::EmptyResponse => "EmptyResponse",
            ErrorKind::MalformedResponse => "MalformedResponse",
            ErrorKind::IncompleteCredentials => "IncompleteCredentials",
            ErrorKind::ConflictFault => "ConflictFault",
            ErrorKind::GenericProtocolFault => "GenericProtocolFault",
            ErrorKind::CommunicationFault => "CommunicationFault",
            ErrorKind::UnclassifiedFault => "UnclassifiedFault",
            ErrorKind::OrphanedRemoteTicket => "OrphanedRemoteTicket",
            ErrorKind::Config => "Config",
            ErrorKind::Io => "Io",
            ErrorKind::Json => "Json",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 孤立票据的处理建议
pub const ORPHANED_TICKET_REMEDIATION: &str = "无法从远端取回该票据的 token/sign。\
请等待远端票据自然过期（通常 10-15 分钟）后重试；\
如果其他进程或主机使用同一证书获取了票据，请改为共享其凭证缓存文件。";

impl Error {
    /// 获取错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IdentityUnavailable { .. } => ErrorKind::IdentityUnavailable,
            Error::SigningFailure { .. } => ErrorKind::SigningFailure,
            Error::EmptyResponse => ErrorKind::EmptyResponse,
            Error::MalformedResponse(_) => ErrorKind::MalformedResponse,
            Error::IncompleteCredentials { .. } => ErrorKind::IncompleteCredentials,
            Error::ConflictFault { .. } => ErrorKind::ConflictFault,
            Error::GenericProtocolFault { .. } => ErrorKind::GenericProtocolFault,
            Error::CommunicationFault { .. } => ErrorKind::CommunicationFault,
            Error::UnclassifiedFault { .. } => ErrorKind::UnclassifiedFault,
            Error::OrphanedRemoteTicket { .. } => ErrorKind::OrphanedRemoteTicket,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// 稍后重试是否可能成功
    ///
    /// 冲突与孤立票据会随远端票据过期自行消失；通信类故障是暂时的。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConflictFault
                | ErrorKind::OrphanedRemoteTicket
                | ErrorKind::CommunicationFault
                | ErrorKind::EmptyResponse
                | ErrorKind::UnclassifiedFault
        )
    }

    /// 续期失败时是否允许回退到仍未过期的缓存凭证
    ///
    /// 身份与签名错误始终对本次调用致命。
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EmptyResponse
                | ErrorKind::MalformedResponse
                | ErrorKind::IncompleteCredentials
                | ErrorKind::GenericProtocolFault
                | ErrorKind::CommunicationFault
                | ErrorKind::UnclassifiedFault
        )
    }

    /// 创建签名失败错误
    pub fn signing(context: &str, cause: impl std::fmt::Display) -> Self {
        Error::SigningFailure {
            context: context.to_string(),
            cause: cause.to_string(),
        }
    }

    /// 创建通信故障
    pub fn communication(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::CommunicationFault {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// 创建孤立票据错误，附带处理建议
    pub fn orphaned(reason: impl Into<String>) -> Self {
        Error::OrphanedRemoteTicket {
            reason: reason.into(),
            remediation: ORPHANED_TICKET_REMEDIATION.to_string(),
        }
    }

    /// 复制同类别的错误，分发给等待同一次续期的调用方
    ///
    /// 底层原因只保留文本。
    pub fn replicate(&self) -> Self {
        let source_text = |source: &Option<BoxError>| source.as_ref().map(|s| BoxError::from(s.to_string()));
        match self {
            Error::IdentityUnavailable { path, reason } => Error::IdentityUnavailable {
                path: path.clone(),
                reason: reason.clone(),
            },
            Error::SigningFailure { context, cause } => Error::SigningFailure {
                context: context.clone(),
                cause: cause.clone(),
            },
            Error::EmptyResponse => Error::EmptyResponse,
            Error::MalformedResponse(message) => Error::MalformedResponse(message.clone()),
            Error::IncompleteCredentials { token_len, sign_len } => Error::IncompleteCredentials {
                token_len: *token_len,
                sign_len: *sign_len,
            },
            Error::ConflictFault { reason } => Error::ConflictFault { reason: reason.clone() },
            Error::GenericProtocolFault { code, reason } => Error::GenericProtocolFault {
                code: code.clone(),
                reason: reason.clone(),
            },
            Error::CommunicationFault { message, source } => Error::CommunicationFault {
                message: message.clone(),
                source: source_text(source),
            },
            Error::UnclassifiedFault { message, source } => Error::UnclassifiedFault {
                message: message.clone(),
                source: source_text(source),
            },
            Error::OrphanedRemoteTicket { reason, remediation } => Error::OrphanedRemoteTicket {
                reason: reason.clone(),
                remediation: remediation.clone(),
            },
            Error::Config(message) => Error::Config(message.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
            Error::Json(e) => Error::Json(<serde_json::Error as serde::de::Error>::custom(e.to_string())),
        }
    }
}
