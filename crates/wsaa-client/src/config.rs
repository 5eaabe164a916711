//! 配置管理模块
//!
//! 该模块负责加载凭证管理器的配置，支持 YAML/JSON 格式，
//! 并允许通过 `WSAA__` 前缀的环境变量覆盖任意字段。

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wsaa_common::is_principal_digits;

/// 测试环境的 LoginCms 端点
pub const DEFAULT_ENDPOINT: &str = "https://wsaahomo.afip.gov.ar/ws/services/LoginCms";

/// 默认的目标服务
pub const DEFAULT_TARGET_SERVICE: &str = "ws_sr_padron_a13";

/// 无法从证书提取主体标识符时使用的占位值
pub const DEFAULT_FALLBACK_PRINCIPAL: &str = "20111111112";

/// 凭证管理器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 身份文件（证书 + 私钥 PEM）路径
    pub identity_path: PathBuf,
    /// 私钥密码
    pub identity_secret: String,
    /// 凭证缓存文件路径
    pub cache_path: PathBuf,
    /// LoginCms 端点
    pub endpoint: String,
    /// 请求访问的目标服务
    pub target_service: String,
    /// 单次交换的超时（秒）
    pub request_timeout_secs: u64,
    /// 响应体大小上限（字节）
    pub max_response_bytes: usize,
    /// 新鲜度安全余量（秒）
    pub freshness_margin_secs: i64,
    /// 冲突故障时对已过期缓存凭证的延长时长（秒）
    pub conflict_extension_secs: i64,
    /// 过期时间无法解析时是否直接报错
    pub strict_expiration: bool,
    /// 降级模式下的主体标识符
    pub fallback_principal_id: String,
    /// 日志级别
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            identity_path: PathBuf::from("certificado_arca.pem"),
            identity_secret: String::new(),
            cache_path: PathBuf::from(".wsaa_credentials_cache.json"),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            target_service: DEFAULT_TARGET_SERVICE.to_string(),
            request_timeout_secs: 30,
            max_response_bytes: 64 * 1024,
            freshness_margin_secs: 120,
            conflict_extension_secs: 8 * 60,
            strict_expiration: false,
            fallback_principal_id: DEFAULT_FALLBACK_PRINCIPAL.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// 从文件加载配置，环境变量优先
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_file = config_path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

        // 确定配置文件格式
        let format = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(anyhow!("不支持的配置文件格式，仅支持 YAML 或 JSON")),
        };

        let config = Config::builder()
            .add_source(File::with_name(config_file).format(format))
            .add_source(Environment::with_prefix("WSAA").separator("__"))
            .build()
            .context(format!("无法加载配置文件: {:?}", config_path))?;

        let client_config = config
            .try_deserialize::<ClientConfig>()
            .context("配置格式错误")?;

        client_config.validate()?;
        Ok(client_config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(anyhow!("request_timeout_secs 必须大于 0"));
        }
        if self.max_response_bytes == 0 {
            return Err(anyhow!("max_response_bytes 必须大于 0"));
        }
        if self.freshness_margin_secs < 0 || self.conflict_extension_secs <= 0 {
            return Err(anyhow!("freshness_margin_secs 不能为负，conflict_extension_secs 必须大于 0"));
        }
        if !is_principal_digits(&self.fallback_principal_id) {
            return Err(anyhow!(
                "fallback_principal_id 必须是 11 位数字: {}",
                self.fallback_principal_id
            ));
        }
        if self.target_service.trim().is_empty() {
            return Err(anyhow!("target_service 不能为空"));
        }
        Ok(())
    }

    /// 单次交换的超时
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 新鲜度安全余量
    pub fn freshness_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.freshness_margin_secs)
    }

    /// 冲突故障时的延长时长
    pub fn conflict_extension(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.conflict_extension_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.freshness_margin(), chrono::Duration::minutes(2));
        assert_eq!(config.conflict_extension(), chrono::Duration::minutes(8));
        assert_eq!(config.max_response_bytes, 65536);
    }

    #[test]
    fn test_load_yaml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "identity_path: /etc/wsaa/cert.pem\nconflict_extension_secs: 300\nstrict_expiration: true"
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.identity_path, PathBuf::from("/etc/wsaa/cert.pem"));
        assert_eq!(config.conflict_extension(), chrono::Duration::minutes(5));
        assert!(config.strict_expiration);
        // 未给出的字段使用默认值
        assert_eq!(config.target_service, DEFAULT_TARGET_SERVICE);
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(ClientConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_invalid_fallback_principal() {
        let config = ClientConfig {
            fallback_principal_id: "123".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
