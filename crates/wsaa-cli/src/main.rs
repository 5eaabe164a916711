//! WSAA CLI - 凭据健康检查与诊断工具
//!
//! 日志写到 stderr，命令结果以 JSON/YAML 写到 stdout。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wsaa_client::{extract_principal_id, fallback_principal, init_credential_system, ClientConfig, Identity};
use wsaa_common::{CredentialPair, Error, PrincipalId, PrincipalSource};

#[derive(Parser)]
#[command(name = "wsaa-cli", version, about = "WSAA 访问凭据管理工具")]
struct Cli {
    /// 配置文件路径（YAML 或 JSON）；文件不存在时使用默认配置
    #[arg(long, short = 'c', global = true, default_value = "wsaa.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 获取凭据并输出健康状态
    Health,
    /// 输出主体标识符及其来源
    Principal,
    /// 输出生效的配置（隐藏私钥密码）
    Config,
}

/// 健康检查成功时的输出
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport {
    status: &'static str,
    principal: String,
    principal_source: PrincipalSource,
    token_length: usize,
    sign_length: usize,
    expiration_time: DateTime<Utc>,
    minutes_until_expiration: i64,
}

/// 健康检查失败时的输出
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthFailure {
    status: &'static str,
    principal: String,
    kind: String,
    message: String,
    retryable: bool,
}

impl HealthReport {
    fn new(pair: &CredentialPair, principal: &PrincipalId, now: DateTime<Utc>) -> Self {
        Self {
            status: "ok",
            principal: principal.value.clone(),
            principal_source: principal.source,
            token_length: pair.token.len(),
            sign_length: pair.sign.len(),
            expiration_time: pair.expiration_time,
            minutes_until_expiration: pair.remaining(now).num_minutes(),
        }
    }
}

impl HealthFailure {
    fn new(error: &Error, principal: &PrincipalId) -> Self {
        Self {
            status: "error",
            principal: principal.value.clone(),
            kind: error.kind().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config)?;
    init_tracing(&config.log_level)?;

    if !from_file {
        warn!(path = %cli.config.display(), "配置文件不存在，使用默认配置");
    }

    match cli.command {
        Command::Health => health(&config).await,
        Command::Principal => principal(&config),
        Command::Config => show_config(&config),
    }
}

fn load_config(path: &Path) -> Result<(ClientConfig, bool)> {
    if path.exists() {
        let config = ClientConfig::load(path).with_context(|| format!("无法加载配置: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((ClientConfig::default(), false))
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("无效的日志级别: {}", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn health(config: &ClientConfig) -> Result<ExitCode> {
    let (manager, principal) = init_credential_system(config)
        .await
        .context("凭据管理系统初始化失败")?;

    match manager.get_credentials().await {
        Ok(pair) => {
            let report = HealthReport::new(&pair, &principal, Utc::now());
            info!(minutes_until_expiration = report.minutes_until_expiration, "健康检查通过");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let failure = HealthFailure::new(&e, &principal);
            warn!(kind = %failure.kind, retryable = failure.retryable, "健康检查失败");
            println!("{}", serde_json::to_string_pretty(&failure)?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn principal(config: &ClientConfig) -> Result<ExitCode> {
    let principal = match Identity::load(&config.identity_path, &config.identity_secret) {
        Ok(identity) => extract_principal_id(&identity, &config.fallback_principal_id),
        Err(e) => {
            warn!(error = %e, "身份加载失败");
            fallback_principal(&config.fallback_principal_id)
        }
    };

    println!("{}", serde_json::to_string_pretty(&principal)?);
    Ok(if principal.is_fallback() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn show_config(config: &ClientConfig) -> Result<ExitCode> {
    print!("{}", serde_yaml::to_string(&redacted(config))?);
    Ok(ExitCode::SUCCESS)
}

fn redacted(config: &ClientConfig) -> ClientConfig {
    let mut config = config.clone();
    if !config.identity_secret.is_empty() {
        config.identity_secret = "******".to_string();
    }
    config
}
