//! 票据请求构建模块
//!
//! 生成登录票据请求（loginTicketRequest）。签名覆盖序列化后的精确字节，
//! 因此 [`TicketRequest::to_xml`] 的输出就是签名和发送的内容。

use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};

/// 生成时间相对签发时刻的回拨量（分钟），容忍双方时钟偏差
pub const GENERATION_SKEW_MINUTES: i64 = 2;

/// 过期时间相对签发时刻的偏移（分钟）
pub const EXPIRATION_OFFSET_MINUTES: i64 = 10;

/// 不带时区后缀的民用时间格式
const CIVIL_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// 登录票据请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    /// 唯一标识（签发时刻的 Unix 秒数）
    pub unique_id: i64,
    /// 生成时间（本地民用时间）
    pub generation_time: NaiveDateTime,
    /// 过期时间（本地民用时间）
    pub expiration_time: NaiveDateTime,
    /// 目标服务
    pub target_service: String,
}

impl TicketRequest {
    /// 以 `now` 为签发时刻构建票据请求
    pub fn build(now: DateTime<Utc>, target_service: &str) -> Self {
        let local_now = now.with_timezone(&Local).naive_local();

        Self {
            unique_id: now.timestamp(),
            generation_time: local_now - Duration::minutes(GENERATION_SKEW_MINUTES),
            expiration_time: local_now + Duration::minutes(EXPIRATION_OFFSET_MINUTES),
            target_service: target_service.to_string(),
        }
    }

    /// 规范序列化形式
    pub fn to_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                "\n",
                r#"<loginTicketRequest version="1.0">"#,
                "<header>",
                "<uniqueId>{}</uniqueId>",
                "<generationTime>{}</generationTime>",
                "<expirationTime>{}</expirationTime>",
                "</header>",
                "<service>{}</service>",
                "</loginTicketRequest>"
            ),
            self.unique_id,
            self.generation_time.format(CIVIL_TIME_FORMAT),
            self.expiration_time.format(CIVIL_TIME_FORMAT),
            escape_text(&self.target_service),
        )
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
