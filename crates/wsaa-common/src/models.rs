//! 数据模型模块
//!
//! 该模块定义凭证对与主体标识符，并提供序列化/反序列化功能。

pub mod credentials;
pub mod principal;
