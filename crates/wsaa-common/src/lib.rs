//! WSAA Common - 凭证管理共享数据结构与错误类型
//!
//! 该模块提供凭证管理器与命令行工具共享的数据结构和统一错误处理机制，
//! 包括凭证对（token/sign）、主体标识符以及远端故障分类。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::{Error, ErrorKind, Result};
pub use models::credentials::*;
pub use models::principal::*;
