//! 身份管理模块
//!
//! 该模块负责从本地存储加载证书与私钥，并从证书中提取进程固定使用的主体标识符。

mod loader;
mod principal;

pub use loader::Identity;
pub use principal::{extract_principal_id, fallback_principal};
