//! # 解析器模块
//!
//! 结构文件与观测数据文件的解析器。
//!
//! ## 依赖关系
//! - 被 `engine.rs` 和 `batch/` 使用
//! - 使用 `models/` 数据模型
//! - 子模块: stru, data

pub mod data;
pub mod stru;

use crate::error::{PdfError, Result};
use crate::models::Phase;
use std::path::Path;

/// 支持的结构文件扩展名
pub const STRUCTURE_EXTENSIONS: &[&str] = &["stru"];

/// 从文件路径推断格式并解析结构
pub fn parse_structure_file(path: &Path) -> Result<Phase> {
    if !path.exists() {
        return Err(PdfError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "stru" => stru::parse_stru_file(path),
        _ => Err(PdfError::parse(
            "structure",
            &path.display().to_string(),
            format!(
                "cannot determine format (supported: {})",
                STRUCTURE_EXTENSIONS.join(", ")
            ),
        )),
    }
}
