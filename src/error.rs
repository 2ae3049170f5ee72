//! # 统一错误处理模块
//!
//! 定义 pdfrefine 的所有错误类型，使用 `thiserror` 派生。
//!
//! 每个引擎调用在修改共享状态之前完成全部校验，因此返回错误时状态保持不变。
//! 迭代上限（MaxIterExceeded）不是错误，而是精修报告中的终止状态。
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// pdfrefine 统一错误类型
#[derive(Error, Debug)]
pub enum PdfError {
    // ─────────────────────────────────────────────────────────────
    // 校验错误
    // ─────────────────────────────────────────────────────────────
    #[error("Value out of range: {0}")]
    Range(String),

    #[error("Unknown element '{0}'")]
    UnknownElement(String),

    #[error("Invalid radiation kind '{0}' (expected X or N)")]
    InvalidKind(String),

    #[error("Atoms {first} and {second} belong to different phases")]
    CrossPhase { first: usize, second: usize },

    #[error("Unassigned: {0}")]
    Unassigned(String),

    #[error("Nothing to refine: {0}")]
    NothingToRefine(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    // ─────────────────────────────────────────────────────────────
    // 解析错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to parse {format} input: {source_name}\nReason: {reason}")]
    ParseError {
        format: String,
        source_name: String,
        reason: String,
    },

    #[error("Invalid configuration in {path}: {reason}")]
    ConfigError { path: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // 数值错误
    // ─────────────────────────────────────────────────────────────
    #[error("Numerical failure: {0}")]
    Numerical(String),

    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // 序列化错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PdfError {
    /// 构造解析错误的便捷方法
    pub fn parse(format: &str, source_name: &str, reason: impl Into<String>) -> Self {
        PdfError::ParseError {
            format: format.to_string(),
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn no_phase() -> Self {
        PdfError::Unassigned("no phase is loaded".to_string())
    }

    pub(crate) fn no_dataset() -> Self {
        PdfError::Unassigned("no dataset is loaded".to_string())
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PdfError>;
