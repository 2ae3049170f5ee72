//! # 文件收集器
//!
//! 根据输入路径和 glob 模式收集待计算的结构文件。
//!
//! ## 依赖关系
//! - 被 `commands/calc.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{PdfError, Result};

use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 文件收集器
pub struct FileCollector {
    input: PathBuf,
    patterns: Vec<Pattern>,
    recursive: bool,
}

impl FileCollector {
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            patterns: Vec::new(),
            recursive: false,
        }
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.patterns = pattern
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Pattern::new(s).map_err(|e| {
                    PdfError::InvalidArgument(format!("Invalid pattern '{s}': {e}"))
                })
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 收集所有匹配的文件，按路径排序；单文件输入原样返回
    pub fn collect(&self) -> Vec<PathBuf> {
        if self.input.is_file() {
            return vec![self.input.clone()];
        }
        if !self.input.is_dir() {
            return vec![];
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut files: Vec<PathBuf> = WalkDir::new(&self.input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.matches(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();
        files
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_collects_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        for name in ["b.stru", "a.stru", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::write(nested.join("c.stru"), "").unwrap();

        let flat = FileCollector::new(dir.path().to_path_buf())
            .with_pattern("*.stru")
            .unwrap()
            .collect();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.stru", "b.stru"]);

        let deep = FileCollector::new(dir.path().to_path_buf())
            .with_pattern("*.stru, *.txt")
            .unwrap()
            .recursive(true)
            .collect();
        assert_eq!(deep.len(), 4);
    }

    #[test]
    fn test_single_file_and_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ni.stru");
        fs::write(&file, "").unwrap();
        let files = FileCollector::new(file.clone())
            .with_pattern("*.xyz")
            .unwrap()
            .collect();
        assert_eq!(files, vec![file]);
        assert!(FileCollector::new(dir.path().to_path_buf())
            .with_pattern("[")
            .is_err());
    }
}
