//! # 观测 PDF 数据解析器
//!
//! 读取实验 G(r) 文本文件。
//!
//! ## 格式说明
//! ```text
//! # 任意表头（第一行全数值的行之前的内容都被跳过）
//! r  G                2 列
//! r  G  dG            3 列
//! r  G  dr  dG        4 列
//! ```
//!
//! 数据段内空行与 `#` 注释行被忽略，其余行必须全为数值且列数一致；
//! r 必须在均匀递增网格上，至少 2 个点。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 和 `engine.rs` 使用
//! - 生成 `models/dataset.rs` 的 ObservedCurve

use crate::error::{PdfError, Result};
use crate::models::ObservedCurve;

use std::fs;
use std::path::Path;

const FORMAT: &str = "data";

/// 解析数据文件
pub fn parse_data_file(path: &Path) -> Result<ObservedCurve> {
    let content = fs::read_to_string(path).map_err(|e| PdfError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_data_content(&content, &path.display().to_string())
}

fn numeric_row(line: &str) -> Option<Vec<f64>> {
    let values: Option<Vec<f64>> = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().ok())
        .collect();
    values.filter(|v| !v.is_empty())
}

/// 从字符串内容解析
pub fn parse_data_content(content: &str, source_name: &str) -> Result<ObservedCurve> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    let mut columns = 0;

    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match numeric_row(trimmed) {
            Some(row) => {
                if rows.is_empty() {
                    if !(2..=4).contains(&row.len()) {
                        return Err(PdfError::parse(
                            FORMAT,
                            source_name,
                            format!("line {}: expected 2 to 4 columns, found {}", line_no + 1, row.len()),
                        ));
                    }
                    columns = row.len();
                } else if row.len() != columns {
                    return Err(PdfError::parse(
                        FORMAT,
                        source_name,
                        format!(
                            "line {}: expected {columns} columns, found {}",
                            line_no + 1,
                            row.len()
                        ),
                    ));
                }
                rows.push(row);
            }
            None if rows.is_empty() => {}
            None => {
                return Err(PdfError::parse(
                    FORMAT,
                    source_name,
                    format!("line {}: non-numeric data '{}'", line_no + 1, trimmed),
                ))
            }
        }
    }

    let r: Vec<f64> = rows.iter().map(|row| row[0]).collect();
    let g: Vec<f64> = rows.iter().map(|row| row[1]).collect();
    let dg = match columns {
        3 => Some(rows.iter().map(|row| row[2]).collect()),
        4 => Some(rows.iter().map(|row| row[3]).collect()),
        _ => None,
    };
    let curve = ObservedCurve { r, g, dg };
    curve
        .validate()
        .map_err(|e| PdfError::parse(FORMAT, source_name, e.to_string()))?;
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_skipped() {
        let text = "\
History written: Mon Jan 1
qmax = 25.0
##### start data
#L r(A) G(r)
1.00 0.5
1.01 0.6

1.02 0.7
";
        let curve = parse_data_content(text, "ni.gr").unwrap();
        assert_eq!(curve.r, vec![1.00, 1.01, 1.02]);
        assert_eq!(curve.g, vec![0.5, 0.6, 0.7]);
        assert!(curve.dg.is_none());
    }

    #[test]
    fn test_uncertainty_columns() {
        let three = parse_data_content("1.0 2.0 0.1\n1.5 2.5 0.2\n", "a").unwrap();
        assert_eq!(three.dg, Some(vec![0.1, 0.2]));
        let four = parse_data_content("1.0, 2.0, 0.0, 0.3\n1.5, 2.5, 0.0, 0.4\n", "b").unwrap();
        assert_eq!(four.dg, Some(vec![0.3, 0.4]));
    }

    #[test]
    fn test_malformed_data() {
        let cases = [
            "",
            "header only\n",
            "1.0 2.0\n",
            "1.0 2.0\n1.1 2.1 0.1\n",
            "1.0 2.0\ngarbage\n1.2 2.2\n",
            "1.0 2.0\n1.1 2.1\n1.5 2.2\n",
            "1 2 3 4 5\n2 3 4 5 6\n",
        ];
        for text in cases {
            assert!(
                matches!(parse_data_content(text, "bad"), Err(PdfError::ParseError { .. })),
                "{text:?} should fail"
            );
        }
    }
}
