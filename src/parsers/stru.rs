//! # PDFfit .stru 格式解析器
//!
//! 读写 PDFfit 结构文件。
//!
//! ## .stru 格式说明
//! ```text
//! title  Structure of Ni
//! format pdffit
//! scale   1.000000
//! sharp   0.000000,  0.000000,  1.000000,  3.500000     (delta2, delta1, sratio, srcut)
//! spcgr   Fm-3m
//! cell    3.523870,  3.523870,  3.523870, 90.000000, 90.000000, 90.000000
//! dcell   0.000000,  0.000000,  0.000000,  0.000000,  0.000000,  0.000000
//! ncell          1,         1,         1,         4
//! atoms
//! NI   x    y    z    occ          每个原子 6 行：
//!      dx   dy   dz   docc         坐标与占有率、其不确定度
//!      u11  u22  u33               对角位移参数、其不确定度
//!      du11 du22 du33              非对角位移参数、其不确定度
//!      u12  u13  u23
//!      du12 du13 du23
//! ```
//!
//! 逗号与空白均为分隔符。`sharp` 也接受旧的三值形式 (delta2, sratio, srcut)。
//!
//! ## 依赖关系
//! - 被 `parsers/mod.rs` 和 `engine.rs` 使用
//! - 生成 `models/phase.rs` 的 Phase

use crate::error::{PdfError, Result};
use crate::models::{Atom, Crystal, Lattice, Phase};

use std::fs;
use std::path::Path;

const FORMAT: &str = "stru";

/// 解析 .stru 文件
pub fn parse_stru_file(path: &Path) -> Result<Phase> {
    let content = fs::read_to_string(path).map_err(|e| PdfError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_stru_content(
        &content,
        path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown"),
    )
}

fn fields(line: &str) -> Vec<&str> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .collect()
}

fn numbers(tokens: &[&str], source: &str, what: &str) -> Result<Vec<f64>> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<f64>().map_err(|_| {
                PdfError::parse(FORMAT, source, format!("non-numeric value '{t}' in {what}"))
            })
        })
        .collect()
}

fn exactly<const N: usize>(values: Vec<f64>, source: &str, what: &str) -> Result<[f64; N]> {
    let len = values.len();
    values.try_into().map_err(|_| {
        PdfError::parse(FORMAT, source, format!("{what} needs {N} values, found {len}"))
    })
}

/// 从字符串内容解析
pub fn parse_stru_content(content: &str, default_name: &str) -> Result<Phase> {
    let src = default_name;
    let mut name = default_name.to_string();
    let mut pscale = 1.0;
    let mut sharp = [0.0, 0.0, 1.0, 0.0];
    let mut space_group: Option<String> = None;
    let mut cell: Option<[f64; 6]> = None;
    let mut dcell = [0.0; 6];
    let mut expected_atoms: Option<usize> = None;
    let mut rcut = 0.0;

    let mut lines = content.lines().enumerate();
    let mut in_atoms = false;
    for (_, line) in lines.by_ref() {
        let tokens = fields(line);
        let Some(keyword) = tokens.first() else {
            continue;
        };
        let rest = &tokens[1..];
        match keyword.to_ascii_lowercase().as_str() {
            "title" => {
                let title = line.trim_start()[keyword.len()..].trim();
                if !title.is_empty() {
                    name = title.to_string();
                }
            }
            "format" => {
                if !rest.first().is_some_and(|f| f.eq_ignore_ascii_case("pdffit")) {
                    return Err(PdfError::parse(FORMAT, src, "format must be 'pdffit'"));
                }
            }
            "scale" => pscale = exactly::<1>(numbers(rest, src, "scale")?, src, "scale")?[0],
            "sharp" => {
                let v = numbers(rest, src, "sharp")?;
                sharp = match v.as_slice() {
                    [d2, d1, sr, rc] => [*d2, *d1, *sr, *rc],
                    [d2, sr, rc] => [*d2, 0.0, *sr, *rc],
                    _ => {
                        return Err(PdfError::parse(
                            FORMAT,
                            src,
                            format!("sharp needs 3 or 4 values, found {}", v.len()),
                        ))
                    }
                };
            }
            "spcgr" => space_group = rest.first().map(|s| s.to_string()),
            "cell" => cell = Some(exactly::<6>(numbers(rest, src, "cell")?, src, "cell")?),
            "dcell" => dcell = exactly::<6>(numbers(rest, src, "dcell")?, src, "dcell")?,
            "ncell" => {
                let v = exactly::<4>(numbers(rest, src, "ncell")?, src, "ncell")?;
                expected_atoms = Some(v[3] as usize);
            }
            "rcut" => rcut = exactly::<1>(numbers(rest, src, "rcut")?, src, "rcut")?[0],
            "atoms" => {
                in_atoms = true;
                break;
            }
            // shape、spdiameter 等本程序不使用的关键字
            _ => {}
        }
    }

    let cell = cell.ok_or_else(|| PdfError::parse(FORMAT, src, "missing 'cell' line"))?;
    if !in_atoms {
        return Err(PdfError::parse(FORMAT, src, "missing 'atoms' section"));
    }

    let record_lines: Vec<(usize, &str)> = lines.filter(|(_, l)| !l.trim().is_empty()).collect();
    if record_lines.len() % 6 != 0 {
        return Err(PdfError::parse(
            FORMAT,
            src,
            format!("incomplete atom record: {} lines is not a multiple of 6", record_lines.len()),
        ));
    }

    let mut atoms = Vec::with_capacity(record_lines.len() / 6);
    for record in record_lines.chunks(6) {
        let line_no = record[0].0 + 1;
        let what = format!("atom record at line {line_no}");
        let head = fields(record[0].1);
        let Some((element, values)) = head.split_first() else {
            return Err(PdfError::parse(FORMAT, src, format!("empty {what}")));
        };
        if !element.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(PdfError::parse(FORMAT, src, format!("{what} must start with an element")));
        }
        let [x, y, z, occ] = exactly::<4>(numbers(values, src, &what)?, src, &what)?;
        let row = |k: usize, n: usize| -> Result<Vec<f64>> {
            let v = numbers(&fields(record[k].1), src, &what)?;
            if v.len() != n {
                return Err(PdfError::parse(
                    FORMAT,
                    src,
                    format!("line {} of {what} needs {n} values, found {}", k + 1, v.len()),
                ));
            }
            Ok(v)
        };
        let esd = row(1, 4)?;
        let u_diag = row(2, 3)?;
        let du_diag = row(3, 3)?;
        let u_off = row(4, 3)?;
        let du_off = row(5, 3)?;

        let mut atom = Atom::new(*element, [x, y, z])
            .with_occupancy(occ)
            .with_u([u_diag[0], u_diag[1], u_diag[2], u_off[0], u_off[1], u_off[2]]);
        atom.position_esd = [esd[0], esd[1], esd[2]];
        atom.occupancy_esd = esd[3];
        atom.u_esd = [du_diag[0], du_diag[1], du_diag[2], du_off[0], du_off[1], du_off[2]];
        atoms.push(atom);
    }

    if atoms.is_empty() {
        return Err(PdfError::parse(FORMAT, src, "structure contains no atoms"));
    }
    if let Some(n) = expected_atoms {
        if n != atoms.len() {
            return Err(PdfError::parse(
                FORMAT,
                src,
                format!("ncell declares {n} atoms but {} were read", atoms.len()),
            ));
        }
    }

    let mut lattice = Lattice::from_parameters(cell[0], cell[1], cell[2], cell[3], cell[4], cell[5]);
    lattice.esd = dcell;
    let mut crystal = Crystal::new(name, lattice, atoms);
    crystal.space_group = space_group;

    let mut phase = Phase::new(crystal)?;
    phase.pscale = pscale;
    phase.delta2 = sharp[0];
    phase.delta1 = sharp[1];
    phase.sratio = sharp[2];
    phase.srcut = sharp[3];
    phase.rcut = rcut;
    Ok(phase)
}

/// 将物相转换为 .stru 格式字符串
pub fn to_stru_string(phase: &Phase) -> String {
    let crystal = &phase.crystal;
    let p = crystal.lattice.params;
    let e = crystal.lattice.esd;

    let mut out = String::new();
    out.push_str(&format!("title  {}\n", crystal.name));
    out.push_str("format pdffit\n");
    out.push_str(&format!("scale  {:9.6}\n", phase.pscale));
    out.push_str(&format!(
        "sharp  {:9.6}, {:9.6}, {:9.6}, {:9.6}\n",
        phase.delta2, phase.delta1, phase.sratio, phase.srcut
    ));
    out.push_str(&format!(
        "spcgr  {}\n",
        crystal.space_group.as_deref().unwrap_or("P1")
    ));
    out.push_str(&format!(
        "cell   {:9.6}, {:9.6}, {:9.6}, {:9.6}, {:9.6}, {:9.6}\n",
        p[0], p[1], p[2], p[3], p[4], p[5]
    ));
    out.push_str(&format!(
        "dcell  {:9.6}, {:9.6}, {:9.6}, {:9.6}, {:9.6}, {:9.6}\n",
        e[0], e[1], e[2], e[3], e[4], e[5]
    ));
    out.push_str(&format!(
        "ncell  {:9}, {:9}, {:9}, {:9}\n",
        1,
        1,
        1,
        crystal.atoms.len()
    ));
    if phase.rcut > 0.0 {
        out.push_str(&format!("rcut   {:9.6}\n", phase.rcut));
    }
    out.push_str("atoms\n");

    for atom in &crystal.atoms {
        let [x, y, z] = atom.position;
        let [dx, dy, dz] = atom.position_esd;
        let u = atom.u;
        let du = atom.u_esd;
        out.push_str(&format!(
            "{:<4}{:18.8}{:18.8}{:18.8}{:13.4}\n",
            atom.element.to_ascii_uppercase(),
            x,
            y,
            z,
            atom.occupancy
        ));
        out.push_str(&format!(
            "{:4}{:18.8}{:18.8}{:18.8}{:13.4}\n",
            "", dx, dy, dz, atom.occupancy_esd
        ));
        for row in [[u[0], u[1], u[2]], [du[0], du[1], du[2]], [u[3], u[4], u[5]], [du[3], du[4], du[5]]] {
            out.push_str(&format!("{:4}{:18.8}{:18.8}{:18.8}\n", "", row[0], row[1], row[2]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_parse_nickel() {
        let phase = parse_stru_content(fixtures::NI_STRU, "ni").unwrap();
        assert_eq!(phase.name(), "Structure of Ni");
        assert_eq!(phase.num_atoms(), 4);
        assert_eq!(phase.crystal.space_group.as_deref(), Some("Fm-3m"));
        assert!((phase.lattice().params[0] - fixtures::NI_LATTICE).abs() < 1e-9);
        assert_eq!(phase.sratio, 1.0);
        assert_eq!(phase.srcut, 3.5);
        assert_eq!(phase.atoms()[3].position, [0.5, 0.5, 0.0]);
        assert!((phase.atoms()[0].u[0] - fixtures::NI_UISO).abs() < 1e-12);
        assert_eq!(phase.element_symbols(), vec!["NI"; 4]);
    }

    #[test]
    fn test_write_then_read_preserves_values() {
        let mut phase = Phase::new(fixtures::perovskite_crystal()).unwrap();
        phase.delta2 = 1.25;
        phase.rcut = 12.0;
        phase.crystal.atoms[2].position_esd = [0.001, 0.002, 0.003];
        let text = to_stru_string(&phase);
        let back = parse_stru_content(&text, "x").unwrap();
        assert_eq!(back.num_atoms(), 56);
        assert_eq!(back.atom_types(), vec!["PB", "O", "SC", "W", "TI"]);
        assert_eq!(back.delta2, 1.25);
        assert_eq!(back.rcut, 12.0);
        assert_eq!(back.atoms()[2].position_esd, [0.001, 0.002, 0.003]);
        assert_eq!(back.atoms()[40].occupancy, 0.25);
    }

    #[test]
    fn test_legacy_three_value_sharp() {
        let text = fixtures::NI_STRU.replace(
            "sharp   0.000000,  0.000000,  1.000000,  3.500000",
            "sharp   0.5, 0.8, 4.0",
        );
        let phase = parse_stru_content(&text, "ni").unwrap();
        assert_eq!(phase.delta2, 0.5);
        assert_eq!(phase.delta1, 0.0);
        assert_eq!(phase.sratio, 0.8);
        assert_eq!(phase.srcut, 4.0);
    }

    #[test]
    fn test_parse_errors() {
        let no_cell = fixtures::NI_STRU.replace(
            "cell    3.523870,  3.523870,  3.523870, 90.000000, 90.000000, 90.000000\n",
            "",
        );
        let bad_number = fixtures::NI_STRU.replacen("0.00126651", "0.00x26651", 1);
        let wrong_count = fixtures::NI_STRU.replace("1,         4", "1,         5");
        let truncated: String = fixtures::NI_STRU.lines().take(30).collect::<Vec<_>>().join("\n");

        for text in [no_cell, bad_number, wrong_count, truncated, "title x\n".to_string()] {
            assert!(matches!(
                parse_stru_content(&text, "bad"),
                Err(PdfError::ParseError { .. })
            ));
        }
    }

    #[test]
    fn test_unknown_element_is_not_a_phase() {
        let text = fixtures::NI_STRU.replacen("NI ", "QQ ", 1);
        assert!(matches!(
            parse_stru_content(&text, "bad"),
            Err(PdfError::UnknownElement(_))
        ));
    }
}
