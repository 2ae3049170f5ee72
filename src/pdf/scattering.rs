//! # 散射因子数据库
//!
//! 提供 X 射线与中子散射强度的查询。
//!
//! ## 约定
//! - X 射线：取 Q = 0 处的形状因子，即电子数 Z − 离子价
//! - 中子：相干散射长度 b (fm)，离子取中性原子的值
//! - 元素符号不区分大小写，可带离子价后缀（"O2-"、"Fe3+"、"Na+"）
//!
//! 每个物相持有自己的 `ScatteringOverrides`，读取时优先于全局表。
//!
//! ## 数据来源
//! V. F. Sears, Neutron News 3 (1992) 26
//!
//! ## 依赖关系
//! - 被 `models/phase.rs` 和 `pdf/calculator.rs` 调用
//! - 纯静态数据，无外部依赖

use crate::error::{PdfError, Result};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;

/// 辐射类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Radiation {
    Xray,
    Neutron,
}

impl Radiation {
    /// 从 "X"/"N"（不区分大小写）解析
    pub fn parse(kind: &str) -> Result<Self> {
        match kind.trim().to_ascii_uppercase().as_str() {
            "X" | "XRAY" | "X-RAY" => Ok(Radiation::Xray),
            "N" | "NEUTRON" => Ok(Radiation::Neutron),
            _ => Err(PdfError::InvalidKind(kind.to_string())),
        }
    }

    pub fn code(&self) -> char {
        match self {
            Radiation::Xray => 'X',
            Radiation::Neutron => 'N',
        }
    }
}

impl fmt::Display for Radiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Radiation::Xray => write!(f, "X-ray"),
            Radiation::Neutron => write!(f, "neutron"),
        }
    }
}

/// 元素表条目
#[derive(Debug, Clone, Copy)]
pub struct ElementEntry {
    pub symbol: &'static str,
    pub z: u32,
    /// 中子相干散射长度 (fm)，未收录时为 None
    pub neutron_b: Option<f64>,
}

#[rustfmt::skip]
const ELEMENTS: &[(&str, u32, Option<f64>)] = &[
    ("H", 1, Some(-3.7390)), ("He", 2, Some(3.26)), ("Li", 3, Some(-1.90)),
    ("Be", 4, Some(7.79)), ("B", 5, Some(5.30)), ("C", 6, Some(6.6460)),
    ("N", 7, Some(9.36)), ("O", 8, Some(5.803)), ("F", 9, Some(5.654)),
    ("Ne", 10, Some(4.566)), ("Na", 11, Some(3.63)), ("Mg", 12, Some(5.375)),
    ("Al", 13, Some(3.449)), ("Si", 14, Some(4.1491)), ("P", 15, Some(5.13)),
    ("S", 16, Some(2.847)), ("Cl", 17, Some(9.5770)), ("Ar", 18, Some(1.909)),
    ("K", 19, Some(3.67)), ("Ca", 20, Some(4.70)), ("Sc", 21, Some(12.29)),
    ("Ti", 22, Some(-3.370)), ("V", 23, Some(-0.3824)), ("Cr", 24, Some(3.635)),
    ("Mn", 25, Some(-3.73)), ("Fe", 26, Some(9.45)), ("Co", 27, Some(2.49)),
    ("Ni", 28, Some(10.3)), ("Cu", 29, Some(7.718)), ("Zn", 30, Some(5.680)),
    ("Ga", 31, Some(7.288)), ("Ge", 32, Some(8.185)), ("As", 33, Some(6.58)),
    ("Se", 34, Some(7.970)), ("Br", 35, Some(6.795)), ("Kr", 36, Some(7.81)),
    ("Rb", 37, Some(7.09)), ("Sr", 38, Some(7.02)), ("Y", 39, Some(7.75)),
    ("Zr", 40, Some(7.16)), ("Nb", 41, Some(7.054)), ("Mo", 42, Some(6.715)),
    ("Tc", 43, Some(6.8)), ("Ru", 44, Some(7.03)), ("Rh", 45, Some(5.88)),
    ("Pd", 46, Some(5.91)), ("Ag", 47, Some(5.922)), ("Cd", 48, Some(4.87)),
    ("In", 49, Some(4.065)), ("Sn", 50, Some(6.225)), ("Sb", 51, Some(5.57)),
    ("Te", 52, Some(5.80)), ("I", 53, Some(5.28)), ("Xe", 54, Some(4.92)),
    ("Cs", 55, Some(5.42)), ("Ba", 56, Some(5.07)), ("La", 57, Some(8.24)),
    ("Ce", 58, Some(4.84)), ("Pr", 59, Some(4.58)), ("Nd", 60, Some(7.69)),
    ("Pm", 61, Some(12.6)), ("Sm", 62, Some(0.80)), ("Eu", 63, Some(7.22)),
    ("Gd", 64, Some(6.5)), ("Tb", 65, Some(7.38)), ("Dy", 66, Some(16.9)),
    ("Ho", 67, Some(8.01)), ("Er", 68, Some(7.79)), ("Tm", 69, Some(7.07)),
    ("Yb", 70, Some(12.43)), ("Lu", 71, Some(7.21)), ("Hf", 72, Some(7.7)),
    ("Ta", 73, Some(6.91)), ("W", 74, Some(4.86)), ("Re", 75, Some(9.2)),
    ("Os", 76, Some(10.7)), ("Ir", 77, Some(10.6)), ("Pt", 78, Some(9.60)),
    ("Au", 79, Some(7.63)), ("Hg", 80, Some(12.692)), ("Tl", 81, Some(8.776)),
    ("Pb", 82, Some(9.401)), ("Bi", 83, Some(8.532)), ("Po", 84, None),
    ("At", 85, None), ("Rn", 86, None), ("Fr", 87, None),
    ("Ra", 88, Some(10.0)), ("Ac", 89, None), ("Th", 90, Some(10.31)),
    ("Pa", 91, Some(9.1)), ("U", 92, Some(8.417)),
];

/// 元素表，键为大写元素符号
pub static ELEMENT_TABLE: LazyLock<HashMap<String, ElementEntry>> = LazyLock::new(|| {
    ELEMENTS
        .iter()
        .map(|&(symbol, z, neutron_b)| {
            (
                symbol.to_ascii_uppercase(),
                ElementEntry {
                    symbol,
                    z,
                    neutron_b,
                },
            )
        })
        .collect()
});

static SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]{1,2})(?:(\d*)([+-])|([+-])(\d*))?$").expect("valid symbol regex")
});

/// 解析后的元素符号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub entry: ElementEntry,
    pub charge: i32,
}

impl Species {
    /// 规范化键，例如 "PB"、"O2-"、"FE3+"
    pub fn key(&self) -> String {
        let base = self.entry.symbol.to_ascii_uppercase();
        match self.charge.cmp(&0) {
            std::cmp::Ordering::Equal => base,
            std::cmp::Ordering::Greater => format!("{}{}+", base, self.charge),
            std::cmp::Ordering::Less => format!("{}{}-", base, -self.charge),
        }
    }

    fn value(&self, kind: Radiation, original: &str) -> Result<f64> {
        match kind {
            Radiation::Xray => Ok(self.entry.z as f64 - self.charge as f64),
            Radiation::Neutron => self
                .entry
                .neutron_b
                .ok_or_else(|| PdfError::UnknownElement(original.to_string())),
        }
    }
}

impl PartialEq for ElementEntry {
    fn eq(&self, other: &Self) -> bool {
        self.z == other.z
    }
}

impl Eq for ElementEntry {}

/// 解析元素符号（不区分大小写，允许离子价后缀）
pub fn parse_species(element: &str) -> Result<Species> {
    let trimmed = element.trim();
    let caps = SYMBOL_RE
        .captures(trimmed)
        .ok_or_else(|| PdfError::UnknownElement(element.to_string()))?;

    let base = caps[1].to_ascii_uppercase();
    let entry = *ELEMENT_TABLE
        .get(&base)
        .ok_or_else(|| PdfError::UnknownElement(element.to_string()))?;

    let (digits, sign) = match (caps.get(3), caps.get(4)) {
        (Some(sign), _) => (caps.get(2).map_or("", |m| m.as_str()), sign.as_str()),
        (None, Some(sign)) => (caps.get(5).map_or("", |m| m.as_str()), sign.as_str()),
        (None, None) => ("", ""),
    };
    let magnitude: i32 = if sign.is_empty() {
        0
    } else if digits.is_empty() {
        1
    } else {
        digits
            .parse()
            .map_err(|_| PdfError::UnknownElement(element.to_string()))?
    };
    let charge = if sign == "-" { -magnitude } else { magnitude };

    Ok(Species { entry, charge })
}

/// 全局默认散射值
pub fn lookup(kind: Radiation, element: &str) -> Result<f64> {
    parse_species(element)?.value(kind, element)
}

/// 物相局部散射因子覆盖表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScatteringOverrides {
    xray: BTreeMap<String, f64>,
    neutron: BTreeMap<String, f64>,
}

impl ScatteringOverrides {
    fn table(&self, kind: Radiation) -> &BTreeMap<String, f64> {
        match kind {
            Radiation::Xray => &self.xray,
            Radiation::Neutron => &self.neutron,
        }
    }

    /// 设置覆盖值
    pub fn set(&mut self, kind: Radiation, element: &str, value: f64) -> Result<()> {
        let key = parse_species(element)?.key();
        match kind {
            Radiation::Xray => self.xray.insert(key, value),
            Radiation::Neutron => self.neutron.insert(key, value),
        };
        Ok(())
    }

    /// 移除两种辐射类型下该元素的覆盖值
    pub fn reset(&mut self, element: &str) -> Result<()> {
        let key = parse_species(element)?.key();
        self.xray.remove(&key);
        self.neutron.remove(&key);
        Ok(())
    }

    /// 查询：覆盖值优先，否则取全局默认
    pub fn lookup(&self, kind: Radiation, element: &str) -> Result<f64> {
        let species = parse_species(element)?;
        match self.table(kind).get(&species.key()) {
            Some(&value) => Ok(value),
            None => species.value(kind, element),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.xray.is_empty() && self.neutron.is_empty()
    }

    /// 所有覆盖项 (辐射类型, 符号, 值)
    pub fn entries(&self) -> Vec<(Radiation, &str, f64)> {
        self.xray
            .iter()
            .map(|(k, &v)| (Radiation::Xray, k.as_str(), v))
            .chain(
                self.neutron
                    .iter()
                    .map(|(k, &v)| (Radiation::Neutron, k.as_str(), v)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xray_values_are_electron_counts() {
        assert_eq!(82.0, lookup(Radiation::Xray, "Pb").unwrap());
        assert_eq!(22.0, lookup(Radiation::Xray, "tI").unwrap());
        assert_eq!(10.0, lookup(Radiation::Xray, "O2-").unwrap());
        assert_eq!(23.0, lookup(Radiation::Xray, "Fe3+").unwrap());
        assert_eq!(10.0, lookup(Radiation::Xray, "Na+").unwrap());
    }

    #[test]
    fn test_neutron_lengths() {
        assert!((lookup(Radiation::Neutron, "PB").unwrap() - 9.401).abs() < 1e-3);
        assert!((lookup(Radiation::Neutron, "ti").unwrap() + 3.370).abs() < 1e-3);
        // 离子取中性原子的散射长度
        assert_eq!(
            lookup(Radiation::Neutron, "O2-").unwrap(),
            lookup(Radiation::Neutron, "O").unwrap()
        );
    }

    #[test]
    fn test_unknown_symbols_and_kinds() {
        assert!(matches!(
            lookup(Radiation::Neutron, "zz"),
            Err(PdfError::UnknownElement(_))
        ));
        assert!(matches!(
            lookup(Radiation::Neutron, "Po"),
            Err(PdfError::UnknownElement(_))
        ));
        assert!(lookup(Radiation::Xray, "Po").is_ok());
        assert!(matches!(Radiation::parse("Z"), Err(PdfError::InvalidKind(_))));
        assert_eq!(Radiation::parse("x").unwrap(), Radiation::Xray);
        assert_eq!(Radiation::parse("N").unwrap(), Radiation::Neutron);
    }

    #[test]
    fn test_override_then_reset_restores_default() {
        let mut overrides = ScatteringOverrides::default();
        let default_x = lookup(Radiation::Xray, "Pb").unwrap();
        let default_n = lookup(Radiation::Neutron, "Pb").unwrap();

        overrides.set(Radiation::Xray, "pb", 142.0).unwrap();
        overrides.set(Radiation::Neutron, "PB", -17.0).unwrap();
        assert_eq!(142.0, overrides.lookup(Radiation::Xray, "Pb").unwrap());
        assert_eq!(-17.0, overrides.lookup(Radiation::Neutron, "Pb").unwrap());

        overrides.reset("Pb").unwrap();
        assert_eq!(default_x, overrides.lookup(Radiation::Xray, "Pb").unwrap());
        assert_eq!(default_n, overrides.lookup(Radiation::Neutron, "Pb").unwrap());
        assert!(overrides.is_empty());
        assert!(overrides.reset("Zz").is_err());
    }
}
