//! # 参数地址空间
//!
//! 可精修量的寻址：
//!
//! | 地址 | 含义 |
//! |---|---|
//! | `lat(n)` | 晶格参数 a, b, c, α, β, γ（n = 1..6） |
//! | `x(i)` `y(i)` `z(i)` | 原子 i 的分数坐标 |
//! | `u11(i)` … `u23(i)` | 原子 i 的位移参数 |
//! | `occ(i)` | 原子 i 的占有率 |
//! | `pscale` `delta1` `delta2` `sratio` | 物相剖面参数 |
//! | `dscale` `qdamp` `qbroad` | 数据集参数 |
//! | `@n` | 精修变量 n |
//!
//! `Address` 不含物相/数据集编号，通过显式的 `Selection` 解析为 `Target`。
//!
//! ## 依赖关系
//! - 被 `fit/constraint.rs` 和 `engine.rs` 使用
//! - 读写 `models/` 的 Phase, Dataset

use crate::error::{PdfError, Result};
use crate::models::{Dataset, Phase};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)\s*([a-z][a-z0-9]*)\s*(?:\(\s*(\d+)\s*\))?\s*$").expect("valid address regex")
});

static PARAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*@\s*(\d+)\s*$").expect("valid parameter regex"));

const U_NAMES: [&str; 6] = ["u11", "u22", "u33", "u12", "u13", "u23"];
const AXIS_NAMES: [&str; 3] = ["x", "y", "z"];

/// 物相内的可寻址量（原子编号 1 起始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseField {
    Lat(usize),
    Coord { atom: usize, axis: usize },
    U { atom: usize, comp: usize },
    Occ(usize),
    PScale,
    Delta1,
    Delta2,
    SRatio,
}

/// 数据集内的可寻址量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetField {
    DScale,
    QDamp,
    QBroad,
}

/// 未限定物相/数据集的地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Phase(PhaseField),
    Dataset(DatasetField),
}

/// 当前物相与数据集（0 起始下标）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub phase: Option<usize>,
    pub dataset: Option<usize>,
}

/// 已解析到具体物相/数据集的地址（0 起始下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Phase { phase: usize, field: PhaseField },
    Dataset { dataset: usize, field: DatasetField },
}

/// setvar/getvar 的参数：结构量或精修变量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    Address(Address),
    Param(u32),
}

impl Address {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || PdfError::InvalidExpression(format!("unknown address '{}'", text.trim()));
        let caps = ADDRESS_RE.captures(text).ok_or_else(invalid)?;
        let name = caps[1].to_ascii_lowercase();
        let index = match caps.get(2) {
            Some(m) => Some(
                m.as_str()
                    .parse::<usize>()
                    .map_err(|_| PdfError::InvalidExpression(format!("bad index in '{text}'")))?,
            ),
            None => None,
        };

        let needs_index = |index: Option<usize>| {
            index.ok_or_else(|| {
                PdfError::InvalidExpression(format!("'{name}' needs an index, e.g. {name}(1)"))
            })
        };
        let no_index = |field: Address| match index {
            None => Ok(field),
            Some(_) => Err(PdfError::InvalidExpression(format!(
                "'{name}' does not take an index"
            ))),
        };

        match name.as_str() {
            "lat" => {
                let n = needs_index(index)?;
                if !(1..=6).contains(&n) {
                    return Err(PdfError::Range(format!("lat({n}) outside lat(1)..lat(6)")));
                }
                Ok(Address::Phase(PhaseField::Lat(n)))
            }
            "occ" => Ok(Address::Phase(PhaseField::Occ(needs_index(index)?))),
            "pscale" => no_index(Address::Phase(PhaseField::PScale)),
            "delta1" => no_index(Address::Phase(PhaseField::Delta1)),
            "delta2" => no_index(Address::Phase(PhaseField::Delta2)),
            "sratio" => no_index(Address::Phase(PhaseField::SRatio)),
            "dscale" => no_index(Address::Dataset(DatasetField::DScale)),
            "qdamp" => no_index(Address::Dataset(DatasetField::QDamp)),
            "qbroad" => no_index(Address::Dataset(DatasetField::QBroad)),
            other => {
                if let Some(axis) = AXIS_NAMES.iter().position(|&a| a == other) {
                    let atom = needs_index(index)?;
                    return Ok(Address::Phase(PhaseField::Coord { atom, axis }));
                }
                if let Some(comp) = U_NAMES.iter().position(|&u| u == other) {
                    let atom = needs_index(index)?;
                    return Ok(Address::Phase(PhaseField::U { atom, comp }));
                }
                Err(invalid())
            }
        }
    }

    /// 按当前选择解析
    pub fn resolve(&self, selection: &Selection) -> Result<Target> {
        match *self {
            Address::Phase(field) => {
                let phase = selection.phase.ok_or_else(PdfError::no_phase)?;
                Ok(Target::Phase { phase, field })
            }
            Address::Dataset(field) => {
                let dataset = selection.dataset.ok_or_else(PdfError::no_dataset)?;
                Ok(Target::Dataset { dataset, field })
            }
        }
    }
}

impl fmt::Display for PhaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseField::Lat(n) => write!(f, "lat({n})"),
            PhaseField::Coord { atom, axis } => write!(f, "{}({atom})", AXIS_NAMES[*axis]),
            PhaseField::U { atom, comp } => write!(f, "{}({atom})", U_NAMES[*comp]),
            PhaseField::Occ(atom) => write!(f, "occ({atom})"),
            PhaseField::PScale => write!(f, "pscale"),
            PhaseField::Delta1 => write!(f, "delta1"),
            PhaseField::Delta2 => write!(f, "delta2"),
            PhaseField::SRatio => write!(f, "sratio"),
        }
    }
}

impl fmt::Display for DatasetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetField::DScale => write!(f, "dscale"),
            DatasetField::QDamp => write!(f, "qdamp"),
            DatasetField::QBroad => write!(f, "qbroad"),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Phase(field) => fmt::Display::fmt(field, f),
            Address::Dataset(field) => fmt::Display::fmt(field, f),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Phase { phase, field } => write!(f, "phase {}: {}", phase + 1, field),
            Target::Dataset { dataset, field } => write!(f, "dataset {}: {}", dataset + 1, field),
        }
    }
}

impl VarRef {
    pub fn parse(text: &str) -> Result<Self> {
        if let Some(caps) = PARAM_RE.captures(text) {
            let id = caps[1]
                .parse()
                .map_err(|_| PdfError::InvalidExpression(format!("bad variable '{text}'")))?;
            return Ok(VarRef::Param(id));
        }
        Ok(VarRef::Address(Address::parse(text)?))
    }
}

impl Target {
    /// 检查目标在当前状态下存在
    pub fn validate(&self, phases: &[Phase], datasets: &[Dataset]) -> Result<()> {
        match *self {
            Target::Phase { phase, field } => {
                let p = phases.get(phase).ok_or_else(|| {
                    PdfError::Unassigned(format!("phase {} is not loaded", phase + 1))
                })?;
                match field {
                    PhaseField::Coord { atom, .. } | PhaseField::U { atom, .. } | PhaseField::Occ(atom) => {
                        p.atom_index(atom).map(|_| ())
                    }
                    _ => Ok(()),
                }
            }
            Target::Dataset { dataset, .. } => datasets
                .get(dataset)
                .map(|_| ())
                .ok_or_else(|| PdfError::Unassigned(format!("dataset {} is not loaded", dataset + 1))),
        }
    }

    pub fn read(&self, phases: &[Phase], datasets: &[Dataset]) -> Result<f64> {
        self.validate(phases, datasets)?;
        Ok(match *self {
            Target::Phase { phase, field } => {
                let p = &phases[phase];
                match field {
                    PhaseField::Lat(n) => p.crystal.lattice.params[n - 1],
                    PhaseField::Coord { atom, axis } => p.crystal.atoms[atom - 1].position[axis],
                    PhaseField::U { atom, comp } => p.crystal.atoms[atom - 1].u[comp],
                    PhaseField::Occ(atom) => p.crystal.atoms[atom - 1].occupancy,
                    PhaseField::PScale => p.pscale,
                    PhaseField::Delta1 => p.delta1,
                    PhaseField::Delta2 => p.delta2,
                    PhaseField::SRatio => p.sratio,
                }
            }
            Target::Dataset { dataset, field } => {
                let d = &datasets[dataset];
                match field {
                    DatasetField::DScale => d.dscale,
                    DatasetField::QDamp => d.qdamp,
                    DatasetField::QBroad => d.qbroad,
                }
            }
        })
    }

    pub fn write(&self, phases: &mut [Phase], datasets: &mut [Dataset], value: f64) -> Result<()> {
        self.validate(phases, datasets)?;
        match *self {
            Target::Phase { phase, field } => {
                let p = &mut phases[phase];
                match field {
                    PhaseField::Lat(n) => p.crystal.lattice.params[n - 1] = value,
                    PhaseField::Coord { atom, axis } => p.crystal.atoms[atom - 1].position[axis] = value,
                    PhaseField::U { atom, comp } => p.crystal.atoms[atom - 1].u[comp] = value,
                    PhaseField::Occ(atom) => p.crystal.atoms[atom - 1].occupancy = value,
                    PhaseField::PScale => p.pscale = value,
                    PhaseField::Delta1 => p.delta1 = value,
                    PhaseField::Delta2 => p.delta2 = value,
                    PhaseField::SRatio => p.sratio = value,
                }
            }
            Target::Dataset { dataset, field } => {
                let d = &mut datasets[dataset];
                match field {
                    DatasetField::DScale => d.dscale = value,
                    DatasetField::QDamp => d.qdamp = value,
                    DatasetField::QBroad => d.qbroad = value,
                }
            }
        }
        Ok(())
    }

    /// 写入标准不确定度；剖面参数没有对应字段，忽略
    pub fn write_sigma(&self, phases: &mut [Phase], sigma: f64) {
        if let Target::Phase { phase, field } = *self {
            let Some(p) = phases.get_mut(phase) else {
                return;
            };
            let n_atoms = p.crystal.atoms.len();
            match field {
                PhaseField::Lat(n) => p.crystal.lattice.esd[n - 1] = sigma,
                PhaseField::Coord { atom, axis } if atom >= 1 && atom <= n_atoms => {
                    p.crystal.atoms[atom - 1].position_esd[axis] = sigma
                }
                PhaseField::U { atom, comp } if atom >= 1 && atom <= n_atoms => {
                    p.crystal.atoms[atom - 1].u_esd[comp] = sigma
                }
                PhaseField::Occ(atom) if atom >= 1 && atom <= n_atoms => {
                    p.crystal.atoms[atom - 1].occupancy_esd = sigma
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::pdf::scattering::Radiation;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(Address::parse("lat(1)").unwrap(), Address::Phase(PhaseField::Lat(1)));
        assert_eq!(
            Address::parse(" Y( 3 ) ").unwrap(),
            Address::Phase(PhaseField::Coord { atom: 3, axis: 1 })
        );
        assert_eq!(
            Address::parse("u23(2)").unwrap(),
            Address::Phase(PhaseField::U { atom: 2, comp: 5 })
        );
        assert_eq!(Address::parse("qdamp").unwrap(), Address::Dataset(DatasetField::QDamp));
        assert!(matches!(Address::parse("lat(7)"), Err(PdfError::Range(_))));
        assert!(matches!(Address::parse("x"), Err(PdfError::InvalidExpression(_))));
        assert!(matches!(Address::parse("pscale(1)"), Err(PdfError::InvalidExpression(_))));
        assert!(matches!(Address::parse("foo(1)"), Err(PdfError::InvalidExpression(_))));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for text in ["lat(4)", "z(12)", "u12(1)", "occ(2)", "delta2", "qbroad"] {
            assert_eq!(Address::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_var_ref() {
        assert_eq!(VarRef::parse("@12").unwrap(), VarRef::Param(12));
        assert_eq!(
            VarRef::parse("dscale").unwrap(),
            VarRef::Address(Address::Dataset(DatasetField::DScale))
        );
        assert!(VarRef::parse("@x").is_err());
    }

    #[test]
    fn test_resolve_requires_selection() {
        let empty = Selection::default();
        assert!(matches!(
            Address::parse("lat(1)").unwrap().resolve(&empty),
            Err(PdfError::Unassigned(_))
        ));
        assert!(matches!(
            Address::parse("dscale").unwrap().resolve(&empty),
            Err(PdfError::Unassigned(_))
        ));
    }

    #[test]
    fn test_read_write_targets() {
        let mut phases = vec![Phase::new(fixtures::nickel_crystal()).unwrap()];
        let mut datasets =
            vec![Dataset::allocate(Radiation::Xray, 25.0, 0.0, 1.0, 5.0, 41).unwrap()];
        let selection = Selection {
            phase: Some(0),
            dataset: Some(0),
        };

        let lat = Address::parse("lat(1)").unwrap().resolve(&selection).unwrap();
        assert!((lat.read(&phases, &datasets).unwrap() - fixtures::NI_LATTICE).abs() < 1e-12);
        lat.write(&mut phases, &mut datasets, 3.6).unwrap();
        assert_eq!(phases[0].lattice().params[0], 3.6);

        let x4 = Address::parse("x(4)").unwrap().resolve(&selection).unwrap();
        assert_eq!(x4.read(&phases, &datasets).unwrap(), 0.5);

        let qdamp = Address::parse("qdamp").unwrap().resolve(&selection).unwrap();
        qdamp.write(&mut phases, &mut datasets, 0.02).unwrap();
        assert_eq!(datasets[0].qdamp, 0.02);

        let x9 = Address::parse("x(9)").unwrap().resolve(&selection).unwrap();
        assert!(matches!(x9.read(&phases, &datasets), Err(PdfError::Range(_))));

        let other = Target::Phase {
            phase: 3,
            field: PhaseField::PScale,
        };
        assert!(matches!(other.read(&phases, &datasets), Err(PdfError::Unassigned(_))));
    }
}
