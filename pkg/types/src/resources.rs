use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use crate::quantity::{format_cpu_millis, format_memory_bytes, parse_cpu_millis, parse_memory_bytes};

/// CPU and memory amounts. Signed, so deficits and negative entitlements are representable.
/// Arithmetic saturates at the `i64` bounds.
///
/// Serialized as `{"cpu": "8000m", "memory": "8Gi"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ResourceListRepr", into = "ResourceListRepr")]
pub struct ResourceList {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millis: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceList {
    pub const ZERO: ResourceList = ResourceList {
        cpu_millis: 0,
        memory_bytes: 0,
    };

    pub fn new(cpu_millis: i64, memory_bytes: i64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    /// Build from quantity strings, e.g. `ResourceList::parse("8000m", "8Gi")`.
    pub fn parse(cpu: &str, memory: &str) -> anyhow::Result<Self> {
        Ok(Self {
            cpu_millis: parse_cpu_millis(cpu)?,
            memory_bytes: parse_memory_bytes(memory)?,
        })
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// True when both resources are at least zero.
    pub fn is_non_negative(&self) -> bool {
        self.cpu_millis >= 0 && self.memory_bytes >= 0
    }

    /// True when neither resource exceeds the matching one in `other`.
    pub fn fits_within(&self, other: &ResourceList) -> bool {
        self.cpu_millis <= other.cpu_millis && self.memory_bytes <= other.memory_bytes
    }

    /// Clamp each resource at zero.
    pub fn floor_zero(&self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.max(0),
            memory_bytes: self.memory_bytes.max(0),
        }
    }

    /// Scale each resource by its own factor, truncating toward zero.
    pub fn scale(&self, cpu_factor: f64, memory_factor: f64) -> Self {
        Self {
            cpu_millis: (self.cpu_millis as f64 * cpu_factor) as i64,
            memory_bytes: (self.memory_bytes as f64 * memory_factor) as i64,
        }
    }
}

impl Add for ResourceList {
    type Output = ResourceList;

    fn add(self, rhs: ResourceList) -> ResourceList {
        ResourceList {
            cpu_millis: self.cpu_millis.saturating_add(rhs.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
        }
    }
}

impl Sub for ResourceList {
    type Output = ResourceList;

    fn sub(self, rhs: ResourceList) -> ResourceList {
        ResourceList {
            cpu_millis: self.cpu_millis.saturating_sub(rhs.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(rhs.memory_bytes),
        }
    }
}

impl Neg for ResourceList {
    type Output = ResourceList;

    fn neg(self) -> ResourceList {
        ResourceList {
            cpu_millis: self.cpu_millis.saturating_neg(),
            memory_bytes: self.memory_bytes.saturating_neg(),
        }
    }
}

impl AddAssign for ResourceList {
    fn add_assign(&mut self, rhs: ResourceList) {
        *self = *self + rhs;
    }
}

impl SubAssign for ResourceList {
    fn sub_assign(&mut self, rhs: ResourceList) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for ResourceList {
    fn sum<I: Iterator<Item = ResourceList>>(iter: I) -> ResourceList {
        iter.fold(ResourceList::ZERO, Add::add)
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={} memory={}",
            format_cpu_millis(self.cpu_millis),
            format_memory_bytes(self.memory_bytes)
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ResourceListRepr {
    #[serde(default)]
    cpu: Option<String>,
    #[serde(default)]
    memory: Option<String>,
}

impl TryFrom<ResourceListRepr> for ResourceList {
    type Error = anyhow::Error;

    fn try_from(repr: ResourceListRepr) -> anyhow::Result<Self> {
        Ok(Self {
            cpu_millis: repr.cpu.as_deref().map(parse_cpu_millis).transpose()?.unwrap_or(0),
            memory_bytes: repr
                .memory
                .as_deref()
                .map(parse_memory_bytes)
                .transpose()?
                .unwrap_or(0),
        })
    }
}

impl From<ResourceList> for ResourceListRepr {
    fn from(list: ResourceList) -> Self {
        Self {
            cpu: Some(format_cpu_millis(list.cpu_millis)),
            memory: Some(format_memory_bytes(list.memory_bytes)),
        }
    }
}
