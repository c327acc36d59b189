//! Traversal depth for tree operations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How far below a resource an operation reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// The resource itself
    Zero,
    /// The resource and its direct members
    One,
    /// The resource and everything below it
    #[default]
    Infinite,
}

impl Depth {
    /// Depth to use when fanning out from a resource to its members
    ///
    /// `One` becomes `Zero`; `Infinite` stays `Infinite`. `Zero` has no
    /// members to fan out to and stays `Zero`.
    pub fn shallower(self) -> Depth {
        match self {
            Depth::Zero | Depth::One => Depth::Zero,
            Depth::Infinite => Depth::Infinite,
        }
    }

    /// Whether members of a container are visited at this depth
    pub fn includes_members(self) -> bool {
        !matches!(self, Depth::Zero)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "zero",
            Depth::One => "one",
            Depth::Infinite => "infinite",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "zero" => Ok(Depth::Zero),
            "1" | "one" => Ok(Depth::One),
            "inf" | "infinite" => Ok(Depth::Infinite),
            other => Err(format!(
                "invalid depth '{}' (expected zero, one or infinite)",
                other
            )),
        }
    }
}
