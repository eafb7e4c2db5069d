//! Difficulty tiers for vulnerabilities.

use std::fmt;
use std::str::FromStr;

use havoc_util::errors::HavocError;

/// How hard a vulnerability is to find and exploit. Used both as a tag
/// on individual vulnerabilities and as a selection ceiling on modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Convert from the numeric levels 1-3.
    pub fn from_level(level: u8) -> Result<Self, HavocError> {
        match level {
            1 => Ok(Difficulty::Easy),
            2 => Ok(Difficulty::Medium),
            3 => Ok(Difficulty::Hard),
            other => Err(HavocError::Module {
                message: format!("invalid difficulty level {other} (must be 1-3)"),
            }),
        }
    }

    pub fn level(self) -> u8 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }
}

impl FromStr for Difficulty {
    type Err = HavocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => {
                // Accept the numeric spelling too.
                if let Ok(level) = other.parse::<u8>() {
                    return Difficulty::from_level(level);
                }
                Err(HavocError::Module {
                    message: format!("invalid difficulty '{other}'"),
                })
            }
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        };
        f.write_str(name)
    }
}
