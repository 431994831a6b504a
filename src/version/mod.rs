// src/version/mod.rs

//! Version handling and constraint satisfaction for component dependencies.
//!
//! Descriptor versions are semantic versions, but we keep the original string
//! around: two descriptors may carry equal semantic versions and the resolver
//! breaks that tie by descriptor order, not by normalized text.

use crate::error::{Error, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed component version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentVersion {
    raw: String,
    #[serde(skip)]
    parsed: Option<Version>,
}

// Equality and ordering go through the semantic version, never the cached
// parse or the raw text: "2.0" and "2.0.0" are the same version, and a
// value deserialized from persisted state compares equal to a fresh parse.
impl PartialEq for ComponentVersion {
    fn eq(&self, other: &Self) -> bool {
        self.semver() == other.semver()
    }
}

impl Eq for ComponentVersion {}

impl std::hash::Hash for ComponentVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.semver().hash(state);
    }
}

impl ComponentVersion {
    /// Parse a version string.
    ///
    /// Strict semver is accepted directly. Shorter forms ("2.0", "3") are
    /// normalized by padding missing components with zero.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::MalformedDescriptor(
                "empty version string".to_string(),
            ));
        }
        let parsed = Self::to_semver(s)?;
        Ok(Self {
            raw: s.to_string(),
            parsed: Some(parsed),
        })
    }

    fn to_semver(s: &str) -> Result<Version> {
        if let Ok(v) = Version::parse(s) {
            return Ok(v);
        }

        // Pad "major" or "major.minor" forms
        let numeric: Vec<u64> = s
            .split('.')
            .map(|p| {
                p.parse::<u64>().map_err(|_| {
                    Error::MalformedDescriptor(format!("invalid version component in '{}'", s))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match numeric.len() {
            1 => Ok(Version::new(numeric[0], 0, 0)),
            2 => Ok(Version::new(numeric[0], numeric[1], 0)),
            3 => Ok(Version::new(numeric[0], numeric[1], numeric[2])),
            _ => Err(Error::MalformedDescriptor(format!(
                "invalid version '{}'",
                s
            ))),
        }
    }

    /// The original descriptor text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn semver(&self) -> Version {
        match &self.parsed {
            Some(v) => v.clone(),
            // Deserialized from persisted state: raw was validated at parse
            // time, so re-derivation cannot fail for well-formed stores.
            None => Self::to_semver(&self.raw).unwrap_or_else(|_| Version::new(0, 0, 0)),
        }
    }
}

impl fmt::Display for ComponentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl Ord for ComponentVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.semver().cmp(&other.semver())
    }
}

impl PartialOrd for ComponentVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Version constraint operators for dependency declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    Exact(ComponentVersion),
    GreaterThan(ComponentVersion),
    GreaterOrEqual(ComponentVersion),
    LessThan(ComponentVersion),
    LessOrEqual(ComponentVersion),
    NotEqual(ComponentVersion),
    /// Both constraints must hold (ranges like ">= 1.0, < 2.0")
    And(Box<VersionConstraint>, Box<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a constraint string.
    ///
    /// Examples: ">= 1.2.3", "< 2.0.0", "= 1.5.0", ">= 1.0, < 2.0", "*".
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains(',') {
            let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
            if parts.len() == 2 {
                let left = Self::parse(parts[0])?;
                let right = Self::parse(parts[1])?;
                return Ok(VersionConstraint::And(Box::new(left), Box::new(right)));
            }
        }

        if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionConstraint::GreaterOrEqual(ComponentVersion::parse(
                rest,
            )?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionConstraint::LessOrEqual(ComponentVersion::parse(
                rest,
            )?))
        } else if let Some(rest) = s.strip_prefix("!=") {
            Ok(VersionConstraint::NotEqual(ComponentVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionConstraint::GreaterThan(ComponentVersion::parse(
                rest,
            )?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionConstraint::LessThan(ComponentVersion::parse(rest)?))
        } else if let Some(rest) = s.strip_prefix('=') {
            Ok(VersionConstraint::Exact(ComponentVersion::parse(rest)?))
        } else {
            // No operator means exact match
            Ok(VersionConstraint::Exact(ComponentVersion::parse(s)?))
        }
    }

    /// Check if a version satisfies this constraint.
    pub fn satisfies(&self, version: &ComponentVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::And(left, right) => {
                left.satisfies(version) && right.satisfies(version)
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(v) => write!(f, "= {}", v),
            VersionConstraint::GreaterThan(v) => write!(f, "> {}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">= {}", v),
            VersionConstraint::LessThan(v) => write!(f, "< {}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<= {}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!= {}", v),
            VersionConstraint::And(left, right) => write!(f, "{}, {}", left, right),
        }
    }
}

/// A dependency declaration: a target component name plus an optional
/// version constraint, parsed from descriptor strings like
/// "componentB >= 2.0.0" or just "componentB".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    pub name: String,
    pub constraint: VersionConstraint,
}

impl DependencySpec {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::MalformedDescriptor(
                "empty dependency declaration".to_string(),
            ));
        }

        // Name runs until the first operator character or whitespace
        let split_at = s
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '<' | '=' | '!'))
            .unwrap_or(s.len());
        let (name, rest) = s.split_at(split_at);
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::MalformedDescriptor(format!(
                "dependency '{}' has no component name",
                s
            )));
        }

        let constraint = VersionConstraint::parse(rest)?;
        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            _ => write!(f, "{} {}", self.name, self.constraint),
        }
    }
}
