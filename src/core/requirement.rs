//! Dependency requirements (`name[extras] specifiers ; marker`)
//!
//! Requirements are parsed into structured values up front so the resolver
//! never handles free-form strings. Descriptors may spell them either as a
//! single string or as a `{ name, version, extras }` table.

use crate::core::specifier::SpecifierSet;
use crate::error::{DistError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[(?P<extras>[^\]]*)\])?\s*(?P<spec>[^;]*?)\s*(?:;\s*(?P<marker>.*?))?\s*$",
    )
    .expect("requirement pattern is a valid regex")
});

static BARE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("name pattern is a valid regex")
});

static NAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator pattern is a valid regex"));

/// Canonical form of a distribution name used for lookups
pub fn normalize_name(name: &str) -> String {
    NAME_SEPARATORS
        .replace_all(&name.to_ascii_lowercase(), "-")
        .into_owned()
}

/// A single dependency requirement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RequirementSpec", into = "String")]
pub struct Requirement {
    /// Distribution name as written
    pub name: String,
    /// Optional features requested from the dependency
    pub extras: Vec<String>,
    /// Version constraints; empty means any version
    pub specifiers: SpecifierSet,
    /// Environment marker, kept verbatim and not evaluated
    pub marker: Option<String>,
}

impl Requirement {
    /// Parse a requirement string such as `pandas==0.23.3`
    pub fn parse(input: &str) -> Result<Self> {
        let head = input.split_once(';').map_or(input, |(head, _)| head);
        if head.contains('@') {
            return Err(DistError::requirement(
                input,
                "direct URL references are not supported",
            ));
        }

        let caps = REQUIREMENT_RE
            .captures(input)
            .ok_or_else(|| DistError::requirement(input, "expected 'name[extras] specifiers'"))?;

        let extras = caps
            .name("extras")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let spec = caps.name("spec").map_or("", |m| m.as_str()).trim();
        let spec = spec
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(spec);

        let specifiers = SpecifierSet::parse(spec)
            .map_err(|e| DistError::requirement(input, e.to_string()))?;

        Ok(Self {
            name: caps["name"].to_string(),
            extras,
            specifiers,
            marker: caps
                .name("marker")
                .map(|m| m.as_str().to_string())
                .filter(|m| !m.is_empty()),
        })
    }

    /// Normalized distribution name
    pub fn key(&self) -> String {
        normalize_name(&self.name)
    }

    /// Whether the requirement is an exact `==` pin without wildcard
    pub fn is_pinned(&self) -> bool {
        let mut iter = self.specifiers.iter();
        matches!(
            (iter.next(), iter.next()),
            (Some(spec), None)
                if spec.operator == crate::core::specifier::Operator::Equal && !spec.wildcard
        )
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        write!(f, "{}", self.specifiers)?;
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Requirement> for String {
    fn from(req: Requirement) -> Self {
        req.to_string()
    }
}

/// Serialized spellings accepted for a requirement
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RequirementSpec {
    Text(String),
    Table {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        extras: Vec<String>,
    },
}

impl TryFrom<RequirementSpec> for Requirement {
    type Error = DistError;

    fn try_from(spec: RequirementSpec) -> Result<Self> {
        match spec {
            RequirementSpec::Text(text) => Self::parse(&text),
            RequirementSpec::Table {
                name,
                version,
                extras,
            } => {
                if !BARE_NAME_RE.is_match(&name) {
                    return Err(DistError::requirement(
                        name,
                        "table form takes a bare name; put constraints in 'version'",
                    ));
                }
                let specifiers = match version {
                    Some(version) => SpecifierSet::parse(&version)?,
                    None => SpecifierSet::default(),
                };
                Ok(Self {
                    name,
                    extras,
                    specifiers,
                    marker: None,
                })
            }
        }
    }
}
