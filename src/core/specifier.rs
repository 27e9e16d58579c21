//! Version specifiers (`>=1.0`, `==0.23.3`, `~=2.2`, `!=1.5.*`)

use crate::core::version::Version;
use crate::error::{DistError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a single specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
    Arbitrary,
}

impl Operator {
    /// Operators ordered so that longer tokens are tried first
    const TOKENS: [(&'static str, Operator); 8] = [
        ("===", Operator::Arbitrary),
        ("~=", Operator::Compatible),
        ("==", Operator::Equal),
        ("!=", Operator::NotEqual),
        ("<=", Operator::LessEqual),
        (">=", Operator::GreaterEqual),
        ("<", Operator::Less),
        (">", Operator::Greater),
    ];

    fn as_str(self) -> &'static str {
        Self::TOKENS
            .iter()
            .find(|(_, op)| *op == self)
            .map_or("", |(token, _)| *token)
    }
}

/// One `operator version` clause
#[derive(Debug, Clone)]
pub struct Specifier {
    pub operator: Operator,
    pub version: Version,
    /// Trailing `.*` on `==`/`!=`
    pub wildcard: bool,
    raw_version: String,
}

impl Specifier {
    /// Parse a single clause such as `>=1.2`
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let (operator, rest) = Operator::TOKENS
            .iter()
            .find_map(|(token, op)| trimmed.strip_prefix(token).map(|rest| (*op, rest.trim())))
            .ok_or_else(|| DistError::requirement(input, "specifier must start with a comparison operator"))?;

        if rest.is_empty() {
            return Err(DistError::requirement(input, "missing version after operator"));
        }

        if operator == Operator::Arbitrary {
            // Arbitrary equality compares strings; a non-conforming version is allowed
            let version = Version::parse(rest).unwrap_or_else(|_| Version::from_release(&[0]));
            return Ok(Self {
                operator,
                version,
                wildcard: false,
                raw_version: rest.to_string(),
            });
        }

        let (version_str, wildcard) = match rest.strip_suffix(".*") {
            Some(prefix) => (prefix, true),
            None => (rest, false),
        };

        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(DistError::requirement(input, "wildcards are only allowed with == and !="));
        }

        let version = Version::parse(version_str)?;

        if operator == Operator::Compatible && version.release.len() < 2 {
            return Err(DistError::requirement(input, "~= needs at least two release segments"));
        }

        if version.local.is_some() && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(DistError::requirement(input, "local versions are only allowed with == and !="));
        }

        Ok(Self {
            operator,
            version,
            wildcard,
            raw_version: rest.to_string(),
        })
    }

    /// Whether `candidate` satisfies this clause
    pub fn contains(&self, candidate: &Version) -> bool {
        match self.operator {
            Operator::Equal => self.equals(candidate),
            Operator::NotEqual => !self.equals(candidate),
            Operator::LessEqual => candidate.public() <= self.version,
            Operator::GreaterEqual => candidate.public() >= self.version,
            Operator::Less => {
                candidate.public() < self.version
                    && !(candidate.is_prerelease()
                        && !self.version.is_prerelease()
                        && candidate.base() == self.version.base())
            }
            Operator::Greater => {
                candidate.public() > self.version
                    && !(candidate.is_postrelease()
                        && !self.version.is_postrelease()
                        && candidate.base() == self.version.base())
                    && !(candidate.local.is_some() && candidate.public() == self.version)
            }
            Operator::Compatible => {
                let mut prefix = self.version.release.clone();
                prefix.pop();
                candidate.public() >= self.version
                    && candidate.epoch == self.version.epoch
                    && release_starts_with(&candidate.release, &prefix)
            }
            Operator::Arbitrary => candidate.to_string().eq_ignore_ascii_case(&self.raw_version),
        }
    }

    fn equals(&self, candidate: &Version) -> bool {
        if self.wildcard {
            candidate.epoch == self.version.epoch
                && release_starts_with(&candidate.release, &self.version.release)
        } else if self.version.local.is_some() {
            *candidate == self.version
        } else {
            candidate.public() == self.version
        }
    }

    /// Whether the clause explicitly names a pre-release
    pub fn mentions_prerelease(&self) -> bool {
        !matches!(self.operator, Operator::NotEqual | Operator::Less | Operator::Greater)
            && self.version.is_prerelease()
    }
}

/// Release prefix match with zero padding (`1.2` starts with `1.2.0`)
fn release_starts_with(release: &[u64], prefix: &[u64]) -> bool {
    prefix
        .iter()
        .enumerate()
        .all(|(i, segment)| release.get(i).copied().unwrap_or(0) == *segment)
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.operator.as_str(), self.raw_version)
    }
}

/// A comma-separated conjunction of specifiers; empty matches everything
#[derive(Debug, Clone, Default)]
pub struct SpecifierSet {
    specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    /// Parse `>=1.0, <2` style input
    pub fn parse(input: &str) -> Result<Self> {
        let specifiers = input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Specifier::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { specifiers })
    }

    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specifier> {
        self.specifiers.iter()
    }

    /// Whether `candidate` satisfies every clause
    pub fn contains(&self, candidate: &Version) -> bool {
        self.specifiers.iter().all(|spec| spec.contains(candidate))
    }

    /// Whether pre-releases were asked for explicitly
    pub fn allows_prereleases(&self) -> bool {
        self.specifiers.iter().any(Specifier::mentions_prerelease)
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.specifiers.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for SpecifierSet {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for SpecifierSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpecifierSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn set(s: &str) -> SpecifierSet {
        SpecifierSet::parse(s).unwrap()
    }

    #[test]
    fn test_exact_pin() {
        let pin = set("==0.23.3");
        assert!(pin.contains(&v("0.23.3")));
        assert!(pin.contains(&v("0.23.3+cpu")));
        assert!(!pin.contains(&v("0.23.4")));
        assert!(!pin.contains(&v("0.24.0")));
    }

    #[test]
    fn test_minimum_runtime() {
        let requires = set(">=3.5");
        assert!(requires.contains(&v("3.5")));
        assert!(requires.contains(&v("3.12.1")));
        assert!(!requires.contains(&v("2.7.18")));
    }

    #[test]
    fn test_wildcard_and_not_equal() {
        assert!(set("==1.4.*").contains(&v("1.4.9")));
        assert!(!set("==1.4.*").contains(&v("1.5")));
        assert!(!set("!=1.5.*").contains(&v("1.5.2")));
        assert!(set(">=1.0,!=1.5.*").contains(&v("1.6")));
    }

    #[test]
    fn test_compatible_release() {
        let compat = set("~=2.2");
        assert!(compat.contains(&v("2.2")));
        assert!(compat.contains(&v("2.9")));
        assert!(!compat.contains(&v("3.0")));
        assert!(Specifier::parse("~=2").is_err());
    }

    #[test]
    fn test_exclusive_bounds_skip_adjacent_releases() {
        assert!(!set("<2.0").contains(&v("2.0rc1")));
        assert!(set("<2.0").contains(&v("1.9")));
        assert!(!set(">1.7").contains(&v("1.7.post1")));
        assert!(set(">1.7").contains(&v("1.7.1")));
    }

    #[test]
    fn test_prerelease_mention() {
        assert!(set(">=1.0a1").allows_prereleases());
        assert!(!set(">=1.0").allows_prereleases());
        assert!(!set("!=1.0a1").allows_prereleases());
    }

    #[test]
    fn test_rejects_malformed_clauses() {
        assert!(SpecifierSet::parse("1.0").is_err());
        assert!(SpecifierSet::parse(">=").is_err());
        assert!(SpecifierSet::parse(">=1.*").is_err());
    }

    #[test]
    fn test_display_round_trips_raw_text() {
        assert_eq!(set(">= 1.0, <2").to_string(), ">=1.0,<2");
    }
}
