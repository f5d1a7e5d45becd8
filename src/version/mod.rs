// src/version/mod.rs

//! RPM version comparison and dependency range matching
//!
//! Implements the `rpmvercmp` segment comparison used by RPM itself, the
//! epoch:version-release ordering built on top of it, and the range
//! overlap rule that decides whether a provide satisfies a requirement.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    pub fn new(epoch: u64, version: impl Into<String>, release: Option<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release,
        }
    }

    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "1:2.3.4-5.el8" → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = match s.split_once(':') {
            Some((e, r)) => (e, r),
            None => ("", s),
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|e| Error::Parse(format!("invalid epoch in version '{}': {}", s, e)))?
        };

        // The release never contains a dash; the version may not either,
        // so split on the last one.
        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::Parse(format!("empty version component in '{}'", s)));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two versions the way RPM orders packages
    ///
    /// A missing release compares equal to any release; this is what makes
    /// `Requires: foo >= 1.0` match `foo-1.0-3`.
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                _ => Ordering::Equal,
            })
    }

    /// Strict comparison where a missing release sorts before any release
    pub fn compare_strict(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

/// Compare two version strings segment by segment, as `rpmvercmp` does
///
/// Separators are any non-alphanumeric characters except `~` and `^`.
/// `~` sorts before anything (pre-releases), `^` sorts after the base
/// version but before any further segment.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = trim_separators(one);
        two = trim_separators(two);

        // Tilde: the side that has it is older
        match (one.first() == Some(&b'~'), two.first() == Some(&b'~')) {
            (true, true) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        // Caret: newer than the bare version, older than a longer one
        match (one.first() == Some(&b'^'), two.first() == Some(&b'^')) {
            (true, true) => {
                one = &one[1..];
                two = &two[1..];
                continue;
            }
            (true, false) => {
                return if two.is_empty() {
                    Ordering::Greater
                } else {
                    Ordering::Less
                };
            }
            (false, true) => {
                return if one.is_empty() {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
            }
            (false, false) => {}
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let take = |s: &[u8]| {
            s.iter()
                .take_while(|c| {
                    if numeric {
                        c.is_ascii_digit()
                    } else {
                        c.is_ascii_alphabetic()
                    }
                })
                .count()
        };
        let len_one = take(one);
        let len_two = take(two);
        let (seg_one, rest_one) = one.split_at(len_one);
        let (seg_two, rest_two) = two.split_at(len_two);

        // Segment types differ: numeric is newer than alpha
        if seg_two.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            let a = strip_leading_zeros(seg_one);
            let b = strip_leading_zeros(seg_two);
            a.len().cmp(&b.len()).then_with(|| a.cmp(b))
        } else {
            seg_one.cmp(seg_two)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        one = rest_one;
        two = rest_two;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}

fn trim_separators(s: &[u8]) -> &[u8] {
    let skip = s
        .iter()
        .take_while(|c| !c.is_ascii_alphanumeric() && **c != b'~' && **c != b'^')
        .count();
    &s[skip..]
}

fn strip_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|c| **c == b'0').count();
    &s[zeros..]
}

/// Comparison flag attached to a versioned dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DepFlag {
    #[serde(rename = "LT")]
    Less,
    #[serde(rename = "LE")]
    LessOrEqual,
    #[serde(rename = "EQ")]
    Equal,
    #[serde(rename = "GE")]
    GreaterOrEqual,
    #[serde(rename = "GT")]
    Greater,
}

impl DepFlag {
    /// Parse the repodata spelling (`LT`, `LE`, `EQ`, `GE`, `GT`) or an
    /// operator (`<`, `<=`, `=`, `>=`, `>`)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LT" | "<" => Some(Self::Less),
            "LE" | "<=" => Some(Self::LessOrEqual),
            "EQ" | "=" | "==" => Some(Self::Equal),
            "GE" | ">=" => Some(Self::GreaterOrEqual),
            "GT" | ">" => Some(Self::Greater),
            _ => None,
        }
    }

    fn has_less(self) -> bool {
        matches!(self, Self::Less | Self::LessOrEqual)
    }

    fn has_greater(self) -> bool {
        matches!(self, Self::Greater | Self::GreaterOrEqual)
    }

    fn has_equal(self) -> bool {
        matches!(self, Self::LessOrEqual | Self::Equal | Self::GreaterOrEqual)
    }

    pub fn operator(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "=",
            Self::GreaterOrEqual => ">=",
            Self::Greater => ">",
        }
    }
}

impl fmt::Display for DepFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator())
    }
}

/// Decide whether two versioned ranges share at least one version
///
/// This is RPM's `rangesOverlap`: `provide` and `require` are each a flag
/// and a version; a bound on the correct side or an equal pair overlaps.
pub fn ranges_overlap(
    provide: (DepFlag, &RpmVersion),
    require: (DepFlag, &RpmVersion),
) -> bool {
    let (p_flag, p_ver) = provide;
    let (r_flag, r_ver) = require;

    match p_ver.compare(r_ver) {
        Ordering::Less => p_flag.has_greater() || r_flag.has_less(),
        Ordering::Greater => p_flag.has_less() || r_flag.has_greater(),
        Ordering::Equal => {
            (p_flag.has_equal() && r_flag.has_equal())
                || (p_flag.has_less() && r_flag.has_less())
                || (p_flag.has_greater() && r_flag.has_greater())
        }
    }
}
