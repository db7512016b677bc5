//! Version parsing and range arithmetic.
//!
//! Descriptors are written by hand, so versions are accepted leniently
//! (`2` and `2.1` pad to `2.0.0` / `2.1.0`) and requirement strings accept
//! both Cargo-style (`^1.2`, `~1.2`) and PEP 440-style (`==1.2`, `~=1.2`)
//! operators, plus `!=` exclusions. Conflict detection converts each requirement into a single
//! interval and checks whether two intervals can share a version.

use semver::{BuildMetadata, Comparator, Op, Version, VersionReq};
use std::cmp::Ordering;

/// Parse a version, padding missing minor/patch components with zeros.
pub fn parse_version(raw: &str) -> Result<Version, String> {
    let raw = raw.trim();
    let raw = raw.strip_prefix('v').unwrap_or(raw);
    if raw.is_empty() {
        return Err("empty version".into());
    }

    let split = raw.find(['-', '+']).unwrap_or(raw.len());
    let (core, rest) = raw.split_at(split);
    let padded = match core.split('.').count() {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => raw.to_string(),
    };
    Version::parse(&padded).map_err(|e| format!("invalid version '{raw}': {e}"))
}

/// A version requirement plus PEP 440 exclusions (`!=X.Y`).
///
/// Exclusions only filter `matches`; they never narrow the interval used
/// for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub req: VersionReq,
    pub excluded: Vec<Version>,
}

impl Requirement {
    pub const ANY: Requirement = Requirement {
        req: VersionReq::STAR,
        excluded: Vec::new(),
    };

    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version) && !self.excluded.contains(version)
    }

    pub fn interval(&self) -> Interval {
        requirement_interval(&self.req)
    }
}

/// Parse a requirement string such as `>=2.0,<3.0`, `~=1.4`, `^0.3` or
/// `>=1.0,!=1.5`. An empty string or `*` matches any version.
pub fn parse_requirement(raw: &str) -> Result<Requirement, String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "*" {
        return Ok(Requirement::ANY);
    }

    let mut clauses = Vec::new();
    let mut excluded = Vec::new();
    for clause in raw.split(',') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if let Some(v) = clause.strip_prefix("!=") {
            excluded.push(parse_version(v)?);
        } else if let Some(v) = clause.strip_prefix("~=") {
            clauses.extend(compatible_release(v.trim())?);
        } else if let Some(v) = clause.strip_prefix("===").or_else(|| clause.strip_prefix("==")) {
            clauses.push(exact_clause(v.trim())?);
        } else {
            clauses.push(clause.to_string());
        }
    }

    let req = if clauses.is_empty() {
        VersionReq::STAR
    } else {
        VersionReq::parse(&clauses.join(", ")).map_err(|e| format!("invalid requirement '{raw}': {e}"))?
    };
    Ok(Requirement { req, excluded })
}

/// `==1.2` pins `1.2.0`; `==1.2.*` keeps the prefix match.
fn exact_clause(v: &str) -> Result<String, String> {
    match v.strip_suffix(".*") {
        Some(prefix) => Ok(format!("={prefix}")),
        None => Ok(format!("={}", parse_version(v)?)),
    }
}

/// `~=X.Y` expands to `>=X.Y, <X+1`; `~=X.Y.Z` to `>=X.Y.Z, <X.Y+1`.
fn compatible_release(v: &str) -> Result<Vec<String>, String> {
    let parts: Vec<u64> = v
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<Result<_, _>>()
        .map_err(|_| format!("invalid compatible-release version '{v}'"))?;

    let upper = match parts.as_slice() {
        [major, _] => format!("<{}.0.0", major.saturating_add(1)),
        [major, minor, _] => format!("<{major}.{}.0", minor.saturating_add(1)),
        _ => return Err(format!("'~={v}' needs two or three components")),
    };
    Ok(vec![format!(">={v}"), upper])
}

// ── Interval arithmetic ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A contiguous version range; `None` means unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interval {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

impl Interval {
    fn at_least(version: Version) -> Self {
        Self {
            lower: Some(Bound { version, inclusive: true }),
            upper: None,
        }
    }

    fn above(version: Version) -> Self {
        Self {
            lower: Some(Bound { version, inclusive: false }),
            upper: None,
        }
    }

    fn below(version: Version, inclusive: bool) -> Self {
        Self {
            lower: None,
            upper: Some(Bound { version, inclusive }),
        }
    }

    fn half_open(low: Version, high: Version) -> Self {
        Self {
            lower: Some(Bound { version: low, inclusive: true }),
            upper: Some(Bound { version: high, inclusive: false }),
        }
    }

    fn exactly(version: Version) -> Self {
        Self {
            lower: Some(Bound { version: version.clone(), inclusive: true }),
            upper: Some(Bound { version, inclusive: true }),
        }
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        let lower = match (&self.lower, &other.lower) {
            (None, b) | (b, None) => b.clone(),
            (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
                Ordering::Greater => a.clone(),
                Ordering::Less => b.clone(),
                Ordering::Equal => Bound {
                    version: a.version.clone(),
                    inclusive: a.inclusive && b.inclusive,
                },
            }),
        };
        let upper = match (&self.upper, &other.upper) {
            (None, b) | (b, None) => b.clone(),
            (Some(a), Some(b)) => Some(match a.version.cmp(&b.version) {
                Ordering::Less => a.clone(),
                Ordering::Greater => b.clone(),
                Ordering::Equal => Bound {
                    version: a.version.clone(),
                    inclusive: a.inclusive && b.inclusive,
                },
            }),
        };
        Interval { lower, upper }
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => match lo.version.cmp(&hi.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(lo.inclusive && hi.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }
}

fn release(major: u64, minor: u64, patch: u64) -> Version {
    Version::new(major, minor, patch)
}

/// Interval covered by a single comparator. Partial versions (`1`, `1.2`)
/// follow Cargo's semantics.
fn comparator_interval(c: &Comparator) -> Interval {
    let floor = Version {
        major: c.major,
        minor: c.minor.unwrap_or(0),
        patch: c.patch.unwrap_or(0),
        pre: c.pre.clone(),
        build: BuildMetadata::EMPTY,
    };
    let full = c.minor.is_some() && c.patch.is_some();
    // First version past everything the partial spec names.
    let past = match (c.minor, c.patch) {
        (None, _) => release(c.major.saturating_add(1), 0, 0),
        (Some(minor), None) => release(c.major, minor.saturating_add(1), 0),
        (Some(minor), Some(patch)) => release(c.major, minor, patch.saturating_add(1)),
    };

    match c.op {
        Op::Exact | Op::Wildcard if full => Interval::exactly(floor),
        Op::Exact | Op::Wildcard => Interval::half_open(floor, past),
        Op::Greater if full => Interval::above(floor),
        Op::Greater => Interval::at_least(past),
        Op::GreaterEq => Interval::at_least(floor),
        Op::Less => Interval::below(floor, false),
        Op::LessEq if full => Interval::below(floor, true),
        Op::LessEq => Interval::below(past, false),
        Op::Tilde => match c.minor {
            Some(minor) => Interval::half_open(floor, release(c.major, minor.saturating_add(1), 0)),
            None => Interval::half_open(floor, release(c.major.saturating_add(1), 0, 0)),
        },
        Op::Caret => {
            let ceiling = match (c.minor, c.patch) {
                (Some(0), Some(patch)) if c.major == 0 => release(0, 0, patch.saturating_add(1)),
                (Some(minor), _) if c.major == 0 => release(0, minor.saturating_add(1), 0),
                _ => release(c.major.saturating_add(1), 0, 0),
            };
            Interval::half_open(floor, ceiling)
        }
        _ => Interval::default(),
    }
}

/// Single interval covered by a whole requirement (comparators are ANDed).
fn requirement_interval(req: &VersionReq) -> Interval {
    req.comparators
        .iter()
        .map(comparator_interval)
        .fold(Interval::default(), |acc, i| acc.intersect(&i))
}

/// Whether two requirements can be satisfied by a common version.
pub fn may_overlap(a: &Requirement, b: &Requirement) -> bool {
    !a.interval().intersect(&b.interval()).is_empty()
}
