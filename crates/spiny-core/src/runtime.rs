//! Runtime data model: interpreter versions, isolation modes and the identity
//! record produced by probing an interpreter executable.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::SystemTime;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First interpreter version that can host a virtualenv.
pub const MIN_ISOLATION_VERSION: &str = "2.4";

/// First interpreter version whose installer can talk TLS to package indexes.
pub const MIN_SSL_VERSION: &str = "2.6";

#[derive(Debug, Error)]
#[error("Invalid version string {0:?}")]
pub struct VersionParseError(pub String);

/// Pre-release qualifier. Variant order is the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreReleaseKind {
    Dev,
    Alpha,
    Beta,
    Candidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PreRelease {
    pub kind: PreReleaseKind,
    pub number: u64,
}

/// Interpreter version: numeric release tuple plus an optional pre-release.
///
/// Release components compare numerically (`2.10 > 2.9`) and missing trailing
/// components count as zero. A pre-release sorts before its final release.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    raw: String,
    release: Vec<u64>,
    pre: Option<PreRelease>,
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)*)(?:\.?(dev|alpha|beta|rc|a|b|c)\.?(\d*))?")
            .expect("static version regex")
    })
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let raw = s.trim();
        let caps = version_re()
            .captures(raw)
            .ok_or_else(|| VersionParseError(s.to_string()))?;
        let release = caps[1]
            .split('.')
            .map(|c| c.parse::<u64>().map_err(|_| VersionParseError(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        let pre = caps.get(2).map(|kind| {
            let kind = match kind.as_str() {
                "dev" => PreReleaseKind::Dev,
                "a" | "alpha" => PreReleaseKind::Alpha,
                "b" | "beta" => PreReleaseKind::Beta,
                _ => PreReleaseKind::Candidate,
            };
            let number = caps
                .get(3)
                .and_then(|n| n.as_str().parse().ok())
                .unwrap_or(0);
            PreRelease { kind, number }
        });
        Ok(Self {
            raw: raw.to_string(),
            release,
            pre,
        })
    }

    /// Numeric release components, e.g. `[3, 9, 1]`.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    pub fn major(&self) -> u64 {
        self.release.first().copied().unwrap_or(0)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `self < other`, where `other` is a version literal known to be valid.
    pub fn is_older_than(&self, other: &str) -> bool {
        match Version::parse(other) {
            Ok(v) => *self < v,
            Err(_) => false,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Version::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (self.pre, other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(&b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// How an isolated environment is created for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// The runtime's own virtualenv module works.
    Internal,
    /// The host interpreter's virtualenv can target this runtime.
    External,
    /// Too old for virtualenv; the runtime's own install tree is used.
    Unsupported,
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::External => write!(f, "external"),
            Self::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Identity of one probed interpreter executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    /// Self-reported family, e.g. `Python`, `PyPy3`, `Jython`.
    pub family: String,
    pub version: Version,
    /// Canonical absolute path of the executable.
    pub executable_path: PathBuf,
    /// Basename, used to find the interpreter inside a virtualenv.
    pub executable_name: String,
    /// Environment names satisfied by this runtime, most general first.
    pub aliases: Vec<String>,
    /// Unset until the resolver has checked it.
    #[serde(default)]
    pub isolation: Option<IsolationMode>,
    /// Executable mtime at probe time; a mismatch forces a re-probe.
    pub probed_mtime: SystemTime,
}

impl RuntimeInfo {
    pub fn new(
        family: impl Into<String>,
        version: Version,
        executable_path: PathBuf,
        probed_mtime: SystemTime,
    ) -> Self {
        let family = family.into();
        let aliases = derive_aliases(&family, &version);
        let executable_name = executable_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            family,
            version,
            executable_path,
            executable_name,
            aliases,
            isolation: None,
            probed_mtime,
        }
    }

    /// Lowercased family, the name a bare `pypy3` or `jython` request uses.
    pub fn family_name(&self) -> String {
        self.family.to_lowercase()
    }

    /// Every registry name: the family name first, then the aliases.
    pub fn names(&self) -> Vec<String> {
        let family = self.family_name();
        let mut names = vec![family.clone()];
        names.extend(self.aliases.iter().filter(|a| **a != family).cloned());
        names
    }

    pub fn satisfies(&self, name: &str) -> bool {
        self.family_name() == name || self.aliases.iter().any(|a| a == name)
    }

    /// Root of the runtime's own installation (`/usr` for `/usr/bin/python2.3`).
    pub fn install_root(&self) -> PathBuf {
        self.executable_path
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

/// `("Python", 3.9.1)` → `["python3", "python3.9", "python3.9.1"]`.
pub fn derive_aliases(family: &str, version: &Version) -> Vec<String> {
    let family = family.to_lowercase();
    let mut components = version.release().iter();
    let first = match components.next() {
        Some(major) => format!("{}{}", family, major),
        None => return vec![family],
    };
    let mut aliases = vec![first];
    for c in components {
        let next = format!("{}.{}", aliases[aliases.len() - 1], c);
        aliases.push(next);
    }
    aliases
}
