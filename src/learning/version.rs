//! Typed Master Prompt version arithmetic.
//!
//! Version strings look like `Ω_v1.4`: an arbitrary base name, a `_v`
//! separator, then `major.minor`. The loop only ever increments the minor
//! number; there is no major-bump logic and minor never resets.

use std::fmt;

/// Fixed fallback when the active version string has no recognizable
/// `_v<major>.<minor>` shape at all.
pub const FALLBACK_NEXT_VERSION: &str = "Ω_v1.1";

/// A parsed Master Prompt version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptVersion {
    pub base: String,
    pub major: u32,
    pub minor: u32,
}

impl PromptVersion {
    /// Parse `<base>_v<major>.<minor>`.
    ///
    /// Returns `None` when the separator appears zero or multiple times,
    /// or when the numeric suffix does not parse as two integers.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split("_v").collect();
        if parts.len() != 2 {
            return None;
        }

        let (major, minor) = parts[1].split_once('.')?;
        let major: u32 = major.parse().ok()?;
        let minor: u32 = minor.parse().ok()?;

        Some(Self {
            base: parts[0].to_string(),
            major,
            minor,
        })
    }

    /// The next candidate version: minor + 1, no carry into major.
    pub fn next(&self) -> Self {
        Self {
            base: self.base.clone(),
            major: self.major,
            minor: self.minor + 1,
        }
    }
}

impl fmt::Display for PromptVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_v{}.{}", self.base, self.major, self.minor)
    }
}

/// Compute the next candidate version string from the active one.
///
/// - A well-formed version increments its minor number.
/// - A recognizable base with an unparsable numeric suffix restarts that
///   base at `_v1.1`.
/// - Anything else falls back to [`FALLBACK_NEXT_VERSION`].
pub fn next_version(active: &str) -> String {
    if let Some(version) = PromptVersion::parse(active) {
        return version.next().to_string();
    }

    let parts: Vec<&str> = active.split("_v").collect();
    if parts.len() == 2 {
        format!("{}_v1.1", parts[0])
    } else {
        FALLBACK_NEXT_VERSION.to_string()
    }
}
