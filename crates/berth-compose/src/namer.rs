//! Canonical naming of shared infrastructure containers.
//!
//! Every requester of the same `(kind, version)` pair must converge on one
//! container, so names are derived deterministically from the pair.
//! Singleton kinds ignore the version entirely.
//!
//! Dedup policy: the first requester of a canonical name decides the image
//! tag. A later requester whose distinct version string normalizes to the
//! same name (`v15` and `15`) joins the existing container and its own
//! version string is ignored.

use std::collections::HashMap;

/// Lowercases a provider kind and replaces anything outside `[a-z0-9]`
/// with `-`.
#[must_use]
pub fn normalize_kind(kind: &str) -> String {
    let mapped: String = kind
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() { c } else { '-' }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Normalizes a version string into a name-safe token.
///
/// - empty means `latest`
/// - a leading `v` before a digit is dropped (`v1.6` -> `1.6`)
/// - dated release identifiers collapse to their year
///   (`RELEASE.2024-01-16T16-07-38Z` -> `2024`)
/// - any character outside `[a-z0-9.]` becomes `-`
#[must_use]
pub fn normalize_version(version: &str) -> String {
    let lowered = version.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return "latest".into();
    }
    if let Some(year) = release_year(&lowered) {
        return year.to_string();
    }
    let stripped = match lowered.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => lowered.as_str(),
    };
    let mapped: String = stripped
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    let trimmed = mapped.trim_matches(|c: char| c == '-' || c == '.');
    if trimmed.is_empty() {
        "latest".into()
    } else {
        trimmed.to_string()
    }
}

/// Finds a `YYYY-MM-DD` (or `YYYY.MM.DD`) date inside a release identifier
/// and returns its year.
fn release_year(version: &str) -> Option<&str> {
    let bytes = version.as_bytes();
    (0..bytes.len().saturating_sub(9)).find_map(|start| {
        let window = &bytes[start..start + 10];
        let digits = |range: std::ops::Range<usize>| window[range].iter().all(u8::is_ascii_digit);
        let separator = window[4];
        let dated = digits(0..4)
            && (separator == b'-' || separator == b'.')
            && window[7] == separator
            && digits(5..7)
            && digits(8..10)
            && (start == 0 || !bytes[start - 1].is_ascii_digit())
            && matches!(&window[0..2], b"19" | b"20");
        dated.then(|| &version[start..start + 4])
    })
}

/// Computes the canonical container name for a provider kind and version.
#[must_use]
pub fn canonical_name(kind: &str, version: &str, singleton: bool) -> String {
    let kind = normalize_kind(kind);
    if singleton {
        kind
    } else {
        format!("{kind}-{}", normalize_version(version))
    }
}

/// Outcome of claiming a canonical name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameClaim {
    /// First request for this name: the caller must create the container.
    Created,
    /// The name already exists; the caller only wires a dependency.
    Joined {
        /// Image chosen by the first requester.
        image: String,
        /// Service that first claimed the name.
        owner: String,
    },
}

#[derive(Debug, Clone)]
struct Assignment {
    image: String,
    owner: String,
}

/// Registry of canonical names assigned during one synthesis run.
///
/// A namer must never outlive the run that created it, or naming decisions
/// would leak into unrelated runs in the same process.
#[derive(Debug, Default)]
pub struct ServiceNamer {
    assigned: HashMap<String, Assignment>,
}

impl ServiceNamer {
    /// Creates an empty namer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `name` for `requester`, recording `image` if the name is new.
    pub fn claim(&mut self, name: &str, image: &str, requester: &str) -> NameClaim {
        if let Some(existing) = self.assigned.get(name) {
            if existing.image != image {
                tracing::debug!(
                    name,
                    requested = image,
                    kept = %existing.image,
                    requester,
                    "joining existing shared service with the first requester's image"
                );
            }
            return NameClaim::Joined {
                image: existing.image.clone(),
                owner: existing.owner.clone(),
            };
        }
        tracing::debug!(name, image, requester, "assigning shared service");
        let _ = self.assigned.insert(
            name.to_string(),
            Assignment {
                image: image.to_string(),
                owner: requester.to_string(),
            },
        );
        NameClaim::Created
    }

    /// Whether `name` was assigned in this run.
    #[must_use]
    pub fn is_assigned(&self, name: &str) -> bool {
        self.assigned.contains_key(name)
    }

    /// Image recorded for `name`, if assigned.
    #[must_use]
    pub fn image_for(&self, name: &str) -> Option<&str> {
        self.assigned.get(name).map(|a| a.image.as_str())
    }

    /// Number of shared services assigned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    /// Whether no shared service has been assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
