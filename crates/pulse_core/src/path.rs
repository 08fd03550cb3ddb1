//! Field path codec.
//!
//! Backing stores only accept short node names, so every field path segment
//! is mapped to at most 12 lowercase characters: the first 8 characters are
//! kept and the rest are folded into a decimal checksum.
//!
//! ```text
//! "equilibrium/time_slice/profiles_1d/psi"
//!     -> "equilibr331/time_sli200/profiles244/psi0"
//! ```
//!
//! The mapping is many-to-one. Node paths are only ever produced from field
//! paths, never decoded back.

use std::fmt;

/// Characters kept verbatim from a segment.
const KEPT_CHARS: usize = 8;

/// Maximum checksum digits appended to a segment.
const CHECKSUM_DIGITS: usize = 4;

fn is_separator(c: char) -> bool {
    c == '/' || c == '.'
}

/// Encodes one path segment.
///
/// Segments starting with a digit are occurrence indices and pass through
/// unchanged.
#[must_use]
pub fn encode_segment(segment: &str) -> String {
    if segment.starts_with(|c: char| c.is_ascii_digit()) {
        return segment.to_string();
    }
    let mut encoded: String = segment.chars().take(KEPT_CHARS).collect();
    let checksum: u32 = segment
        .chars()
        .skip(KEPT_CHARS)
        .map(|c| u32::from(c.to_ascii_lowercase()))
        .sum();
    encoded.extend(checksum.to_string().chars().take(CHECKSUM_DIGITS));
    encoded.to_ascii_lowercase()
}

/// Encodes a field path into a `/`-separated node path.
#[must_use]
pub fn encode(path: &str) -> NodePath {
    FieldPath::parse(path).encode()
}

/// Encodes a field path into the dotted member form, where the last
/// separator is `:`.
///
/// ```
/// assert_eq!(pulse_core::path::encode_member("a/b/c"), "a0.b0:c0");
/// ```
#[must_use]
pub fn encode_member(path: &str) -> String {
    let mut dotted = FieldPath::parse(path).encode().as_str().replace('/', ".");
    if let Some(pos) = dotted.rfind('.') {
        dotted.replace_range(pos..=pos, ":");
    }
    dotted
}

/// One segment of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A named child.
    Name(String),
    /// A numeric occurrence index.
    Index(String),
}

impl PathSegment {
    fn encode(&self) -> String {
        match self {
            Self::Name(name) => encode_segment(name),
            Self::Index(index) => index.clone(),
        }
    }
}

/// A parsed field path, as written by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Splits `path` on `/` and `.`, skipping empty segments.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split(is_separator)
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s.starts_with(|c: char| c.is_ascii_digit()) {
                    PathSegment::Index(s.to_string())
                } else {
                    PathSegment::Name(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Path segments in order.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Whether the path has no segments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Encodes every segment into a node path.
    #[must_use]
    pub fn encode(&self) -> NodePath {
        NodePath(
            self.segments
                .iter()
                .map(PathSegment::encode)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match segment {
                PathSegment::Name(s) | PathSegment::Index(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

/// An encoded, `/`-separated node path in backing-store space.
///
/// The engines only accept node paths, so a field path is encoded exactly
/// once on its way in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePath(String);

impl NodePath {
    /// Wraps a name that is already in node-path form (as received over
    /// the wire), dropping empty segments.
    #[must_use]
    pub fn from_encoded(encoded: &str) -> Self {
        Self(
            encoded
                .split('/')
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("/"),
        )
    }

    /// The node path of field `path` inside record `cpo`.
    #[must_use]
    pub fn field(cpo: &str, path: &str) -> Self {
        encode(cpo).join(&encode(path))
    }

    /// Appends `child` below this path.
    #[must_use]
    pub fn join(&self, child: &NodePath) -> Self {
        match (self.0.is_empty(), child.0.is_empty()) {
            (true, _) => child.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}/{}", self.0, child.0)),
        }
    }

    /// The path relative to `ancestor`, if this path lies below it.
    #[must_use]
    pub fn relative_to(&self, ancestor: &NodePath) -> Option<NodePath> {
        if ancestor.0.is_empty() {
            return Some(self.clone());
        }
        self.0
            .strip_prefix(ancestor.0.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| Self(rest.to_string()))
    }

    /// The last segment, empty for the root.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// The path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
