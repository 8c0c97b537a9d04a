use std::fmt;

/// A `repository[:tag]` reference to a container image.
///
/// Unlike a full OCI reference, no registry component is modelled: matching
/// and rewriting only ever care about the repository portion of the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    repository: String,
    tag: String,
}

impl ImageReference {
    /// Parses `name`, trimming surrounding whitespace first.
    ///
    /// The split on `:` is limited to the first occurrence so a tag that
    /// itself has no colon is preserved literally (e.g. `repo:1.2.3`).
    pub fn parse(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_string();
        let mut parts = name.splitn(2, ':');
        let repository = parts.next().unwrap_or_default().to_string();
        let tag = parts.next().unwrap_or_default().to_string();
        Self { name, repository, tag }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True if `other` is the exact same `repository[:tag]` string.
    pub fn equals_name(&self, other: impl AsRef<str>) -> bool {
        self.name == other.as_ref().trim()
    }

    /// True if `other`'s repository matches this image's repository; tags are ignored.
    pub fn equals_repository(&self, other: impl AsRef<str>) -> bool {
        let other = Self::parse(other);
        self.repository == other.repository
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
