/// Version used when a tag carries none.
pub const DEFAULT_VERSION: &str = "latest";

/// A `repository[:version]` image tag split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub version: String,
}

impl ImageRef {
    /// Split on the first `:`. A missing or empty version becomes `latest`.
    pub fn parse(tag: &str) -> Result<Self, String> {
        let tag = tag.trim();
        let (repository, version) = match tag.split_once(':') {
            Some((repo, version)) => (repo, version),
            None => (tag, ""),
        };

        if repository.is_empty() {
            return Err(format!("image tag '{tag}' has no repository"));
        }

        Ok(Self {
            repository: repository.to_string(),
            version: if version.is_empty() {
                DEFAULT_VERSION.to_string()
            } else {
                version.to_string()
            },
        })
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_and_version() {
        let r = ImageRef::parse("amazon/dynamodb-local:latest").unwrap();
        assert_eq!(r.repository, "amazon/dynamodb-local");
        assert_eq!(r.version, "latest");

        let r = ImageRef::parse("redis:7.2-alpine").unwrap();
        assert_eq!(r.repository, "redis");
        assert_eq!(r.version, "7.2-alpine");
    }

    #[test]
    fn test_missing_version_defaults_to_latest() {
        let r = ImageRef::parse("redis").unwrap();
        assert_eq!(r.repository, "redis");
        assert_eq!(r.version, "latest");

        assert_eq!(ImageRef::parse("redis:").unwrap().version, "latest");
    }

    #[test]
    fn test_empty_repository_rejected() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse(":latest").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        assert_eq!(ImageRef::parse("redis").unwrap().to_string(), "redis:latest");
    }
}
