//! Object keys and logical path resolution.

use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use std::fmt;

/// Address of one object (or one virtual-folder prefix) in the store.
///
/// `path` never starts with the separator. Directory keys end with it, and
/// the empty path is the container root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    container: String,
    path: String,
}

impl ObjectKey {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }

    pub fn root(container: impl Into<String>) -> Self {
        Self::new(container, "")
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The key of the directory marker / listing prefix for this key.
    pub fn as_dir(&self, sep: char) -> ObjectKey {
        if self.is_root() || self.path.ends_with(sep) {
            return self.clone();
        }
        Self::new(self.container.clone(), format!("{}{sep}", self.path))
    }

    pub fn child(&self, name: &str, sep: char) -> ObjectKey {
        let dir = self.as_dir(sep);
        Self::new(self.container.clone(), format!("{}{name}", dir.path))
    }

    /// Last path component, without any trailing separator. The root's base
    /// name is the container itself.
    pub fn base_name(&self, sep: char) -> &str {
        if self.is_root() {
            return &self.container;
        }
        let trimmed = self.path.trim_end_matches(sep);
        trimmed.rsplit(sep).next().unwrap_or(trimmed)
    }

    /// Number of path components, ignoring a trailing separator.
    pub fn depth(&self, sep: char) -> usize {
        let trimmed = self.path.trim_end_matches(sep);
        if trimmed.is_empty() {
            0
        } else {
            trimmed.split(sep).count()
        }
    }

    /// True for keys strictly below `dir` in the same container.
    pub fn is_under(&self, dir: &ObjectKey, sep: char) -> bool {
        let prefix = dir.as_dir(sep);
        self.container == prefix.container
            && self.path.len() > prefix.path.len()
            && self.path.starts_with(&prefix.path)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.path)
    }
}

/// Turns caller paths such as `s3://bucket/a\b/./c` into object keys.
#[derive(Debug, Clone)]
pub struct PathResolver {
    separator: char,
    store_prefix: String,
}

impl PathResolver {
    pub fn new(separator: char, store_prefix: impl Into<String>) -> Self {
        Self {
            separator,
            store_prefix: store_prefix.into(),
        }
    }

    pub fn from_config(config: &FsConfig) -> Self {
        Self::new(config.separator, config.store_prefix.clone())
    }

    /// Normalized components of `raw`: store prefix stripped, both separator
    /// styles accepted, empty and `.` components dropped. `..` is rejected:
    /// object keys have no parent links to follow.
    fn components<'a>(&self, raw: &'a str) -> FsResult<Vec<&'a str>> {
        let stripped = if self.store_prefix.is_empty() {
            raw
        } else {
            raw.strip_prefix(self.store_prefix.as_str()).unwrap_or(raw)
        };
        let components: Vec<&str> = stripped
            .split(['/', '\\', self.separator])
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if components.contains(&"..") {
            return Err(FsError::ParentComponent(raw.to_string()));
        }
        Ok(components)
    }

    fn split(&self, raw: &str) -> FsResult<(String, String)> {
        let components = self.components(raw)?;
        let Some((container, rest)) = components.split_first() else {
            return Err(FsError::NoContainer(raw.to_string()));
        };
        Ok((
            container.to_string(),
            rest.join(&self.separator.to_string()),
        ))
    }

    /// Resolves a path naming an object. The container root is rejected with
    /// `EmptyObjectName`, which callers that accept directories translate
    /// into a root key via [`PathResolver::resolve_root`].
    pub fn resolve(&self, raw: &str) -> FsResult<ObjectKey> {
        let (container, path) = self.split(raw)?;
        if path.is_empty() {
            return Err(FsError::EmptyObjectName(raw.to_string()));
        }
        Ok(ObjectKey::new(container, path))
    }

    pub fn resolve_root(&self, raw: &str) -> FsResult<ObjectKey> {
        let (container, _) = self.split(raw)?;
        Ok(ObjectKey::root(container))
    }

    /// Like `resolve`, but maps the container root to its root key.
    pub fn resolve_or_root(&self, raw: &str) -> FsResult<ObjectKey> {
        match self.resolve(raw) {
            Err(FsError::EmptyObjectName(_)) => self.resolve_root(raw),
            other => other,
        }
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::from_config(&FsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_resolve_splits_container_and_path() {
        let r = PathResolver::default();
        let key = r.resolve("bucket/dir/file.txt").unwrap();
        assert_eq!(key.container(), "bucket");
        assert_eq!(key.path(), "dir/file.txt");
    }

    #[test]
    fn test_resolve_normalizes_separators_and_prefix() {
        let r = PathResolver::default();
        let key = r.resolve("s3://bucket\\dir//./file.txt").unwrap();
        assert_eq!(key, ObjectKey::new("bucket", "dir/file.txt"));
        let key = r.resolve("/bucket/dir/").unwrap();
        assert_eq!(key.path(), "dir");
    }

    #[test]
    fn test_resolve_rejects_missing_container() {
        let r = PathResolver::default();
        for raw in ["", "/", "s3://", "./."] {
            assert!(matches!(r.resolve(raw), Err(FsError::NoContainer(_))), "{raw}");
        }
    }

    #[test]
    fn test_resolve_empty_name_is_distinct_from_not_found() {
        let r = PathResolver::default();
        let err = r.resolve("bucket/.").unwrap_err();
        assert!(matches!(err, FsError::EmptyObjectName(_)));
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert_ne!(err.kind(), ErrorKind::NotFound);
        assert_eq!(r.resolve_or_root("bucket").unwrap(), ObjectKey::root("bucket"));
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let r = PathResolver::default();
        for raw in ["bucket/../x", "../etc/passwd", "bucket/a/..", "s3://bucket\\..\\x"] {
            let err = r.resolve(raw).unwrap_err();
            assert!(matches!(err, FsError::ParentComponent(_)), "{raw}");
            assert_eq!(err.kind(), ErrorKind::InvalidName);
            assert!(r.resolve_or_root(raw).is_err(), "{raw}");
        }
        // only a whole component counts
        assert_eq!(r.resolve("bucket/..a/b..").unwrap().path(), "..a/b..");
    }

    #[test]
    fn test_custom_separator() {
        let r = PathResolver::new(':', "");
        let key = r.resolve("bucket/a\\b:c").unwrap();
        assert_eq!(key.path(), "a:b:c");
        assert_eq!(key.base_name(':'), "c");
    }

    #[test]
    fn test_key_helpers() {
        let dir = ObjectKey::new("b", "a/b");
        assert_eq!(dir.as_dir('/').path(), "a/b/");
        assert_eq!(dir.as_dir('/').as_dir('/').path(), "a/b/");
        assert_eq!(dir.child("c", '/').path(), "a/b/c");
        assert_eq!(dir.as_dir('/').base_name('/'), "b");
        assert_eq!(ObjectKey::root("b").base_name('/'), "b");
        assert_eq!(ObjectKey::new("b", "a/b/c/").depth('/'), 3);
        assert!(ObjectKey::new("b", "a/b/c").is_under(&dir, '/'));
        assert!(!ObjectKey::new("b", "a/bc").is_under(&dir, '/'));
        assert!(!dir.as_dir('/').is_under(&dir, '/'));
        assert!(ObjectKey::new("b", "x").is_under(&ObjectKey::root("b"), '/'));
    }
}
