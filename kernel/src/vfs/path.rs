use core::str::FromStr;

use alloc::fmt;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::{FsError, FsResult};

/// An absolute path in the file system. Repeated and trailing separators are
/// dropped, so `/a//b/` and `/a/b` are the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    /// Components of a path not including separators (the `/` character).
    components: Vec<FilePathComponent>,
}

impl FilePath {
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parses an absolute path. Relative and empty paths are rejected.
    pub fn parse(s: &str) -> FsResult<Self> {
        if !s.starts_with('/') {
            return Err(FsError::InvalidParam);
        }
        let components = s
            .split('/')
            .filter_map(FilePathComponent::new)
            .collect();
        Ok(Self { components })
    }

    pub fn components(&self) -> &[FilePathComponent] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.components.len()
    }

    pub fn split_dirname_filename(&self) -> Option<(Self, FilePathComponent)> {
        let (filename, parent) = self.components.split_last()?;
        let parent_path = Self {
            components: parent.to_vec(),
        };
        Some((parent_path, filename.clone()))
    }

    /// The rest of the path below `prefix`, if `prefix` is this path or one
    /// of its ancestors. An exact match gives the root path.
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        let rest = self.components.strip_prefix(prefix.components.as_slice())?;
        Some(Self {
            components: rest.to_vec(),
        })
    }
}

/// A component of a file path. Notably, this cannot include the `/` character,
/// and is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePathComponent(String);

impl FilePathComponent {
    fn new(s: &str) -> Option<Self> {
        if s.is_empty() || s.contains('/') {
            None
        } else {
            Some(Self(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilePathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        Ok(())
    }
}

impl FromStr for FilePath {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        let path = FilePath::parse("//boot///kernel.elf/").unwrap();
        let names: Vec<&str> = path.components().iter().map(FilePathComponent::as_str).collect();
        assert_eq!(names, ["boot", "kernel.elf"]);
        assert_eq!(path.to_string(), "/boot/kernel.elf");
        assert!(FilePath::parse("/").unwrap().is_root());
    }

    #[test]
    fn parse_rejects_relative_paths() {
        assert_eq!(FilePath::parse("boot/kernel"), Err(FsError::InvalidParam));
        assert_eq!(FilePath::parse(""), Err(FsError::InvalidParam));
    }

    #[test]
    fn split_dirname_filename() {
        let path: FilePath = "/a/b/c.txt".parse().unwrap();
        let (parent, name) = path.split_dirname_filename().unwrap();
        assert_eq!(parent.to_string(), "/a/b");
        assert_eq!(name.as_str(), "c.txt");
        assert!(FilePath::root().split_dirname_filename().is_none());
    }

    #[test]
    fn strip_prefix_works_on_components() {
        let path: FilePath = "/mnt/data/file".parse().unwrap();
        let mnt: FilePath = "/mnt".parse().unwrap();
        let mn: FilePath = "/mn".parse().unwrap();
        assert_eq!(path.strip_prefix(&mnt).unwrap().to_string(), "/data/file");
        assert!(path.strip_prefix(&mn).is_none());
        assert!(path.strip_prefix(&path).unwrap().is_root());
        assert_eq!(path.strip_prefix(&FilePath::root()), Some(path.clone()));
    }
}
