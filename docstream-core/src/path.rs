//! Hierarchical document paths.
//!
//! A [`ResourcePath`] is a plain sequence of alternating collection and key
//! segments. [`CollectionPath<T>`] and [`DocumentPath<T>`] layer a phantom
//! record type on top so that a path built for one record type cannot be
//! handed to an operation expecting another. The type tag has no runtime
//! representation: equality, ordering and hashing look only at segments.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::record::Collection;

/// Separator between path segments.
pub const SEPARATOR: char = '/';

/// Errors raised while building a path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path segment '{segment}': {reason}")]
    InvalidPathSegment {
        segment: String,
        reason: &'static str,
    },

    #[error("Path '{path}' is not a {expected} path")]
    WrongKind {
        path: String,
        expected: &'static str,
    },
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    let reason = if segment.is_empty() {
        "segment is empty"
    } else if segment.contains(SEPARATOR) {
        "segment contains '/'"
    } else if segment == "." || segment == ".." {
        "segment is reserved"
    } else {
        return Ok(());
    };

    Err(PathError::InvalidPathSegment {
        segment: segment.to_string(),
        reason,
    })
}

/// An untyped address in the document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The database root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds a path from already split segments, validating each.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments = segments
            .into_iter()
            .map(|s| {
                let s = s.into();
                validate_segment(&s).map(|_| s)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Parses `/a/b/c`. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(trimmed.split(SEPARATOR))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when the path ends on a collection segment.
    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    /// True when the path ends on a document key.
    pub fn is_document(&self) -> bool {
        !self.segments.is_empty() && self.segments.len() % 2 == 0
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Appends one segment.
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Drops the last segment. The root has no parent.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{}", SEPARATOR);
        }
        for segment in &self.segments {
            write!(f, "{}{}", SEPARATOR, segment)?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Entry point for building typed paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootPath;

/// Returns the database root.
pub fn root() -> RootPath {
    RootPath
}

impl RootPath {
    /// The top-level collection registered for `D`.
    pub fn collection<D: Collection>(&self) -> Result<CollectionPath<D>, PathError> {
        let path = ResourcePath::root().child(D::NAME)?;
        Ok(CollectionPath::wrap(path))
    }
}

/// A collection address whose documents hold records of type `T`.
pub struct CollectionPath<T> {
    path: ResourcePath,
    marker: PhantomData<fn() -> T>,
}

/// A document address holding a record of type `T`.
pub struct DocumentPath<T> {
    path: ResourcePath,
    marker: PhantomData<fn() -> T>,
}

impl<T> CollectionPath<T> {
    fn wrap(path: ResourcePath) -> Self {
        Self {
            path,
            marker: PhantomData,
        }
    }

    /// Tags an untyped collection path with `T`.
    pub fn from_path(path: ResourcePath) -> Result<Self, PathError> {
        if !path.is_collection() {
            return Err(PathError::WrongKind {
                path: path.to_string(),
                expected: "collection",
            });
        }
        Ok(Self::wrap(path))
    }

    /// Collection name (the last segment).
    pub fn name(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn into_path(self) -> ResourcePath {
        self.path
    }

    pub fn segments(&self) -> &[String] {
        self.path.segments()
    }

    /// The document identified by `key` in this collection.
    pub fn document(&self, key: &str) -> Result<DocumentPath<T>, PathError> {
        Ok(DocumentPath::wrap(self.path.child(key)?))
    }

    /// A document with a freshly generated key.
    pub fn new_document(&self) -> DocumentPath<T> {
        let key = Uuid::new_v4().simple().to_string();
        let mut path = self.path.clone();
        path.segments.push(key);
        DocumentPath::wrap(path)
    }

    /// The owning document for a subcollection, `None` at top level.
    pub fn parent(&self) -> Option<ResourcePath> {
        self.path.parent().filter(|p| !p.is_root())
    }

    /// Re-tags the same address with another record type.
    pub fn cast<U>(self) -> CollectionPath<U> {
        CollectionPath::wrap(self.path)
    }
}

impl<T> DocumentPath<T> {
    fn wrap(path: ResourcePath) -> Self {
        Self {
            path,
            marker: PhantomData,
        }
    }

    /// Tags an untyped document path with `T`.
    pub fn from_path(path: ResourcePath) -> Result<Self, PathError> {
        if !path.is_document() {
            return Err(PathError::WrongKind {
                path: path.to_string(),
                expected: "document",
            });
        }
        Ok(Self::wrap(path))
    }

    /// Document key (the last segment).
    pub fn key(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn into_path(self) -> ResourcePath {
        self.path
    }

    pub fn segments(&self) -> &[String] {
        self.path.segments()
    }

    /// The collection this document lives in.
    pub fn parent(&self) -> CollectionPath<T> {
        CollectionPath::wrap(self.path.parent().unwrap_or_default())
    }

    /// A nested collection under this document, typed for `U`.
    pub fn subcollection<U: Collection>(&self) -> Result<CollectionPath<U>, PathError> {
        Ok(CollectionPath::wrap(self.path.child(U::NAME)?))
    }

    pub fn cast<U>(self) -> DocumentPath<U> {
        DocumentPath::wrap(self.path)
    }
}

macro_rules! impl_untyped_traits {
    ($name:ident) => {
        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self::wrap(self.path.clone())
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&self.path.to_string())
                    .finish()
            }
        }

        impl<T> fmt::Display for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.path, f)
            }
        }

        impl<T, U> PartialEq<$name<U>> for $name<T> {
            fn eq(&self, other: &$name<U>) -> bool {
                self.path == other.path
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> PartialEq<ResourcePath> for $name<T> {
            fn eq(&self, other: &ResourcePath) -> bool {
                &self.path == other
            }
        }

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.path.hash(state);
            }
        }

        impl<T> From<$name<T>> for ResourcePath {
            fn from(path: $name<T>) -> Self {
                path.path
            }
        }
    };
}

impl_untyped_traits!(CollectionPath);
impl_untyped_traits!(DocumentPath);
