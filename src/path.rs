//! Path normalization and classification.
//!
//! User-supplied paths may be relative to the environment's home collection
//! and may contain `.` / `..` segments. They are normalized lexically before
//! the backend stat; classification then comes from the catalog.

use crate::config::GridEnv;
use crate::error::GridError;
use crate::grid::{Connection, ObjectKind, Stat};

/// A normalized absolute path together with its catalog classification.
///
/// `Absent` is not an error at resolution time; it becomes one when the
/// operation requires existence.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub path: String,
    pub kind: ObjectKind,
    pub stat: Stat,
}

impl ResolvedPath {
    /// Fail with not-found unless the path exists.
    pub fn require_exists(&self) -> Result<(), GridError> {
        if self.kind == ObjectKind::Absent {
            return Err(GridError::NotFound(self.path.clone()));
        }
        Ok(())
    }
}

/// Qualify a path against the environment and normalize it lexically.
pub fn absolute(env: &GridEnv, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_owned()
    } else if path.is_empty() {
        env.home.clone()
    } else {
        format!("{}/{}", env.home.trim_end_matches('/'), path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Normalize a path and classify it through the backend.
pub fn resolve(
    conn: &mut Connection,
    env: &GridEnv,
    path: &str,
) -> Result<ResolvedPath, GridError> {
    let path = absolute(env, path);
    let stat = conn.stat(&path)?;
    tracing::trace!(path = %path, kind = ?stat.kind, "Resolved path");
    Ok(ResolvedPath {
        path,
        kind: stat.kind,
        stat,
    })
}

/// Split an absolute data-object path into collection and object name.
pub fn split_object(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_owned(), name.to_owned()),
        Some((coll, name)) => (coll.to_owned(), name.to_owned()),
        None => ("/".to_owned(), path.to_owned()),
    }
}
