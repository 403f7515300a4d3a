//
// Copyright (c) The Cfgd Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered sequence of configuration path elements.
///
/// A path addresses a schema node; value-bearing paths carry the value as
/// their final element (e.g. `/system/host-name/router1`).
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

// ===== impl Path =====

impl Path {
    pub fn root() -> Path {
        Path(Vec::new())
    }

    pub fn new<I, S>(elems: I) -> Path
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(elems.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn elems(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns the path with its final element removed. The parent of the
    /// root is the root itself.
    pub fn parent(&self) -> Path {
        let mut elems = self.0.clone();
        elems.pop();
        Path(elems)
    }

    #[must_use]
    pub fn join(&self, elem: impl Into<String>) -> Path {
        let mut elems = self.0.clone();
        elems.push(elem.into());
        Path(elems)
    }

    #[must_use]
    pub fn append(&self, other: &Path) -> Path {
        let mut elems = self.0.clone();
        elems.extend(other.0.iter().cloned());
        Path(elems)
    }

    pub fn push(&mut self, elem: impl Into<String>) {
        self.0.push(elem.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.0.pop()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len()
            && self.0.iter().zip(prefix.0.iter()).all(|(a, b)| a == b)
    }

    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(Path(self.0[prefix.0.len()..].to_vec()))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for elem in &self.0 {
            write!(f, "/{elem}")?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Path, Self::Err> {
        Ok(Path(
            s.split('/')
                .filter(|elem| !elem.is_empty())
                .map(String::from)
                .collect(),
        ))
    }
}

impl From<&[&str]> for Path {
    fn from(elems: &[&str]) -> Path {
        Path::new(elems.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Path {
    fn from(elems: [&str; N]) -> Path {
        Path::new(elems)
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let path: Path = "/interfaces/dataplane/dp0s3/mtu".parse().unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.to_string(), "/interfaces/dataplane/dp0s3/mtu");
        assert_eq!(Path::root().to_string(), "/");
        let path: Path = "system//host-name".parse().unwrap();
        assert_eq!(path.elems(), ["system", "host-name"]);
    }

    #[test]
    fn prefix_relations() {
        let path = Path::from(["a", "b", "c"]);
        assert!(path.starts_with(&Path::from(["a", "b"])));
        assert!(path.starts_with(&Path::root()));
        assert!(!path.starts_with(&Path::from(["a", "c"])));
        assert_eq!(
            path.strip_prefix(&Path::from(["a"])),
            Some(Path::from(["b", "c"]))
        );
        assert_eq!(path.parent(), Path::from(["a", "b"]));
    }
}
