//! Backend-independent addressing of tree nodes.
//!
//! Storage ids differ between backends, so nodes are addressed by a path of
//! natural-key segments instead:
//!
//! - segment 0 names an [`Identity`](crate::Identity) (`issuer:account`)
//! - segment 1 names a [`Mechanism`](crate::Mechanism) by UID
//! - segment 2 names a [`Notification`](crate::Notification) by its
//!   time-added in epoch milliseconds
//!
//! A reference is resolved by letting each candidate node try to
//! [consume](Referable::consume_opaque_reference) the head segment.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used by the textual form of a reference.
pub const SEPARATOR: char = '/';

/// An ordered sequence of natural-key segments addressing one tree node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueReference {
    segments: VecDeque<String>,
}

impl OpaqueReference {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the `/`-joined textual form produced by `Display`.
    ///
    /// Segments themselves must not contain the separator.
    pub fn parse(text: &str) -> Self {
        Self::new(text.split(SEPARATOR).filter(|s| !s.is_empty()))
    }

    /// The reference extended by one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.segments.push_back(segment.into());
        next
    }

    pub fn head(&self) -> Option<&str> {
        self.segments.front().map(String::as_str)
    }

    pub fn pop_head(&mut self) -> Option<String> {
        self.segments.pop_front()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for OpaqueReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

/// A tree node that can be addressed by an [`OpaqueReference`].
pub trait Referable {
    /// This node's own segment.
    fn reference_segment(&self) -> String;

    /// The full path from the root down to this node.
    fn opaque_reference(&self) -> OpaqueReference;

    /// If the reference's head names this node, pop it and return `true`.
    fn consume_opaque_reference(&self, reference: &mut OpaqueReference) -> bool {
        match reference.head() {
            Some(head) if head == self.reference_segment() => {
                reference.pop_head();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Leaf(&'static str);

    impl Referable for Leaf {
        fn reference_segment(&self) -> String {
            self.0.to_string()
        }

        fn opaque_reference(&self) -> OpaqueReference {
            OpaqueReference::new([self.0])
        }
    }

    #[test]
    fn consume_pops_matching_head() {
        let mut reference = OpaqueReference::new(["ForgeRock:alice", "0"]);
        assert!(Leaf("ForgeRock:alice").consume_opaque_reference(&mut reference));
        assert_eq!(reference.head(), Some("0"));
        assert_eq!(reference.len(), 1);
    }

    #[test]
    fn consume_leaves_reference_alone_on_mismatch() {
        let mut reference = OpaqueReference::new(["ForgeRock:alice"]);
        assert!(!Leaf("ForgeRock:bob").consume_opaque_reference(&mut reference));
        assert_eq!(reference.len(), 1);
    }

    #[test]
    fn consume_on_empty_reference_fails() {
        let mut reference = OpaqueReference::default();
        assert!(!Leaf("x").consume_opaque_reference(&mut reference));
    }

    #[test]
    fn child_appends_segment() {
        let base = OpaqueReference::new(["a"]);
        let child = base.child("b");
        assert_eq!(base.len(), 1);
        assert_eq!(child.to_string(), "a/b");
    }

    #[test]
    fn parse_ignores_empty_segments() {
        let reference = OpaqueReference::parse("/ForgeRock:alice//0/");
        assert_eq!(
            reference.segments().collect::<Vec<_>>(),
            vec!["ForgeRock:alice", "0"]
        );
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(
            segments in proptest::collection::vec("[A-Za-z0-9:._-]{1,12}", 0..4)
        ) {
            let reference = OpaqueReference::new(segments.clone());
            let parsed = OpaqueReference::parse(&reference.to_string());
            prop_assert_eq!(parsed, reference);
        }
    }
}
