//! Topic translation graph
//!
//! Virtual topics expand into one or more target topics, which may be
//! virtual themselves. Expansion is depth counted so a cycle in the
//! configuration fails instead of looping.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Error, Result};

/// Maximum number of virtual levels a single expansion may descend
pub const MAX_RECURSION_DEPTH: usize = 10;

/// Immutable virtual topic -> targets mapping
#[derive(Debug, Clone, Default)]
pub struct Translation {
    mappings: BTreeMap<String, Vec<String>>,
}

impl Translation {
    pub fn new(mappings: BTreeMap<String, Vec<String>>) -> Self {
        Self { mappings }
    }

    /// Whether `topic` is a translated topic
    pub fn is_virtual(&self, topic: &str) -> bool {
        self.mappings.contains_key(topic)
    }

    /// Expand a virtual topic into the concrete topics it reaches.
    ///
    /// Returns `Ok(None)` if `topic` is not virtual; the caller treats it as a
    /// concrete node topic.
    pub fn translate(&self, topic: &str) -> Result<Option<BTreeSet<String>>> {
        if !self.is_virtual(topic) {
            return Ok(None);
        }

        let mut resolved = BTreeSet::new();
        self.expand(topic, topic, 0, &mut resolved)?;
        Ok(Some(resolved))
    }

    fn expand(
        &self,
        origin: &str,
        topic: &str,
        depth: usize,
        resolved: &mut BTreeSet<String>,
    ) -> Result<()> {
        let Some(targets) = self.mappings.get(topic) else {
            resolved.insert(topic.to_string());
            return Ok(());
        };

        if depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionExceeded {
                topic: origin.to_string(),
                depth: MAX_RECURSION_DEPTH,
            });
        }

        for target in targets {
            self.expand(origin, target, depth + 1, resolved)?;
        }
        Ok(())
    }

    /// Every topic mentioned by the graph, as source or as target
    pub fn topics(&self) -> Vec<String> {
        let mut topics = BTreeSet::new();
        for (source, targets) in &self.mappings {
            topics.insert(source.clone());
            topics.extend(targets.iter().cloned());
        }
        topics.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
