// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use dashmap::DashMap;
use datasmith_core::Result;
use std::sync::Arc;
use uuid::Uuid;

/// Something that can hold a version in use (a running job, a fine-tuning
/// run, an export). Deleting a referenced version is a conflict.
pub trait VersionReferences: Send + Sync {
    /// Human-readable descriptions of the active holders of `version_id`
    fn references(&self, version_id: Uuid) -> Vec<String>;

    /// Run `f` while no new holder of this kind can attach to `version_id`
    fn exclusive(&self, version_id: Uuid, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _ = version_id;
        f()
    }
}

/// Holders registered by subsystems outside the job manager
#[derive(Default)]
pub struct ReferenceRegistry {
    holders: DashMap<Uuid, Vec<String>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&self, version_id: Uuid, holder: impl Into<String>) {
        self.holders.entry(version_id).or_default().push(holder.into());
    }

    pub fn release(&self, version_id: Uuid, holder: &str) {
        let now_empty = match self.holders.get_mut(&version_id) {
            Some(mut list) => {
                list.retain(|h| h != holder);
                list.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.holders.remove_if(&version_id, |_, list| list.is_empty());
        }
    }
}

impl VersionReferences for ReferenceRegistry {
    fn references(&self, version_id: Uuid) -> Vec<String> {
        self.holders
            .get(&version_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}

/// Union of several reference sources
#[derive(Default, Clone)]
pub struct References {
    sources: Vec<Arc<dyn VersionReferences>>,
}

impl References {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn VersionReferences>) -> Self {
        self.sources.push(source);
        self
    }
}

impl VersionReferences for References {
    fn references(&self, version_id: Uuid) -> Vec<String> {
        self.sources
            .iter()
            .flat_map(|s| s.references(version_id))
            .collect()
    }

    /// Nests every source's exclusive section around `f`
    fn exclusive(&self, version_id: Uuid, f: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        fn nest(
            sources: &[Arc<dyn VersionReferences>],
            version_id: Uuid,
            f: &mut dyn FnMut() -> Result<()>,
        ) -> Result<()> {
            match sources.split_first() {
                Some((first, rest)) => first.exclusive(version_id, &mut || nest(rest, version_id, &mut *f)),
                None => f(),
            }
        }
        nest(&self.sources, version_id, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_and_release() {
        let registry = ReferenceRegistry::new();
        let v = Uuid::new_v4();
        registry.hold(v, "finetune:42");
        registry.hold(v, "export:7");
        assert_eq!(registry.references(v).len(), 2);

        registry.release(v, "finetune:42");
        assert_eq!(registry.references(v), vec!["export:7".to_string()]);
        registry.release(v, "export:7");
        assert!(registry.references(v).is_empty());
        assert!(registry.references(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn test_union() {
        let a = Arc::new(ReferenceRegistry::new());
        let b = Arc::new(ReferenceRegistry::new());
        let v = Uuid::new_v4();
        a.hold(v, "a");
        b.hold(v, "b");
        let all = References::new().with(a).with(b);
        assert_eq!(all.references(v), vec!["a".to_string(), "b".to_string()]);
    }
}
