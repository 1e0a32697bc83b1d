// Best-effort guide identity resolution for the tip path.
// Not an authoritative identity system: a miss degrades to the supplied
// name so a paid confirmation is never blocked on directory state.

use tracing::{debug, warn};

use crate::store::Store;

/// Canonical identity handed to persistence and notification. `exists`
/// distinguishes a directory hit from the degraded fallback.
#[derive(Debug, Clone)]
pub struct ResolvedGuide {
    pub id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub exists: bool,
}

impl ResolvedGuide {
    fn missing(supplied_id: Option<&str>, supplied_name: Option<&str>) -> Self {
        Self {
            id: supplied_id.map(str::to_string),
            name: supplied_name.unwrap_or("your guide").to_string(),
            email: None,
            exists: false,
        }
    }
}

/// Resolve `(id?, name?)` against the guide directory:
/// 1. direct lookup by id;
/// 2. exact match over the ordered candidate name fields;
/// 3. bounded case-insensitive scan;
/// 4. a non-existent result carrying the supplied name.
pub fn resolve_guide(store: &Store, id: Option<&str>, name: Option<&str>) -> ResolvedGuide {
    let id = id.map(str::trim).filter(|s| !s.is_empty());
    let name = name.map(str::trim).filter(|s| !s.is_empty());

    if let Some(guide_id) = id {
        match store.get_guide(guide_id) {
            Ok(Some(guide)) => {
                let resolved_name = guide
                    .best_name()
                    .or(name)
                    .unwrap_or("your guide")
                    .to_string();
                return ResolvedGuide {
                    id: Some(guide.id),
                    name: resolved_name,
                    email: guide.email,
                    exists: true,
                };
            }
            Ok(None) => {
                debug!(guide_id = %guide_id, "no guide record for id, trying name match");
            }
            Err(e) => {
                warn!(guide_id = %guide_id, error = %e, "guide lookup failed");
                return ResolvedGuide::missing(Some(guide_id), name);
            }
        }
    }

    if let Some(guide_name) = name {
        match store.find_guide_by_exact_name(guide_name) {
            Ok(Some(guide)) => {
                return ResolvedGuide {
                    name: guide.best_name().unwrap_or(guide_name).to_string(),
                    id: Some(guide.id),
                    email: guide.email,
                    exists: true,
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(guide_name = %guide_name, error = %e, "guide name search failed");
                return ResolvedGuide::missing(id, Some(guide_name));
            }
        }

        match store.scan_guides_by_name_ci(guide_name) {
            Ok(Some(guide)) => {
                return ResolvedGuide {
                    name: guide.best_name().unwrap_or(guide_name).to_string(),
                    id: Some(guide.id),
                    email: guide.email,
                    exists: true,
                };
            }
            Ok(None) => {}
            Err(e) => {
                warn!(guide_name = %guide_name, error = %e, "guide scan failed");
            }
        }
    }

    ResolvedGuide::missing(id, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Guide;

    fn seeded_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("guides.redb")).unwrap();
        store
            .put_guide(&Guide {
                id: "g1".to_string(),
                name: Some("Alex Carter".to_string()),
                email: Some("alex@example.com".to_string()),
                ..Default::default()
            })
            .unwrap();
        (dir, store)
    }

    #[test]
    fn resolves_by_id_first() {
        let (_dir, store) = seeded_store();
        let resolved = resolve_guide(&store, Some("g1"), Some("Wrong Name"));
        assert!(resolved.exists);
        assert_eq!(resolved.name, "Alex Carter");
        assert_eq!(resolved.email.as_deref(), Some("alex@example.com"));
    }

    #[test]
    fn unknown_id_falls_through_to_name_match() {
        let (_dir, store) = seeded_store();
        let resolved = resolve_guide(&store, Some("g404"), Some("Alex Carter"));
        assert!(resolved.exists);
        assert_eq!(resolved.id.as_deref(), Some("g1"));
    }

    #[test]
    fn case_insensitive_fallback() {
        let (_dir, store) = seeded_store();
        let resolved = resolve_guide(&store, None, Some("alex carter"));
        assert!(resolved.exists);
        assert_eq!(resolved.id.as_deref(), Some("g1"));
    }

    #[test]
    fn miss_degrades_to_supplied_name() {
        let (_dir, store) = seeded_store();
        let resolved = resolve_guide(&store, None, Some("Nobody Here"));
        assert!(!resolved.exists);
        assert_eq!(resolved.name, "Nobody Here");
        assert!(resolved.email.is_none());

        let resolved = resolve_guide(&store, None, None);
        assert!(!resolved.exists);
        assert_eq!(resolved.name, "your guide");
    }
}
