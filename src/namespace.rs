//! Maps `(namespace, entity)` pairs from query documents onto registered type names.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::NameHasher;
use crate::schema::{Registry, capitalize};

// ------------- NamespaceMap -------------
/// Namespace to type names, in sorted order. Configured namespaces are present even
/// when no type belongs to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceMap {
    namespaces: BTreeMap<String, BTreeSet<String>>,
}
impl NamespaceMap {
    pub fn from_registry(registry: &Registry) -> Self {
        let mut namespaces: BTreeMap<String, BTreeSet<String>> = registry
            .known_namespaces()
            .iter()
            .map(|n| (n.clone(), BTreeSet::new()))
            .collect();
        for schema_type in registry.types() {
            if let Some(namespace) = schema_type.namespace() {
                namespaces
                    .entry(namespace.to_lowercase())
                    .or_default()
                    .insert(schema_type.name().to_string());
            }
        }
        Self { namespaces }
    }
    pub fn types_in(&self, namespace: &str) -> Option<&BTreeSet<String>> {
        self.namespaces.get(&namespace.to_lowercase())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.namespaces.iter()
    }
    pub fn len(&self) -> usize {
        self.namespaces.len()
    }
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

// ------------- Resolution -------------
/// Which step of the chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Exact,
    CaseInsensitive,
    Capitalized,
    Constructed,
    Singular,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found { type_name: String, strategy: Strategy },
    NotFound,
}
impl Resolution {
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Resolution::Found { type_name, .. } => Some(type_name),
            Resolution::NotFound => None,
        }
    }
}

type Lookup = HashMap<String, String, NameHasher>;
type Step = fn(&NamespaceResolver, &str, &Lookup, &str) -> Option<String>;

const CHAIN: [(Strategy, Step); 4] = [
    (Strategy::Exact, exact),
    (Strategy::CaseInsensitive, case_insensitive),
    (Strategy::Capitalized, capitalized),
    (Strategy::Constructed, constructed),
];

fn exact(_: &NamespaceResolver, _: &str, entities: &Lookup, entity: &str) -> Option<String> {
    entities.get(entity).cloned()
}
fn case_insensitive(_: &NamespaceResolver, _: &str, entities: &Lookup, entity: &str) -> Option<String> {
    entities.get(&entity.to_lowercase()).cloned().or_else(|| {
        entities
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(entity))
            .map(|(_, type_name)| type_name.clone())
    })
}
fn capitalized(_: &NamespaceResolver, _: &str, entities: &Lookup, entity: &str) -> Option<String> {
    entities.get(&capitalize(entity)).cloned()
}
fn constructed(resolver: &NamespaceResolver, namespace: &str, _: &Lookup, entity: &str) -> Option<String> {
    let candidate = capitalize(namespace) + &capitalize(entity);
    resolver.type_names.contains(&candidate).then_some(candidate)
}

/// `customers` -> `customer`, `categories` -> `category`. Returns `None` for words
/// that do not look plural.
pub fn singular(entity: &str) -> Option<String> {
    if let Some(stem) = entity.strip_suffix("ies") {
        Some(format!("{}y", stem))
    } else if entity.ends_with("ss") {
        None
    } else {
        entity.strip_suffix('s').filter(|s| !s.is_empty()).map(str::to_string)
    }
}

// ------------- NamespaceResolver -------------
pub struct NamespaceResolver {
    // lowercase namespace -> entity key -> type name
    entities: HashMap<String, Lookup, NameHasher>,
    type_names: HashSet<String, NameHasher>,
}
impl NamespaceResolver {
    /// Every type with a namespace is reachable by its lowercase full name and by its
    /// bare entity name as written, lowercased, and with a lowercase first letter.
    /// Types without a namespace fill the gaps in every known namespace.
    pub fn new(registry: &Registry) -> Self {
        let mut entities: HashMap<String, Lookup, NameHasher> = HashMap::default();
        for namespace in registry.known_namespaces() {
            entities.entry(namespace.to_lowercase()).or_default();
        }
        for schema_type in registry.types() {
            let Some(namespace) = schema_type.namespace() else {
                continue;
            };
            let lookup = entities.entry(namespace.to_lowercase()).or_default();
            let name = schema_type.name().to_string();
            let bare = schema_type.bare_name();
            let mut lc_first = bare.to_string();
            if let Some(first) = lc_first.get_mut(0..1) {
                first.make_ascii_lowercase();
            }
            lookup.insert(name.to_lowercase(), name.clone());
            for key in [bare.to_string(), bare.to_lowercase(), lc_first] {
                lookup.entry(key).or_insert_with(|| name.clone());
            }
        }
        // types without a namespace are reachable from every namespace,
        // after anything that does belong there
        for schema_type in registry.types().filter(|t| t.namespace().is_none()) {
            let name = schema_type.name();
            let mut lc_first = name.to_string();
            if let Some(first) = lc_first.get_mut(0..1) {
                first.make_ascii_lowercase();
            }
            for lookup in entities.values_mut() {
                for key in [name.to_lowercase(), name.to_string(), lc_first.clone()] {
                    lookup.entry(key).or_insert_with(|| name.to_string());
                }
            }
        }
        Self {
            entities,
            type_names: registry.types().map(|t| t.name().to_string()).collect(),
        }
    }

    pub fn resolve(&self, namespace: &str, entity: &str) -> Resolution {
        let namespace = namespace.to_lowercase();
        let Some(entities) = self.entities.get(&namespace) else {
            debug!(%namespace, "unknown namespace");
            return Resolution::NotFound;
        };
        let resolution = self.run_chain(&namespace, entities, entity).or_else(|| {
            singular(entity)
                .and_then(|s| self.run_chain(&namespace, entities, &s))
                .map(|(type_name, _)| (type_name, Strategy::Singular))
        });
        match resolution {
            Some((type_name, strategy)) => {
                debug!(%namespace, entity, %type_name, ?strategy, "resolved entity");
                Resolution::Found { type_name, strategy }
            }
            None => {
                debug!(%namespace, entity, "entity not resolved");
                Resolution::NotFound
            }
        }
    }

    fn run_chain(&self, namespace: &str, entities: &Lookup, entity: &str) -> Option<(String, Strategy)> {
        if entity.is_empty() {
            return None;
        }
        CHAIN
            .iter()
            .find_map(|(strategy, step)| step(self, namespace, entities, entity).map(|t| (t, *strategy)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_forms() {
        assert_eq!(singular("customers").as_deref(), Some("customer"));
        assert_eq!(singular("categories").as_deref(), Some("category"));
        assert_eq!(singular("address"), None);
        assert_eq!(singular("employee"), None);
    }
}
