use std::collections::{BTreeMap, BTreeSet};
use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    RwLock,
};

use crate::common::data::{Mock, Recording, Scope};

/// A map partitioned by [`Scope`]. One session's entries are never visible to
/// another session or to the shared partition; isolation is purely through
/// this key partitioning.
#[derive(Debug, Default)]
pub struct ScopedMap<T> {
    partitions: BTreeMap<Scope, BTreeMap<String, T>>,
}

impl<T: Clone> ScopedMap<T> {
    pub fn get(&self, scope: &Scope, key: &str) -> Option<T> {
        self.partitions
            .get(scope)
            .and_then(|partition| partition.get(key))
            .cloned()
    }

    pub fn set(&mut self, scope: &Scope, key: String, value: T) {
        self.partitions
            .entry(scope.clone())
            .or_default()
            .insert(key, value);
    }

    pub fn remove(&mut self, scope: &Scope, key: &str) -> Option<T> {
        self.partitions
            .get_mut(scope)
            .and_then(|partition| partition.remove(key))
    }

    pub fn partition(&self, scope: &Scope) -> BTreeMap<String, T> {
        self.partitions.get(scope).cloned().unwrap_or_default()
    }

    pub fn replace_partition(&mut self, scope: &Scope, entries: BTreeMap<String, T>) {
        self.partitions.insert(scope.clone(), entries);
    }

    pub fn clear_partition(&mut self, scope: &Scope) {
        self.partitions.remove(scope);
    }
}

/// The single process-wide store of mocks and all per-mock/per-scope state.
///
/// Individual fields are guarded by their own locks; no lock is ever held
/// across an await point, so a handler always observes a state consistent
/// with the completion of all previously finished operations.
pub struct Registry {
    mocks: RwLock<Vec<Mock>>,
    defaults: RwLock<BTreeMap<String, String>>,
    selections: RwLock<ScopedMap<String>>,
    delays: RwLock<ScopedMap<u64>>,
    echos: RwLock<ScopedMap<bool>>,
    passthroughs: RwLock<BTreeMap<Scope, BTreeSet<String>>>,
    variables: RwLock<ScopedMap<String>>,
    recordings: RwLock<Vec<Recording>>,
    record: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            mocks: RwLock::new(Vec::new()),
            defaults: RwLock::new(BTreeMap::new()),
            selections: RwLock::new(ScopedMap::default()),
            delays: RwLock::new(ScopedMap::default()),
            echos: RwLock::new(ScopedMap::default()),
            passthroughs: RwLock::new(BTreeMap::new()),
            variables: RwLock::new(ScopedMap::default()),
            recordings: RwLock::new(Vec::new()),
            record: AtomicBool::new(false),
        }
    }

    /// Idempotently merges mock definitions into the registry.
    ///
    /// Safe to call repeatedly, e.g. on a file-watch reload: a definition
    /// re-registered under an existing identifier replaces the old one in
    /// place (preserving the positional order of all other mocks), and only a
    /// scenario flagged `default` resets the shared-scope selection. A
    /// definition without any default scenario leaves previously chosen
    /// selection state untouched.
    pub fn register_mocks(&self, definitions: Vec<Mock>) {
        for mut mock in definitions {
            mock.identifier = mock.derived_identifier();
            let identifier = mock.identifier.clone();
            let default = mock.default_scenario().map(str::to_string);

            {
                let mut mocks = self.mocks.write().unwrap();
                match mocks.iter().position(|m| m.identifier == identifier) {
                    Some(index) => mocks[index] = mock,
                    None => mocks.push(mock),
                }
            }

            if let Some(scenario) = default {
                self.defaults
                    .write()
                    .unwrap()
                    .insert(identifier.clone(), scenario.clone());
                self.selections
                    .write()
                    .unwrap()
                    .set(&Scope::Shared, identifier, scenario);
            }
        }
    }

    pub fn mocks(&self) -> Vec<Mock> {
        self.mocks.read().unwrap().clone()
    }

    pub fn find_mock(&self, identifier: &str) -> Option<Mock> {
        self.mocks
            .read()
            .unwrap()
            .iter()
            .find(|mock| mock.identifier == identifier)
            .cloned()
    }

    pub fn mock_identifiers(&self) -> Vec<String> {
        self.mocks
            .read()
            .unwrap()
            .iter()
            .map(|mock| mock.identifier.clone())
            .collect()
    }

    pub fn defaults(&self) -> BTreeMap<String, String> {
        self.defaults.read().unwrap().clone()
    }

    pub fn default_for(&self, identifier: &str) -> Option<String> {
        self.defaults.read().unwrap().get(identifier).cloned()
    }

    /// Effective selection for a scope: the scoped override when present,
    /// otherwise the scope-independent default.
    pub fn selection(&self, scope: &Scope, identifier: &str) -> Option<String> {
        self.selections
            .read()
            .unwrap()
            .get(scope, identifier)
            .or_else(|| self.default_for(identifier))
    }

    pub fn set_selection(&self, scope: &Scope, identifier: &str, scenario: String) {
        self.selections
            .write()
            .unwrap()
            .set(scope, identifier.to_string(), scenario);
    }

    pub fn selections_partition(&self, scope: &Scope) -> BTreeMap<String, String> {
        self.selections.read().unwrap().partition(scope)
    }

    pub fn replace_selections(&self, scope: &Scope, entries: BTreeMap<String, String>) {
        self.selections.write().unwrap().replace_partition(scope, entries);
    }

    pub fn delay(&self, scope: &Scope, identifier: &str) -> Option<u64> {
        self.delays.read().unwrap().get(scope, identifier)
    }

    pub fn set_delay(&self, scope: &Scope, identifier: &str, delay: u64) {
        self.delays
            .write()
            .unwrap()
            .set(scope, identifier.to_string(), delay);
    }

    pub fn delays_partition(&self, scope: &Scope) -> BTreeMap<String, u64> {
        self.delays.read().unwrap().partition(scope)
    }

    pub fn clear_delays(&self, scope: &Scope) {
        self.delays.write().unwrap().clear_partition(scope);
    }

    pub fn echo(&self, scope: &Scope, identifier: &str) -> Option<bool> {
        self.echos.read().unwrap().get(scope, identifier)
    }

    pub fn set_echo(&self, scope: &Scope, identifier: &str, echo: bool) {
        self.echos
            .write()
            .unwrap()
            .set(scope, identifier.to_string(), echo);
    }

    pub fn echos_partition(&self, scope: &Scope) -> BTreeMap<String, bool> {
        self.echos.read().unwrap().partition(scope)
    }

    pub fn clear_echos(&self, scope: &Scope) {
        self.echos.write().unwrap().clear_partition(scope);
    }

    pub fn is_passthrough(&self, scope: &Scope, identifier: &str) -> bool {
        self.passthroughs
            .read()
            .unwrap()
            .get(scope)
            .is_some_and(|set| set.contains(identifier))
    }

    pub fn set_passthrough(&self, scope: &Scope, identifier: &str, passthrough: bool) {
        let mut passthroughs = self.passthroughs.write().unwrap();
        if passthrough {
            passthroughs
                .entry(scope.clone())
                .or_default()
                .insert(identifier.to_string());
        } else if let Some(set) = passthroughs.get_mut(scope) {
            set.remove(identifier);
        }
    }

    /// Flags every registered mock as passthrough within the given scope.
    pub fn set_all_passthrough(&self, scope: &Scope) {
        let identifiers: BTreeSet<String> = self.mock_identifiers().into_iter().collect();
        self.passthroughs
            .write()
            .unwrap()
            .insert(scope.clone(), identifiers);
    }

    pub fn clear_passthroughs(&self, scope: &Scope) {
        self.passthroughs.write().unwrap().remove(scope);
    }

    pub fn variables(&self, scope: &Scope) -> BTreeMap<String, String> {
        self.variables.read().unwrap().partition(scope)
    }

    pub fn set_variable(&self, scope: &Scope, key: String, value: String) {
        self.variables.write().unwrap().set(scope, key, value);
    }

    pub fn delete_variable(&self, scope: &Scope, key: &str) -> Option<String> {
        self.variables.write().unwrap().remove(scope, key)
    }

    pub fn recordings(&self) -> Vec<Recording> {
        self.recordings.read().unwrap().clone()
    }

    pub fn add_recording(&self, recording: Recording) {
        self.recordings.write().unwrap().push(recording);
    }

    pub fn record(&self) -> bool {
        self.record.load(Relaxed)
    }

    pub fn set_record(&self, record: bool) {
        self.record.store(record, Relaxed);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::data::Mock;
    use serde_json::json;

    fn definition(name: &str, expression: &str, responses: serde_json::Value) -> Mock {
        serde_json::from_value(json!({
            "name": name,
            "expression": expression,
            "method": "GET",
            "responses": responses
        }))
        .unwrap()
    }

    #[test]
    fn re_registration_replaces_in_place_and_preserves_order() {
        let registry = Registry::new();
        registry.register_mocks(vec![
            definition("first", "/api/first", json!({ "ok": { "default": true } })),
            definition("second", "/api/second", json!({ "ok": { "default": true } })),
            definition("third", "/api/third", json!({ "ok": { "default": true } })),
        ]);

        registry.register_mocks(vec![definition(
            "second",
            "/api/second-v2",
            json!({ "ok": { "default": true } }),
        )]);

        let mocks = registry.mocks();
        assert_eq!(mocks.len(), 3);
        let identifiers: Vec<&str> = mocks.iter().map(|m| m.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["first", "second", "third"]);
        assert_eq!(mocks[1].expression, "/api/second-v2");
    }

    #[test]
    fn identifier_is_derived_from_expression_and_method_without_name() {
        let registry = Registry::new();
        let mock: Mock = serde_json::from_value(json!({
            "expression": "/api/party",
            "method": "GET",
            "responses": {}
        }))
        .unwrap();
        registry.register_mocks(vec![mock]);
        assert_eq!(registry.mocks()[0].identifier, "/api/party$$GET");
    }

    #[test]
    fn registration_with_default_seeds_defaults_and_shared_selection() {
        let registry = Registry::new();
        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "error": { "status": 500 }, "ok": { "default": true } }),
        )]);

        assert_eq!(registry.default_for("party"), Some("ok".to_string()));
        assert_eq!(
            registry.selection(&Scope::Shared, "party"),
            Some("ok".to_string())
        );
    }

    #[test]
    fn registration_without_default_leaves_prior_state_untouched() {
        let registry = Registry::new();
        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "ok": { "default": true }, "error": {} }),
        )]);
        registry.set_selection(&Scope::Shared, "party", "error".to_string());

        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "ok": {}, "error": {} }),
        )]);

        assert_eq!(registry.default_for("party"), Some("ok".to_string()));
        assert_eq!(
            registry.selection(&Scope::Shared, "party"),
            Some("error".to_string())
        );
    }

    #[test]
    fn re_registered_default_resets_the_shared_selection() {
        let registry = Registry::new();
        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "ok": { "default": true }, "error": {} }),
        )]);
        registry.set_selection(&Scope::Shared, "party", "error".to_string());

        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "ok": { "default": true }, "error": {} }),
        )]);

        assert_eq!(
            registry.selection(&Scope::Shared, "party"),
            Some("ok".to_string())
        );
    }

    #[test]
    fn session_state_is_invisible_to_other_scopes() {
        let registry = Registry::new();
        registry.register_mocks(vec![definition(
            "party",
            "/api/party",
            json!({ "ok": { "default": true }, "error": {} }),
        )]);

        let s1 = Scope::Session("S1".to_string());
        let s2 = Scope::Session("S2".to_string());
        registry.set_selection(&s1, "party", "error".to_string());
        registry.set_delay(&s1, "party", 500);
        registry.set_echo(&s1, "party", true);
        registry.set_passthrough(&s1, "party", true);

        // S1 sees its own overrides.
        assert_eq!(registry.selection(&s1, "party"), Some("error".to_string()));
        assert_eq!(registry.delay(&s1, "party"), Some(500));
        assert_eq!(registry.echo(&s1, "party"), Some(true));
        assert!(registry.is_passthrough(&s1, "party"));

        // S2 and the shared scope fall back to the defaults.
        assert_eq!(registry.selection(&s2, "party"), Some("ok".to_string()));
        assert_eq!(registry.delay(&s2, "party"), None);
        assert_eq!(registry.echo(&Scope::Shared, "party"), None);
        assert!(!registry.is_passthrough(&Scope::Shared, "party"));
    }

    #[test]
    fn same_derived_identifier_is_last_registered_wins() {
        let registry = Registry::new();
        let first: Mock = serde_json::from_value(json!({
            "expression": "/api/party",
            "method": "GET",
            "responses": { "ok": { "default": true } }
        }))
        .unwrap();
        let second: Mock = serde_json::from_value(json!({
            "expression": "/api/party",
            "method": "GET",
            "responses": { "other": { "default": true } }
        }))
        .unwrap();

        registry.register_mocks(vec![first, second]);

        let mocks = registry.mocks();
        assert_eq!(mocks.len(), 1);
        assert!(mocks[0].responses.contains_key("other"));
    }

    #[test]
    fn set_all_passthrough_covers_every_identifier() {
        let registry = Registry::new();
        registry.register_mocks(vec![
            definition("first", "/api/first", json!({})),
            definition("second", "/api/second", json!({})),
        ]);

        let scope = Scope::Session("S1".to_string());
        registry.set_all_passthrough(&scope);

        assert!(registry.is_passthrough(&scope, "first"));
        assert!(registry.is_passthrough(&scope, "second"));
        assert!(!registry.is_passthrough(&Scope::Shared, "first"));
    }
}
