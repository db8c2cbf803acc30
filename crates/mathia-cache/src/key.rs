//! Cache-key discipline for connector results.
//!
//! Keys are `action|canonical_json(params)|salt`, where the salt is empty
//! for public data and the requesting user's id for user-scoped data. The
//! salt is what prevents one user's cached results from leaking to another.

use serde_json::Value;

/// Whether a connector action's results are shared or per-user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Shared data (weather, exchange rates) — no salt.
    Public,
    /// User-scoped data (wallet balance, itinerary list) — salted by user id.
    User,
}

/// Build the connector-result cache key.
pub fn cache_key(action: &str, params: &Value, scope: Scope, user_id: &str) -> String {
    let salt = match scope {
        Scope::Public => "",
        Scope::User => user_id,
    };
    format!("{action}|{}|{salt}", canonical_json(params))
}

/// Serialize JSON with object keys sorted recursively, so logically equal
/// params always produce the same key.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"origin": "NBO", "dest": "LHR", "pax": 2});
        let b = json!({"pax": 2, "dest": "LHR", "origin": "NBO"});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = json!({"outer": {"b": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "b": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn user_scope_isolates_users() {
        let params = json!({"currency": "KES"});
        let alice = cache_key("balance", &params, Scope::User, "user-alice");
        let bob = cache_key("balance", &params, Scope::User, "user-bob");
        assert_ne!(alice, bob);
    }

    #[test]
    fn public_scope_is_shared() {
        let params = json!({"city": "Nairobi"});
        let alice = cache_key("get_weather", &params, Scope::Public, "user-alice");
        let bob = cache_key("get_weather", &params, Scope::Public, "user-bob");
        assert_eq!(alice, bob);
    }

    #[test]
    fn different_actions_never_collide() {
        let params = json!({});
        assert_ne!(
            cache_key("get_weather", &params, Scope::Public, ""),
            cache_key("get_currency", &params, Scope::Public, "")
        );
    }
}
