//! Model-list entries: bare wildcard patterns or `{alias: upstream}` mappings.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// One entry in a provider's `model` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEntry {
    /// A bare wildcard pattern (`*`/`?` supported at any position).
    Pattern(String),
    /// `{alias -> upstream}`: requests for `alias` are forwarded with the
    /// body's `model` field rewritten to `upstream`.
    Alias { alias: String, upstream: String },
}

impl ModelEntry {
    /// The string this entry is matched against when selecting providers.
    pub fn pattern(&self) -> &str {
        match self {
            ModelEntry::Pattern(pattern) => pattern,
            ModelEntry::Alias { alias, .. } => alias,
        }
    }

    /// Whether this entry contains no wildcard characters and can therefore
    /// stand in for a concrete model id in the public catalog.
    pub fn is_wildcard(&self) -> bool {
        let pattern = self.pattern();
        pattern.contains('*') || pattern.contains('?')
    }

    /// The effective model name to forward, given that `model` matched this
    /// entry. Aliases rewrite to their upstream id; patterns pass through.
    pub fn resolve(&self, model: &str) -> String {
        match self {
            ModelEntry::Pattern(_) => model.to_string(),
            ModelEntry::Alias { upstream, .. } => upstream.clone(),
        }
    }

    /// Whether `model` matches this entry by wildcard (case-sensitive).
    pub fn matches(&self, model: &str) -> bool {
        glob_match::glob_match(self.pattern(), model)
    }
}

impl Serialize for ModelEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ModelEntry::Pattern(pattern) => serializer.serialize_str(pattern),
            ModelEntry::Alias { alias, upstream } => {
                let mut map = HashMap::with_capacity(1);
                map.insert(alias.clone(), upstream.clone());
                map.serialize(serializer)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ModelEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Pattern(String),
            Alias(HashMap<String, String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Pattern(pattern) => Ok(ModelEntry::Pattern(pattern)),
            Raw::Alias(map) => {
                if map.len() != 1 {
                    return Err(D::Error::custom(format!(
                        "model alias entry must have exactly one key, got {}",
                        map.len()
                    )));
                }
                let (alias, upstream) = map.into_iter().next().expect("checked len == 1");
                Ok(ModelEntry::Alias { alias, upstream })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_round_trips_as_plain_string() {
        let json = serde_json::to_string(&ModelEntry::Pattern("gpt-4*".into())).unwrap();
        assert_eq!(json, "\"gpt-4*\"");
        let back: ModelEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModelEntry::Pattern("gpt-4*".into()));
    }

    #[test]
    fn alias_round_trips_as_single_key_map() {
        let entry = ModelEntry::Alias {
            alias: "my-claude".into(),
            upstream: "claude-3-5-sonnet".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: ModelEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn multi_key_alias_mapping_is_rejected() {
        let json = r#"{"a":"b","c":"d"}"#;
        let result: Result<ModelEntry, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn wildcard_matching_supports_star_and_question_mark() {
        assert!(ModelEntry::Pattern("gpt-4*".into()).matches("gpt-4-turbo"));
        assert!(ModelEntry::Pattern("gpt-?".into()).matches("gpt-4"));
        assert!(!ModelEntry::Pattern("gpt-?".into()).matches("gpt-44"));
        assert!(!ModelEntry::Pattern("gpt-4*".into()).matches("claude-3"));
    }

    #[test]
    fn is_wildcard_detects_pattern_characters() {
        assert!(ModelEntry::Pattern("gpt-4*".into()).is_wildcard());
        assert!(!ModelEntry::Pattern("gpt-4".into()).is_wildcard());
    }
}
