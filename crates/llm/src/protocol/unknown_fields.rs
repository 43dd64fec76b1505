use std::collections::BTreeMap;

/// Arbitrary additional fields preserved for round-tripping.
///
/// Providers add fields over time; anything we do not model explicitly is
/// carried through unchanged instead of being dropped.
#[derive(Default, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UnknownFields(BTreeMap<String, serde_json::Value>);

impl UnknownFields {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }
}
