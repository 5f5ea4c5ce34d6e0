use serde_json::Value;

/// Ordered list of vendor field names for one logical field.
///
/// Lookup walks the names in order and the first one present with a non-null
/// value wins, even if a later name would have a more useful type.
#[derive(Clone, Copy, Debug)]
pub struct Aliases(pub &'static [&'static str]);

impl Aliases {
    /// Returns the first present value among the aliases.
    pub fn value<'a>(&self, object: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .find_map(|name| object.get(*name).filter(|v| !v.is_null()))
    }

    /// Like `value`, but searches each source in turn for every alias before
    /// moving to the next alias.
    pub fn value_in<'a>(&self, sources: &[&'a Value]) -> Option<&'a Value> {
        self.0.iter().find_map(|name| {
            sources
                .iter()
                .find_map(|source| source.get(*name).filter(|v| !v.is_null()))
        })
    }

    /// Returns the winning alias value when it is a string.
    pub fn str<'a>(&self, object: &'a Value) -> Option<&'a str> {
        self.value(object).and_then(Value::as_str)
    }

    pub fn str_in<'a>(&self, sources: &[&'a Value]) -> Option<&'a str> {
        self.value_in(sources).and_then(Value::as_str)
    }
}
