use std::collections::HashMap;

/// Per-build source of default names.
///
/// Names repeat freely across contexts but never within one: the first
/// unnamed convolution of every graph built with a fresh context is `conv-1`.
#[derive(Debug, Clone, Default)]
pub struct NameContext {
    counters: HashMap<String, usize>,
}

impl NameContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `explicit` if given, otherwise the next `<kind>-<n>`.
    pub fn create(&mut self, kind: &str, explicit: Option<&str>) -> String {
        if let Some(name) = explicit {
            return name.to_string();
        }
        let counter = self.counters.entry(kind.to_string()).or_insert(1);
        let name = format!("{kind}-{counter}");
        *counter += 1;
        name
    }
}
