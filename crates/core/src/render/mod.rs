use std::collections::HashMap;

/// Sink for named variable writes, e.g. CSS custom properties on a root
/// element. Only the scheduler writes to a surface.
pub trait VariableSurface {
    fn set_variable(&mut self, name: &str, value: &str);
}

/// In-memory surface that keeps the latest value and a write count for every
/// variable. Used by the command line driver and by tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySurface {
    values: HashMap<String, String>,
    writes: HashMap<String, usize>,
    total_writes: usize,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    pub fn write_count(&self, name: &str) -> usize {
        self.writes.get(name).copied().unwrap_or(0)
    }

    pub fn total_writes(&self) -> usize {
        self.total_writes
    }
}

impl VariableSurface for MemorySurface {
    fn set_variable(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
        *self.writes.entry(name.to_string()).or_default() += 1;
        self.total_writes += 1;
    }
}

impl<S: VariableSurface + ?Sized> VariableSurface for &mut S {
    fn set_variable(&mut self, name: &str, value: &str) {
        (**self).set_variable(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_latest_value_and_counts() {
        let mut surface = MemorySurface::new();
        surface.set_variable("--a", "1");
        surface.set_variable("--a", "2");
        surface.set_variable("--b", "3");

        assert_eq!(surface.get("--a"), Some("2"));
        assert_eq!(surface.write_count("--a"), 2);
        assert_eq!(surface.write_count("--missing"), 0);
        assert_eq!(surface.total_writes(), 3);
    }
}
