//! Run configuration (§6, §6A): one immutable value constructed at run start and threaded by
//! reference into every component. No global mutable config state anywhere in this crate.

use serde::{Deserialize, Serialize};

/// Immutable per-run configuration. `Default` matches the literals in §6; `cpu_workers: None`
/// means "auto", resolved via `num_cpus::get()` at run start rather than baked into the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub batch_line_budget: u32,
    pub adjacency_threshold: u32,
    pub splitter_retries: u32,
    pub splitter_concurrency: usize,
    pub cpu_workers: Option<usize>,
    pub matcher_threshold: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            batch_line_budget: 5000,
            adjacency_threshold: 3,
            splitter_retries: 3,
            splitter_concurrency: 2,
            cpu_workers: None,
            matcher_threshold: 0.5,
        }
    }
}

impl Configuration {
    /// Resolves `cpu_workers` to a concrete worker count, defaulting to the number of logical CPUs.
    pub fn resolved_cpu_workers(&self) -> usize {
        self.cpu_workers.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_literals() {
        let config = Configuration::default();
        assert_eq!(config.batch_line_budget, 5000);
        assert_eq!(config.adjacency_threshold, 3);
        assert_eq!(config.splitter_retries, 3);
        assert_eq!(config.splitter_concurrency, 2);
        assert_eq!(config.cpu_workers, None);
        assert_eq!(config.matcher_threshold, 0.5);
    }

    #[test]
    fn resolved_cpu_workers_falls_back_to_num_cpus_when_auto() {
        let config = Configuration::default();
        assert_eq!(config.resolved_cpu_workers(), num_cpus::get());
    }

    #[test]
    fn resolved_cpu_workers_honors_explicit_override() {
        let config = Configuration {
            cpu_workers: Some(4),
            ..Configuration::default()
        };
        assert_eq!(config.resolved_cpu_workers(), 4);
    }

    #[test]
    fn deserializes_partial_config_with_defaults_filled_in() {
        let json = r#"{"batch_line_budget": 1000}"#;
        let config: Configuration = serde_json::from_str(json).unwrap();
        assert_eq!(config.batch_line_budget, 1000);
        assert_eq!(config.adjacency_threshold, 3);
    }
}
