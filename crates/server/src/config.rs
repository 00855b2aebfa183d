use shared_types::{AppConfig, FeatureFlags, WorkflowSettings};
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Path to the config file, relative to the project root.
const CONFIG_PATH: &str = "config.toml";

/// Parse config file contents, falling back to defaults on a parse error.
pub fn parse_config(contents: &str) -> AppConfig {
    toml::from_str(contents).unwrap_or_else(|e| {
        eprintln!("[config] Failed to parse {CONFIG_PATH}: {e}; using defaults");
        AppConfig::default()
    })
}

/// Read `config.toml` and store it in the global `OnceLock`. Safe to call
/// multiple times; only the first call has effect.
///
/// If the file is missing or unparseable, every setting takes its default.
pub fn load_config() -> &'static AppConfig {
    CONFIG.get_or_init(|| match std::fs::read_to_string(CONFIG_PATH) {
        Ok(contents) => {
            let config = parse_config(&contents);
            eprintln!("[config] Feature flags: {:?}", config.features);
            eprintln!(
                "[config] Exception approver role: {}",
                config.workflow.exception_approver_role
            );
            config
        }
        Err(e) => {
            eprintln!("[config] {CONFIG_PATH} not found ({e}); using defaults");
            AppConfig::default()
        }
    })
}

/// Get the loaded feature flags. Returns all-false defaults if
/// `load_config()` hasn't been called yet.
pub fn feature_flags() -> &'static FeatureFlags {
    static DEFAULT: FeatureFlags = FeatureFlags { telemetry: false };
    CONFIG.get().map(|c| &c.features).unwrap_or(&DEFAULT)
}

/// Workflow engine settings from the loaded config, or defaults.
pub fn workflow_settings() -> WorkflowSettings {
    CONFIG
        .get()
        .map(|c| c.workflow.clone())
        .unwrap_or_default()
}
