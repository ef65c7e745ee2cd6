use super::*;
use std::collections::HashMap;

fn config(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
    AppConfig::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn defaults_match_constants() {
    let config = config(&[]);
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.api_key, None);
    assert_eq!(config.components_dir, None);
    assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    assert_eq!(config.request_timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    assert_eq!(AppConfig::default(), config);
}

#[test]
fn values_are_read_and_trimmed() {
    let config = config(&[
        ("LAUNCHPAD_BASE_URL", "https://launcher.test/"),
        ("LAUNCHPAD_API_KEY", " key-1 "),
        ("LAUNCHPAD_COMPONENTS_DIR", "static/components"),
        ("LAUNCHPAD_POLL_INTERVAL_MS", "250"),
        ("LAUNCHPAD_REQUEST_TIMEOUT_SECS", "5"),
    ]);
    assert_eq!(config.base_url, "https://launcher.test");
    assert_eq!(config.api_key.as_deref(), Some("key-1"));
    assert_eq!(config.components_dir, Some(PathBuf::from("static/components")));
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.request_timeout, Duration::from_secs(5));
}

#[test]
fn invalid_or_blank_values_fall_back_to_defaults() {
    let config = config(&[
        ("LAUNCHPAD_API_KEY", "   "),
        ("LAUNCHPAD_BASE_URL", ""),
        ("LAUNCHPAD_POLL_INTERVAL_MS", "soon"),
        ("LAUNCHPAD_CONNECT_TIMEOUT_SECS", "-1"),
    ]);
    assert_eq!(config.api_key, None);
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.poll_interval, Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));
    assert_eq!(config.connect_timeout, Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
}

#[test]
fn from_env_reads_process_environment() {
    unsafe { std::env::set_var("LAUNCHPAD_COMPONENTS_DIR", "/tmp/__launchpad_components__") };
    let config = AppConfig::from_env();
    assert_eq!(config.components_dir, Some(PathBuf::from("/tmp/__launchpad_components__")));
    unsafe { std::env::remove_var("LAUNCHPAD_COMPONENTS_DIR") };
}
