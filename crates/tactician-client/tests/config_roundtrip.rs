use tactician_client::config::{ConfigLoadError, TacticianConfig};

#[test]
fn test_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let result = TacticianConfig::load_from(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigLoadError::NotFound)));
}

#[test]
fn test_save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = TacticianConfig::default();
    config.engine.grace_period_ms = 1500;
    config.scripting.builtin_scripts = false;
    config.logging.file = true;
    config.save_to(&path).unwrap();

    let loaded = TacticianConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_zero_values_are_normalized_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[engine]\ntick_ms = 0\n\n[scripting]\nmax_steps = 0\nmax_value_len = 0\n").unwrap();

    let loaded = TacticianConfig::load_from(&path).unwrap();
    assert_eq!(loaded.engine.tick_ms, 100);
    assert_eq!(loaded.scripting.max_steps, 100_000);
    assert_eq!(loaded.scripting.max_value_len, 100_000);
}

#[test]
fn test_malformed_file_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[engine\n").unwrap();
    assert!(matches!(
        TacticianConfig::load_from(&path),
        Err(ConfigLoadError::ParseError(_))
    ));
}
