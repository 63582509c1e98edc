use super::load_existing_config as load_existing_config_impl;

#[test]
fn load_existing_config() {
    let config = load_existing_config_impl().expect("config loaded successfully");
    assert!(!config.embedding.host.is_empty());
    assert!(config.embedding.port > 0);
    assert!(!config.embedding.model.is_empty());
    assert!(config.embedding.dimension > 0);
    assert!(!config.completion.model.is_empty());
    assert!(config.store.scan_limit > 0);
}
