use fleet_domain::config::{AgentConfig, ControllerConfig};

#[test]
fn controller_defaults_parse_from_empty_toml() {
    let cfg: ControllerConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.port, 443);
    assert!(cfg.admin_users.is_empty());
}

#[test]
fn agent_defaults_parse_from_empty_toml() {
    let cfg: AgentConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.server, "https://localhost");
    assert!(cfg.dry_run);
}
