use std::collections::HashMap;

use haven_config::{
    ENV_API_ADDR, ENV_DB_PATH, ENV_SLACK_CHANNEL_ID, ENV_SLACK_TOKEN, HavenConfig,
};

fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
    let map: HashMap<&str, &str> = vars.iter().copied().collect();
    move |key| map.get(key).map(|v| (*v).to_owned())
}

#[test]
fn defaults_apply_when_nothing_is_set() {
    let config = HavenConfig::from_lookup(|_| None);
    assert_eq!(config.database.path, "./data/haven.db");
    assert_eq!(config.api.addr, "0.0.0.0:8080");
    assert!(!config.notifications.is_configured());
}

#[test]
fn environment_overrides_defaults() {
    let config = HavenConfig::from_lookup(lookup(&[
        (ENV_DB_PATH, "/var/lib/haven/haven.db"),
        (ENV_API_ADDR, "127.0.0.1:9999"),
    ]));
    assert_eq!(config.database.path, "/var/lib/haven/haven.db");
    assert_eq!(config.api.addr, "127.0.0.1:9999");
}

#[test]
fn notifications_need_both_credentials() {
    let only_token = HavenConfig::from_lookup(lookup(&[(ENV_SLACK_TOKEN, "xoxb-1")]));
    assert!(!only_token.notifications.is_configured());

    let only_channel = HavenConfig::from_lookup(lookup(&[(ENV_SLACK_CHANNEL_ID, "C123")]));
    assert!(!only_channel.notifications.is_configured());

    let both = HavenConfig::from_lookup(lookup(&[
        (ENV_SLACK_TOKEN, "xoxb-1"),
        (ENV_SLACK_CHANNEL_ID, "C123"),
    ]));
    assert!(both.notifications.is_configured());
}

#[test]
fn empty_credentials_do_not_activate_notifications() {
    let config = HavenConfig::from_lookup(lookup(&[
        (ENV_SLACK_TOKEN, ""),
        (ENV_SLACK_CHANNEL_ID, "C123"),
    ]));
    assert!(!config.notifications.is_configured());
}
