use queue_workers::Config;
use std::time::Duration;

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(config.max_workers >= 1);
    assert_eq!(config.lease_time(), Duration::from_secs(60));
}

#[test]
fn test_zero_workers_rejected() {
    let config = Config {
        max_workers: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_sleep_rejected() {
    let config = Config {
        worker_sleep_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());

    let config = Config {
        pool_sleep_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_lease_rejected() {
    let config = Config {
        lease_time_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_new_sets_worker_count() {
    let config = Config::new(7);
    assert_eq!(config.max_workers, 7);
    assert!(config.validate().is_ok());
}
