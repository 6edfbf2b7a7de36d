use std::io::Write;
use std::path::PathBuf;

use config::ast::{QUOTA_CONFIG_ENV, Settings};

#[test]
fn loads_explicit_settings_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [daemon]
        pid_file = "/tmp/phm-test.pid"

        [restore]
        command = ["/opt/pers/restore", "--import"]
        bundle = "/opt/pers/defaults.tar.gz"
        "#
    )
    .unwrap();

    let settings = config::load_with_env(Some(file.path()), |_| None).unwrap();
    assert_eq!(settings.daemon.pid_file, PathBuf::from("/tmp/phm-test.pid"));
    assert_eq!(
        settings.restore.command,
        vec!["/opt/pers/restore".to_string(), "--import".to_string()]
    );
    assert_eq!(settings.monitor, Settings::default().monitor);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(config::load(Some(&dir.path().join("absent.toml"))).is_err());
}

#[test]
fn malformed_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[monitor\ninterval_secs = 4").unwrap();
    assert!(config::load(Some(file.path())).is_err());
}

#[test]
fn environment_overrides_the_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[monitor]\nquota_config = \"/etc/from-file.conf\"").unwrap();

    let settings = config::load_with_env(Some(file.path()), |key| {
        (key == QUOTA_CONFIG_ENV).then(|| "/etc/from-env.conf".to_string())
    })
    .unwrap();
    assert_eq!(settings.monitor.quota_config, PathBuf::from("/etc/from-env.conf"));
    assert_eq!(settings.monitor.root, Settings::default().monitor.root);
}
