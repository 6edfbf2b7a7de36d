use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub(super) bus: Option<Bus>,
    pub(super) partition: Option<Partition>,
    pub(super) restore: Option<Restore>,
    pub(super) monitor: Option<Monitor>,
    pub(super) daemon: Option<Daemon>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Bus {
    pub(super) address: Option<String>,
    pub(super) name: Option<String>,
    pub(super) object_path: Option<String>,
    pub(super) interface: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Partition {
    pub(super) cache_path: Option<String>,
    pub(super) write_through_path: Option<String>,
    pub(super) tools_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Restore {
    pub(super) command: Option<Vec<String>>,
    pub(super) bundle: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Monitor {
    pub(super) root: Option<String>,
    pub(super) interval_secs: Option<u64>,
    pub(super) quota_config: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Daemon {
    pub(super) pid_file: Option<String>,
}
