use super::helpers::{absolute_path, non_empty};
use super::parse;
use anyhow::{Context, Result, bail};
use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable selecting a non-default bus endpoint.
pub const BUS_ADDRESS_ENV: &str = "PERS_CLIENT_DBUS_ADDRESS";
/// Environment variable selecting a non-default quota configuration file.
pub const QUOTA_CONFIG_ENV: &str = "PERS_PHM_CFG";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub bus: Bus,
    pub partition: Partition,
    pub restore: Restore,
    pub monitor: Monitor,
    pub daemon: Daemon,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bus {
    pub address: PathBuf,
    pub name: String,
    pub object_path: String,
    pub interface: String,
}

/// The two mount points which together make up the persistent partition.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub cache_path: PathBuf,
    pub write_through_path: PathBuf,
    /// Directory holding the `fsck.<kind>` and `mkfs.<kind>` tools.
    pub tools_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Restore {
    pub command: Vec<String>,
    pub bundle: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Monitor {
    pub root: PathBuf,
    pub interval: NonZeroU64,
    pub quota_config: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Daemon {
    pub pid_file: PathBuf,
}

impl Default for Bus {
    fn default() -> Self {
        Self {
            address: PathBuf::from(Bus::ADDRESS),
            name: Bus::NAME.to_string(),
            object_path: Bus::OBJECT_PATH.to_string(),
            interface: Bus::INTERFACE.to_string(),
        }
    }
}

impl Default for Partition {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(Partition::CACHE_PATH),
            write_through_path: PathBuf::from(Partition::WRITE_THROUGH_PATH),
            tools_dir: PathBuf::from(Partition::TOOLS_DIR),
        }
    }
}

impl Default for Restore {
    fn default() -> Self {
        Self {
            command: Restore::COMMAND.iter().map(|s| s.to_string()).collect(),
            bundle: PathBuf::from(Restore::BUNDLE),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            root: PathBuf::from(Monitor::ROOT),
            interval: Monitor::INTERVAL,
            quota_config: PathBuf::from(Monitor::QUOTA_CONFIG),
        }
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from(Daemon::PID_FILE),
        }
    }
}

impl Settings {
    pub fn validate(val: parse::Settings) -> Result<Self> {
        Ok(Self {
            bus: Bus::validate(val.bus.unwrap_or_default()).context("Invalid [bus] section")?,
            partition: Partition::validate(val.partition.unwrap_or_default())
                .context("Invalid [partition] section")?,
            restore: Restore::validate(val.restore.unwrap_or_default())
                .context("Invalid [restore] section")?,
            monitor: Monitor::validate(val.monitor.unwrap_or_default())
                .context("Invalid [monitor] section")?,
            daemon: Daemon::validate(val.daemon.unwrap_or_default())
                .context("Invalid [daemon] section")?,
        })
    }

    /// Apply the environment overrides on top of the file/default values.
    /// `lookup` is `std::env::var` in the daemon.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(address) = lookup(BUS_ADDRESS_ENV) {
            self.bus.address = absolute_path(BUS_ADDRESS_ENV, address)?;
        }
        if let Some(quota_config) = lookup(QUOTA_CONFIG_ENV) {
            self.monitor.quota_config = absolute_path(QUOTA_CONFIG_ENV, quota_config)?;
        }
        Ok(self)
    }
}

impl Bus {
    pub const ADDRESS: &'static str = "/run/persistence_health_monitor/bus.sock";
    pub const NAME: &'static str = "org.genivi.persistence.health";
    pub const OBJECT_PATH: &'static str = "/org/genivi/persistence/health";
    pub const INTERFACE: &'static str = "org.genivi.persistence.health";

    fn validate(val: parse::Bus) -> Result<Self> {
        let address = val
            .address
            .map(|s| absolute_path("address", s))
            .transpose()?
            .unwrap_or_else(|| PathBuf::from(Self::ADDRESS));
        let name = non_empty("name", val.name.unwrap_or_else(|| Self::NAME.to_string()))?;
        let object_path = val
            .object_path
            .unwrap_or_else(|| Self::OBJECT_PATH.to_string());
        if !object_path.starts_with('/') || object_path.len() < 2 {
            bail!("`object_path` must start with '/' and name an object but found \"{object_path}\"");
        }
        let interface = non_empty(
            "interface",
            val.interface.unwrap_or_else(|| Self::INTERFACE.to_string()),
        )?;
        Ok(Self {
            address,
            name,
            object_path,
            interface,
        })
    }
}

impl Partition {
    pub const CACHE_PATH: &'static str = "/Data/mnt-c";
    pub const WRITE_THROUGH_PATH: &'static str = "/Data/mnt-wt";
    pub const TOOLS_DIR: &'static str = "/sbin";

    fn validate(val: parse::Partition) -> Result<Self> {
        let cache_path = absolute_path(
            "cache_path",
            val.cache_path.unwrap_or_else(|| Self::CACHE_PATH.to_string()),
        )?;
        let write_through_path = absolute_path(
            "write_through_path",
            val.write_through_path
                .unwrap_or_else(|| Self::WRITE_THROUGH_PATH.to_string()),
        )?;
        if cache_path == write_through_path {
            bail!(
                "`cache_path` and `write_through_path` must differ, both are \"{}\"",
                cache_path.display()
            );
        }
        let tools_dir = absolute_path(
            "tools_dir",
            val.tools_dir.unwrap_or_else(|| Self::TOOLS_DIR.to_string()),
        )?;
        Ok(Self {
            cache_path,
            write_through_path,
            tools_dir,
        })
    }
}

impl Restore {
    pub const COMMAND: [&'static str; 2] = ["/usr/bin/persadmin_tool", "install"];
    pub const BUNDLE: &'static str = "/usr/share/persistence/PAS_data.tar.gz";

    fn validate(val: parse::Restore) -> Result<Self> {
        let command = match val.command {
            Some(command) => {
                let Some(program) = command.first() else {
                    bail!("`command` must name at least the program to run");
                };
                absolute_path("command", program.clone())?;
                command
            }
            None => Self::COMMAND.iter().map(|s| s.to_string()).collect(),
        };
        let bundle = absolute_path(
            "bundle",
            val.bundle.unwrap_or_else(|| Self::BUNDLE.to_string()),
        )?;
        Ok(Self { command, bundle })
    }
}

impl Monitor {
    pub const ROOT: &'static str = "/Data/mnt-c";
    pub const INTERVAL: NonZeroU64 = NonZeroU64::new(4).unwrap();
    pub const QUOTA_CONFIG: &'static str = "/etc/persistence_phm.conf";

    fn validate(val: parse::Monitor) -> Result<Self> {
        let root = absolute_path("root", val.root.unwrap_or_else(|| Self::ROOT.to_string()))?;
        let interval = match val.interval_secs {
            Some(secs) => match NonZeroU64::new(secs) {
                Some(interval) => interval,
                None => bail!("`interval_secs` must be greater than zero"),
            },
            None => Self::INTERVAL,
        };
        let quota_config = absolute_path(
            "quota_config",
            val.quota_config
                .unwrap_or_else(|| Self::QUOTA_CONFIG.to_string()),
        )?;
        Ok(Self {
            root,
            interval,
            quota_config,
        })
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval.get())
    }
}

impl Daemon {
    pub const PID_FILE: &'static str = "/var/run/persistence_health_monitor.pid";

    fn validate(val: parse::Daemon) -> Result<Self> {
        let pid_file = absolute_path(
            "pid_file",
            val.pid_file.unwrap_or_else(|| Self::PID_FILE.to_string()),
        )?;
        Ok(Self { pid_file })
    }
}
