use std::fmt;

/// Filesystem kinds the partition may be formatted with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FsKind {
    Ext2,
    Ext3,
    Ext4,
    Btrfs,
    /// Anything a caller sent that is not one of the above.
    Invalid,
}

impl FsKind {
    /// Name used by `mount(2)` and as the suffix of the `fsck.*`/`mkfs.*` tools.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::Ext2 => Some("ext2"),
            Self::Ext3 => Some("ext3"),
            Self::Ext4 => Some("ext4"),
            Self::Btrfs => Some("btrfs"),
            Self::Invalid => None,
        }
    }

    /// Flag that makes the format tool overwrite an existing filesystem.
    pub(crate) fn force_flag(self) -> &'static str {
        match self {
            Self::Btrfs => "-f",
            _ => "-F",
        }
    }
}

impl From<&str> for FsKind {
    fn from(value: &str) -> Self {
        match value {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "btrfs" => Self::Btrfs,
            _ => Self::Invalid,
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("invalid"))
    }
}

/// Classified exit status of a filesystem check tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsckOutcome {
    Clean,
    Corrected,
    RebootRequired,
    Uncorrected,
    OperationalError,
    UsageError,
    /// Canceled by request, shared library error, or an undocumented code.
    Other(i32),
}

impl FsckOutcome {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Clean,
            1 => Self::Corrected,
            2 => Self::RebootRequired,
            4 => Self::Uncorrected,
            8 => Self::OperationalError,
            16 => Self::UsageError,
            other => Self::Other(other),
        }
    }

    /// Only uncorrected errors warrant reformatting the partition.
    pub fn needs_recovery(self) -> bool {
        self == Self::Uncorrected
    }
}

impl fmt::Display for FsckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => f.write_str("no errors"),
            Self::Corrected => f.write_str("errors corrected"),
            Self::RebootRequired => f.write_str("errors corrected, system should be rebooted"),
            Self::Uncorrected => f.write_str("errors left uncorrected"),
            Self::OperationalError => f.write_str("operational error"),
            Self::UsageError => f.write_str("usage or syntax error"),
            Self::Other(code) => write!(f, "canceled or library error (code {code})"),
        }
    }
}
