//! Operating system identification

use crate::error::{FleetError, Result};
use std::fmt;
use std::str::FromStr;

/// Canonical operating system identifiers the bootstrap procedure supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsId {
    Arch,
    Alpine,
    Ubuntu,
    Debian,
    Raspbian,
    Centos,
    Fedora,
    Rhel,
    OracleLinux,
    Rocky,
    AlmaLinux,
    OpenCloudOs,
    AmazonLinux,
    Sles,
    OpenSuseLeap,
    OpenSuseTumbleweed,
}

/// Package manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Pacman,
    Apk,
    Apt,
    Dnf,
    Zypper,
}

impl OsId {
    /// Canonicalize a raw `/etc/os-release` `ID`, folding derivatives onto
    /// the distribution they are installed like.
    pub fn canonicalize(raw: &str) -> Result<Self> {
        let id = raw.trim().trim_matches('"').to_ascii_lowercase();
        let os = match id.as_str() {
            "arch" | "archarm" | "manjaro" | "manjaro-arm" => OsId::Arch,
            "alpine" => OsId::Alpine,
            "ubuntu" | "pop" | "linuxmint" | "zorin" => OsId::Ubuntu,
            "debian" => OsId::Debian,
            "raspbian" => OsId::Raspbian,
            "centos" => OsId::Centos,
            "fedora" | "fedora-asahi-remix" => OsId::Fedora,
            "rhel" => OsId::Rhel,
            "ol" => OsId::OracleLinux,
            "rocky" => OsId::Rocky,
            "almalinux" => OsId::AlmaLinux,
            "opencloudos" => OsId::OpenCloudOs,
            "amzn" => OsId::AmazonLinux,
            "sles" => OsId::Sles,
            "opensuse-leap" => OsId::OpenSuseLeap,
            "opensuse-tumbleweed" => OsId::OpenSuseTumbleweed,
            _ => {
                return Err(FleetError::UnsupportedOs(format!(
                    "\"{}\". Only Debian, Redhat, Arch Linux, Alpine Linux, or SLES based operating systems are supported",
                    id
                )))
            }
        };
        Ok(os)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsId::Arch => "arch",
            OsId::Alpine => "alpine",
            OsId::Ubuntu => "ubuntu",
            OsId::Debian => "debian",
            OsId::Raspbian => "raspbian",
            OsId::Centos => "centos",
            OsId::Fedora => "fedora",
            OsId::Rhel => "rhel",
            OsId::OracleLinux => "ol",
            OsId::Rocky => "rocky",
            OsId::AlmaLinux => "almalinux",
            OsId::OpenCloudOs => "opencloudos",
            OsId::AmazonLinux => "amzn",
            OsId::Sles => "sles",
            OsId::OpenSuseLeap => "opensuse-leap",
            OsId::OpenSuseTumbleweed => "opensuse-tumbleweed",
        }
    }

    pub fn package_manager(&self) -> PackageManager {
        match self {
            OsId::Arch => PackageManager::Pacman,
            OsId::Alpine => PackageManager::Apk,
            OsId::Ubuntu | OsId::Debian | OsId::Raspbian => PackageManager::Apt,
            OsId::Centos
            | OsId::Fedora
            | OsId::Rhel
            | OsId::OracleLinux
            | OsId::Rocky
            | OsId::AlmaLinux
            | OsId::OpenCloudOs
            | OsId::AmazonLinux => PackageManager::Dnf,
            OsId::Sles | OsId::OpenSuseLeap | OsId::OpenSuseTumbleweed => PackageManager::Zypper,
        }
    }

    /// Rolling releases report no meaningful version
    pub fn is_rolling(&self) -> bool {
        matches!(self, OsId::Arch)
    }
}

impl fmt::Display for OsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsId {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::canonicalize(s)
    }
}

/// Facts about a target that parameterize the bootstrap procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFacts {
    pub os: OsId,
    pub os_version: String,
    pub arch: String,
}

impl TargetFacts {
    /// Canonicalize raw facts
    pub fn new(raw_os: &str, os_version: Option<&str>, arch: &str) -> Result<Self> {
        let os = OsId::canonicalize(raw_os)?;
        let os_version = if os.is_rolling() {
            "rolling".to_string()
        } else {
            os_version
                .map(|v| v.trim().trim_matches('"').to_string())
                .unwrap_or_default()
        };
        Ok(Self {
            os,
            os_version,
            arch: arch.trim().to_string(),
        })
    }

    /// Command printing the raw facts, one `KEY=value` per line
    pub fn probe_command() -> &'static str {
        r#"sh -c '. /etc/os-release; echo "ID=$ID"; echo "VERSION_ID=$VERSION_ID"; echo "ARCH=$(uname -m)"'"#
    }

    /// Parse the output of [`TargetFacts::probe_command`]
    pub fn parse_probe(output: &str) -> Result<Self> {
        let mut id = None;
        let mut version = None;
        let mut arch = None;

        for line in output.lines() {
            if let Some((key, value)) = line.trim().split_once('=') {
                let value = value.trim().trim_matches('"');
                match key {
                    "ID" => id = Some(value.to_string()),
                    "VERSION_ID" => version = Some(value.to_string()),
                    "ARCH" => arch = Some(value.to_string()),
                    _ => {}
                }
            }
        }

        let id = id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FleetError::UnsupportedOs("could not read ID from /etc/os-release".to_string()))?;
        let arch = arch.unwrap_or_else(|| "x86_64".to_string());
        Self::new(&id, version.as_deref(), &arch)
    }
}
