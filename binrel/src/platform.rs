use crate::error::InstallError;
use log::debug;
use platforms::{Arch, Platform, OS};
use std::str::FromStr;

/// The operating systems that release assets can be installed for.
#[derive(
    strum::AsRefStr, strum::Display, strum::EnumString, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
#[strum(ascii_case_insensitive)]
pub enum TargetOs {
    #[strum(to_string = "linux")]
    Linux,
    #[strum(to_string = "darwin", serialize = "macos", serialize = "osx")]
    Darwin,
    #[strum(to_string = "windows", serialize = "win32")]
    Windows,
}

impl TargetOs {
    /// The strings that identify this OS in an asset name. Windows does not include a bare "win"
    /// because that is a substring of "darwin".
    pub(crate) fn tokens(self) -> &'static [&'static str] {
        match self {
            TargetOs::Linux => &["linux"],
            TargetOs::Darwin => &["darwin", "macos", "osx"],
            TargetOs::Windows => &["windows", "win64", "win32"],
        }
    }

    fn from_host(os: OS) -> Result<TargetOs, InstallError> {
        match os {
            OS::Linux => Ok(TargetOs::Linux),
            OS::MacOS => Ok(TargetOs::Darwin),
            OS::Windows => Ok(TargetOs::Windows),
            other => Err(InstallError::UnsupportedPlatform(other.as_str().to_string())),
        }
    }
}

const X64_TOKENS: &[&str] = &["x86_64", "x64", "amd64"];
const ARM64_TOKENS: &[&str] = &["aarch64", "arm64"];

/// The platform an installation targets: an OS plus every name its CPU architecture is known by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformDescriptor {
    os: TargetOs,
    arch: String,
    arch_tokens: Vec<String>,
}

impl PlatformDescriptor {
    /// Builds a descriptor from explicit values, falling back to the platform this crate was
    /// compiled for when either is missing.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::UnsupportedPlatform`] if the OS is not Linux, macOS, or Windows.
    pub fn build(platform: Option<&str>, arch: Option<&str>) -> Result<Self, InstallError> {
        let host = host_platform();

        let os = match platform {
            Some(p) => TargetOs::from_str(p.trim())
                .map_err(|_| InstallError::UnsupportedPlatform(p.to_string()))?,
            None => match host {
                Some(h) => TargetOs::from_host(h.target_os)?,
                None => return Err(InstallError::UnsupportedPlatform(env!("TARGET").to_string())),
            },
        };

        let arch = match arch {
            Some(a) => a.trim().to_lowercase(),
            None => match host {
                Some(h) => host_arch_name(h.target_arch),
                None => return Err(InstallError::UnsupportedPlatform(env!("TARGET").to_string())),
            },
        };

        Ok(Self::new(os, &arch))
    }

    /// Builds a descriptor from an already parsed OS and an arch name.
    pub fn new(os: TargetOs, arch: &str) -> Self {
        let arch = arch.to_lowercase();
        let arch_tokens = arch_tokens(&arch);
        debug!(
            "platform = {os}, arch = {arch}, arch tokens = {}",
            arch_tokens.join(",")
        );
        Self {
            os,
            arch,
            arch_tokens,
        }
    }

    pub fn os(&self) -> TargetOs {
        self.os
    }

    /// The arch name as given (or as reported for the host), lowercased.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn arch_tokens(&self) -> &[String] {
        &self.arch_tokens
    }

    pub fn platform_tokens(&self) -> Vec<String> {
        self.os.tokens().iter().map(|t| (*t).to_string()).collect()
    }
}

fn arch_tokens(arch: &str) -> Vec<String> {
    let group = if X64_TOKENS.contains(&arch) {
        X64_TOKENS
    } else if ARM64_TOKENS.contains(&arch) {
        ARM64_TOKENS
    } else {
        return vec![arch.to_string()];
    };
    group.iter().map(|t| (*t).to_string()).collect()
}

fn host_arch_name(arch: Arch) -> String {
    match arch {
        Arch::X86_64 => "x64".to_string(),
        Arch::AArch64 => "arm64".to_string(),
        other => other.as_str().to_string(),
    }
}

fn host_platform() -> Option<&'static Platform> {
    Platform::find(env!("TARGET"))
}
