use std::path::PathBuf;
use std::str::FromStr;

/// Kind of beacon the external build step knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeaconFlavor {
    Linux,
    Windows,
}

impl BeaconFlavor {
    pub const ALL: [Self; 2] = [Self::Linux, Self::Windows];

    /// Position in [`Self::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::Linux => 0,
            Self::Windows => 1,
        }
    }

    /// Name used in URLs and download file names.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
        }
    }

    /// Build target handed to the external tool.
    pub const fn target(self) -> &'static str {
        match self {
            Self::Linux => "agent_linux",
            Self::Windows => "agent_windows",
        }
    }

    /// Where the build step leaves its archive, relative to the build
    /// directory. One path per flavor, shared by every project.
    pub fn artifact_path(self) -> PathBuf {
        PathBuf::from("agents").join(format!("{}.zip", self.target()))
    }

    /// File name presented to whoever downloads the beacon for `project_id`.
    pub fn download_name(self, project_id: i64) -> String {
        format!("agent_{}_{project_id}.zip", self.name())
    }
}

impl std::fmt::Display for BeaconFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown beacon flavor: {0}")]
pub struct UnknownFlavor(pub String);

impl FromStr for BeaconFlavor {
    type Err = UnknownFlavor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flavor| flavor.name() == s)
            .ok_or_else(|| UnknownFlavor(s.chars().take(32).collect()))
    }
}

/// Trusted endpoint beacons report to, taken from server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEndpoint {
    pub host: String,
    pub port: u16,
}

impl CallbackEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Callback URL embedded in the beacon built for `project_id`.
    pub fn url_for(&self, project_id: i64) -> String {
        let host = &self.host;
        if host.contains(':') && !host.starts_with('[') {
            format!("http://[{host}]:{}/api/hit/{project_id}", self.port)
        } else {
            format!("http://{host}:{}/api/hit/{project_id}", self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavors_parse_by_name() {
        assert_eq!("linux".parse(), Ok(BeaconFlavor::Linux));
        assert_eq!("windows".parse(), Ok(BeaconFlavor::Windows));
        assert!("darwin".parse::<BeaconFlavor>().is_err());
        assert!("Linux".parse::<BeaconFlavor>().is_err());
    }

    #[test]
    fn index_matches_all() {
        for (i, flavor) in BeaconFlavor::ALL.into_iter().enumerate() {
            assert_eq!(flavor.index(), i);
        }
    }

    #[test]
    fn linux_paths() {
        let flavor = BeaconFlavor::Linux;
        assert_eq!(flavor.target(), "agent_linux");
        assert_eq!(flavor.artifact_path(), PathBuf::from("agents/agent_linux.zip"));
        assert_eq!(flavor.download_name(7), "agent_linux_7.zip");
    }

    #[test]
    fn callback_url_shape() {
        let endpoint = CallbackEndpoint::new("127.0.0.1", 3000);
        assert_eq!(endpoint.url_for(7), "http://127.0.0.1:3000/api/hit/7");
        assert_eq!(endpoint.url_for(7), endpoint.url_for(7));
    }

    #[test]
    fn callback_url_brackets_ipv6() {
        let endpoint = CallbackEndpoint::new("::1", 8080);
        assert_eq!(endpoint.url_for(1), "http://[::1]:8080/api/hit/1");

        let bracketed = CallbackEndpoint::new("[fe80::1]", 8080);
        assert_eq!(bracketed.url_for(1), "http://[fe80::1]:8080/api/hit/1");
    }
}
