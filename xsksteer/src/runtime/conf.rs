use std::{
    error::Error,
    fmt,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::Level;
use xsksteer_common::{DEFAULT_CAPACITY, MAX_CAPACITY, SOCKET_MAP_NAME};

use crate::runtime::{cli::Cli, conf::conf_serde::level};

/// XDP attach mode requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AttachMode {
    /// Let the kernel pick native mode when the driver supports it.
    #[default]
    Default,
    /// Generic XDP on the skb path; works on every driver.
    Skb,
    /// Native XDP inside the driver.
    Driver,
    /// Offloaded to the NIC.
    Hardware,
}

impl AttachMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachMode::Default => "default",
            AttachMode::Skb => "skb",
            AttachMode::Driver => "driver",
            AttachMode::Hardware => "hardware",
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProgramConf {
    /// Compiled eBPF object containing the `xsksteer` XDP program.
    pub object_path: PathBuf,
    /// Pin the XDP link so the program stays attached after the loader exits.
    pub pin_link: bool,
    /// Where the link is pinned. Defaults to `<socket_map.pin_path>/link_<interface>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_pin_path: Option<PathBuf>,
}

impl Default for ProgramConf {
    fn default() -> Self {
        Self {
            object_path: PathBuf::from(env!("XSKSTEER_EBPF_OBJECT")),
            pin_link: false,
            link_pin_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TraceConf {
    /// Emit one trace record per frame decision from the kernel.
    pub enabled: bool,
}

impl Default for TraceConf {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SocketMapConf {
    /// Number of receive queues that can be registered.
    pub capacity: u32,
    /// bpffs directory the socket map is pinned in.
    pub pin_path: PathBuf,
    /// Keep the pinned map, and its registrations, when the loader exits.
    pub persist: bool,
}

impl Default for SocketMapConf {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            pin_path: PathBuf::from("/sys/fs/bpf/xsksteer"),
            persist: true,
        }
    }
}

impl SocketMapConf {
    /// Full path of the pinned socket map.
    pub fn map_path(&self) -> PathBuf {
        self.pin_path.join(SOCKET_MAP_NAME)
    }
}

/// Loader configuration.
///
/// Layered with the priority Defaults < Configuration File < Environment
/// Variables < CLI Arguments.
#[derive(Debug, Deserialize, Serialize)]
pub struct Conf {
    /// Network interface the program is attached to.
    pub interface: String,

    /// Path of the file this configuration was read from, if any.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(with = "level")]
    pub log_level: Level,

    #[serde(default)]
    pub attach_mode: AttachMode,

    #[serde(default)]
    pub program: ProgramConf,

    #[serde(default)]
    pub trace: TraceConf,

    #[serde(default)]
    pub socket_map: SocketMapConf,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            config_path: None,
            log_level: Level::INFO,
            attach_mode: AttachMode::default(),
            program: ProgramConf::default(),
            trace: TraceConf::default(),
            socket_map: SocketMapConf::default(),
        }
    }
}

impl Conf {
    /// Builds the configuration from defaults, the optional YAML file named by
    /// `cli.config`, `XSKSTEER_`-prefixed environment variables (nested keys
    /// separated by `__`, e.g. `XSKSTEER_SOCKET_MAP__CAPACITY`) and finally the
    /// CLI flags.
    ///
    /// # Errors
    /// * `ConfError::NoConfigFile` - the configured file does not exist.
    /// * `ConfError::InvalidConfigPath` - the path is not a regular file.
    /// * `ConfError::InvalidExtension` - the file is not `yaml`/`yml`.
    /// * `ConfError::Extraction` - a layer could not be parsed.
    /// * `ConfError::InvalidCapacity` / `ConfError::EmptyInterface` - validation failed.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment
            .merge(Env::prefixed("XSKSTEER_").split("__").ignore(&["config_path"]))
            .merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;
        conf.validate()?;

        conf.config_path = config_path_to_store;
        Ok((conf, cli))
    }

    fn validate(&self) -> Result<(), ConfError> {
        if self.interface.trim().is_empty() {
            return Err(ConfError::EmptyInterface);
        }
        if !(1..=MAX_CAPACITY).contains(&self.socket_map.capacity) {
            return Err(ConfError::InvalidCapacity(self.socket_map.capacity));
        }
        Ok(())
    }

    /// Where the XDP link for the configured interface is pinned.
    pub fn link_pin_path(&self) -> PathBuf {
        self.program.link_pin_path.clone().unwrap_or_else(|| {
            self.socket_map
                .pin_path
                .join(format!("link_{}", self.interface))
        })
    }
}

/// Validates that the given path points to an existing file with a supported extension.
fn validate_config_path(path: &Path) -> Result<(), ConfError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            return Err(ConfError::NoConfigFile);
        }
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfError::InvalidExtension(ext.to_string())),
        None => Err(ConfError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug)]
pub enum ConfError {
    /// The specified configuration file does not exist.
    NoConfigFile,
    /// The path exists but is not a file.
    InvalidConfigPath(String),
    /// The file has an unsupported extension.
    InvalidExtension(String),
    /// The socket map capacity is outside `1..=MAX_CAPACITY`.
    InvalidCapacity(u32),
    /// No interface was configured.
    EmptyInterface,
    /// Failed to extract configuration data.
    Extraction(Box<figment::Error>),
}

impl fmt::Display for ConfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfError::NoConfigFile => write!(f, "no config file provided"),
            ConfError::InvalidConfigPath(p) => write!(f, "path '{p}' is not a valid file"),
            ConfError::InvalidExtension(ext) => {
                write!(
                    f,
                    "invalid file extension '.{ext}', expected 'yaml' or 'yml'"
                )
            }
            ConfError::InvalidCapacity(c) => write!(
                f,
                "socket_map.capacity {c} is out of range, expected 1..={MAX_CAPACITY}"
            ),
            ConfError::EmptyInterface => write!(f, "interface must not be empty"),
            ConfError::Extraction(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl Error for ConfError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfError::Extraction(e) => Some(e),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfError {
    fn from(e: figment::Error) -> Self {
        ConfError::Extraction(Box::from(e))
    }
}

pub mod conf_serde {
    pub mod level {
        use serde::{self, Deserialize, Deserializer, Serializer};
        use tracing::Level;

        pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(level.as_str())
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s = String::deserialize(deserializer)?;
            s.parse::<Level>().map_err(serde::de::Error::custom)
        }

        pub fn serialize_option<S>(level: &Option<Level>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match level {
                Some(l) => serializer.serialize_str(l.as_str()),
                None => serializer.serialize_none(),
            }
        }
    }
}
