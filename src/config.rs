use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "yatube", about = "A small blogging platform")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the web server (default)
    Serve,

    /// Create a user account
    CreateUser {
        username: String,

        #[arg(long)]
        password: String,

        #[arg(long)]
        display_name: Option<String>,

        /// Grant administrative rights
        #[arg(long)]
        admin: bool,
    },

    /// Create a group that posts can be filed under
    CreateGroup {
        title: String,

        slug: String,

        #[arg(long, default_value = "")]
        description: String,
    },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// Where uploaded post images live.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    /// bcrypt work factor for new password hashes
    pub password_cost: u32,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub index_ttl_secs: u64,
    /// Upper bound on rendered pages held at once
    pub max_pages: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "yatube_session".to_string(),
            session_hours: 720,
            password_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_ttl_secs: 20,
            max_pages: 1000,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli)?;
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("yatube.db"));
        }
        if config.storage.path.is_none() {
            config.storage.path = Some(data_dir.join("media"));
        }

        Ok(config)
    }

    /// Build a config rooted entirely inside `data_dir`, ignoring any file.
    pub fn in_dir(data_dir: &std::path::Path) -> Self {
        let mut config = Config::default();
        config.database.path = Some(data_dir.join("yatube.db"));
        config.storage.path = Some(data_dir.join("media"));
        config
    }

    pub fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
        match cli.data_dir.clone() {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".yatube"))
                .ok_or_else(|| anyhow::anyhow!("Could not determine home directory")),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("yatube.db"))
    }

    pub fn media_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("media"))
    }
}
