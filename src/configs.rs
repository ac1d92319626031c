use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::key_material::{KeyAlgorithm, KeyPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub user: UserConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub crl: CrlConfig,
    #[serde(default)]
    pub responder: ResponderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub name: String,
    pub group: String,
    pub email: String,
    /// CA key passphrase; the user name when unset
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_locality")]
    pub locality: String,
}

impl UserConfig {
    pub fn ca_passphrase(&self) -> String {
        self.passphrase.clone().unwrap_or_else(|| self.name.clone())
    }

    /// `{name}-{group}`, the prefix of every generated file
    pub fn file_prefix(&self) -> String {
        format!("{}-{}", self.name, self.group)
    }
}

fn default_country() -> String {
    "RU".to_string()
}

fn default_state() -> String {
    "Moscow".to_string()
}

fn default_locality() -> String {
    "Moscow".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaskConfig {
    #[serde(default = "default_task_number")]
    pub number: u8,
    #[serde(default = "default_ca_key_bits")]
    pub ca_key_bits: u32,
    #[serde(default = "default_intermediate_key_bits")]
    pub intermediate_key_bits: u32,
    #[serde(default = "default_leaf_key_bits")]
    pub leaf_key_bits: u32,
    #[serde(default = "default_ca_validity")]
    pub ca_validity_days: u32,
    #[serde(default = "default_intermediate_validity")]
    pub intermediate_validity_days: u32,
    #[serde(default = "default_leaf_validity")]
    pub leaf_validity_days: u32,
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            number: default_task_number(),
            ca_key_bits: default_ca_key_bits(),
            intermediate_key_bits: default_intermediate_key_bits(),
            leaf_key_bits: default_leaf_key_bits(),
            ca_validity_days: default_ca_validity(),
            intermediate_validity_days: default_intermediate_validity(),
            leaf_validity_days: default_leaf_validity(),
            work_root: default_work_root(),
        }
    }
}

fn default_task_number() -> u8 {
    3
}

fn default_ca_key_bits() -> u32 {
    4096
}

fn default_intermediate_key_bits() -> u32 {
    4096
}

fn default_leaf_key_bits() -> u32 {
    2048
}

fn default_ca_validity() -> u32 {
    1095 // 3 years
}

fn default_intermediate_validity() -> u32 {
    365
}

fn default_leaf_validity() -> u32 {
    90
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("ledger.jsonl")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: KeyAlgorithm,
    #[serde(default = "default_min_rsa_bits")]
    pub min_rsa_bits: u32,
    #[serde(default = "default_min_ec_bits")]
    pub min_ec_bits: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            min_rsa_bits: default_min_rsa_bits(),
            min_ec_bits: default_min_ec_bits(),
        }
    }
}

impl PolicyConfig {
    pub fn key_policy(&self) -> KeyPolicy {
        KeyPolicy {
            min_rsa_bits: self.min_rsa_bits,
            min_ec_bits: self.min_ec_bits,
        }
    }
}

fn default_algorithm() -> KeyAlgorithm {
    KeyAlgorithm::Rsa
}

fn default_min_rsa_bits() -> u32 {
    2048
}

fn default_min_ec_bits() -> u32 {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrlConfig {
    #[serde(default = "default_crl_validity_hours")]
    pub validity_hours: u32,
    /// File name inside the work directory; `{name}-{group}.crl` when unset
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Distribution host; `crl.{name}.ru` when unset
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_crl_port")]
    pub port: u16,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            validity_hours: default_crl_validity_hours(),
            output: None,
            host: None,
            port: default_crl_port(),
        }
    }
}

fn default_crl_validity_hours() -> u32 {
    24
}

fn default_crl_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    #[serde(default = "default_responder_host")]
    pub host: String,
    #[serde(default = "default_responder_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_next_update_minutes")]
    pub next_update_minutes: u32,
    /// Name published in the AIA extension; `ocsp.{name}.ru` when unset
    #[serde(default)]
    pub ocsp_host: Option<String>,
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            host: default_responder_host(),
            port: default_responder_port(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            next_update_minutes: default_next_update_minutes(),
            ocsp_host: None,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

fn default_responder_host() -> String {
    "127.0.0.1".to_string()
}

fn default_responder_port() -> u16 {
    2560
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_next_update_minutes() -> u32 {
    60
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// `{name}-{group}-{task}` under the work root
    pub fn work_dir(&self) -> PathBuf {
        self.task.work_root.join(format!(
            "{}-{}",
            self.user.file_prefix(),
            self.task.number
        ))
    }

    pub fn crl_url(&self) -> String {
        let host = self
            .crl
            .host
            .clone()
            .unwrap_or_else(|| format!("crl.{}.ru", self.user.name));
        format!(
            "http://{}:{}/{}.crl",
            host,
            self.crl.port,
            self.user.file_prefix()
        )
    }

    pub fn crl_output(&self) -> PathBuf {
        let file = self
            .crl
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.crl", self.user.file_prefix())));
        self.work_dir().join(file)
    }

    pub fn ocsp_url(&self) -> String {
        let host = self
            .responder
            .ocsp_host
            .clone()
            .unwrap_or_else(|| format!("ocsp.{}.ru", self.user.name));
        format!("http://{}/", host)
    }
}
