//! Chargement de la configuration DomoCore.
//!
//! La configuration est un document YAML fusionné depuis trois sources,
//! par priorité croissante :
//!
//! 1. le document par défaut embarqué dans le binaire ;
//! 2. un fichier utilisateur (`$DOMOCORE_CONFIG`, puis
//!    `~/.config/domocore/domocore.yaml`, puis `./domocore.yaml`) ;
//! 3. les variables d'environnement `DOMOCORE_CONFIG__SECTION__CLE`.
//!
//! L'accès global passe par [`get_config`].

use std::{
    env, fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

/// Configuration par défaut intégrée.
const DEFAULT_CONFIG: &str = include_str!("domocore.yaml");

const ENV_CONFIG_FILE: &str = "DOMOCORE_CONFIG";
const ENV_PREFIX: &str = "DOMOCORE_CONFIG__";

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load("").expect("Failed to load DomoCore configuration"));
}

/// Accès global à la configuration.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

#[derive(Debug)]
pub struct Config {
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Charge la configuration depuis `filename`, ou depuis les
    /// emplacements par défaut si `filename` est vide.
    pub fn load(filename: &str) -> Result<Self> {
        let mut path = filename.to_string();
        let mut data: Option<Vec<u8>> = None;

        let mut merged: Value =
            serde_yaml::from_str(DEFAULT_CONFIG).context("Embedded default config is invalid")?;

        if !filename.is_empty() {
            info!(config_file = %path, "Trying to load config");
            data = fs::read(&path).ok();
            if data.is_none() {
                warn!(config_file = %path, "Cannot read config file");
                path.clear();
            }
        }

        if path.is_empty() {
            for candidate in Self::candidate_paths() {
                if let Ok(bytes) = fs::read(&candidate) {
                    path = candidate.to_string_lossy().into_owned();
                    data = Some(bytes);
                    break;
                }
            }
        }

        if let Some(bytes) = data {
            let user: Value =
                serde_yaml::from_slice(&bytes).with_context(|| format!("Invalid YAML in {path}"))?;
            merge_value(&mut merged, user);
            info!(config_file = %path, "✅ Configuration loaded");
        }

        apply_env_overrides(&mut merged);

        Ok(Self {
            path,
            data: Mutex::new(merged),
        })
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut out = Vec::new();
        if let Ok(p) = env::var(ENV_CONFIG_FILE) {
            out.push(PathBuf::from(p));
        }
        if let Some(home) = dirs::config_dir() {
            out.push(home.join("domocore").join("domocore.yaml"));
        }
        out.push(PathBuf::from("domocore.yaml"));
        out
    }

    /// Chemin du fichier effectivement chargé (vide si défaut seul).
    pub fn path(&self) -> &str {
        &self.path
    }

    fn get(&self, section: &str, key: &str) -> Option<Value> {
        let data = self.data.lock().unwrap();
        data.get(section)?.get(key).cloned()
    }

    fn get_str(&self, section: &str, key: &str) -> Option<String> {
        match self.get(section, key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        self.get(section, key)?.as_u64()
    }

    /// Nom produit pour les jetons SERVER / USER-AGENT.
    pub fn get_server_name(&self) -> String {
        self.get_str("server", "name")
            .unwrap_or_else(|| "DomoCore".to_string())
    }

    /// Adresse de bind du serveur HTTP.
    pub fn get_bind_address(&self) -> String {
        self.get_str("server", "bind_address")
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Port HTTP (0 = éphémère).
    pub fn get_http_port(&self) -> u16 {
        self.get_u64("server", "http_port").unwrap_or(0) as u16
    }

    /// Taille du pool de workers HTTP.
    pub fn get_worker_count(&self) -> usize {
        self.get_u64("server", "workers").unwrap_or(100).max(1) as usize
    }

    /// Fenêtre d'inactivité keep-alive, en secondes.
    pub fn get_keep_alive_secs(&self) -> u64 {
        self.get_u64("server", "keep_alive_secs").unwrap_or(30).max(1)
    }

    /// max-age des annonces SSDP, en secondes.
    pub fn get_max_age(&self) -> u32 {
        self.get_u64("ssdp", "max_age").unwrap_or(1800) as u32
    }

    /// MX par défaut des M-SEARCH émis.
    pub fn get_mx(&self) -> u32 {
        self.get_u64("ssdp", "mx").unwrap_or(3) as u32
    }

    /// Types de devices/services intéressants (filtrage découverte).
    pub fn get_interesting_types(&self) -> Vec<String> {
        match self.get("discovery", "interesting_types") {
            Some(Value::Sequence(seq)) => seq
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Fusion récursive : les mappings de `other` écrasent ceux de `base`
/// clé par clé, tout autre type remplace la valeur entière.
fn merge_value(base: &mut Value, other: Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (k, v) in other_map {
                match base_map.get_mut(&k) {
                    Some(slot) => merge_value(slot, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// Applique les surcharges `DOMOCORE_CONFIG__SECTION__CLE=valeur`.
fn apply_env_overrides(root: &mut Value) {
    for (name, raw) in env::vars() {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        if segments.iter().any(String::is_empty) {
            warn!(variable = %name, "Ignoring malformed config override");
            continue;
        }

        let value: Value =
            serde_yaml::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
        set_path(root, &segments, value);
        info!(variable = %name, "Config override applied");
    }
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    if segments.is_empty() {
        return;
    }
    if !matches!(root, Value::Mapping(_)) {
        *root = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = root else { unreachable!() };
    let key = Value::String(segments[0].clone());

    if segments.len() == 1 {
        map.insert(key, value);
        return;
    }

    let slot = map
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    set_path(slot, &segments[1..], value);
}
