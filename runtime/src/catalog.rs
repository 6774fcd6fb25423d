//! Character and avatar-model listings fetched from the server at startup.

use crate::config::ServerConfig;
use crate::error::RuntimeResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use url::Url;

pub const FALLBACK_CHARACTER: &str = "default";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CharacterEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl CharacterEntry {
    pub fn fallback() -> Self {
        Self {
            id: FALLBACK_CHARACTER.to_string(),
            name: FALLBACK_CHARACTER.to_string(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub live2d: Option<String>,
}

/// Character id → avatar model path. Unmapped ids resolve to the built-in default.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRegistry {
    paths: HashMap<String, String>,
    default_path: String,
}

impl ModelRegistry {
    pub fn new(default_path: impl Into<String>) -> Self {
        Self {
            paths: HashMap::new(),
            default_path: default_path.into(),
        }
    }

    /// Replaces the mapping. Entries without a model path are skipped.
    pub fn refresh(&mut self, entries: &[ModelEntry]) {
        self.paths = entries
            .iter()
            .filter_map(|entry| match &entry.live2d {
                Some(path) if !path.is_empty() => Some((entry.id.clone(), path.clone())),
                _ => None,
            })
            .collect();
    }

    pub fn resolve(&self, character_id: &str) -> &str {
        self.paths
            .get(character_id)
            .map(String::as_str)
            .unwrap_or(&self.default_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub struct CatalogClient {
    http: reqwest::Client,
    characters_url: Url,
    models_url: Url,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client, server: &ServerConfig) -> RuntimeResult<Self> {
        let base = Url::parse(&server.base_url)?;
        Ok(Self {
            http,
            characters_url: base.join(&server.characters_path)?,
            models_url: base.join(&server.models_path)?,
        })
    }

    /// Ordered character list, or a single `default` entry if the listing
    /// cannot be fetched or is empty.
    pub async fn characters(&self) -> Vec<CharacterEntry> {
        match self.fetch::<CharacterEntry>(&self.characters_url).await {
            Ok(list) if !list.is_empty() => {
                info!("Fetched {} characters", list.len());
                list
            }
            Ok(_) => {
                warn!("Character listing is empty, using fallback");
                vec![CharacterEntry::fallback()]
            }
            Err(e) => {
                warn!("Failed to fetch characters: {}", e);
                vec![CharacterEntry::fallback()]
            }
        }
    }

    pub async fn models(&self) -> RuntimeResult<Vec<ModelEntry>> {
        let list = self.fetch::<ModelEntry>(&self.models_url).await?;
        info!("Fetched {} model entries", list.len());
        Ok(list)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, url: &Url) -> RuntimeResult<Vec<T>> {
        let list = self
            .http
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<T>>()
            .await?;
        Ok(list)
    }
}
