use std::collections::HashMap;

use gateway_core::model::{LLMModel, LocalModel, RemoteChatModel};
use serde::Deserialize;

/// On-disk configuration, loaded once at startup from a TOML file: one
/// `[server]`/`[store]`/`[vector]` section plus a repeated `[[models]]`
/// table.
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

fn default_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: default_addr() }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    /// `"redis"` or `"memory"`.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub sqlite_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VectorConfig {
    /// `"qdrant"` or `"memory"`.
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub qdrant_url: Option<String>,
    #[serde(default)]
    pub embeddings_api_url: Option<String>,
    #[serde(default)]
    pub embeddings_api_key_env: Option<String>,
    #[serde(default)]
    pub embeddings_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelConfig {
    Remote {
        name: String,
        api_url: String,
        api_key_env: String,
        #[serde(default = "default_max_total_tokens")]
        max_total_tokens: i32,
        #[serde(default = "default_max_tokens_per_request")]
        max_tokens_per_request: i32,
        #[serde(default = "default_token_margin")]
        token_margin: i32,
    },
    Local {
        name: String,
        model_path: String,
        #[serde(default = "default_max_total_tokens")]
        max_total_tokens: i32,
        #[serde(default = "default_max_tokens_per_request")]
        max_tokens_per_request: i32,
        #[serde(default = "default_token_margin")]
        token_margin: i32,
        #[serde(default)]
        description: String,
        #[serde(default = "default_user_prefix")]
        user_prefix: String,
        #[serde(default = "default_gpt_prefix")]
        gpt_prefix: String,
        #[serde(default)]
        stop: Vec<String>,
        #[serde(default = "default_max_workers")]
        max_workers: usize,
        #[serde(default)]
        tokenizer_path: Option<String>,
    },
}

fn default_max_total_tokens() -> i32 {
    4096
}
fn default_max_tokens_per_request() -> i32 {
    1024
}
fn default_token_margin() -> i32 {
    256
}
fn default_user_prefix() -> String {
    "### User".to_string()
}
fn default_gpt_prefix() -> String {
    "### Assistant".to_string()
}
fn default_max_workers() -> usize {
    1
}

impl ModelConfig {
    pub fn name(&self) -> &str {
        match self {
            ModelConfig::Remote { name, .. } => name,
            ModelConfig::Local { name, .. } => name,
        }
    }

    pub fn max_workers(&self) -> usize {
        match self {
            ModelConfig::Remote { .. } => 0,
            ModelConfig::Local { max_workers, .. } => *max_workers,
        }
    }

    pub fn tokenizer_path(&self) -> Option<&str> {
        match self {
            ModelConfig::Remote { .. } => None,
            ModelConfig::Local { tokenizer_path, .. } => tokenizer_path.as_deref(),
        }
    }

    pub fn to_llm_model(&self) -> LLMModel {
        match self {
            ModelConfig::Remote {
                name,
                api_url,
                api_key_env,
                max_total_tokens,
                max_tokens_per_request,
                token_margin,
            } => LLMModel::Remote(RemoteChatModel {
                name: name.clone(),
                api_url: api_url.clone(),
                api_key_env: api_key_env.clone(),
                max_total_tokens: *max_total_tokens,
                max_tokens_per_request: *max_tokens_per_request,
                token_margin: *token_margin,
            }),
            ModelConfig::Local {
                name,
                model_path,
                max_total_tokens,
                max_tokens_per_request,
                token_margin,
                description,
                user_prefix,
                gpt_prefix,
                stop,
                ..
            } => LLMModel::Local(LocalModel {
                name: name.clone(),
                model_path: model_path.clone(),
                max_total_tokens: *max_total_tokens,
                max_tokens_per_request: *max_tokens_per_request,
                token_margin: *token_margin,
                description: description.clone(),
                user_prefix: user_prefix.clone(),
                gpt_prefix: gpt_prefix.clone(),
                stop: stop.clone(),
            }),
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn models_by_name(&self) -> HashMap<String, ModelConfig> {
        self.models.iter().map(|m| (m.name().to_string(), m.clone())).collect()
    }
}
