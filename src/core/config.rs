//! Runtime configuration sourced from the environment and CLI flags.

use std::env;

pub const API_KEY_ENV: &str = "PLAUSCH_API_KEY";
pub const BASE_URL_ENV: &str = "PLAUSCH_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_MODEL: &str = "deepseek-chat";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl RuntimeConfig {
    /// Read the credential and base URL from the environment. A missing
    /// credential is not fatal here: it is reported per turn by the streaming
    /// client, before any request goes out.
    pub fn from_env(model: String, max_tokens: u32, temperature: f32) -> Self {
        let api_key = env::var(API_KEY_ENV).unwrap_or_default();
        let base_url = env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            api_key,
            base_url,
            model,
            max_tokens,
            temperature,
        }
    }
}
