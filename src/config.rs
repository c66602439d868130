//! Carga y gestión de configuración de la aplicación (LLM + índice + ingesta).

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Generaciones mínimas en disco: la vigente y la anterior.
pub const MIN_KEEP_GENERATIONS: usize = 2;

/// Parámetros de troceado. Se validan al cargar la configuración.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    /// Temperatura del agente sin recuperación (`POST /api/agent`).
    pub agent_temperature: f64,

    pub data_dir: PathBuf,
    pub index_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub context_chunk_chars: usize,
    pub provider_timeout: Duration,
    pub keep_generations: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:3322".to_string(),
            llm_provider: LlmProvider::OpenAI,
            llm_embedding_model: "text-embedding-3-small".to_string(),
            llm_chat_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.0,
            agent_temperature: 0.3,
            data_dir: PathBuf::from("data/sample_logs"),
            index_dir: PathBuf::from("vectorstore"),
            chunking: ChunkingConfig::default(),
            top_k: 3,
            context_chunk_chars: 1500,
            provider_timeout: Duration::from_secs(30),
            keep_generations: 2,
        }
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server_addr = lookup("SERVER_ADDR").unwrap_or(defaults.server_addr);

        let llm_provider_str = lookup("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model =
            lookup("LLM_EMBEDDING_MODEL").unwrap_or(defaults.llm_embedding_model);
        let llm_chat_model = lookup("LLM_CHAT_MODEL").unwrap_or(defaults.llm_chat_model);
        let llm_temperature = parse_or(&lookup, "LLM_TEMPERATURE", defaults.llm_temperature)?;
        let agent_temperature =
            parse_or(&lookup, "LLM_AGENT_TEMPERATURE", defaults.agent_temperature)?;

        let data_dir = lookup("VM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let index_dir = lookup("VM_INDEX_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.index_dir);

        let chunking = ChunkingConfig {
            chunk_size: parse_or(&lookup, "VM_CHUNK_SIZE", defaults.chunking.chunk_size)?,
            chunk_overlap: parse_or(&lookup, "VM_CHUNK_OVERLAP", defaults.chunking.chunk_overlap)?,
        };
        let top_k = parse_or(&lookup, "VM_TOP_K", defaults.top_k)?;
        let context_chunk_chars =
            parse_or(&lookup, "VM_CONTEXT_CHUNK_CHARS", defaults.context_chunk_chars)?;
        let timeout_secs: u64 = parse_or(
            &lookup,
            "VM_PROVIDER_TIMEOUT_SECS",
            defaults.provider_timeout.as_secs(),
        )?;
        let keep_generations = parse_or(&lookup, "VM_KEEP_GENERATIONS", defaults.keep_generations)?;

        let cfg = Self {
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_temperature,
            agent_temperature,
            data_dir,
            index_dir,
            chunking,
            top_k,
            context_chunk_chars,
            provider_timeout: Duration::from_secs(timeout_secs),
            keep_generations,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Comprueba la coherencia de los parámetros numéricos.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("VM_CHUNK_SIZE debe ser mayor que cero");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "VM_CHUNK_OVERLAP ({}) debe ser menor que VM_CHUNK_SIZE ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }
        if self.top_k == 0 {
            bail!("VM_TOP_K debe ser al menos 1");
        }
        // La generación anterior se conserva para los lectores que aún resuelven
        // el `CURRENT` viejo.
        if self.keep_generations < MIN_KEEP_GENERATIONS {
            bail!("VM_KEEP_GENERATIONS debe ser al menos {MIN_KEEP_GENERATIONS}");
        }
        if self.provider_timeout.is_zero() {
            bail!("VM_PROVIDER_TIMEOUT_SECS debe ser mayor que cero");
        }
        if self.llm_embedding_model.trim().is_empty() {
            bail!("LLM_EMBEDDING_MODEL no puede estar vacío");
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.chunking, ChunkingConfig { chunk_size: 500, chunk_overlap: 50 });
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.index_dir, PathBuf::from("vectorstore"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("VM_CHUNK_SIZE", "800"),
            ("VM_CHUNK_OVERLAP", "100"),
            ("VM_TOP_K", "5"),
            ("LLM_PROVIDER", "Ollama"),
            ("VM_PROVIDER_TIMEOUT_SECS", "7"),
        ]))
        .unwrap();
        assert_eq!(cfg.chunking.chunk_size, 800);
        assert_eq!(cfg.chunking.chunk_overlap, 100);
        assert_eq!(cfg.top_k, 5);
        assert_eq!(cfg.llm_provider, LlmProvider::Ollama);
        assert_eq!(cfg.provider_timeout, Duration::from_secs(7));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("VM_CHUNK_SIZE", "100"),
            ("VM_CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("VM_CHUNK_OVERLAP"));
    }

    #[test]
    fn rejects_zero_top_k_and_garbage_numbers() {
        assert!(AppConfig::from_lookup(lookup_from(&[("VM_TOP_K", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("VM_TOP_K", "tres")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "watson")])).is_err());
    }

    #[test]
    fn keeps_at_least_the_previous_generation() {
        let err = AppConfig::from_lookup(lookup_from(&[("VM_KEEP_GENERATIONS", "1")])).unwrap_err();
        assert!(err.to_string().contains("VM_KEEP_GENERATIONS"));
        let cfg = AppConfig::from_lookup(lookup_from(&[("VM_KEEP_GENERATIONS", "3")])).unwrap();
        assert_eq!(cfg.keep_generations, 3);
    }

    #[test]
    fn agent_temperature_defaults_and_overrides() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.agent_temperature, 0.3);
        assert_eq!(cfg.llm_temperature, 0.0);
        let cfg = AppConfig::from_lookup(lookup_from(&[("LLM_AGENT_TEMPERATURE", "0.7")])).unwrap();
        assert_eq!(cfg.agent_temperature, 0.7);
    }
}
