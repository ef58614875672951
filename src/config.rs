use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_FLAT_INDEX_PATH: &str = "./data/vector_index";
const DEFAULT_QDRANT_COLLECTION: &str = "policy_chunks";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
const DEFAULT_EXTERNAL_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SENTENCE_CHECK_CONCURRENCY: usize = 4;
const MAX_SENTENCE_CHECK_CONCURRENCY: usize = 8;
const DEFAULT_MIN_CHUNK_TOKENS: usize = 16;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the policy QA pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend used to persist chunk vectors.
    pub vector_db: VectorBackend,
    /// Location of the flat index vector file; metadata lives in a sidecar next to it.
    pub flat_index_path: PathBuf,
    /// Base URL of the Qdrant instance, required for the Qdrant backend.
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection holding chunk vectors.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingBackend,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// API key for the OpenAI embeddings endpoint.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Minimum similarity a summary must reach to be considered grounded.
    pub similarity_threshold: f32,
    /// Budget applied to every embedding and index call made during validation.
    pub external_call_timeout: Duration,
    /// Upper bound on concurrent sentence-level evidence lookups.
    pub sentence_check_concurrency: usize,
    /// Optional override for the automatic chunk size selection.
    pub text_splitter_chunk_size: Option<usize>,
    /// Token overlap carried between adjacent chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Chunks below this token count are dropped.
    pub min_chunk_tokens: usize,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Single-process flat index with a JSON metadata sidecar.
    Flat,
    /// Qdrant collection with native payload filtering.
    Qdrant,
}

/// Supported embedding backends for the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic offline hashing embedder.
    Hashing,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vector_db = match load_env_optional("VECTOR_DB") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("VECTOR_DB".to_string()))?,
            None => VectorBackend::Flat,
        };
        let qdrant_url = load_env_optional("QDRANT_URL");
        if vector_db == VectorBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".to_string()));
        }

        let embedding_provider = match load_env_optional("EMBEDDING_PROVIDER") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            None => EmbeddingBackend::OpenAI,
        };
        let embedding_model = load_env_optional("EMBEDDING_MODEL")
            .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());
        let embedding_dimension = match parse_optional::<usize>("EMBEDDING_DIMENSION")? {
            Some(0) => return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into())),
            Some(dimension) => dimension,
            None => default_embedding_dimension(&embedding_model),
        };

        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if embedding_provider == EmbeddingBackend::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }

        let similarity_threshold = parse_optional::<f32>("SIMILARITY_THRESHOLD")?
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(ConfigError::InvalidValue("SIMILARITY_THRESHOLD".to_string()));
        }

        let timeout_ms = parse_optional::<u64>("EXTERNAL_CALL_TIMEOUT_MS")?
            .unwrap_or(DEFAULT_EXTERNAL_CALL_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "EXTERNAL_CALL_TIMEOUT_MS".to_string(),
            ));
        }

        Ok(Self {
            vector_db,
            flat_index_path: load_env_optional("FLAT_INDEX_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FLAT_INDEX_PATH)),
            qdrant_url,
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_QDRANT_COLLECTION.to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model,
            embedding_dimension,
            openai_api_key,
            openai_base_url: load_env_optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            similarity_threshold,
            external_call_timeout: Duration::from_millis(timeout_ms),
            sentence_check_concurrency: parse_optional::<usize>("SENTENCE_CHECK_CONCURRENCY")?
                .unwrap_or(DEFAULT_SENTENCE_CHECK_CONCURRENCY)
                .clamp(1, MAX_SENTENCE_CHECK_CONCURRENCY),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?,
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(0),
            min_chunk_tokens: parse_optional("MIN_CHUNK_TOKENS")?
                .unwrap_or(DEFAULT_MIN_CHUNK_TOKENS),
        })
    }
}

/// Vector width produced by well-known OpenAI embedding models.
pub fn default_embedding_dimension(model: &str) -> usize {
    if model.contains("3-large") { 3072 } else { 1536 }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "flat" | "faiss" => Ok(Self::Flat),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        vector_db = ?config.vector_db,
        embedding_provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        threshold = config.similarity_threshold,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
