use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use attention::CacheLayout;
use segments::{CachedSource, DirectorySource, RegistryConfig, SegmentSource};
use serde::{Deserialize, Serialize};
use tokenizer::PromptTemplate;

const DEFAULT_MAX_SEQ_LENGTH: usize = 1024;
pub const DEFAULT_MAX_NEW_TOKENS: usize = 200;
const DEFAULT_PROMPT_HEAD_LEN: usize = 5;
const DEFAULT_GRID_FACTOR: usize = 10;
const DEFAULT_INPUT_IMAGE_SIZE: [u32; 2] = [960, 960];
const DEFAULT_QUANTIZATION: &str = "q4f16";

/// Patch grid produced by the vision encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionGrid {
    #[serde(default = "default_grid_factor")]
    pub height_factor: usize,
    #[serde(default = "default_grid_factor")]
    pub width_factor: usize,
    /// `[height, width]` the image is resized to before encoding.
    #[serde(default = "default_input_image_size")]
    pub input_image_size: [u32; 2],
}

impl Default for VisionGrid {
    fn default() -> Self {
        Self {
            height_factor: DEFAULT_GRID_FACTOR,
            width_factor: DEFAULT_GRID_FACTOR,
            input_image_size: DEFAULT_INPUT_IMAGE_SIZE,
        }
    }
}

impl VisionGrid {
    /// Number of embedding positions one image occupies.
    pub fn image_embed_size(&self) -> usize {
        self.height_factor * self.width_factor
    }

    /// Offset added to the merged length to get the first decode position.
    pub fn position_offset(&self) -> i64 {
        1 - self.image_embed_size() as i64 + self.width_factor as i64
    }
}

/// Immutable description of the exported model, fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub num_layers: usize,
    pub num_kv_heads: usize,
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    pub max_seq_length: usize,
    /// Tokens of the chat template that precede the image markers.
    pub prompt_head_len: usize,
    pub vision: VisionGrid,
}

impl ModelConfig {
    pub fn new(
        num_layers: usize,
        num_kv_heads: usize,
        hidden_size: usize,
        num_attention_heads: usize,
    ) -> Self {
        Self {
            num_layers,
            num_kv_heads,
            hidden_size,
            num_attention_heads,
            max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            prompt_head_len: DEFAULT_PROMPT_HEAD_LEN,
            vision: VisionGrid::default(),
        }
    }

    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    pub fn with_vision(mut self, vision: VisionGrid) -> Self {
        self.vision = vision;
        self
    }

    pub fn head_dim(&self) -> usize {
        if self.num_attention_heads == 0 {
            return 0;
        }
        self.hidden_size / self.num_attention_heads
    }

    pub fn image_embed_size(&self) -> usize {
        self.vision.image_embed_size()
    }

    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(
            self.num_layers,
            self.num_kv_heads,
            self.max_seq_length,
            self.head_dim(),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("num_layers", self.num_layers),
            ("num_kv_heads", self.num_kv_heads),
            ("hidden_size", self.hidden_size),
            ("num_attention_heads", self.num_attention_heads),
            ("max_seq_length", self.max_seq_length),
            ("vision.height_factor", self.vision.height_factor),
            ("vision.width_factor", self.vision.width_factor),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if self.num_attention_heads > 0 && self.hidden_size % self.num_attention_heads != 0 {
            errors.push(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            ));
        }

        if self.num_kv_heads > 0 && self.num_attention_heads % self.num_kv_heads != 0 {
            errors.push(format!(
                "num_attention_heads ({}) must be divisible by num_kv_heads ({})",
                self.num_attention_heads, self.num_kv_heads
            ));
        }

        if self.vision.input_image_size.contains(&0) {
            errors.push("vision.input_image_size must be non-zero".to_string());
        }

        if self.image_embed_size() >= self.max_seq_length {
            errors.push(format!(
                "image embedding ({} positions) must fit inside max_seq_length ({})",
                self.image_embed_size(),
                self.max_seq_length
            ));
        }

        if self.prompt_head_len >= self.max_seq_length {
            errors.push("prompt_head_len must be smaller than max_seq_length".to_string());
        }

        if !errors.is_empty() {
            return Err(ConfigError::validation(errors));
        }

        Ok(())
    }
}

/// Architecture fields read from an upstream `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchitectureConfig {
    pub num_hidden_layers: Option<usize>,
    pub num_key_value_heads: Option<usize>,
    pub hidden_size: Option<usize>,
    pub num_attention_heads: Option<usize>,
}

impl ArchitectureConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSection {
    /// Upstream `config.json`; explicit fields below override it.
    pub config_json: Option<PathBuf>,
    pub num_hidden_layers: Option<usize>,
    pub num_key_value_heads: Option<usize>,
    pub hidden_size: Option<usize>,
    pub num_attention_heads: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_max_seq_length")]
    pub max_seq_length: usize,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_prompt_head_len")]
    pub prompt_head_len: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            prompt_head_len: DEFAULT_PROMPT_HEAD_LEN,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsSection {
    pub model_id: String,
    #[serde(default = "default_quantization")]
    pub quantization: String,
    #[serde(default = "default_file_template")]
    pub file_template: String,
    /// Local model root. Files are read from `<dir>/<model_id>/<file>`, or
    /// `<dir>/<file>` when `flat` is set.
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub flat: bool,
    /// Download from the model hub instead of `dir`.
    #[serde(default)]
    pub remote: bool,
    /// Persistent cache placed in front of the source.
    pub cache_dir: Option<PathBuf>,
}

impl SegmentsSection {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.model_id.clone())
            .with_quantization(self.quantization.clone())
            .with_file_template(self.file_template.clone())
    }

    pub fn build_source(&self) -> Result<Box<dyn SegmentSource>, crate::EngineError> {
        let base: Box<dyn SegmentSource> = match (&self.dir, self.remote) {
            (_, true) => remote_source()?,
            (Some(dir), false) if self.flat => Box::new(DirectorySource::flat(dir)),
            (Some(dir), false) => Box::new(DirectorySource::new(dir)),
            (None, false) => {
                return Err(ConfigError::validation(vec![
                    "segments.dir is required unless segments.remote is set".to_string(),
                ])
                .into())
            }
        };
        match &self.cache_dir {
            Some(cache_dir) => Ok(Box::new(CachedSource::new(base, cache_dir)?)),
            None => Ok(base),
        }
    }
}

#[cfg(feature = "http")]
fn remote_source() -> Result<Box<dyn SegmentSource>, crate::EngineError> {
    Ok(Box::new(segments::HttpSource::new()?))
}

#[cfg(not(feature = "http"))]
fn remote_source() -> Result<Box<dyn SegmentSource>, crate::EngineError> {
    Err(ConfigError::validation(vec![
        "segments.remote requires the `http` feature".to_string(),
    ])
    .into())
}

/// Complete engine configuration, loaded from TOML or JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub vision: VisionGrid,
    pub segments: SegmentsSection,
    pub tokenizer: tokenizer::Config,
    #[serde(default)]
    pub prompt: PromptTemplate,
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: EngineConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ConfigError::Format(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.segments.model_id.trim().is_empty() {
            errors.push("segments.model_id must not be empty".to_string());
        }
        if !self.segments.file_template.contains("{tag}") {
            errors.push("segments.file_template must contain `{tag}`".to_string());
        }
        if !self.segments.remote && self.segments.dir.is_none() {
            errors.push("segments.dir is required unless segments.remote is set".to_string());
        }
        if self.runtime.max_new_tokens == 0 {
            errors.push("runtime.max_new_tokens must be greater than 0".to_string());
        }
        if self.tokenizer.stop_tokens.is_empty() && self.tokenizer.artifacts.generation_config.is_none()
        {
            errors.push(
                "tokenizer needs `stop_tokens` or a `generation_config` to resolve stop ids"
                    .to_string(),
            );
        }

        if !errors.is_empty() {
            return Err(ConfigError::validation(errors));
        }

        Ok(())
    }

    /// Merges `config.json` with explicit overrides and the runtime sections.
    pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
        let base = match &self.model.config_json {
            Some(path) => ArchitectureConfig::from_file(path)?,
            None => ArchitectureConfig::default(),
        };

        let mut missing = Vec::new();
        let mut pick = |name: &str, over: Option<usize>, base: Option<usize>| {
            over.or(base).unwrap_or_else(|| {
                missing.push(format!("model.{name} is not set and not in config.json"));
                0
            })
        };
        let num_layers = pick(
            "num_hidden_layers",
            self.model.num_hidden_layers,
            base.num_hidden_layers,
        );
        let num_kv_heads = pick(
            "num_key_value_heads",
            self.model.num_key_value_heads,
            base.num_key_value_heads,
        );
        let hidden_size = pick("hidden_size", self.model.hidden_size, base.hidden_size);
        let num_attention_heads = pick(
            "num_attention_heads",
            self.model.num_attention_heads,
            base.num_attention_heads,
        );
        if !missing.is_empty() {
            return Err(ConfigError::validation(missing));
        }

        let config = ModelConfig {
            num_layers,
            num_kv_heads,
            hidden_size,
            num_attention_heads,
            max_seq_length: self.runtime.max_seq_length,
            prompt_head_len: self.runtime.prompt_head_len,
            vision: self.vision.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    fn apply_base_path(&mut self, base: &Path) {
        for path in [
            self.model.config_json.as_mut(),
            self.segments.dir.as_mut(),
            self.segments.cache_dir.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            absolutize_in_place(path, base);
        }
        absolutize_in_place(&mut self.tokenizer.artifacts.dir, base);
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Format(String),
    Validation(Vec<String>),
}

impl ConfigError {
    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {err}"),
            ConfigError::Format(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Format(_) | ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Format(value.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        ConfigError::Format(value.to_string())
    }
}

fn default_grid_factor() -> usize {
    DEFAULT_GRID_FACTOR
}

fn default_input_image_size() -> [u32; 2] {
    DEFAULT_INPUT_IMAGE_SIZE
}

fn default_max_seq_length() -> usize {
    DEFAULT_MAX_SEQ_LENGTH
}

fn default_max_new_tokens() -> usize {
    DEFAULT_MAX_NEW_TOKENS
}

fn default_prompt_head_len() -> usize {
    DEFAULT_PROMPT_HEAD_LEN
}

fn default_quantization() -> String {
    DEFAULT_QUANTIZATION.to_string()
}

fn default_file_template() -> String {
    RegistryConfig::DEFAULT_TEMPLATE.to_string()
}
