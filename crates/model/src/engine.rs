//! Engine handle: owns segments, cache, and tokenizer for one model.

use std::time::Instant;

use attention::KvCacheStore;
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use segments::{SegmentError, SegmentKind, SegmentRegistry, SegmentRuntime, TensorMap};
use tokenizer::{HfTokenizer, PromptTemplate, TextTokenizer};

use crate::bindings::{decoder, position_ids, text_embedder, vision_encoder, vision_merger};
use crate::config::{ConfigError, EngineConfig, ModelConfig, DEFAULT_MAX_NEW_TOKENS};
use crate::errors::EngineError;
use crate::generation::{
    DecodeState, Generation, GenerationOutput, GenerationPhase, PrefillSummary,
};
use crate::position::{int_scalar, signed_scalar, PositionTracker};
use crate::request::GenerationRequest;
use crate::vision::{ImagePreprocessor, ResizePreprocessor};

/// A loaded model ready to serve generation calls.
///
/// Every call borrows the engine mutably, so calls never overlap and the
/// cache buffers are reused from one call to the next.
pub struct Engine {
    config: ModelConfig,
    registry: SegmentRegistry,
    tokenizer: Box<dyn TextTokenizer>,
    cache: KvCacheStore,
    preprocessor: Box<dyn ImagePreprocessor>,
    template: PromptTemplate,
    device: Device,
    max_new_tokens: usize,
}

impl Engine {
    pub fn load(
        config: ModelConfig,
        registry: SegmentRegistry,
        tokenizer: Box<dyn TextTokenizer>,
    ) -> Result<Self, EngineError> {
        Self::load_on(config, registry, tokenizer, &Device::Cpu)
    }

    /// Validates the configuration, allocates the cache on `device`, and
    /// loads every resident segment.
    pub fn load_on(
        config: ModelConfig,
        mut registry: SegmentRegistry,
        tokenizer: Box<dyn TextTokenizer>,
        device: &Device,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        if tokenizer.stop_tokens().is_empty() {
            return Err(ConfigError::validation(vec![
                "tokenizer declares no stop tokens".to_string(),
            ])
            .into());
        }

        let cache = KvCacheStore::new(config.cache_layout(), device)?;
        registry.preload()?;
        log::info!(
            "engine loaded: model={} max_seq={} image_embed={} cache_bytes={}",
            registry.config().model_id,
            config.max_seq_length,
            config.image_embed_size(),
            config.cache_layout().byte_size()
        );

        Ok(Self {
            preprocessor: Box::new(ResizePreprocessor::for_grid(&config.vision)),
            config,
            registry,
            tokenizer,
            cache,
            template: PromptTemplate::default(),
            device: device.clone(),
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        })
    }

    /// Builds the source, registry, and tokenizer described by `cfg`.
    pub fn from_config(
        cfg: &EngineConfig,
        runtime: Box<dyn SegmentRuntime>,
    ) -> Result<Self, EngineError> {
        Self::from_config_on(cfg, runtime, &Device::Cpu)
    }

    pub fn from_config_on(
        cfg: &EngineConfig,
        runtime: Box<dyn SegmentRuntime>,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let model = cfg.model_config()?;
        let source = cfg.segments.build_source()?;
        let registry = SegmentRegistry::new(cfg.segments.registry_config(), source, runtime);
        let tokenizer = HfTokenizer::from_config(&cfg.tokenizer)?;
        let engine = Self::load_on(model, registry, Box::new(tokenizer), device)?
            .with_prompt_template(cfg.prompt.clone())
            .with_max_new_tokens(cfg.runtime.max_new_tokens);
        Ok(engine)
    }

    pub fn with_preprocessor(mut self, preprocessor: Box<dyn ImagePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_prompt_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn registry(&self) -> &SegmentRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &KvCacheStore {
        &self.cache
    }

    pub fn tokenizer(&self) -> &dyn TextTokenizer {
        self.tokenizer.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Runs prefill and returns the decode stream.
    ///
    /// Prompts that cannot fit in the cache fail here with
    /// [`EngineError::Capacity`] before any segment runs.
    pub fn stream(&mut self, request: GenerationRequest) -> Result<Generation<'_>, EngineError> {
        let started = Instant::now();
        let GenerationRequest {
            prompt,
            image,
            max_tokens,
            stop_tokens,
            cancel,
        } = request;
        let stop_tokens = stop_tokens.unwrap_or_else(|| self.tokenizer.stop_tokens().clone());
        let max_tokens = max_tokens.unwrap_or(self.max_new_tokens);
        let mut phases = vec![GenerationPhase::Idle];

        let rendered = self.template.render(&prompt, image.is_some());
        let ids = self.tokenizer.encode(&rendered)?;
        self.check_prompt_fits(ids.len(), image.is_some())?;
        self.cache.reset()?;

        phases.push(GenerationPhase::PrefillText);
        log::debug!("prefill text: {} ids", ids.len());
        let mut input_ids = vec![0i64; self.config.max_seq_length];
        for (slot, id) in input_ids.iter_mut().zip(&ids) {
            *slot = i64::from(*id);
        }
        let text_ids_len = ids.len();
        let mut hidden_states = self.embed(&input_ids, text_ids_len)?;
        let mut positions = self.position_ids()?;

        let tracker = match &image {
            Some(image) => {
                phases.push(GenerationPhase::PrefillVision);
                log::debug!("prefill vision: {}x{} image", image.width(), image.height());
                let image_embed = self.encode_image(image)?;

                phases.push(GenerationPhase::Merge);
                let merged_len = text_ids_len + self.config.image_embed_size();
                let (merged, merged_positions) =
                    self.merge(hidden_states, image_embed, merged_len)?;
                hidden_states = merged;
                positions = merged_positions;
                PositionTracker::vision(merged_len, &self.config.vision)
            }
            None => PositionTracker::text(text_ids_len),
        };

        phases.push(GenerationPhase::DecodeLoop);
        let prefill = PrefillSummary {
            text_ids_len,
            ids_len: tracker.ids_len(),
            used_vision: image.is_some(),
            phases,
        };
        let state = DecodeState {
            hidden_states,
            position_ids: positions,
            tracker,
            input_ids,
            pending: None,
        };
        Ok(Generation::new(
            self,
            state,
            stop_tokens,
            max_tokens,
            cancel,
            prefill,
            started,
        ))
    }

    /// Drives [`Engine::stream`] to completion, handing `sink` the cumulative
    /// text after every token.
    pub fn generate<F>(
        &mut self,
        request: GenerationRequest,
        mut sink: F,
    ) -> Result<GenerationOutput, EngineError>
    where
        F: FnMut(&str),
    {
        let mut generation = self.stream(request)?;
        while let Some(chunk) = generation.next() {
            chunk?;
            sink(generation.text());
        }
        Ok(generation.into_output())
    }

    /// Frees every resident segment and drops the engine.
    pub fn release(mut self) {
        self.registry.release_all();
        log::info!("engine released");
    }

    fn check_prompt_fits(&self, text_len: usize, with_image: bool) -> Result<(), EngineError> {
        if text_len == 0 {
            return Err(ConfigError::validation(vec![
                "prompt tokenized to zero ids".to_string(),
            ])
            .into());
        }
        let capacity = self.config.max_seq_length;
        let required = if with_image {
            // The merger also needs room for its split factor.
            text_len + 2 * self.config.image_embed_size()
        } else {
            text_len
        };
        if required > capacity {
            return Err(EngineError::Capacity {
                occupied: 0,
                requested: required,
                capacity,
            });
        }
        Ok(())
    }

    pub(crate) fn embed(&mut self, input_ids: &[i64], ids_len: usize) -> Result<Tensor, EngineError> {
        let segment = self.registry.load(SegmentKind::TextEmbedder)?;
        let inputs = TensorMap::new()
            .with(
                text_embedder::INPUT_IDS,
                Tensor::from_vec(input_ids.to_vec(), input_ids.len(), &self.device)?,
            )
            .with(text_embedder::IDS_LEN, int_scalar(ids_len, &self.device)?);
        let mut outputs = segment.run(inputs)?;
        Ok(outputs.take(SegmentKind::TextEmbedder, text_embedder::HIDDEN_STATES)?)
    }

    fn position_ids(&mut self) -> Result<Tensor, EngineError> {
        let segment = self.registry.load(SegmentKind::PositionIds)?;
        let inputs = TensorMap::new().with(position_ids::DUMMY, Tensor::new(0i64, &self.device)?);
        let mut outputs = segment.run(inputs)?;
        Ok(outputs.take(SegmentKind::PositionIds, position_ids::POSITION_IDS)?)
    }

    fn encode_image(&mut self, image: &DynamicImage) -> Result<Tensor, EngineError> {
        let pixel_values = self.preprocessor.preprocess(image, &self.device)?;
        let encoder = self.registry.acquire(SegmentKind::VisionEncoder)?;
        let mut outputs =
            encoder.run(TensorMap::new().with(vision_encoder::PIXEL_VALUES, pixel_values))?;
        Ok(outputs.take(SegmentKind::VisionEncoder, vision_encoder::IMAGE_EMBED)?)
    }

    fn merge(
        &mut self,
        hidden_states: Tensor,
        image_embed: Tensor,
        merged_len: usize,
    ) -> Result<(Tensor, Tensor), EngineError> {
        let merged = merged_len as i64;
        let split_factor =
            self.config.max_seq_length as i64 - merged - self.config.image_embed_size() as i64;
        let ids_len_minus = merged - self.config.prompt_head_len as i64;
        log::debug!("merge: ids_len={merged} ids_len_minus={ids_len_minus} split_factor={split_factor}");

        let merger = self.registry.acquire(SegmentKind::VisionMerger)?;
        let inputs = TensorMap::new()
            .with(vision_merger::HIDDEN_STATES_IN, hidden_states)
            .with(vision_merger::IMAGE_EMBED, image_embed)
            .with(vision_merger::IDS_LEN, signed_scalar(merged, &self.device)?)
            .with(
                vision_merger::IDS_LEN_MINUS,
                signed_scalar(ids_len_minus, &self.device)?,
            )
            .with(
                vision_merger::SPLIT_FACTOR,
                signed_scalar(split_factor, &self.device)?,
            );
        let mut outputs = merger.run(inputs)?;
        let hidden_states = outputs.take(SegmentKind::VisionMerger, vision_merger::HIDDEN_STATES)?;
        let positions = outputs.take(SegmentKind::VisionMerger, vision_merger::POSITION_IDS)?;
        Ok((hidden_states, positions))
    }

    /// Fails with [`EngineError::Capacity`] when `ids_len` more positions
    /// would overflow the cache.
    pub(crate) fn ensure_room(&self, ids_len: usize) -> Result<(), EngineError> {
        Ok(self.cache.ensure_room(ids_len)?)
    }

    /// Runs one decoder call and commits the returned cache buffers.
    pub(crate) fn decode_step(&mut self, state: &DecodeState) -> Result<u32, EngineError> {
        let tracker = &state.tracker;
        self.cache.ensure_room(tracker.ids_len())?;

        let segment = self.registry.load(SegmentKind::Decoder)?;
        let device = &self.device;
        let inputs = TensorMap::new()
            .with(decoder::HIDDEN_STATES, state.hidden_states.clone())
            .with(decoder::ATTENTION_MASK, tracker.mask_tensor(device)?)
            .with(decoder::PAST_KEYS_IN, self.cache.keys().clone())
            .with(decoder::PAST_VALUES_IN, self.cache.values().clone())
            .with(decoder::HISTORY_LEN, tracker.history_len_tensor(device)?)
            .with(decoder::IDS_LEN, tracker.ids_len_tensor(device)?)
            .with(decoder::POSITION_IDS, state.position_ids.clone())
            .with(decoder::POS_FACTOR, tracker.pos_factor_tensor(device)?);
        let mut outputs = segment.run(inputs)?;

        let token = read_token(&mut outputs)?;
        let keys = outputs.take(SegmentKind::Decoder, decoder::PAST_KEYS)?;
        let values = outputs.take(SegmentKind::Decoder, decoder::PAST_VALUES)?;
        self.cache.commit(keys, values, tracker.ids_len())?;
        Ok(token)
    }

    pub(crate) fn decode_text(&self, ids: &[u32]) -> Result<String, EngineError> {
        Ok(self.tokenizer.decode(ids)?)
    }
}

fn read_token(outputs: &mut TensorMap) -> Result<u32, EngineError> {
    let ids = outputs.take(SegmentKind::Decoder, decoder::MAX_LOGIT_IDS)?;
    let values = ids.flatten_all()?.to_dtype(DType::I64)?.to_vec1::<i64>()?;
    match values.first().map(|id| u32::try_from(*id)) {
        Some(Ok(token)) => Ok(token),
        _ => Err(SegmentError::Run {
            kind: SegmentKind::Decoder,
            message: format!("decoder returned an invalid token id: {values:?}"),
        }
        .into()),
    }
}
