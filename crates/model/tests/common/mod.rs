#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};
use codec::HalfScalar;
use model::bindings::{decoder, position_ids, text_embedder, vision_encoder, vision_merger};
use model::{Engine, ModelConfig, VisionGrid};
use segments::{
    RegistryConfig, Segment, SegmentError, SegmentKind, SegmentRegistry, SegmentRuntime,
    SegmentSource, TensorMap,
};
use tokenizer::{PromptTemplate, StopTokens, TextTokenizer};

pub const MODEL_ID: &str = "test/vlm";
pub const STOP_A: u32 = 900_001;
pub const STOP_B: u32 = 900_002;
const HIDDEN: usize = 8;

/// One character per token; ids are code points. Control characters have no
/// token.
pub struct CharTokenizer {
    stop: StopTokens,
}

impl CharTokenizer {
    pub fn new() -> Self {
        Self {
            stop: StopTokens::new([STOP_A, STOP_B]),
        }
    }
}

impl TextTokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> tokenizer::Result<Vec<u32>> {
        Ok(ids(text))
    }

    fn decode(&self, ids: &[u32]) -> tokenizer::Result<String> {
        Ok(ids
            .iter()
            .filter(|id| !self.stop.contains(**id))
            .filter_map(|id| char::from_u32(*id))
            .collect())
    }

    fn stop_tokens(&self) -> &StopTokens {
        &self.stop
    }
}

pub fn ids(text: &str) -> Vec<u32> {
    text.chars()
        .filter(|c| !c.is_control())
        .map(u32::from)
        .collect()
}

#[derive(Clone, Default)]
pub struct CountingSource {
    calls: Arc<Mutex<HashMap<String, usize>>>,
    fail_on: Option<SegmentKind>,
}

impl CountingSource {
    /// Source whose fetch of `kind` fails like a dropped connection.
    pub fn failing_on(kind: SegmentKind) -> Self {
        Self {
            fail_on: Some(kind),
            ..Self::default()
        }
    }

    pub fn count(&self, kind: SegmentKind) -> usize {
        let file = RegistryConfig::new(MODEL_ID).file_name(kind);
        self.calls.lock().unwrap().get(&file).copied().unwrap_or(0)
    }
}

impl SegmentSource for CountingSource {
    fn fetch(&self, model_id: &str, file: &str) -> Result<Vec<u8>, SegmentError> {
        *self.calls.lock().unwrap().entry(file.to_string()).or_default() += 1;
        let failing = self
            .fail_on
            .map(|kind| RegistryConfig::new(MODEL_ID).file_name(kind));
        if failing.as_deref() == Some(file) {
            return Err(SegmentError::Fetch {
                model_id: model_id.to_string(),
                file: file.to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(file.as_bytes().to_vec())
    }
}

/// What a stub segment saw when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Embed {
        ids_len: i64,
        first_id: i64,
    },
    Positions,
    Encode {
        dims: Vec<usize>,
    },
    Merge {
        ids_len: i64,
        ids_len_minus: i64,
        split_factor: i64,
    },
    Decode {
        history_len: i64,
        ids_len: i64,
        pos_factor: i64,
        mask_bits: u16,
    },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn decode_calls(log: &CallLog) -> Vec<Call> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|call| matches!(call, Call::Decode { .. }))
        .cloned()
        .collect()
}

pub fn embed_calls(log: &CallLog) -> Vec<Call> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|call| matches!(call, Call::Embed { .. }))
        .cloned()
        .collect()
}

fn scalar(inputs: &TensorMap, name: &str) -> Result<i64, SegmentError> {
    let values = inputs.input(name)?.flatten_all()?.to_vec1::<i64>()?;
    Ok(values.first().copied().unwrap_or_default())
}

struct Embedder {
    log: CallLog,
}

impl Segment for Embedder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        let ids_len = scalar(&inputs, text_embedder::IDS_LEN)?;
        let first_id = scalar(&inputs, text_embedder::INPUT_IDS)?;
        self.log.lock().unwrap().push(Call::Embed { ids_len, first_id });
        let hidden = Tensor::zeros((1, ids_len as usize, HIDDEN), DType::F32, &Device::Cpu)?;
        Ok(TensorMap::new().with(text_embedder::HIDDEN_STATES, hidden))
    }
}

struct Positions {
    log: CallLog,
}

impl Segment for Positions {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        inputs.input(position_ids::DUMMY)?;
        self.log.lock().unwrap().push(Call::Positions);
        let ids = Tensor::zeros((3, 1, 4), DType::I64, &Device::Cpu)?;
        Ok(TensorMap::new().with(position_ids::POSITION_IDS, ids))
    }
}

struct Encoder {
    log: CallLog,
    embed: usize,
}

impl Segment for Encoder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        let dims = inputs.input(vision_encoder::PIXEL_VALUES)?.dims().to_vec();
        self.log.lock().unwrap().push(Call::Encode { dims });
        let embed = Tensor::zeros((1, self.embed, HIDDEN), DType::F32, &Device::Cpu)?;
        Ok(TensorMap::new().with(vision_encoder::IMAGE_EMBED, embed))
    }
}

struct Merger {
    log: CallLog,
    fail: bool,
}

impl Segment for Merger {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        let ids_len = scalar(&inputs, vision_merger::IDS_LEN)?;
        self.log.lock().unwrap().push(Call::Merge {
            ids_len,
            ids_len_minus: scalar(&inputs, vision_merger::IDS_LEN_MINUS)?,
            split_factor: scalar(&inputs, vision_merger::SPLIT_FACTOR)?,
        });
        if self.fail {
            return Err(SegmentError::Run {
                kind: SegmentKind::VisionMerger,
                message: "merge exploded".to_string(),
            });
        }
        inputs.input(vision_merger::HIDDEN_STATES_IN)?;
        inputs.input(vision_merger::IMAGE_EMBED)?;
        let hidden = Tensor::zeros((1, ids_len as usize, HIDDEN), DType::F32, &Device::Cpu)?;
        let positions = Tensor::zeros((3, 1, 4), DType::I64, &Device::Cpu)?;
        Ok(TensorMap::new()
            .with(vision_merger::HIDDEN_STATES, hidden)
            .with(vision_merger::POSITION_IDS, positions))
    }
}

struct Decoder {
    log: CallLog,
    script: Vec<u32>,
    step: AtomicUsize,
    fail_at: Option<usize>,
}

impl Segment for Decoder {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        let step = self.step.fetch_add(1, Ordering::SeqCst);
        let pos_factor = HalfScalar::from_tensor(inputs.input(decoder::POS_FACTOR)?)?;
        let mask = HalfScalar::from_tensor(inputs.input(decoder::ATTENTION_MASK)?)?;
        self.log.lock().unwrap().push(Call::Decode {
            history_len: scalar(&inputs, decoder::HISTORY_LEN)?,
            ids_len: scalar(&inputs, decoder::IDS_LEN)?,
            pos_factor: pos_factor.to_int(),
            mask_bits: mask.bits(),
        });
        inputs.input(decoder::HIDDEN_STATES)?;
        inputs.input(decoder::POSITION_IDS)?;
        if self.fail_at == Some(step) {
            return Err(SegmentError::Run {
                kind: SegmentKind::Decoder,
                message: "decoder exploded".to_string(),
            });
        }

        let token = self.script[step % self.script.len()];
        let keys = inputs.input(decoder::PAST_KEYS_IN)?.clone();
        let values = inputs.input(decoder::PAST_VALUES_IN)?.clone();
        let ids = Tensor::new(&[i64::from(token)], &Device::Cpu)?;
        Ok(TensorMap::new()
            .with(decoder::MAX_LOGIT_IDS, ids)
            .with(decoder::PAST_KEYS, keys)
            .with(decoder::PAST_VALUES, values))
    }
}

/// Runtime whose decoder replays `script`, cycling when it runs out.
#[derive(Clone)]
pub struct ScriptedRuntime {
    pub log: CallLog,
    script: Vec<u32>,
    embed: usize,
    fail_merge: bool,
    fail_decode_at: Option<usize>,
}

impl ScriptedRuntime {
    pub fn new(script: Vec<u32>, embed: usize) -> Self {
        Self {
            log: CallLog::default(),
            script,
            embed,
            fail_merge: false,
            fail_decode_at: None,
        }
    }

    pub fn failing_merge(mut self) -> Self {
        self.fail_merge = true;
        self
    }

    pub fn failing_decode_at(mut self, step: usize) -> Self {
        self.fail_decode_at = Some(step);
        self
    }
}

impl SegmentRuntime for ScriptedRuntime {
    fn instantiate(
        &self,
        kind: SegmentKind,
        _bytes: Vec<u8>,
    ) -> Result<Box<dyn Segment>, SegmentError> {
        let log = Arc::clone(&self.log);
        Ok(match kind {
            SegmentKind::TextEmbedder => Box::new(Embedder { log }),
            SegmentKind::PositionIds => Box::new(Positions { log }),
            SegmentKind::VisionEncoder => Box::new(Encoder {
                log,
                embed: self.embed,
            }),
            SegmentKind::VisionMerger => Box::new(Merger {
                log,
                fail: self.fail_merge,
            }),
            SegmentKind::Decoder => Box::new(Decoder {
                log,
                script: self.script.clone(),
                step: AtomicUsize::new(0),
                fail_at: self.fail_decode_at,
            }),
        })
    }
}

/// Two layers, one kv head, head_dim 4, a 10x10 image grid and 256 positions.
pub fn tiny_config() -> ModelConfig {
    ModelConfig::new(2, 1, 8, 2)
        .with_max_seq_length(256)
        .with_vision(VisionGrid {
            height_factor: 10,
            width_factor: 10,
            input_image_size: [28, 28],
        })
}

/// 24 positions with a 2x2 grid, for exercising capacity limits.
pub fn cramped_config() -> ModelConfig {
    ModelConfig::new(2, 1, 8, 2)
        .with_max_seq_length(24)
        .with_vision(VisionGrid {
            height_factor: 2,
            width_factor: 2,
            input_image_size: [14, 14],
        })
}

pub struct Harness {
    pub engine: Engine,
    pub log: CallLog,
    pub source: CountingSource,
}

pub fn harness(config: ModelConfig, runtime: ScriptedRuntime) -> Harness {
    let source = CountingSource::default();
    let log = Arc::clone(&runtime.log);
    let registry = SegmentRegistry::new(
        RegistryConfig::new(MODEL_ID),
        Box::new(source.clone()),
        Box::new(runtime),
    );
    let engine = Engine::load(config, registry, Box::new(CharTokenizer::new()))
        .unwrap_or_else(|err| panic!("engine failed to load: {err}"))
        .with_prompt_template(PromptTemplate::raw());
    Harness {
        engine,
        log,
        source,
    }
}

pub fn scripted(text: &str, stop: bool, embed: usize) -> ScriptedRuntime {
    let mut script = ids(text);
    if stop {
        script.push(STOP_A);
    }
    ScriptedRuntime::new(script, embed)
}

pub fn test_image() -> image::DynamicImage {
    image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(40, 30, image::Rgb([10, 200, 30])))
}
