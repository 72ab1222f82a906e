//! The decode loop as a lazily-driven stream of text increments.

use std::time::Instant;

use candle_core::Tensor;
use tokenizer::StopTokens;

use crate::engine::Engine;
use crate::errors::EngineError;
use crate::position::PositionTracker;
use crate::request::CancelToken;

const REPLACEMENT: char = '\u{FFFD}';

/// States a generation call moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    PrefillText,
    PrefillVision,
    Merge,
    DecodeLoop,
    TokenEmitted,
    Stopped,
}

/// Why a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The decoder produced an id from the stop set.
    StopToken,
    /// The request's token budget was spent.
    MaxTokens,
    /// The next step would not fit in the key/value cache.
    Capacity,
    /// The caller tripped the cancellation token.
    Cancelled,
    /// A segment, tokenizer or cache error ended the call; the error itself
    /// was yielded by the stream.
    Failed,
}

/// One emitted token and the text it contributed.
///
/// `text` can be empty while a multi-byte character is still incomplete; the
/// pending bytes show up in a later chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChunk {
    pub token_id: u32,
    pub text: String,
}

/// What prefill produced before the first decode step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefillSummary {
    /// Tokenized prompt length.
    pub text_ids_len: usize,
    /// Positions written by the first decoder call (text plus image).
    pub ids_len: usize,
    pub used_vision: bool,
    pub phases: Vec<GenerationPhase>,
}

impl PrefillSummary {
    pub fn visited(&self, phase: GenerationPhase) -> bool {
        self.phases.contains(&phase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub text: String,
    pub tokens: Vec<u32>,
    pub stop_reason: StopReason,
    pub prefill: PrefillSummary,
}

/// Per-call mutable state, discarded when the stream ends.
pub(crate) struct DecodeState {
    pub(crate) hidden_states: Tensor,
    pub(crate) position_ids: Tensor,
    pub(crate) tracker: PositionTracker,
    /// Zero-padded `max_seq_length` id buffer; decode steps overwrite slot 0.
    pub(crate) input_ids: Vec<i64>,
    /// Token whose embedding the next step still has to compute.
    pub(crate) pending: Option<u32>,
}

enum Step {
    Emit(TokenChunk),
    Stop(StopReason),
}

/// Streaming generation over a borrowed [`Engine`].
///
/// Prefill has already run when the stream is handed out. Each call to
/// `next` performs one decoder step. Once the stream ends it keeps returning
/// `None`; dropping it early abandons the call.
pub struct Generation<'a> {
    engine: &'a mut Engine,
    state: DecodeState,
    stop_tokens: StopTokens,
    max_tokens: usize,
    cancel: CancelToken,
    tokens: Vec<u32>,
    text: String,
    phase: GenerationPhase,
    stop_reason: Option<StopReason>,
    prefill: PrefillSummary,
    started: Instant,
}

impl<'a> Generation<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: &'a mut Engine,
        state: DecodeState,
        stop_tokens: StopTokens,
        max_tokens: usize,
        cancel: CancelToken,
        prefill: PrefillSummary,
        started: Instant,
    ) -> Self {
        Self {
            engine,
            state,
            stop_tokens,
            max_tokens,
            cancel,
            tokens: Vec::new(),
            text: String::new(),
            phase: GenerationPhase::DecodeLoop,
            stop_reason: None,
            prefill,
            started,
        }
    }

    /// Text emitted so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    /// Set once the stream has ended.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn prefill(&self) -> &PrefillSummary {
        &self.prefill
    }

    pub fn is_finished(&self) -> bool {
        self.stop_reason.is_some()
    }

    /// Collects the result. A stream abandoned before it finished reports
    /// [`StopReason::Cancelled`]; one that yielded an error reports
    /// [`StopReason::Failed`].
    pub fn into_output(mut self) -> GenerationOutput {
        let stop_reason = match self.stop_reason {
            Some(reason) => reason,
            None => {
                self.finish(StopReason::Cancelled);
                StopReason::Cancelled
            }
        };
        GenerationOutput {
            text: std::mem::take(&mut self.text),
            tokens: std::mem::take(&mut self.tokens),
            stop_reason,
            prefill: self.prefill.clone(),
        }
    }

    fn step(&mut self) -> Result<Step, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.tokens.len() >= self.max_tokens {
            return Ok(Step::Stop(StopReason::MaxTokens));
        }

        if let Some(token) = self.state.pending.take() {
            self.engine.ensure_room(self.state.tracker.ids_len())?;
            self.state.input_ids[0] = i64::from(token);
            self.state.hidden_states = self
                .engine
                .embed(&self.state.input_ids, self.state.tracker.ids_len())?;
        }

        self.phase = GenerationPhase::DecodeLoop;
        let token = self.engine.decode_step(&self.state)?;
        if self.stop_tokens.contains(token) {
            log::debug!("stop token {token} after {} tokens", self.tokens.len());
            return Ok(Step::Stop(StopReason::StopToken));
        }

        self.state.tracker.advance();
        self.tokens.push(token);
        self.state.pending = Some(token);
        let text = self.increment(token)?;
        self.phase = GenerationPhase::TokenEmitted;
        log::debug!(
            "token {token} emitted: history_len={} pos_factor={}",
            self.state.tracker.history_len(),
            self.state.tracker.pos_factor().to_int()
        );
        Ok(Step::Emit(TokenChunk {
            token_id: token,
            text,
        }))
    }

    fn increment(&mut self, token: u32) -> Result<String, EngineError> {
        let full = self.engine.decode_text(&self.tokens)?;
        let piece = match settled_suffix(&self.text, &full) {
            Some(piece) => piece.to_string(),
            None => self.engine.decode_text(&[token])?,
        };
        self.text.push_str(&piece);
        Ok(piece)
    }

    fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.phase = GenerationPhase::Stopped;
        log::info!(
            "generation finished: tokens={} stop={reason:?} elapsed={:.2?}",
            self.tokens.len(),
            self.started.elapsed()
        );
    }
}

impl Iterator for Generation<'_> {
    type Item = Result<TokenChunk, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_finished() {
            return None;
        }
        match self.step() {
            Ok(Step::Emit(chunk)) => Some(Ok(chunk)),
            Ok(Step::Stop(reason)) => {
                self.finish(reason);
                None
            }
            Err(EngineError::Cancelled) => {
                self.finish(StopReason::Cancelled);
                None
            }
            Err(EngineError::Capacity { .. }) => {
                self.finish(StopReason::Capacity);
                None
            }
            Err(err) => {
                self.stop_reason = Some(StopReason::Failed);
                self.phase = GenerationPhase::Stopped;
                log::warn!("generation failed after {} tokens: {err}", self.tokens.len());
                Some(Err(err))
            }
        }
    }
}

impl Drop for Generation<'_> {
    fn drop(&mut self) {
        if !self.is_finished() {
            log::debug!("generation dropped after {} tokens", self.tokens.len());
        }
    }
}

/// The part of `full` past what was already emitted, holding back a trailing
/// incomplete character. `None` when earlier text changed under re-decoding.
fn settled_suffix<'t>(emitted: &str, full: &'t str) -> Option<&'t str> {
    full.trim_end_matches(REPLACEMENT).strip_prefix(emitted)
}
