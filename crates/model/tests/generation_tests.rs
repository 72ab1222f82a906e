mod common;

use anyhow::Result;
use codec::{HALF_LOWEST, HALF_ZERO};
use common::*;
use model::{
    Engine, EngineError, GenerationPhase, GenerationRequest, ModelConfig, StopReason,
};
use segments::{SegmentError, SegmentKind};
use static_assertions::assert_impl_all;
use tokenizer::StopTokens;

assert_impl_all!(Engine: Send);

fn decode(history_len: i64, ids_len: i64, pos_factor: i64, mask_bits: u16) -> Call {
    Call::Decode {
        history_len,
        ids_len,
        pos_factor,
        mask_bits,
    }
}

#[test]
fn stop_token_on_first_step_produces_empty_output() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("", true, 100));
    let mut seen = Vec::new();
    let output = h
        .engine
        .generate(GenerationRequest::new("Describe"), |text| seen.push(text.to_string()))?;

    assert_eq!(output.text, "");
    assert!(output.tokens.is_empty());
    assert_eq!(output.stop_reason, StopReason::StopToken);
    assert!(seen.is_empty());
    assert_eq!(decode_calls(&h.log).len(), 1);
    Ok(())
}

#[test]
fn text_prompt_skips_vision_segments() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("Hi", true, 100));
    let mut seen = Vec::new();
    let output = h
        .engine
        .generate(GenerationRequest::new("Describe"), |text| seen.push(text.to_string()))?;

    assert_eq!(output.text, "Hi");
    assert_eq!(output.tokens, ids("Hi"));
    assert_eq!(seen, vec!["H".to_string(), "Hi".to_string()]);

    let prefill = &output.prefill;
    assert!(!prefill.used_vision);
    assert_eq!(prefill.text_ids_len, 8);
    assert_eq!(prefill.ids_len, 8);
    assert!(!prefill.visited(GenerationPhase::PrefillVision));
    assert!(!prefill.visited(GenerationPhase::Merge));

    let log = h.log.lock().unwrap();
    assert!(!log
        .iter()
        .any(|call| matches!(call, Call::Encode { .. } | Call::Merge { .. })));
    assert_eq!(h.source.count(SegmentKind::VisionEncoder), 0);
    assert_eq!(h.source.count(SegmentKind::VisionMerger), 0);
    Ok(())
}

#[test]
fn image_prompt_merges_embedding_into_sequence() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("ok", true, 100));
    let request = GenerationRequest::new("Describe").with_image(test_image());
    let output = h.engine.generate(request, |_| {})?;

    assert_eq!(output.text, "ok");
    let prefill = &output.prefill;
    assert!(prefill.used_vision);
    assert_eq!(prefill.text_ids_len, 8);
    assert_eq!(prefill.ids_len, 108);
    assert_eq!(
        prefill.phases,
        vec![
            GenerationPhase::Idle,
            GenerationPhase::PrefillText,
            GenerationPhase::PrefillVision,
            GenerationPhase::Merge,
            GenerationPhase::DecodeLoop,
        ]
    );

    let log = h.log.lock().unwrap();
    assert!(log.contains(&Call::Encode {
        dims: vec![1, 3, 28, 28]
    }));
    // split_factor = 256 - 108 - 100, ids_len_minus = 108 - 5.
    assert!(log.contains(&Call::Merge {
        ids_len: 108,
        ids_len_minus: 103,
        split_factor: 48,
    }));
    drop(log);

    assert_eq!(h.engine.registry().live_leases(), 0);
    assert!(!h.engine.registry().is_loaded(SegmentKind::VisionEncoder));
    assert_eq!(h.engine.registry().stats().releases, 2);
    Ok(())
}

#[test]
fn text_decode_controls_follow_schedule() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", true, 100));
    h.engine.generate(GenerationRequest::new("Describe"), |_| {})?;

    assert_eq!(
        decode_calls(&h.log),
        vec![
            decode(0, 8, 0, HALF_LOWEST),
            decode(8, 1, 8, HALF_ZERO),
            decode(9, 1, 9, HALF_ZERO),
            decode(10, 1, 10, HALF_ZERO),
        ]
    );
    assert_eq!(
        embed_calls(&h.log),
        vec![
            Call::Embed {
                ids_len: 8,
                first_id: i64::from(u32::from('D')),
            },
            Call::Embed {
                ids_len: 1,
                first_id: i64::from(u32::from('a')),
            },
            Call::Embed {
                ids_len: 1,
                first_id: i64::from(u32::from('b')),
            },
            Call::Embed {
                ids_len: 1,
                first_id: i64::from(u32::from('c')),
            },
        ]
    );
    Ok(())
}

#[test]
fn vision_decode_controls_start_from_grid_offset() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("ab", true, 100));
    let request = GenerationRequest::new("Describe").with_image(test_image());
    h.engine.generate(request, |_| {})?;

    // 108 merged positions, offset 1 - 100 + 10.
    assert_eq!(
        decode_calls(&h.log),
        vec![
            decode(0, 108, 0, HALF_LOWEST),
            decode(108, 1, 19, HALF_ZERO),
            decode(109, 1, 20, HALF_ZERO),
        ]
    );
    Ok(())
}

#[test]
fn cancellation_keeps_text_emitted_so_far() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abcdefgh", false, 100));
    let request = GenerationRequest::new("Describe");
    let cancel = request.cancel_token();

    let mut generation = h.engine.stream(request)?;
    let mut pieces = String::new();
    let mut emitted = 0;
    for chunk in generation.by_ref() {
        pieces.push_str(&chunk?.text);
        emitted += 1;
        if emitted == 3 {
            cancel.cancel();
        }
    }
    assert_eq!(generation.stop_reason(), Some(StopReason::Cancelled));
    let output = generation.into_output();

    assert_eq!(output.text, "abc");
    assert_eq!(output.text, pieces);
    assert_eq!(output.tokens.len(), 3);
    assert_eq!(output.stop_reason, StopReason::Cancelled);
    assert_eq!(decode_calls(&h.log).len(), 3);
    Ok(())
}

#[test]
fn max_tokens_caps_output() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abcdefgh", false, 100));
    let output = h
        .engine
        .generate(GenerationRequest::new("Describe").with_max_tokens(2), |_| {})?;

    assert_eq!(output.text, "ab");
    assert_eq!(output.stop_reason, StopReason::MaxTokens);
    assert_eq!(decode_calls(&h.log).len(), 2);
    Ok(())
}

#[test]
fn engine_token_limit_applies_without_request_override() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("xyz", false, 100));
    h.engine = h.engine.with_max_new_tokens(4);
    let output = h.engine.generate(GenerationRequest::new("Describe"), |_| {})?;

    assert_eq!(output.text, "xyzx");
    assert_eq!(output.stop_reason, StopReason::MaxTokens);
    Ok(())
}

#[test]
fn decode_stops_when_cache_is_full() -> Result<()> {
    let mut h = harness(cramped_config(), scripted("abcdefgh", false, 4));
    let prompt = "abcdefghijklmnopqrst";
    let output = h.engine.generate(GenerationRequest::new(prompt), |_| {})?;

    // 20 prompt positions leave room for the prefill token and four more.
    assert_eq!(output.tokens.len(), 5);
    assert_eq!(output.text, "abcde");
    assert_eq!(output.stop_reason, StopReason::Capacity);
    assert_eq!(h.engine.cache().occupied(), 24);
    // The last emitted token is never re-embedded once the cache is full.
    assert_eq!(decode_calls(&h.log).len(), 5);
    assert_eq!(embed_calls(&h.log).len(), 5);
    Ok(())
}

#[test]
fn overlong_prompt_fails_before_any_segment_runs() {
    let mut h = harness(cramped_config(), scripted("a", true, 4));
    let prompt = "x".repeat(25);
    let err = match h.engine.stream(GenerationRequest::new(prompt)) {
        Ok(_) => panic!("prompt should not fit"),
        Err(err) => err,
    };

    assert!(matches!(
        err,
        EngineError::Capacity {
            requested: 25,
            capacity: 24,
            ..
        }
    ));
    assert!(h.log.lock().unwrap().is_empty());
}

#[test]
fn image_that_cannot_fit_is_rejected_up_front() {
    let mut h = harness(cramped_config(), scripted("a", true, 4));
    // 17 text + 4 image + 4 split > 24.
    let request = GenerationRequest::new("x".repeat(17)).with_image(test_image());
    let err = match h.engine.stream(request) {
        Ok(_) => panic!("image should not fit"),
        Err(err) => err,
    };

    assert!(matches!(err, EngineError::Capacity { requested: 25, .. }));
    assert!(h.log.lock().unwrap().is_empty());
    assert_eq!(h.source.count(SegmentKind::VisionEncoder), 0);
}

#[test]
fn merger_failure_still_releases_leases() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("ok", true, 100).failing_merge());
    let request = GenerationRequest::new("Describe").with_image(test_image());
    let err = match h.engine.generate(request, |_| {}) {
        Ok(output) => panic!("merge should fail, got {output:?}"),
        Err(err) => err,
    };

    assert!(matches!(
        err,
        EngineError::Resource(SegmentError::Run {
            kind: SegmentKind::VisionMerger,
            ..
        })
    ));
    assert_eq!(h.engine.registry().live_leases(), 0);
    assert_eq!(h.engine.registry().stats().releases, 2);

    // The engine stays usable for text prompts.
    let output = h.engine.generate(GenerationRequest::new("Describe"), |_| {})?;
    assert_eq!(output.text, "ok");
    Ok(())
}

#[test]
fn decoder_failure_ends_stream_with_error() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", true, 100).failing_decode_at(1));
    let mut generation = h.engine.stream(GenerationRequest::new("Describe"))?;

    let first = generation.next().expect("first chunk")?;
    assert_eq!(first.text, "a");
    assert!(matches!(
        generation.next(),
        Some(Err(EngineError::Resource(SegmentError::Run { .. })))
    ));
    assert!(generation.next().is_none());
    assert_eq!(generation.stop_reason(), Some(StopReason::Failed));
    assert_eq!(generation.phase(), GenerationPhase::Stopped);
    Ok(())
}

#[test]
fn failed_stream_is_not_reported_as_cancelled() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", true, 100).failing_decode_at(1));
    let mut generation = h.engine.stream(GenerationRequest::new("Describe"))?;
    let chunks: Vec<_> = generation.by_ref().filter_map(Result::ok).collect();
    assert_eq!(chunks.len(), 1);

    let output = generation.into_output();
    assert_eq!(output.stop_reason, StopReason::Failed);
    assert_eq!(output.text, "a");
    assert_eq!(output.tokens, ids("a"));
    Ok(())
}

#[test]
fn resident_segments_are_fetched_once_across_calls() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("ok", true, 100));
    for _ in 0..2 {
        let request = GenerationRequest::new("Describe").with_image(test_image());
        h.engine.generate(request, |_| {})?;
    }

    assert_eq!(h.source.count(SegmentKind::TextEmbedder), 1);
    assert_eq!(h.source.count(SegmentKind::PositionIds), 1);
    assert_eq!(h.source.count(SegmentKind::Decoder), 1);
    assert_eq!(h.source.count(SegmentKind::VisionEncoder), 2);
    assert_eq!(h.source.count(SegmentKind::VisionMerger), 2);
    Ok(())
}

#[test]
fn cache_is_reset_between_calls() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", true, 100));
    h.engine.generate(GenerationRequest::new("Describe"), |_| {})?;
    // Prefill commits 8 positions, then one per decode call.
    assert_eq!(h.engine.cache().occupied(), 11);

    h.engine.generate(GenerationRequest::new("Describe"), |_| {})?;
    let calls = decode_calls(&h.log);
    assert_eq!(calls[4], decode(0, 8, 0, HALF_LOWEST));
    Ok(())
}

#[test]
fn finished_stream_keeps_returning_none() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("a", true, 100));
    let mut generation = h.engine.stream(GenerationRequest::new("Describe"))?;

    assert_eq!(generation.next().expect("one token")?.token_id, u32::from('a'));
    assert!(generation.next().is_none());
    assert!(generation.next().is_none());
    assert_eq!(generation.stop_reason(), Some(StopReason::StopToken));
    assert_eq!(generation.phase(), GenerationPhase::Stopped);
    assert_eq!(generation.text(), "a");
    drop(generation);

    assert_eq!(decode_calls(&h.log).len(), 2);
    Ok(())
}

#[test]
fn request_stop_tokens_replace_tokenizer_defaults() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", true, 100));
    let request = GenerationRequest::new("Describe").with_stop_tokens(StopTokens::new(ids("b")));
    let output = h.engine.generate(request, |_| {})?;

    assert_eq!(output.text, "a");
    assert_eq!(output.stop_reason, StopReason::StopToken);
    Ok(())
}

#[test]
fn abandoned_stream_reports_cancelled() -> Result<()> {
    let mut h = harness(tiny_config(), scripted("abc", false, 100));
    let mut generation = h.engine.stream(GenerationRequest::new("Describe"))?;
    generation.next().expect("one token")?;
    let output = generation.into_output();

    assert_eq!(output.text, "a");
    assert_eq!(output.stop_reason, StopReason::Cancelled);
    Ok(())
}

#[test]
fn invalid_configuration_is_rejected_at_load() {
    let config = ModelConfig::new(2, 1, 8, 3);
    let runtime = scripted("a", true, 100);
    let registry = segments::SegmentRegistry::new(
        segments::RegistryConfig::new(MODEL_ID),
        Box::new(CountingSource::default()),
        Box::new(runtime),
    );
    let result = Engine::load(config, registry, Box::new(CharTokenizer::new()));
    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[test]
fn prompt_without_tokens_is_a_configuration_error() {
    let mut h = harness(tiny_config(), scripted("a", true, 100));
    let err = match h.engine.stream(GenerationRequest::new("\u{7}\u{7}")) {
        Ok(_) => panic!("an empty token sequence should be rejected"),
        Err(err) => err,
    };

    assert!(matches!(err, EngineError::Config(_)));
    assert!(h.log.lock().unwrap().is_empty());
}

#[test]
fn load_propagates_segment_fetch_failures() {
    let source = CountingSource::failing_on(SegmentKind::Decoder);
    let registry = segments::SegmentRegistry::new(
        segments::RegistryConfig::new(MODEL_ID),
        Box::new(source.clone()),
        Box::new(scripted("a", true, 100)),
    );
    let result = Engine::load(tiny_config(), registry, Box::new(CharTokenizer::new()));

    assert!(matches!(
        result,
        Err(EngineError::Resource(SegmentError::Fetch { .. }))
    ));
    assert_eq!(source.count(SegmentKind::Decoder), 1);
}

#[test]
fn load_preloads_resident_segments_and_release_frees_them() {
    let h = harness(tiny_config(), scripted("a", true, 100));
    for kind in segments::SegmentKind::resident() {
        assert!(h.engine.registry().is_loaded(kind));
        assert_eq!(h.source.count(kind), 1);
    }
    assert_eq!(h.engine.cache().capacity(), 256);
    assert_eq!(h.engine.cache().layout().dims(), [2, 1, 256, 4]);
    h.engine.release();
}
