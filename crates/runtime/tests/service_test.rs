//! End-to-end tests of the serving runtime against the mock engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use runtime::{
    MockEngine, SpeakerAudio, SpeakerUpdate, SynthesisOutput, TtsMetrics, TtsService,
    MOCK_SAMPLE_RATE,
};
use tempfile::TempDir;
use text_splitter::SplitterRegistry;
use tts_core::{
    ErrorKind, ModelConfig, ModelConfigId, Precision, Residency, RuntimeConfig, StreamDemotePolicy,
    SynthesisRequest, TtsError,
};

const ACCEL_CONFIG: &str = "custom:\n  device: cuda\n  is_half: true\n  version: v2\n";

struct Fixture {
    dir: TempDir,
    engine: Arc<MockEngine>,
    service: TtsService,
    config: PathBuf,
    reference: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(tune: impl FnOnce(&mut RuntimeConfig)) -> Self {
        Self::with_engine(MockEngine::new(), tune)
    }

    fn with_engine(engine: MockEngine, tune: impl FnOnce(&mut RuntimeConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tts_infer.yaml");
        std::fs::write(&config, ACCEL_CONFIG).unwrap();
        let reference = dir.path().join("ref.wav");
        std::fs::write(&reference, wav_bytes()).unwrap();

        let mut runtime = RuntimeConfig {
            default_model_config: config.clone(),
            speaker_dir: dir.path().join("speakers"),
            ..RuntimeConfig::default()
        };
        tune(&mut runtime);

        let splitter = Arc::new(SplitterRegistry::new());
        let engine = Arc::new(engine.with_splitter(Arc::clone(&splitter)));
        let service = TtsService::new(runtime, engine.clone(), splitter, TtsMetrics::init_noop());
        Self {
            dir,
            engine,
            service,
            config,
            reference,
        }
    }

    fn request(&self, text: &str) -> SynthesisRequest {
        SynthesisRequest::new(text)
            .with_text_lang("en")
            .with_reference(self.reference.to_string_lossy(), "reference words", "en")
    }

    fn write_config(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, ACCEL_CONFIG).unwrap();
        path
    }

    fn model_config(&self, path: &Path) -> ModelConfig {
        ModelConfig::load(&ModelConfigId::resolve(path)).unwrap()
    }

    fn id(&self, path: &Path) -> ModelConfigId {
        ModelConfigId::resolve(path)
    }
}

fn wav_bytes() -> Vec<u8> {
    audio_pack::wav::encode_wav(&[0, 1000, -1000, 0], 16000).unwrap()
}

/// Wait for the producer thread to park the instance on the host.
async fn wait_for_host(fx: &Fixture, id: &ModelConfigId) -> Residency {
    let mut residency = Residency::OnAccelerator;
    for _ in 0..100 {
        residency = fx.service.cache().peek(id).unwrap().state().residency();
        if residency == Residency::OnHost {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    residency
}

fn many_sentences(n: usize) -> String {
    (0..n).map(|i| format!("Sentence number {i}.")).collect::<Vec<_>>().join(" ")
}

#[tokio::test]
async fn test_buffered_wav_and_demote_after() {
    let fx = Fixture::new();
    let output = fx.service.synthesize(fx.request("Hello, world!")).await.unwrap();

    let SynthesisOutput::Buffered { media_type, audio } = output else {
        panic!("expected buffered output");
    };
    assert_eq!(media_type.content_type(), "audio/wav");
    let (rate, samples) = audio_pack::wav::decode_wav(&audio).unwrap();
    assert_eq!(rate, MOCK_SAMPLE_RATE);
    assert!(!samples.is_empty());

    let models = fx.service.cached_models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].residency, Residency::OnHost);
    assert_eq!(models[0].precision, Precision::Reduced);
}

#[tokio::test]
async fn test_validation_failures_never_load_models() {
    let fx = Fixture::new();

    let err = fx
        .service
        .synthesize(fx.request("bonjour").with_text_lang("fr"))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "text_lang is not supported");

    let mut no_ref = fx.request("hello");
    no_ref.ref_audio_path = None;
    let err = fx.service.synthesize(no_ref).await.unwrap_err();
    assert_eq!(err.reason(), "ref_audio_path is required");

    let err = fx
        .service
        .synthesize(fx.request("hello").with_media_type("ogg"))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "ogg format is not supported in non-streaming mode");

    let err = fx
        .service
        .synthesize(fx.request("hello").with_split_method("cut9"))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "text_split_method:cut9 is not supported");

    assert_eq!(fx.engine.loads(), 0);
    assert!(fx.service.cache().is_empty());
}

#[tokio::test]
async fn test_language_codes_are_case_insensitive() {
    let fx = Fixture::new();
    let request = fx.request("Hello.").with_text_lang("EN");
    assert!(fx.service.synthesize(request).await.is_ok());
}

#[tokio::test]
async fn test_concurrent_misses_build_once() {
    let fx = Fixture::with_engine(
        MockEngine::new().with_load_delay(Duration::from_millis(100)),
        |_| {},
    );
    let config = fx.model_config(&fx.config);

    let acquires = (0..8).map(|_| fx.service.cache().acquire(&config));
    let instances = futures::future::join_all(acquires).await;

    let first = instances[0].as_ref().unwrap();
    for instance in &instances {
        assert!(Arc::ptr_eq(first, instance.as_ref().unwrap()));
    }
    assert_eq!(fx.engine.loads(), 1);
}

#[tokio::test]
async fn test_misses_on_different_keys_build_in_parallel() {
    let delay = Duration::from_millis(300);
    let fx = Fixture::with_engine(MockEngine::new().with_load_delay(delay), |_| {});
    let a = fx.model_config(&fx.write_config("a.yaml"));
    let b = fx.model_config(&fx.write_config("b.yaml"));

    let started = std::time::Instant::now();
    let (first, second) = tokio::join!(fx.service.cache().acquire(&a), fx.service.cache().acquire(&b));
    let elapsed = started.elapsed();

    assert!(!Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(fx.engine.loads(), 2);
    assert!(elapsed < delay * 2, "builds ran one after another: {elapsed:?}");
}

#[tokio::test]
async fn test_lru_evicts_least_recently_used() {
    let fx = Fixture::with(|c| c.cache_capacity = 2);
    let a = fx.write_config("a.yaml");
    let b = fx.write_config("b.yaml");
    let c = fx.write_config("c.yaml");

    let cache = fx.service.cache();
    cache.acquire(&fx.model_config(&a)).await.unwrap();
    cache.acquire(&fx.model_config(&b)).await.unwrap();
    cache.acquire(&fx.model_config(&a)).await.unwrap();
    cache.acquire(&fx.model_config(&c)).await.unwrap();

    assert_eq!(cache.len(), 2);
    assert!(cache.contains(&fx.id(&a)));
    assert!(cache.contains(&fx.id(&c)));
    assert!(!cache.contains(&fx.id(&b)));
    assert_eq!(fx.engine.loads(), 3);
}

#[tokio::test]
async fn test_streaming_raw_yields_chunk_per_fragment() {
    let fx = Fixture::new();
    let request = fx
        .request("One. Two. Three.")
        .with_split_method("cut4")
        .with_media_type("raw")
        .with_streaming(true);

    let SynthesisOutput::Streaming { stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    let chunks: Vec<_> = stream.collect().await;

    assert_eq!(chunks.len(), 3);
    for chunk in chunks {
        let bytes = chunk.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(bytes.len() % 2, 0);
    }
}

#[tokio::test]
async fn test_streaming_wav_header_comes_first() {
    let fx = Fixture::new();
    let request = fx
        .request("One. Two.")
        .with_split_method("cut4")
        .with_streaming(true);

    let SynthesisOutput::Streaming { mut stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..4], b"RIFF");
    let second = stream.next().await.unwrap().unwrap();
    assert_ne!(&second[..4.min(second.len())], b"RIFF");
}

#[tokio::test]
async fn test_disconnect_stops_production() {
    let fx = Fixture::with(|c| c.stream_buffer = 1);
    let total = 40;
    let request = fx
        .request(&many_sentences(total))
        .with_split_method("cut4")
        .with_media_type("raw")
        .with_streaming(true);

    let SynthesisOutput::Streaming { stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    drop(stream);

    // The producer notices on its next send and demotes the instance.
    let residency = wait_for_host(&fx, &fx.id(&fx.config)).await;
    assert_eq!(residency, Residency::OnHost);
    assert!(fx.engine.last_probe().unwrap().chunks_produced() < total);
}

#[tokio::test]
async fn test_mid_stream_error_ends_stream() {
    let fx = Fixture::new();
    let config = fx.config.clone();
    fx.service.preload(&config).await.unwrap();
    fx.engine.last_probe().unwrap().fail_at_chunk(1);

    let request = fx
        .request("One. Two. Three.")
        .with_split_method("cut4")
        .with_media_type("raw")
        .with_streaming(true);
    let SynthesisOutput::Streaming { stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert!(items[0].is_ok());
    assert!(matches!(items[1], Err(TtsError::Inference(_))));
}

#[tokio::test]
async fn test_error_before_first_chunk_is_returned() {
    let fx = Fixture::new();
    let config = fx.config.clone();
    fx.service.preload(&config).await.unwrap();
    fx.engine.last_probe().unwrap().fail_at_chunk(0);

    let request = fx.request("One. Two.").with_streaming(true);
    let err = fx.service.synthesize(request).await.unwrap_err();
    assert!(matches!(err, TtsError::Inference(_)));
    assert_eq!(wait_for_host(&fx, &fx.id(&config)).await, Residency::OnHost);
}

#[tokio::test]
async fn test_keep_hot_after_completed_stream() {
    let fx = Fixture::with(|c| c.stream_demote = StreamDemotePolicy::KeepHot);
    let request = fx
        .request("One. Two.")
        .with_media_type("raw")
        .with_streaming(true);

    let SynthesisOutput::Streaming { stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    let items: Vec<_> = stream.collect().await;
    assert!(items.iter().all(|i| i.is_ok()));

    let models = fx.service.cached_models();
    assert_eq!(models[0].residency, Residency::OnAccelerator);
}

#[tokio::test]
async fn test_speaker_lifecycle() {
    let fx = Fixture::new();
    let speakers = fx.service.speakers();

    speakers
        .update(
            "alice",
            SpeakerUpdate {
                audio: Some(SpeakerAudio {
                    file_name: "alice.wav".to_string(),
                    bytes: wav_bytes(),
                }),
                prompt_text: Some("hello".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let alice = speakers.get("alice").unwrap().unwrap();
    assert_eq!(alice.prompt_text.as_deref(), Some("hello"));
    assert_eq!(alice.prompt_lang, None);

    // No prompt language yet.
    let mut request = SynthesisRequest::new("Hi there.")
        .with_text_lang("en")
        .with_speaker("alice");
    let err = fx.service.synthesize(request.clone()).await.unwrap_err();
    assert_eq!(err.reason(), "prompt_lang is required");

    speakers
        .update(
            "alice",
            SpeakerUpdate {
                prompt_lang: Some("en".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let alice = speakers.get("alice").unwrap().unwrap();
    assert_eq!(alice.prompt_text.as_deref(), Some("hello"));
    assert_eq!(alice.prompt_lang.as_deref(), Some("en"));

    request.ref_audio_path = Some("ignored-when-speaker-given.wav".to_string());
    assert!(fx.service.synthesize(request).await.is_ok());
}

#[tokio::test]
async fn test_unknown_speaker_is_not_found() {
    let fx = Fixture::new();
    let request = SynthesisRequest::new("Hi.")
        .with_text_lang("en")
        .with_speaker("nobody");
    let err = fx.service.synthesize(request).await.unwrap_err();
    assert!(matches!(err, TtsError::NotFound(_)));
    assert_eq!(err.reason(), "speaker nobody not found");
    assert_eq!(fx.engine.loads(), 0);
}

#[tokio::test]
async fn test_weight_swaps_reach_the_model() {
    let fx = Fixture::new();
    fx.service
        .set_gpt_weights(None, "weights/gpt.ckpt")
        .await
        .unwrap();
    fx.service
        .set_sovits_weights(None, "weights/sovits.pth")
        .await
        .unwrap();
    let reference = fx.reference.to_string_lossy().into_owned();
    fx.service.set_refer_audio(None, &reference).await.unwrap();

    let probe = fx.engine.last_probe().unwrap();
    assert_eq!(probe.gpt_weights(), Some(PathBuf::from("weights/gpt.ckpt")));
    assert_eq!(probe.sovits_weights(), Some(PathBuf::from("weights/sovits.pth")));
    assert_eq!(probe.ref_audio(), Some(fx.reference.clone()));
    assert_eq!(fx.engine.loads(), 1);
}

#[tokio::test]
async fn test_missing_reference_audio_fails_inference() {
    let fx = Fixture::new();
    let request = SynthesisRequest::new("Hello.")
        .with_text_lang("en")
        .with_reference("/nonexistent/ref.wav", "", "en");
    let err = fx.service.synthesize(request).await.unwrap_err();
    assert!(matches!(err, TtsError::Inference(_)));

    let models = fx.service.cached_models();
    assert_eq!(models[0].residency, Residency::OnHost);
}

#[tokio::test]
async fn test_shared_instance_stays_hot_while_streaming() {
    let fx = Fixture::with(|c| c.stream_buffer = 1);
    let total = 20;
    let request = fx
        .request(&many_sentences(total))
        .with_split_method("cut4")
        .with_media_type("raw")
        .with_streaming(true);

    let SynthesisOutput::Streaming { mut stream, .. } = fx.service.synthesize(request).await.unwrap()
    else {
        panic!("expected streaming output");
    };
    assert!(stream.next().await.unwrap().is_ok());

    // A buffered request on the same instance finishes while the stream is open.
    fx.service.synthesize(fx.request("Short one.")).await.unwrap();
    let id = fx.id(&fx.config);
    let instance = fx.service.cache().peek(&id).unwrap();
    assert_eq!(instance.state().residency(), Residency::OnAccelerator);
    assert_eq!(instance.users(), 1);

    let rest: Vec<_> = stream.collect().await;
    assert_eq!(rest.len(), total - 1);
    assert!(rest.iter().all(|item| item.is_ok()));
    assert_eq!(wait_for_host(&fx, &id).await, Residency::OnHost);
    assert_eq!(instance.users(), 0);
}

#[tokio::test]
async fn test_encoder_failure_is_inference_error() {
    let fx = Fixture::with(|c| c.ffmpeg_path = PathBuf::from("/nonexistent/ffmpeg"));
    let request = fx
        .request("One. Two.")
        .with_split_method("cut4")
        .with_media_type("aac")
        .with_streaming(true);

    let err = fx.service.synthesize(request).await.unwrap_err();
    assert!(matches!(err, TtsError::Encoder(_)));
    assert_eq!(err.kind(), ErrorKind::Inference);
    assert_eq!(wait_for_host(&fx, &fx.id(&fx.config)).await, Residency::OnHost);

    let err = fx
        .service
        .synthesize(fx.request("One.").with_media_type("aac"))
        .await
        .unwrap_err();
    assert!(matches!(err, TtsError::Encoder(_)));
    let instance = fx.service.cache().peek(&fx.id(&fx.config)).unwrap();
    assert_eq!(instance.state().residency(), Residency::OnHost);
    assert_eq!(instance.users(), 0);
}
