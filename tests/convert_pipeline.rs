mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use lofi_core::{CancelToken, ErrorKind, TransformEngine, TransformParameters};
use support::{
    CancellingCodec, CopyCodec, StubSource, TruncatingEncodeCodec, leftovers,
    missing_ffmpeg_codec, orchestrator, wav_frames_and_rate,
};

#[test]
fn urls_without_http_scheme_never_reach_the_source() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 30.0));
    let codec = Arc::new(CopyCodec::default());
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        codec.clone(),
        TransformEngine::new(),
    );

    for url in ["youtube.com/watch?v=x", "ftp://example.com/a", "mailto:a@b.c", ""] {
        let err = pipeline
            .convert(url, &TransformParameters::default())
            .expect_err(url);
        assert_eq!(err.kind, ErrorKind::InvalidUrl, "{url}");
        assert_eq!(err.kind.http_status(), 400);
    }
    assert_eq!(source.calls(), 0);
    assert_eq!(codec.decodes.load(Ordering::SeqCst), 0);
    assert!(leftovers(root.path()).is_empty());
}

#[test]
fn over_ceiling_is_rejected_without_download() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Long mix", 601.0));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    );

    let err = pipeline
        .convert("https://www.youtube.com/watch?v=long", &TransformParameters::default())
        .expect_err("should be rejected");
    assert_eq!(err.kind, ErrorKind::DurationExceeded);
    assert!(err.message.contains("600"), "{}", err.message);
    assert_eq!(source.probes.load(Ordering::SeqCst), 1);
    assert_eq!(source.downloads.load(Ordering::SeqCst), 0);
    assert!(leftovers(root.path()).is_empty());
}

#[test]
fn two_hundred_second_source_converts_with_defaults() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Nujabes - Aruarian Dance", 200.0));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    );

    let result = pipeline
        .convert("https://www.youtube.com/watch?v=abc", &TransformParameters::default())
        .expect("convert");
    assert!(result.filename.ends_with(".mp3"), "{}", result.filename);
    assert_eq!(result.filename, "lofi_Nujabes_-_Aruarian_Dance.mp3");
    assert!(!result.payload.is_empty());

    let (frames, rate, _) = wav_frames_and_rate(&result.payload);
    let seconds = frames as f64 / rate as f64;
    assert!((seconds - 200.0 / 0.92).abs() < 0.05, "{seconds}");

    assert!(leftovers(root.path()).is_empty(), "{:?}", leftovers(root.path()));
}

#[test]
fn missing_codec_tool_is_a_server_error_and_leaves_nothing() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 200.0));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        missing_ffmpeg_codec(),
        TransformEngine::new(),
    );

    let err = pipeline
        .convert("https://www.youtube.com/watch?v=abc", &TransformParameters::default())
        .expect_err("no ffmpeg");
    assert_eq!(err.kind, ErrorKind::ToolNotFound);
    assert_eq!(err.kind.http_status(), 500);
    assert!(err.message.contains("/nonexistent/ffmpeg"), "{}", err.message);
    assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
    assert!(leftovers(root.path()).is_empty(), "{:?}", leftovers(root.path()));
}

#[test]
fn processing_failure_removes_the_downloaded_audio() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 5.0));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        Arc::new(CopyCodec::default()),
        TransformEngine::new().with_timeout(Duration::ZERO),
    );

    let err = pipeline
        .convert("https://www.youtube.com/watch?v=abc", &TransformParameters::default())
        .expect_err("budget exhausted");
    assert_eq!(err.kind, ErrorKind::Processing);
    assert!(err.message.contains("tempo"), "{}", err.message);

    let downloaded = source.downloaded.lock().clone();
    assert_eq!(downloaded.len(), 1);
    assert!(!downloaded[0].exists());
    assert!(leftovers(root.path()).is_empty());
}

#[test]
fn repeated_conversions_agree() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Loop", 3.0));
    let pipeline = orchestrator(
        root.path(),
        source,
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    );
    let params = TransformParameters::default();

    let a = pipeline.convert("https://example.com/v", &params).expect("a");
    let b = pipeline.convert("https://example.com/v", &params).expect("b");
    assert_eq!(wav_frames_and_rate(&a.payload), wav_frames_and_rate(&b.payload));
    assert_eq!(a.payload, b.payload);
}

#[test]
fn near_identity_keeps_duration() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Clip", 4.0));
    let pipeline = orchestrator(
        root.path(),
        source,
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    );
    let params = TransformParameters {
        tempo_ratio: 1.0,
        wet_level: 0.0,
        delay_ms: 0,
        ..Default::default()
    };

    let result = pipeline.convert("https://example.com/v", &params).expect("convert");
    let (frames, rate, channels) = wav_frames_and_rate(&result.payload);
    assert_eq!(rate, 8_000);
    assert_eq!(channels, 1);
    assert!((frames as f64 / rate as f64 - 4.0).abs() < 0.01);
}

#[test]
fn cancelled_request_stops_before_any_io() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 10.0));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    );
    let token = CancelToken::new();
    token.cancel();

    let err = pipeline
        .convert_with_cancel("https://example.com/v", &TransformParameters::default(), &token)
        .expect_err("cancelled");
    assert_eq!(err.kind, ErrorKind::Aborted);
    assert_eq!(source.calls(), 0);
    assert!(leftovers(root.path()).is_empty());
}

#[test]
fn failed_encode_removes_partial_deliverable() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 3.0));
    let codec = Arc::new(TruncatingEncodeCodec::default());
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        codec.clone(),
        TransformEngine::new(),
    );

    let err = pipeline
        .convert("https://example.com/v", &TransformParameters::default())
        .expect_err("encode fails");
    assert_eq!(err.kind, ErrorKind::Encode);
    assert_eq!(err.kind.http_status(), 500);
    assert!(err.message.contains("mid-stream"), "{}", err.message);

    let partial = codec.partial.lock().clone().expect("encoder ran");
    assert!(partial.ends_with("lofi.mp3"));
    assert!(!partial.exists());
    assert!(leftovers(root.path()).is_empty(), "{:?}", leftovers(root.path()));
}

#[test]
fn cancellation_after_resolve_stops_at_next_stage() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = Arc::new(StubSource::new("Song", 3.0));
    let token = CancelToken::new();
    let codec = Arc::new(CancellingCodec::new(token.clone()));
    let pipeline = orchestrator(
        root.path(),
        Arc::clone(&source),
        codec.clone(),
        TransformEngine::new(),
    );

    let err = pipeline
        .convert_with_cancel("https://example.com/v", &TransformParameters::default(), &token)
        .expect_err("cancelled");
    assert_eq!(err.kind, ErrorKind::Aborted);
    assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(codec.encodes.load(Ordering::SeqCst), 0);
    assert!(leftovers(root.path()).is_empty(), "{:?}", leftovers(root.path()));
}

#[test]
fn concurrent_requests_do_not_collide() {
    let root = tempfile::tempdir().expect("tempdir");
    let pipeline = Arc::new(orchestrator(
        root.path(),
        Arc::new(StubSource::new("Song", 2.0)),
        Arc::new(CopyCodec::default()),
        TransformEngine::new(),
    ));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || {
                pipeline.convert("https://example.com/v", &TransformParameters::default())
            })
        })
        .collect();
    for handle in handles {
        let result = handle.join().expect("join").expect("convert");
        assert!(!result.payload.is_empty());
    }
    assert!(leftovers(root.path()).is_empty());
}
