mod common;

use common::{level, FillProvider, RecordingSink, SyntheticDecoder, WIDTH};
use proptest::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use vidmatte::output::{PixelFormat, RawSink};
use vidmatte::{Pipeline, PipelineConfig, PipelineError, PipelineReport, PipelineState};

const MATTE_HEIGHT: u32 = 2;

fn config(worker_count: usize, batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        worker_count,
        batch_size,
        matte_height: MATTE_HEIGHT,
        ..PipelineConfig::default()
    }
}

fn expected_bytes(frames: usize) -> Vec<u8> {
    let per_frame = (WIDTH * MATTE_HEIGHT) as usize;
    (0..frames)
        .flat_map(|i| std::iter::repeat(level(i)).take(per_frame))
        .collect()
}

/// Run on a helper thread so a stuck pipeline fails the test instead of hanging it
fn run_with_deadline(
    pipeline: Pipeline,
    mut decoder: SyntheticDecoder,
    models: FillProvider,
    mut sink: RecordingSink,
) -> (Result<PipelineReport, PipelineError>, RecordingSink) {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = pipeline.run(&mut decoder, &models, &mut sink);
        let _ = tx.send((result, sink));
    });
    rx.recv_timeout(Duration::from_secs(10))
        .expect("pipeline did not stop within 10s")
}

#[test]
fn test_ten_frames_two_workers_batches_of_three() {
    let pipeline = Pipeline::new(config(2, 3)).unwrap();
    let mut decoder = SyntheticDecoder::new(10);
    let models = FillProvider::new(MATTE_HEIGHT);
    let mut sink = RecordingSink::default();

    let report = pipeline.run(&mut decoder, &models, &mut sink).unwrap();

    assert_eq!(report.total_frames, 10);
    assert_eq!(report.batches, 4);
    assert_eq!(report.frames_written, 10);
    assert_eq!(sink.indices, (0..10).collect::<Vec<_>>());
    assert_eq!(sink.bytes, expected_bytes(10));
    assert_eq!(sink.begins, 1);
    assert!(sink.finished);
    assert!(!sink.aborted);

    // Worker 0 owns sequences 1 and 3, worker 1 owns 2 and 4 (the short one)
    assert_eq!(report.workers.len(), 2);
    assert_eq!(report.workers[0].batches, 2);
    assert_eq!(report.workers[0].frames, 6);
    assert_eq!(report.workers[1].batches, 2);
    assert_eq!(report.workers[1].frames, 4);
}

#[test]
fn test_encoder_params_come_from_first_matte() {
    let pipeline = Pipeline::new(config(1, 2)).unwrap();
    let mut decoder = SyntheticDecoder::new(3);
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(&mut decoder, &FillProvider::new(MATTE_HEIGHT), &mut sink)
        .unwrap();

    let params = sink.params.unwrap();
    assert_eq!(params.width, WIDTH);
    assert_eq!(params.height, MATTE_HEIGHT);
    assert_eq!(params.pixel_format, PixelFormat::Gray);
    assert_eq!(params.frame_rate, 25);
    assert_eq!(report.encoder, Some(params));
}

#[test]
fn test_frame_rate_override_wins() {
    let mut cfg = config(1, 2);
    cfg.frame_rate = Some(12);
    let pipeline = Pipeline::new(cfg).unwrap();
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(
            &mut SyntheticDecoder::new(4),
            &FillProvider::new(MATTE_HEIGHT),
            &mut sink,
        )
        .unwrap();

    assert_eq!(report.frame_rate, 12);
    assert_eq!(sink.params.unwrap().frame_rate, 12);
}

#[test]
fn test_model_failure_aborts_the_run() {
    let pipeline = Pipeline::new(config(2, 3)).unwrap();
    let handle = pipeline.cancel_handle();
    let mut decoder = SyntheticDecoder::new(10);
    let mut models = FillProvider::new(MATTE_HEIGHT);
    // Frame 3 opens sequence 2, owned by worker 1
    models.fail_on_frame = Some(3);
    let mut sink = RecordingSink::default();

    let err = pipeline.run(&mut decoder, &models, &mut sink).unwrap_err();

    assert!(matches!(err, PipelineError::Matting { sequence: 2, .. }), "{err:?}");
    assert_eq!(handle.state(), PipelineState::Fatal);
    assert!(sink.aborted);
    assert!(!sink.finished);
    // Only sequence 1 (frames 0..3) can have reached the sink
    assert!(sink.indices.iter().all(|&i| i < 3), "{:?}", sink.indices);
    assert!(sink.bytes.is_empty());
}

#[test]
fn test_frame_limit_stops_decoding() {
    let mut cfg = config(2, 2);
    cfg.frame_limit = Some(5);
    let pipeline = Pipeline::new(cfg).unwrap();
    let mut decoder = SyntheticDecoder::new(20);
    let pulled = decoder.pulled();
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(&mut decoder, &FillProvider::new(MATTE_HEIGHT), &mut sink)
        .unwrap();

    assert_eq!(report.total_frames, 5);
    assert_eq!(report.batches, 3);
    assert_eq!(sink.indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(pulled.load(Ordering::SeqCst), 5);
}

#[test]
fn test_prefetch_bound_is_respected() {
    let mut cfg = config(2, 2);
    cfg.prefetch_batches = 2;
    let bound = cfg.prefetch_bound();
    let pipeline = Pipeline::new(cfg).unwrap();
    let mut models = FillProvider::new(MATTE_HEIGHT);
    models.delay = Duration::from_millis(2);
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(&mut SyntheticDecoder::new(40), &models, &mut sink)
        .unwrap();

    assert_eq!(report.frames_written, 40);
    assert!(report.peak_buffered_frames <= bound, "peak {}", report.peak_buffered_frames);
    assert!(report.peak_buffered_frames >= 2);
}

#[test]
fn test_pending_window_caps_completed_batches() {
    let mut cfg = config(3, 1);
    cfg.max_pending_batches = Some(1);
    let pipeline = Pipeline::new(cfg).unwrap();
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(
            &mut SyntheticDecoder::new(12),
            &FillProvider::new(MATTE_HEIGHT),
            &mut sink,
        )
        .unwrap();

    assert_eq!(sink.indices, (0..12).collect::<Vec<_>>());
    assert!(report.peak_pending_batches <= 1);
}

#[test]
fn test_output_does_not_depend_on_worker_count() {
    let mut outputs = Vec::new();
    for workers in [1, 3] {
        let pipeline = Pipeline::new(config(workers, 2)).unwrap();
        let mut sink = RawSink::new(Vec::new());
        pipeline
            .run(
                &mut SyntheticDecoder::new(11),
                &FillProvider::new(MATTE_HEIGHT),
                &mut sink,
            )
            .unwrap();
        outputs.push(sink.into_inner());
    }

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], expected_bytes(11));
}

#[test]
fn test_idle_workers_never_load_a_model() {
    let pipeline = Pipeline::new(config(4, 5)).unwrap();
    let models = FillProvider::new(MATTE_HEIGHT);
    let mut sink = RecordingSink::default();

    let report = pipeline
        .run(&mut SyntheticDecoder::new(7), &models, &mut sink)
        .unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(models.loads.load(Ordering::SeqCst), 2);
    assert_eq!(sink.indices.len(), 7);
}

#[test]
fn test_empty_source_is_rejected() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(
            &mut SyntheticDecoder::new(0),
            &FillProvider::new(MATTE_HEIGHT),
            &mut sink,
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoFrames));
    assert_eq!(sink.begins, 0);
}

#[test]
fn test_truncated_source_is_fatal() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let mut decoder = SyntheticDecoder::new(10).truncated_at(6);
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(&mut decoder, &FillProvider::new(MATTE_HEIGHT), &mut sink)
        .unwrap_err();

    assert!(
        matches!(err, PipelineError::SourceTruncated { expected: 10, decoded: 6 }),
        "{err:?}"
    );
    assert!(sink.aborted);
}

#[test]
fn test_decode_error_names_the_frame() {
    let pipeline = Pipeline::new(config(1, 2)).unwrap();
    let mut decoder = SyntheticDecoder::new(8).failing_at(4);
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(&mut decoder, &FillProvider::new(MATTE_HEIGHT), &mut sink)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Decode { index: 4, .. }), "{err:?}");
}

#[test]
fn test_model_load_failure_is_fatal() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let mut models = FillProvider::new(MATTE_HEIGHT);
    models.fail_load_worker = Some(1);
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(&mut SyntheticDecoder::new(8), &models, &mut sink)
        .unwrap_err();

    assert!(matches!(err, PipelineError::ModelLoad { worker: 1, .. }), "{err:?}");
    assert!(sink.aborted);
}

#[test]
fn test_matte_of_wrong_height_is_rejected() {
    let pipeline = Pipeline::new(config(1, 2)).unwrap();
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(
            &mut SyntheticDecoder::new(4),
            &FillProvider::new(MATTE_HEIGHT + 1),
            &mut sink,
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::MatteShape { index: 0, .. }), "{err:?}");
}

#[test]
fn test_worker_panic_is_fatal() {
    let pipeline = Pipeline::new(config(1, 2)).unwrap();
    let handle = pipeline.cancel_handle();
    let mut models = FillProvider::new(MATTE_HEIGHT);
    models.panic_on_frame = Some(2);

    let (result, sink) = run_with_deadline(
        pipeline,
        SyntheticDecoder::new(20),
        models,
        RecordingSink::default(),
    );

    let err = result.unwrap_err();
    assert!(
        matches!(&err, PipelineError::UnitPanicked { unit } if unit == "matte-worker-0"),
        "{err:?}"
    );
    assert_eq!(handle.state(), PipelineState::Fatal);
    assert!(sink.aborted);
    assert!(!sink.finished);
    assert!(sink.indices.iter().all(|&i| i < 2), "{:?}", sink.indices);
}

#[test]
fn test_sink_panic_is_fatal() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let sink = RecordingSink {
        panic_on_write: Some(3),
        ..RecordingSink::default()
    };

    let (result, sink) = run_with_deadline(
        pipeline,
        SyntheticDecoder::new(20),
        FillProvider::new(MATTE_HEIGHT),
        sink,
    );

    let err = result.unwrap_err();
    assert!(
        matches!(&err, PipelineError::UnitPanicked { unit } if unit == "sequencer"),
        "{err:?}"
    );
    assert!(sink.aborted);
    assert!(!sink.finished);
    assert_eq!(sink.indices, vec![0, 1, 2]);
}

#[test]
fn test_cancel_during_run() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let handle = pipeline.cancel_handle();
    let mut models = FillProvider::new(MATTE_HEIGHT);
    models.cancel_on_frame = Some((6, handle.clone()));
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(&mut SyntheticDecoder::new(30), &models, &mut sink)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled), "{err:?}");
    assert_eq!(handle.state(), PipelineState::Fatal);
    assert!(sink.aborted);
    assert!(!sink.finished);
}

#[test]
fn test_cancel_before_run() {
    let pipeline = Pipeline::new(config(1, 2)).unwrap();
    pipeline.cancel_handle().cancel();
    let mut decoder = SyntheticDecoder::new(4);
    let pulled = decoder.pulled();
    let mut sink = RecordingSink::default();

    let err = pipeline
        .run(&mut decoder, &FillProvider::new(MATTE_HEIGHT), &mut sink)
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(pulled.load(Ordering::SeqCst), 0);
}

#[test]
fn test_successful_run_ends_done() {
    let pipeline = Pipeline::new(config(2, 2)).unwrap();
    let handle = pipeline.cancel_handle();
    assert_eq!(handle.state(), PipelineState::Starting);

    pipeline
        .run(
            &mut SyntheticDecoder::new(5),
            &FillProvider::new(MATTE_HEIGHT),
            &mut RecordingSink::default(),
        )
        .unwrap();

    assert_eq!(handle.state(), PipelineState::Done);
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = Pipeline::new(config(0, 2)).err().unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_frames_leave_in_order(
        frames in 1usize..30,
        workers in 1usize..4,
        batch_size in 1usize..5,
        prefetch in 1usize..3,
    ) {
        let mut cfg = config(workers, batch_size);
        cfg.prefetch_batches = prefetch;
        let pipeline = Pipeline::new(cfg).unwrap();
        let mut sink = RecordingSink::default();

        let report = pipeline
            .run(&mut SyntheticDecoder::new(frames), &FillProvider::new(MATTE_HEIGHT), &mut sink)
            .unwrap();

        prop_assert_eq!(report.frames_written, frames);
        prop_assert_eq!(sink.indices, (0..frames).collect::<Vec<_>>());
        prop_assert_eq!(sink.bytes, expected_bytes(frames));
    }
}
