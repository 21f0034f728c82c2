//! Pipeline controller behaviour: selection, history, classification and failure paths


use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use imageid_classifiers::{
    CandleImageModel, IdentifyOutcome, ModelHandle, ModelStore, OutputActivation,
    PipelineBuilder, PipelineConfig, PipelinePhase, Readiness,
};
use imageid_core::{Error, ImageReference, InputShape, InputSpec, TensorLayout};
use mock_models::*;
use std::sync::Arc;
use std::time::Duration;

fn html_fetcher() -> Arc<StaticFetcher> {
    Arc::new(StaticFetcher::new(&b"<!doctype html><html><body>cat</body></html>"[..]))
}

#[tokio::test]
async fn test_same_selection_twice_records_twice() {
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![0.5, 0.5])),
        2,
        html_fetcher(),
    );

    controller.enter_url("https://example.com/cat.png").unwrap();
    controller.enter_url("https://example.com/cat.png").unwrap();

    let history = controller.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reference, history[1].reference);
    assert_eq!(
        history[0].reference,
        ImageReference::url("https://example.com/cat.png")
    );
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert_eq!(controller.metrics().snapshot().selections, 2);
}

#[tokio::test]
async fn test_select_history_replays_without_recording() {
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![0.2, 0.8])),
        2,
        html_fetcher(),
    );

    let first = controller.upload(png_bytes(4, 4, [255, 0, 0])).unwrap();
    controller.enter_url("https://example.com/dog.png").unwrap();
    assert_eq!(controller.history().len(), 2);

    let replayed = controller.select_history(1).unwrap();
    assert_eq!(replayed, first);
    assert_eq!(controller.current(), Some(first));
    assert_eq!(controller.history().len(), 2);
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);

    assert!(matches!(
        controller.select_history(5),
        Err(Error::HistoryIndex { index: 5, len: 2 })
    ));
}

#[tokio::test]
async fn test_identify_upload_produces_results() {
    let model = Arc::new(MockModel::new("m", vec![0.1, 0.7, 0.2]));
    let controller = controller_with(model.clone(), 3, html_fetcher());

    controller.enter_url("typing...").unwrap();
    controller.upload(png_bytes(20, 10, [0, 128, 255])).unwrap();

    let outcome = controller.identify().await.unwrap();
    match outcome {
        IdentifyOutcome::Completed(scores) => assert_eq!(scores.scores(), &[0.1, 0.7, 0.2]),
        other => panic!("Expected completion, got {:?}", other),
    }

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, PipelinePhase::Results);
    assert!(snapshot.url_input.is_empty());
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.history_len, 2);
    assert_eq!(snapshot.model, Readiness::Ready);

    let rows = controller.results();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].label, "Class 1");
    assert_eq!(rows[1].confidence, "70.00%");
    assert_eq!(model.call_count(), 1);

    let metrics = controller.metrics().snapshot();
    assert_eq!(metrics.classifications, 1);
    assert_eq!(metrics.failures(), 0);
}

#[tokio::test]
async fn test_concurrent_identify_runs_model_once() {
    let model = Arc::new(
        MockModel::new("slow", vec![0.6, 0.4]).with_latency(Duration::from_millis(50)),
    );
    let controller = controller_with(model.clone(), 2, html_fetcher());
    controller.upload(png_bytes(8, 8, [10, 10, 10])).unwrap();

    let (first, second) = tokio::join!(controller.identify(), controller.identify());

    assert!(matches!(first, Ok(IdentifyOutcome::Completed(_))));
    assert!(matches!(second, Ok(IdentifyOutcome::AlreadyRunning)));
    assert_eq!(model.call_count(), 1);
    assert_eq!(controller.history().len(), 1);
    assert_eq!(controller.phase(), PipelinePhase::Results);
}

#[tokio::test]
async fn test_selection_rejected_while_classifying() {
    let model = Arc::new(
        MockModel::new("slow", vec![1.0]).with_latency(Duration::from_millis(50)),
    );
    let controller = controller_with(model, 1, html_fetcher());
    let selected = controller.upload(png_bytes(8, 8, [1, 2, 3])).unwrap();

    let (identified, selection) = tokio::join!(controller.identify(), async {
        controller.enter_url("https://example.com/other.png")
    });

    assert!(identified.is_ok());
    assert!(matches!(selection, Err(Error::Busy)));
    assert_eq!(controller.current(), Some(selected));
    assert_eq!(controller.history().len(), 1);
}

#[tokio::test]
async fn test_fifty_classifications_release_every_tensor() {
    let model = Arc::new(MockModel::new("m", vec![0.25, 0.75]));
    let controller = controller_with(model.clone(), 2, html_fetcher());
    controller.upload(png_bytes(32, 32, [200, 100, 50])).unwrap();

    for _ in 0..50 {
        let outcome = controller.identify().await.unwrap();
        assert!(matches!(outcome, IdentifyOutcome::Completed(_)));
    }

    let stats = controller.tensor_tracker().snapshot();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.peak, 1);
    assert_eq!(stats.allocated, 50);
    assert_eq!(model.call_count(), 50);
}

#[tokio::test]
async fn test_dense_zero_model_on_black_image() {
    let shape = InputShape::square(224);
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let model =
        CandleImageModel::dense("zeros", shape, 3, OutputActivation::Softmax, vb).unwrap();
    let handle = ModelHandle::new(
        "zeros",
        InputSpec::new(shape, TensorLayout::Nhwc),
        3,
        Device::Cpu,
        Arc::new(model),
    );

    let controller = PipelineBuilder::new(Arc::new(ModelStore::ready(handle)))
        .fetcher(html_fetcher())
        .build()
        .unwrap();
    controller.upload(png_bytes(100, 100, [0, 0, 0])).unwrap();

    let scores = match controller.identify().await.unwrap() {
        IdentifyOutcome::Completed(scores) => scores,
        other => panic!("Expected completion, got {:?}", other),
    };

    assert_eq!(scores.len(), 3);
    assert!(scores.all_finite());
    let sum = scores.sum();
    assert!((0.0..=3.0).contains(&sum));
    for score in scores.scores() {
        assert!((score - 1.0 / 3.0).abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_non_image_url_is_decode_error() {
    let fetcher = html_fetcher();
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![0.5, 0.5])),
        2,
        fetcher.clone(),
    );

    let reference = controller
        .enter_url("https://example.com/index.html")
        .unwrap()
        .unwrap();
    let err = controller.identify().await.unwrap_err();

    assert!(matches!(err, Error::Decode(_)));
    assert_eq!(fetcher.call_count(), 1);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.phase, PipelinePhase::ImageSelected);
    assert_eq!(snapshot.current, Some(reference));
    assert_eq!(snapshot.history_len, 1);
    assert!(snapshot.results.is_none());
    assert!(snapshot.last_error.unwrap().starts_with("decode error"));
    assert_eq!(controller.metrics().snapshot().decode_failures, 1);
}

#[tokio::test]
async fn test_unreachable_url_keeps_selection() {
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![1.0])),
        1,
        Arc::new(NotFoundFetcher),
    );

    controller.enter_url("https://example.com/missing.png").unwrap();
    assert!(matches!(controller.identify().await, Err(Error::Decode(_))));
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert!(controller.results().is_empty());
}

#[tokio::test]
async fn test_previous_results_cleared_by_failed_retry() {
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![0.3, 0.7])),
        2,
        html_fetcher(),
    );

    controller.upload(png_bytes(8, 8, [0, 0, 0])).unwrap();
    controller.identify().await.unwrap();
    assert_eq!(controller.results().len(), 2);

    controller.enter_url("https://example.com/page.html").unwrap();
    assert!(controller.results().is_empty());
    assert!(controller.identify().await.is_err());
    assert!(controller.results().is_empty());
}

#[tokio::test]
async fn test_forward_failure_is_inference_error() {
    let controller = controller_with(Arc::new(FailingModel::new()), 2, html_fetcher());
    controller.upload(png_bytes(8, 8, [5, 5, 5])).unwrap();

    let err = controller.identify().await.unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert_eq!(controller.tensor_tracker().live(), 0);
    assert_eq!(controller.metrics().snapshot().inference_failures, 1);
}

#[tokio::test]
async fn test_identify_without_selection() {
    let controller = controller_with(Arc::new(MockModel::new("m", vec![1.0])), 1, html_fetcher());

    assert!(matches!(
        controller.identify().await,
        Err(Error::NoImageSelected)
    ));
    assert_eq!(controller.phase(), PipelinePhase::Idle);
}

#[tokio::test]
async fn test_empty_url_clears_selection() {
    let controller = controller_with(Arc::new(MockModel::new("m", vec![1.0])), 1, html_fetcher());

    controller.enter_url("https://example.com/a.png").unwrap();
    assert_eq!(controller.enter_url("   ").unwrap(), None);

    assert_eq!(controller.phase(), PipelinePhase::Idle);
    assert_eq!(controller.current(), None);
    assert_eq!(controller.history().len(), 1);
}

#[tokio::test]
async fn test_identify_while_model_loading() {
    let model = Arc::new(MockModel::new("m", vec![0.5, 0.5]));
    let loader = StaticLoader::new(handle_for(model.clone(), 2))
        .with_delay(Duration::from_millis(100));
    let store = Arc::new(ModelStore::new(Arc::new(loader)));
    let controller = PipelineBuilder::new(store.clone())
        .fetcher(html_fetcher())
        .build()
        .unwrap();

    let loading = store.spawn_load();
    controller.upload(png_bytes(8, 8, [9, 9, 9])).unwrap();

    let err = controller.identify().await.unwrap_err();
    assert!(matches!(err, Error::NotReady(_)));
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert_eq!(
        controller.snapshot().last_error.as_deref(),
        Some("model not ready: Model Loading...")
    );

    loading.await.unwrap().unwrap();
    assert!(controller.identify().await.is_ok());
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_identify_after_failed_load() {
    let store = Arc::new(ModelStore::new(Arc::new(FailingLoader)));
    assert!(store.load().await.is_err());

    let controller = PipelineBuilder::new(store)
        .fetcher(html_fetcher())
        .build()
        .unwrap();
    controller.upload(png_bytes(8, 8, [9, 9, 9])).unwrap();

    let err = controller.identify().await.unwrap_err();
    assert!(matches!(err, Error::Load(_)));
    assert!(!err.is_recoverable());
    assert!(matches!(controller.snapshot().model, Readiness::Failed(_)));
}

#[tokio::test]
async fn test_cancelled_identify_returns_to_selected() {
    let model = Arc::new(
        MockModel::new("slow", vec![1.0]).with_latency(Duration::from_millis(200)),
    );
    let controller = controller_with(model, 1, html_fetcher());
    controller.upload(png_bytes(8, 8, [1, 1, 1])).unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), controller.identify()).await;
    assert!(timed_out.is_err());

    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert!(controller.results().is_empty());
}

#[tokio::test]
async fn test_subscribers_see_transitions() {
    let controller = controller_with(
        Arc::new(MockModel::new("m", vec![0.9, 0.1])),
        2,
        html_fetcher(),
    );
    let mut updates = controller.subscribe();

    controller.upload(png_bytes(8, 8, [0, 0, 0])).unwrap();
    assert!(updates.has_changed().unwrap());
    assert_eq!(
        updates.borrow_and_update().phase,
        PipelinePhase::ImageSelected
    );

    controller.identify().await.unwrap();
    let latest = updates.borrow_and_update().clone();
    assert_eq!(latest.phase, PipelinePhase::Results);
    assert_eq!(latest.class_scores()[0].confidence, "90.00%");
}

#[tokio::test]
async fn test_upload_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload.png");
    std::fs::write(&path, png_bytes(6, 6, [1, 2, 3])).unwrap();

    let controller = controller_with(Arc::new(MockModel::new("m", vec![1.0])), 1, html_fetcher());
    let reference = controller.upload_file(&path).await.unwrap();

    assert!(matches!(reference, ImageReference::Blob(_)));
    assert!(controller.blob_store().contains(reference.locator()));
    assert!(controller.identify().await.is_ok());

    let missing = controller.upload_file(dir.path().join("missing.png")).await;
    assert!(matches!(missing, Err(Error::Io(_))));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_decode_error() {
    let mut config = PipelineConfig::default();
    config.decoder.fetch_timeout_secs = Some(1);
    let controller = controller_with_config(
        Arc::new(MockModel::new("m", vec![1.0])),
        1,
        Arc::new(HangingFetcher),
        config,
    );

    let reference = controller
        .enter_url("https://example.com/slow.png")
        .unwrap()
        .unwrap();
    let err = controller.identify().await.unwrap_err();

    assert!(matches!(err, Error::Decode(ref msg) if msg.contains("timed out")));
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert_eq!(controller.current(), Some(reference));
    assert_eq!(controller.metrics().snapshot().decode_failures, 1);
}

#[tokio::test]
async fn test_forward_timeout_is_inference_error() {
    let mut config = PipelineConfig::default();
    config.inference.timeout_secs = Some(1);
    let model = Arc::new(
        MockModel::new("slow", vec![1.0]).with_latency(Duration::from_millis(1500)),
    );
    let controller = controller_with_config(model, 1, html_fetcher(), config);
    controller.upload(png_bytes(8, 8, [4, 4, 4])).unwrap();

    let err = controller.identify().await.unwrap_err();
    assert!(matches!(err, Error::Inference(ref msg) if msg.contains("timed out")));
    assert_eq!(controller.phase(), PipelinePhase::ImageSelected);
    assert!(controller.results().is_empty());

    // the abandoned forward pass still owns its tensor until it returns
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while controller.tensor_tracker().live() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(controller.tensor_tracker().live(), 0);
}

#[tokio::test]
async fn test_evicted_upload_releases_blob() {
    let mut config = PipelineConfig::default();
    config.history.limit = Some(2);
    let controller = controller_with_config(
        Arc::new(MockModel::new("m", vec![1.0])),
        1,
        html_fetcher(),
        config,
    );

    let first = controller.upload(png_bytes(4, 4, [1, 1, 1])).unwrap();
    let second = controller.upload(png_bytes(4, 4, [2, 2, 2])).unwrap();
    controller.select_image(first.clone()).unwrap();
    assert_eq!(controller.blob_store().len(), 2);

    // second is evicted but first is still listed at the front
    controller.enter_url("https://example.com/a.png").unwrap();
    assert!(!controller.blob_store().contains(second.locator()));
    assert!(controller.blob_store().contains(first.locator()));

    controller.enter_url("https://example.com/b.png").unwrap();
    assert!(controller.blob_store().is_empty());
    assert_eq!(controller.history().len(), 2);
}

#[tokio::test]
async fn test_subscribers_see_model_become_ready() {
    let model = Arc::new(MockModel::new("m", vec![1.0]));
    let loader = StaticLoader::new(handle_for(model, 1)).with_delay(Duration::from_millis(30));
    let store = Arc::new(ModelStore::new(Arc::new(loader)));
    let controller = PipelineBuilder::new(store.clone())
        .fetcher(html_fetcher())
        .build()
        .unwrap();
    let mut updates = controller.subscribe();
    assert_eq!(updates.borrow_and_update().model, Readiness::Loading);

    let _loading = store.spawn_load();
    tokio::time::timeout(
        Duration::from_secs(2),
        updates.wait_for(|snapshot| snapshot.model.is_ready()),
    )
    .await
    .expect("snapshot should report the loaded model")
    .unwrap();
    assert_eq!(controller.phase(), PipelinePhase::Idle);
}
