//! The presentation-facing call surface end to end.

use std::sync::Arc;
use std::time::Duration;

use tally_application::{AppConfig, BridgeError, InferenceBridge, Readiness, ReadinessProbe};
use tally_bridge::{ChannelListener, ContentPart, GenerationEvent};
use tally_engine::{EngineError, EngineResponse, GenerationOptions, ScriptedEngine};
use tally_events::InMemoryEventBus;
use tally_models::{ModelName, ModelStore, StoreConfig};
use tempfile::{tempdir, TempDir};

struct Fixture {
    dir: TempDir,
    engine: ScriptedEngine,
    bus: Arc<InMemoryEventBus>,
    bridge: InferenceBridge,
}

fn fixture(engine: ScriptedEngine, seed: &[ModelName]) -> Fixture {
    let dir = tempdir().unwrap();
    let mut config = StoreConfig::rooted_at(dir.path());
    config.assets_dir = Some(dir.path().join("assets"));
    let store = Arc::new(ModelStore::new(config));
    for name in seed {
        let path = store.local_path(*name).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"weights").unwrap();
    }
    let bus = Arc::new(InMemoryEventBus::new());
    let bridge = InferenceBridge::new(store, Arc::new(engine.clone()), bus.clone());
    Fixture {
        dir,
        engine,
        bus,
        bridge,
    }
}

async fn wait_for_topic(bus: &InMemoryEventBus, topic: &str) {
    for _ in 0..200 {
        if !bus.events_for(topic).is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no {topic} event");
}

#[tokio::test]
async fn start_stream_publishes_events_tagged_with_its_id() {
    let fx = fixture(ScriptedEngine::new(), &[ModelName::Small]);
    fx.bridge.load_named(ModelName::Small).await.unwrap();
    fx.bus.clear();

    let id = fx
        .bridge
        .start_stream(&[ContentPart::text("Lunch 12.40")], None)
        .await
        .unwrap();
    wait_for_topic(&fx.bus, "leap:done").await;

    let events = fx.bus.events();
    assert_eq!(
        events.iter().map(|e| e.topic.as_str()).collect::<Vec<_>>(),
        vec!["leap:chunk", "leap:chunk", "leap:done"]
    );
    assert!(events.iter().all(|e| e.payload["streamId"] == id.as_str()));
    assert_eq!(events[2].payload["tps"], 42.0);
    assert!(!fx.bridge.stop_stream(&id));
}

#[tokio::test]
async fn start_stream_without_model_fails_synchronously() {
    let fx = fixture(ScriptedEngine::new(), &[]);
    let err = fx
        .bridge
        .start_stream(&[ContentPart::text("hi")], None)
        .await
        .unwrap_err();
    assert_eq!(err, BridgeError::NoModelLoaded);
    assert!(fx.bus.is_empty());
}

#[tokio::test]
async fn in_stream_failure_is_an_error_event() {
    let engine = ScriptedEngine::new().with_script(vec![
        Ok(EngineResponse::Chunk("Total".into())),
        Err(EngineError::Generation("context overflow".into())),
    ]);
    let fx = fixture(engine, &[ModelName::Small]);
    fx.bridge.load_named(ModelName::Small).await.unwrap();

    let id = fx
        .bridge
        .start_stream(&[ContentPart::text("hi")], None)
        .await
        .unwrap();
    wait_for_topic(&fx.bus, "leap:error").await;

    let errors = fx.bus.events_for("leap:error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].payload["streamId"], id.as_str());
    assert_eq!(errors[0].payload["error"], "generation failed: context overflow");
    assert!(fx.bus.events_for("leap:done").is_empty());
}

#[tokio::test]
async fn options_fall_back_to_defaults() {
    let fx = fixture(ScriptedEngine::new(), &[ModelName::Small]);
    let bridge = fx.bridge.with_defaults(GenerationOptions {
        system_prompt: Some("You read receipts.".into()),
        max_tokens: Some(256),
        temperature: None,
    });
    bridge.load_named(ModelName::Small).await.unwrap();

    let (listener, mut rx) = ChannelListener::new();
    let session = bridge
        .start_stream_with(
            &[ContentPart::text("hi")],
            Some(GenerationOptions {
                max_tokens: Some(32),
                ..GenerationOptions::default()
            }),
            Arc::new(listener),
        )
        .await
        .unwrap();
    session.finished().await;

    let options = &fx.engine.requests()[0].options;
    assert_eq!(options.system_prompt.as_deref(), Some("You read receipts."));
    assert_eq!(options.max_tokens, Some(32));
    assert_eq!(options.temperature, None);

    let mut last = None;
    while let Ok((_, event)) = rx.try_recv() {
        last = Some(event);
    }
    assert!(matches!(last, Some(GenerationEvent::Done { .. })));
}

#[tokio::test]
async fn scan_receipt_collects_summary() {
    let fx = fixture(ScriptedEngine::new(), &[ModelName::Small]);
    fx.bridge.load_named(ModelName::Small).await.unwrap();

    // The photo does not decode, so only the prompt reaches the model.
    let summary = fx
        .bridge
        .scan_receipt("not-an-image", Some("Total and merchant?"))
        .await
        .unwrap();
    assert_eq!(summary, "Total and merchant? ");
    assert_eq!(fx.engine.requests()[0].message.image_count(), 0);
}

#[tokio::test]
async fn bridge_from_config_uses_configured_prompts() {
    let dir = tempdir().unwrap();
    let config = AppConfig {
        models_dir: Some(dir.path().join("models")),
        files_dir: Some(dir.path().join("files")),
        system_prompt: Some("You read receipts.".into()),
        scan_prompt: "List every line item.".into(),
        ..AppConfig::default()
    };
    let engine = ScriptedEngine::new();
    let bridge = InferenceBridge::from_config(
        &config,
        Arc::new(engine.clone()),
        Arc::new(InMemoryEventBus::new()),
    );
    let path = bridge.controller().store().local_path(ModelName::Small).unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"weights").unwrap();
    bridge.load_named(ModelName::Small).await.unwrap();

    let summary = bridge.scan_receipt("not-an-image", None).await.unwrap();
    assert_eq!(summary, "List every line item. ");

    let requests = engine.requests();
    assert_eq!(requests[0].message.text(), "List every line item.");
    assert_eq!(
        requests[0].options.system_prompt.as_deref(),
        Some("You read receipts.")
    );

    // An explicit prompt still wins.
    bridge
        .scan_receipt("not-an-image", Some("Total only."))
        .await
        .unwrap();
    assert_eq!(engine.requests()[1].message.text(), "Total only.");
}

#[tokio::test]
async fn scan_receipt_surfaces_stream_error() {
    let engine = ScriptedEngine::new()
        .with_script(vec![Err(EngineError::Generation("decoder crashed".into()))]);
    let fx = fixture(engine, &[ModelName::Small]);
    fx.bridge.load_named(ModelName::Small).await.unwrap();

    let err = fx.bridge.scan_receipt("x", None).await.unwrap_err();
    assert_eq!(
        err,
        BridgeError::Stream("generation failed: decoder crashed".into())
    );
}

#[tokio::test]
async fn load_model_by_path_replaces_resident_model() {
    let fx = fixture(ScriptedEngine::new(), &[ModelName::Small]);
    fx.bridge.load_named(ModelName::Small).await.unwrap();

    let bundle = fx.dir.path().join("custom.bundle");
    std::fs::write(&bundle, b"weights").unwrap();
    fx.bridge.load_model(&bundle).await.unwrap();

    assert_eq!(fx.engine.load_count(), 2);
    assert_eq!(fx.engine.unload_count(), 1);
    assert_eq!(fx.engine.loaded_paths().last(), Some(&bundle));

    fx.bridge.unload_model().await.unwrap();
    fx.bridge.unload_model().await.unwrap();
    assert_eq!(fx.engine.unload_count(), 2);
}

#[tokio::test]
async fn ensure_asset_copied_uses_bundled_models() {
    let fx = fixture(ScriptedEngine::new(), &[]);
    let bundled = fx.dir.path().join("assets").join("models");
    std::fs::create_dir_all(&bundled).unwrap();
    std::fs::write(bundled.join("lfm2-vl-450m.bundle"), b"bundled").unwrap();

    let path = fx
        .bridge
        .ensure_asset_copied("lfm2-vl-450m.bundle")
        .await
        .unwrap();
    assert!(path.starts_with(fx.dir.path().join("files")));
    fx.bridge.load_model(&path).await.unwrap();

    let err = fx.bridge.ensure_asset_copied("other.bundle").await.unwrap_err();
    assert_eq!(err, BridgeError::AssetMissing("other.bundle".into()));
}

#[tokio::test]
async fn readiness_reflects_local_models() {
    let fx = fixture(ScriptedEngine::new(), &[ModelName::Large]);
    let probe = ReadinessProbe::new(Arc::clone(fx.bridge.controller().store()));
    assert_eq!(probe.current(), Readiness::Checking);
    assert_eq!(
        probe.check().await,
        Readiness::Missing([ModelName::Small].into())
    );
    assert!(fx.bridge.local_path(ModelName::Small).is_err());
    assert!(fx.bridge.local_path(ModelName::Large).is_ok());
}
