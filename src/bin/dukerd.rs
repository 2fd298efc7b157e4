//! dukerd - face masking daemon
//!
//! This daemon:
//! 1. Loads the classifier once up-front and refuses to start without it
//! 2. Starts the worker pool (one detector per worker)
//! 3. Connects the MQTT link for the job queue and broadcast topics, if configured
//! 4. Serves the HTTP API until Ctrl-C

use anyhow::{Context, Result};
use std::sync::mpsc;
use std::sync::Arc;

use duker::{
    api::{ApiConfig, ApiServer},
    config::DukerdConfig,
    transport::MqttBridge,
    Broadcaster, Dispatcher, FaceService, JobQueue, WorkerPool,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = DukerdConfig::load()?;
    let builder = config.detector_builder();
    let first_detector = builder.build().context("dukerd cannot start")?;
    log::info!(
        "classifier {} loaded ({:?})",
        builder.classifier_source().display(),
        first_detector.settings()
    );

    let bridge = match config.mqtt_link()? {
        Some(link) => Some(Arc::new(MqttBridge::connect(&link)?)),
        None => {
            log::warn!(
                "no MQTT broker configured; broadcasts are dropped and /queue uses the local pool"
            );
            None
        }
    };

    let mut dispatcher = Dispatcher::new().with_topic(config.broadcast_topic.clone());
    if let Some(bridge) = &bridge {
        dispatcher = dispatcher.with_broadcaster(bridge.clone() as Arc<dyn Broadcaster>);
    }

    let mut first_detector = Some(first_detector);
    let pool = WorkerPool::spawn(config.workers, |_| {
        let detector = match first_detector.take() {
            Some(detector) => detector,
            None => builder.build()?,
        };
        Ok(FaceService::with_detector(Arc::new(detector)).with_dispatcher(dispatcher.clone()))
    })?;

    let queue: Arc<dyn JobQueue> = match (&bridge, pool.sender()) {
        (Some(bridge), Some(sender)) => {
            bridge.attach_jobs(sender);
            bridge.clone() as Arc<dyn JobQueue>
        }
        (None, Some(sender)) => Arc::new(sender) as Arc<dyn JobQueue>,
        (_, None) => anyhow::bail!("worker pool has no job sender"),
    };

    let api_service = FaceService::with_detector(Arc::new(builder.build()?))
        .with_dispatcher(dispatcher.clone());
    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        max_upload_bytes: config.max_upload_bytes,
    };
    log::info!(
        "pipeline {} -> {}, broadcasts on {}",
        api_service.pipeline().detector_name(),
        api_service.pipeline().transformer_name(),
        api_service.dispatcher().topic()
    );
    let api_handle = ApiServer::new(api_config, api_service, Some(queue)).spawn()?;
    log::info!("dukerd running. api on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("dukerd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    api_handle.stop()?;
    if let Some(bridge) = &bridge {
        bridge.disconnect()?;
    }
    pool.shutdown()?;

    Ok(())
}
