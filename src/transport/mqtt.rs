//! MQTT link used for both the inbound job queue and the outbound broadcast topic.
//!
//! One rumqttc client is shared by publishers; a dedicated thread drives the
//! connection. Once a local [`JobSender`] is attached the bridge subscribes
//! to the queue topic after every (re)connect and forwards each message
//! payload to the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS};

use crate::dispatch::Broadcaster;
use crate::error::DukerError;
use crate::transport::tls::{MqttEndpoint, TlsMaterials};
use crate::worker::{JobQueue, JobSender};

pub const DEFAULT_QUEUE_TOPIC: &str = "faceConverter";
pub const DEFAULT_CLIENT_ID: &str = "dukerd";

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct MqttLinkConfig {
    pub endpoint: MqttEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub queue_topic: String,
    /// Largest packet accepted from the broker (queued jobs).
    pub max_incoming_bytes: usize,
    /// Largest packet handed to the broker (broadcasts and forwarded jobs).
    pub max_outgoing_bytes: usize,
}

/// Encoded size of a PUBLISH packet, as the client measures it before sending.
/// Counts the packet id even at QoS 0 and the widest remaining-length field.
pub fn publish_packet_size(topic: &str, payload_len: usize) -> usize {
    const FIXED_HEADER: usize = 1 + 4;
    const TOPIC_LEN_PREFIX: usize = 2;
    const PACKET_ID: usize = 2;
    FIXED_HEADER + TOPIC_LEN_PREFIX + topic.len() + PACKET_ID + payload_len
}

type SharedJobs = Arc<Mutex<Option<JobSender>>>;

pub struct MqttBridge {
    client: Client,
    queue_topic: String,
    max_outgoing_bytes: usize,
    jobs: SharedJobs,
    shutdown: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBridge {
    /// Connect to the broker. Queue consumption starts with [`MqttBridge::attach_jobs`].
    pub fn connect(cfg: &MqttLinkConfig) -> Result<Self> {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.endpoint.host, cfg.endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);
        options.set_max_packet_size(cfg.max_incoming_bytes, cfg.max_outgoing_bytes);
        if let Some(user) = cfg.username.as_deref() {
            options.set_credentials(user, cfg.password.as_deref().unwrap_or_default());
        }
        options.set_transport(cfg.tls.build_transport(&cfg.endpoint)?);

        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let jobs: SharedJobs = Arc::new(Mutex::new(None));

        let driver = ConnectionDriver {
            client: client.clone(),
            queue_topic: cfg.queue_topic.clone(),
            jobs: jobs.clone(),
            shutdown: shutdown.clone(),
        };
        let join = std::thread::Builder::new()
            .name("duker-mqtt".to_string())
            .spawn(move || driver.run(connection))
            .context("spawn mqtt connection thread")?;

        log::info!(
            "MQTT link to {}:{} (TLS: {}, auth: {})",
            cfg.endpoint.host,
            cfg.endpoint.port,
            cfg.endpoint.use_tls,
            cfg.username.is_some()
        );
        Ok(Self {
            client,
            queue_topic: cfg.queue_topic.clone(),
            max_outgoing_bytes: cfg.max_outgoing_bytes,
            jobs,
            shutdown,
            join: Mutex::new(Some(join)),
        })
    }

    /// Feed queue topic messages to `jobs` from now on.
    pub fn attach_jobs(&self, jobs: JobSender) {
        *lock_jobs(&self.jobs) = Some(jobs);
        subscribe(&self.client, &self.queue_topic);
    }

    /// Stop the connection thread and release the attached [`JobSender`].
    pub fn disconnect(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        lock_jobs(&self.jobs).take();
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request failed: {}", e);
        }
        let join = self
            .join
            .lock()
            .map_err(|_| anyhow!("mqtt join handle lock poisoned"))?
            .take();
        if let Some(join) = join {
            join.join()
                .map_err(|_| anyhow!("mqtt connection thread panicked"))?;
        }
        Ok(())
    }

    /// Oversized packets must be refused here: the event loop answers them by
    /// dropping the connection.
    fn check_outgoing(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let size = publish_packet_size(topic, payload.len());
        if size > self.max_outgoing_bytes {
            return Err(anyhow!(
                "{size} byte packet for {topic} exceeds the {} byte MQTT limit",
                self.max_outgoing_bytes
            ));
        }
        Ok(())
    }
}

fn lock_jobs(jobs: &SharedJobs) -> MutexGuard<'_, Option<JobSender>> {
    jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn subscribe(client: &Client, topic: &str) {
    match client.try_subscribe(topic, QoS::AtLeastOnce) {
        Ok(()) => log::info!("subscribed to {}", topic),
        Err(e) => log::error!("failed to subscribe to {}: {}", topic, e),
    }
}

impl Broadcaster for MqttBridge {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.check_outgoing(topic, &payload)?;
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .with_context(|| format!("publish to {topic}"))
    }
}

impl JobQueue for MqttBridge {
    fn enqueue(&self, payload: Vec<u8>) -> std::result::Result<(), DukerError> {
        if let Err(e) = self.check_outgoing(&self.queue_topic, &payload) {
            log::warn!("job not forwarded: {e}");
            return Err(DukerError::QueueFull);
        }
        self.client
            .try_publish(self.queue_topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| {
                log::warn!("failed to enqueue job on {}: {}", self.queue_topic, e);
                DukerError::QueueFull
            })
    }
}

struct ConnectionDriver {
    client: Client,
    queue_topic: String,
    jobs: SharedJobs,
    shutdown: Arc<AtomicBool>,
}

impl ConnectionDriver {
    fn run(self, mut connection: Connection) {
        for event in connection.iter() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.on_message(&publish.topic, publish.payload.to_vec())
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}. Reconnecting...", e);
                    std::thread::sleep(RECONNECT_DELAY);
                }
            }
        }
        log::debug!("MQTT connection thread exiting");
    }

    fn on_connected(&self) {
        log::info!("connected to MQTT broker");
        if lock_jobs(&self.jobs).is_some() {
            subscribe(&self.client, &self.queue_topic);
        }
    }

    fn on_message(&self, topic: &str, payload: Vec<u8>) {
        let guard = lock_jobs(&self.jobs);
        let Some(jobs) = guard.as_ref() else {
            return;
        };
        if topic != self.queue_topic {
            log::debug!("ignoring message on {}", topic);
            return;
        }
        log::info!("received job from {} ({} bytes)", topic, payload.len());
        if let Err(e) = jobs.enqueue(payload) {
            log::warn!("queued job dropped: {}", e);
        }
    }
}
