use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use clap::Parser;
use futures::FutureExt;
use keyflow::commit::{ChannelScheduleCommit, ScheduleCommit};
use keyflow::core::{EnhancedFold, FoldError, FoldExtras, Record, SystemClock, TopicPartition};
use keyflow::dispatch::TopicFlow;
use keyflow::infra::{Cli, Settings, configure_tracing, get_config_settings};
use keyflow::stores::{RetryingSnapshotStore, SnapshotStore};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use tokio::select;
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{error, info, warn};

/// Demo fold: each record's payload is a decimal integer; the state is the
/// running sum of every value seen for that key.
struct RunningSum;

#[async_trait]
impl EnhancedFold<i64> for RunningSum {
    async fn fold(
        &self,
        extras: &mut FoldExtras,
        state: Option<i64>,
        record: &Record,
    ) -> Result<Option<i64>, FoldError> {
        let text = std::str::from_utf8(&record.value)
            .map_err(|e| FoldError::new(demo_key(record), record.offset, e))?;
        let value: i64 = text
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| FoldError::new(demo_key(record), record.offset, e))?;

        if value == 0 {
            // A zero value deletes the key's running sum outright.
            return Ok(None);
        }

        let next = state.unwrap_or(0) + value;
        // Every fifth update asks the engine to persist ahead of the
        // regular schedule, demonstrating `requestAdditionalPersist`.
        if next % 5 == 0 {
            extras.request_additional_persist();
        }
        Ok(Some(next))
    }
}

fn demo_key(record: &Record) -> keyflow::core::KafkaKey {
    keyflow::core::KafkaKey::new("keyflow-demo", "keyflow-demo-group", record.topic_partition.clone(), record.key.clone())
}

fn i64_codec(bytes: &[u8]) -> Result<i64, keyflow::core::StoreError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| keyflow::core::StoreError::Permanent(anyhow!("invalid i64 snapshot payload")))
}

fn i64_encode(value: &i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

type DemoKafkaStore = keyflow::stores::KafkaTopicSnapshotStore<i64>;
type DemoStore = RetryingSnapshotStore<Arc<DemoKafkaStore>>;
type DemoFlow = TopicFlow<i64, RunningSum, DemoStore, DemoKafkaStore, ChannelScheduleCommit>;

struct RecordIngest {
    settings: Settings,
    flow: std::sync::Mutex<DemoFlow>,
    reset_offsets: bool,
}

#[async_trait]
impl IntoSubsystem<anyhow::Error> for RecordIngest {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), anyhow::Error> {
        select!(
            result = self.ingest() => result,
            _ = subsys.on_shutdown_requested() => {
                info!("Record ingest shutdown.");
                Ok(())
            }
        )
    }
}

impl RecordIngest {
    async fn ingest(&self) -> anyhow::Result<()> {
        (|| async { self.try_ingest().await })
            .retry(ExponentialBuilder::default())
            .when(|_err| true)
            .sleep(tokio::time::sleep)
            .notify(|err, dur| error!("Restarting record ingest due to: {err:?} after {dur:?}"))
            .await
    }

    async fn try_ingest(&self) -> anyhow::Result<()> {
        let offset_reset = if self.reset_offsets { "earliest" } else { "latest" };
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &self.settings.kafka.group_id)
            .set("bootstrap.servers", &self.settings.kafka.bootstrap_servers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", self.settings.kafka.session_timeout_ms.to_string())
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset)
            .create()
            .context("Could not create StreamConsumer")?;
        consumer
            .subscribe(&[self.settings.kafka.input_topic.as_str()])
            .context("Could not subscribe to input topic")?;

        loop {
            let message = consumer.recv().await.map_err(|e: KafkaError| anyhow!(e))?;
            let partition = TopicPartition::new(message.topic().to_owned(), message.partition());
            let assigned_at = message.offset();

            let mut flow = self.flow.lock().expect("flow mutex poisoned");
            if !flow.is_assigned(&partition) {
                flow.on_assign(partition.clone(), assigned_at).await?;
            }

            let record = Record::new(
                partition.clone(),
                message.offset(),
                message.key().unwrap_or_default().to_vec(),
                message.payload().unwrap_or_default().to_vec(),
            );
            flow.apply(&partition, vec![record]).await?;
            drop(flow);

            consumer.store_offset(&partition.topic, partition.partition, message.offset())?;
        }
    }
}

struct Committer {
    receiver: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<keyflow::commit::CommitRequest>>,
    settings: Settings,
}

#[async_trait]
impl IntoSubsystem<anyhow::Error> for Committer {
    async fn run(self, subsys: SubsystemHandle) -> Result<(), anyhow::Error> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &self.settings.kafka.group_id)
            .set("bootstrap.servers", &self.settings.kafka.bootstrap_servers)
            .set("enable.auto.commit", "false")
            .create()
            .context("Could not create committing consumer handle")?;

        let mut receiver = self.receiver.lock().await;
        loop {
            select!(
                maybe_request = receiver.recv() => {
                    match maybe_request {
                        Some(request) => {
                            let mut tpl = TopicPartitionList::new();
                            tpl.add_partition_offset(
                                &request.partition.topic,
                                request.partition.partition,
                                rdkafka::Offset::Offset(request.offset),
                            )?;
                            if let Err(e) = consumer.commit(&tpl, rdkafka::consumer::CommitMode::Async) {
                                warn!("commit failed: {e}");
                            }
                        }
                        None => return Ok(()),
                    }
                }
                _ = subsys.on_shutdown_requested().map(Ok::<(), anyhow::Error>) => {
                    info!("Committer shutdown.");
                    return Ok(());
                }
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = get_config_settings().context("Could not read application configuration.")?;
    let _worker_guard = configure_tracing(&settings);

    let fold = Arc::new(RunningSum);
    // A single shared instance backs both roles: `KeyStore::list` scans the
    // compacted state topic to enumerate keys, and `SnapshotStore` reads
    // from/writes through the same cache that scan populates. Without
    // sharing the `Arc`, eager recovery and persistence would each see their
    // own independent copy of that cache.
    let kafka_store = Arc::new(
        keyflow::stores::KafkaTopicSnapshotStore::new(
            settings.application.id.clone(),
            settings.kafka.group_id.clone(),
            settings.kafka.bootstrap_servers.clone(),
            settings.kafka.input_topic.clone(),
            settings.kafka.state_topic.clone(),
            Duration::from_millis(settings.kafka.session_timeout_ms as u64),
            i64_codec,
            i64_encode,
        )
        .context("Could not construct state-topic snapshot store")?,
    );
    let key_store = kafka_store.clone();
    let store = Arc::new(RetryingSnapshotStore::new(kafka_store));
    let clock = Arc::new(SystemClock);
    let (scheduler, receiver) = ChannelScheduleCommit::new();
    let scheduler = Arc::new(scheduler);

    let flow_config = (&settings.flow).into();
    let flow = TopicFlow::new(
        settings.application.id.clone(),
        settings.kafka.group_id.clone(),
        fold,
        store,
        key_store,
        clock,
        scheduler,
        flow_config,
    );

    let ingest = RecordIngest {
        settings: settings.clone(),
        flow: std::sync::Mutex::new(flow),
        reset_offsets: cli.reset_offsets,
    };
    let committer = Committer { receiver: tokio::sync::Mutex::new(receiver), settings: settings.clone() };

    Toplevel::new(async |s| {
        s.start(SubsystemBuilder::new("RecordIngest", ingest.into_subsystem()));
        s.start(SubsystemBuilder::new("Committer", committer.into_subsystem()));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(2000))
    .await
    .map_err(Into::into)
}
