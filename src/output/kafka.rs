//! Kafka forwarding. The producer is only compiled with the `kafka` feature;
//! without it [`KafkaSink::open`] fails and the run falls back to no output.

#[cfg(feature = "kafka")]
use std::time::Duration;

#[cfg(feature = "kafka")]
use rdkafka::ClientConfig;
#[cfg(feature = "kafka")]
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
#[cfg(feature = "kafka")]
use tracing::debug;

#[cfg(feature = "kafka")]
use crate::constants::KAFKA_FLUSH_TIMEOUT_MS;
use crate::evtx::EvtxRecord;
#[cfg(feature = "kafka")]
use crate::output::Envelope;
use crate::output::{OutputError, OutputSink};

pub struct KafkaSink {
    #[cfg_attr(not(feature = "kafka"), allow(dead_code))]
    tag: String,
    topic: String,
    #[cfg_attr(not(feature = "kafka"), allow(dead_code))]
    client_id: String,
    #[cfg(feature = "kafka")]
    producer: Option<BaseProducer>,
}

impl KafkaSink {
    pub fn new(tag: &str, topic: &str, client_id: &str) -> Self {
        Self {
            tag: tag.to_string(),
            topic: topic.to_string(),
            client_id: client_id.to_string(),
            #[cfg(feature = "kafka")]
            producer: None,
        }
    }

    fn check_target(&self, brokers: &str) -> Result<(), OutputError> {
        if brokers.trim().is_empty() {
            return Err(OutputError::MissingTarget("kafka brokers"));
        }
        if self.topic.trim().is_empty() {
            return Err(OutputError::MissingTarget("kafka topic"));
        }
        Ok(())
    }
}

#[cfg(feature = "kafka")]
impl OutputSink for KafkaSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn open(&mut self, brokers: &str) -> Result<(), OutputError> {
        self.check_target(brokers)?;
        debug!(brokers, topic = %self.topic, "creating kafka producer");
        let producer: BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.trim())
            .set("client.id", &self.client_id)
            .create()
            .map_err(|err| OutputError::Kafka(err.to_string()))?;
        self.producer = Some(producer);
        Ok(())
    }

    fn send(&mut self, record: &EvtxRecord) -> Result<(), OutputError> {
        let producer = self.producer.as_ref().ok_or(OutputError::NotOpen)?;
        let payload = serde_json::to_vec(&Envelope::new(&self.tag, record))?;
        producer
            .send(BaseRecord::<(), [u8]>::to(&self.topic).payload(&payload[..]))
            .map_err(|(err, _)| OutputError::Kafka(err.to_string()))?;
        producer.poll(Duration::ZERO);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        if let Some(producer) = self.producer.as_ref() {
            producer
                .flush(Duration::from_millis(KAFKA_FLUSH_TIMEOUT_MS))
                .map_err(|err| OutputError::Kafka(err.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(not(feature = "kafka"))]
impl OutputSink for KafkaSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn open(&mut self, brokers: &str) -> Result<(), OutputError> {
        self.check_target(brokers)?;
        Err(OutputError::Unsupported(
            "kafka output requires building with the `kafka` feature",
        ))
    }

    fn send(&mut self, _record: &EvtxRecord) -> Result<(), OutputError> {
        Err(OutputError::NotOpen)
    }
}
