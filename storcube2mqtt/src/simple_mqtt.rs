use crate::{
    codec,
    metric_collector::MetricCollector,
    metrics::TelemetryReport,
    mqtt_config::MqttConfig,
    mqtt_wrapper::{MqttWrapper, QoS},
};

use log::{debug, warn};

pub static DEFAULT_REPORT_TOPIC: &str = "battery/reportEquip";

/// Publishes each device snapshot as one flat JSON payload.
///
/// When the broker is unreachable the latest snapshot is parked in a single
/// slot and retried before the next publish; older parked payloads are
/// dropped. Bounded memory over completeness.
pub struct SimpleMqtt<MQTT: MqttWrapper> {
    client: MQTT,
    topic: String,
    pending: Option<Vec<u8>>,
}

impl<MQTT: MqttWrapper> SimpleMqtt<MQTT> {
    pub fn new(config: &MqttConfig) -> Self {
        let client = MQTT::new(config, "-sm");
        let topic = config
            .topic
            .clone()
            .unwrap_or_else(|| DEFAULT_REPORT_TOPIC.to_string());
        Self {
            client,
            topic,
            pending: None,
        }
    }

    fn try_send(&mut self, payload: Vec<u8>) {
        if let Some(parked) = self.pending.take() {
            if self
                .client
                .publish(self.topic.as_str(), QoS::AtMostOnce, false, parked)
                .is_err()
            {
                warn!("broker still unreachable, dropping parked snapshot for a newer one");
            }
        }
        if let Err(e) = self
            .client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, payload.clone())
        {
            warn!("mqtt publish failed, parking latest snapshot: {e:?}");
            self.pending = Some(payload);
        }
    }
}

impl<MQTT: MqttWrapper> MetricCollector for SimpleMqtt<MQTT> {
    fn publish(&mut self, report: &TelemetryReport) {
        debug!("publishing snapshot for {}", report.equip_id);
        self.try_send(codec::encode_publish_payload(report));
    }
}
