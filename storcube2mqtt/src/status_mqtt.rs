use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::metric_collector::MetricCollector;
use crate::metrics::TelemetryReport;
use crate::mqtt_config::MqttConfig;
use crate::mqtt_wrapper::{MqttWrapper, QoS};
use crate::rest::StatusSource;

pub static DEFAULT_OUTPUT_TOPIC: &str = "battery/outputEquip";
pub static DEFAULT_FIRMWARE_TOPIC: &str = "battery/firmwareEquip";

/// Floor between vendor status fetches. Every fetch round logs in again, so
/// the rate stays at one round per telemetry cycle even when frames arrive
/// faster than that.
static REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Republishes the vendor's scene output settings and firmware upgrade
/// status next to the telemetry. Rides the collector seam, so a fetch round
/// happens after a telemetry frame, never on its own clock.
///
/// Failed fetches and publishes are dropped with a warning; the next round
/// fetches fresh data anyway, so nothing is parked.
pub struct StatusMqtt<S: StatusSource, MQTT: MqttWrapper> {
    source: S,
    client: MQTT,
    device_id: String,
    refresh_interval: Duration,
    last_refresh: Option<Instant>,
}

impl<S: StatusSource, MQTT: MqttWrapper> StatusMqtt<S, MQTT> {
    pub fn new(config: &MqttConfig, source: S, device_id: &str) -> Self {
        Self {
            source,
            client: MQTT::new(config, "-status"),
            device_id: device_id.to_string(),
            refresh_interval: REFRESH_INTERVAL,
            last_refresh: None,
        }
    }

    fn refresh(&mut self) {
        match self.source.fetch_output() {
            Ok(Some(payload)) => self.send(DEFAULT_OUTPUT_TOPIC, payload),
            Ok(None) => debug!("no scene output data to publish"),
            Err(e) => warn!("scene output fetch failed: {e}"),
        }
        match self.source.fetch_firmware(&self.device_id) {
            Ok(Some(payload)) => self.send(DEFAULT_FIRMWARE_TOPIC, payload),
            Ok(None) => debug!("no firmware data to publish"),
            Err(e) => warn!("firmware fetch failed: {e}"),
        }
    }

    fn send(&mut self, topic: &str, payload: Vec<u8>) {
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, payload) {
            warn!("status publish to {topic} failed: {e:?}");
        }
    }
}

impl<S: StatusSource, MQTT: MqttWrapper> MetricCollector for StatusMqtt<S, MQTT> {
    fn publish(&mut self, _report: &TelemetryReport) {
        if self
            .last_refresh
            .is_some_and(|at| at.elapsed() < self.refresh_interval)
        {
            return;
        }
        self.last_refresh = Some(Instant::now());
        self.refresh();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::error::CommandError;

    thread_local! {
        static PUBLISHED: RefCell<Vec<(String, Vec<u8>)>> = const { RefCell::new(Vec::new()) };
    }

    fn published() -> Vec<(String, Vec<u8>)> {
        PUBLISHED.with(|p| p.borrow().clone())
    }

    struct RecordingMqtt;

    impl MqttWrapper for RecordingMqtt {
        fn subscribe(&mut self, _topic: &str, _qos: QoS) -> anyhow::Result<()> {
            Ok(())
        }

        fn publish<S, V>(
            &mut self,
            topic: S,
            _qos: QoS,
            _retain: bool,
            payload: V,
        ) -> anyhow::Result<()>
        where
            S: Clone + Into<String>,
            V: Clone + Into<Vec<u8>>,
        {
            PUBLISHED.with(|p| p.borrow_mut().push((topic.into(), payload.into())));
            Ok(())
        }

        fn new(_config: &MqttConfig, _suffix: &str) -> Self {
            Self
        }
    }

    struct ScriptedStatus {
        output: Result<Option<Vec<u8>>, ()>,
        firmware: Result<Option<Vec<u8>>, ()>,
    }

    impl StatusSource for ScriptedStatus {
        fn fetch_output(&self) -> Result<Option<Vec<u8>>, CommandError> {
            self.output.clone().map_err(|()| CommandError::Status(500))
        }

        fn fetch_firmware(&self, _device_id: &str) -> Result<Option<Vec<u8>>, CommandError> {
            self.firmware
                .clone()
                .map_err(|()| CommandError::Status(500))
        }
    }

    fn collector(source: ScriptedStatus) -> StatusMqtt<ScriptedStatus, RecordingMqtt> {
        StatusMqtt::new(&MqttConfig::default(), source, "E1")
    }

    fn any_report() -> TelemetryReport {
        TelemetryReport {
            equip_id: "E1".into(),
            ..TelemetryReport::default()
        }
    }

    #[test]
    fn a_report_triggers_both_status_topics() {
        let mut collector = collector(ScriptedStatus {
            output: Ok(Some(br#"[{"sceneName":"day"}]"#.to_vec())),
            firmware: Ok(Some(br#"{"upgrade":false}"#.to_vec())),
        });

        collector.publish(&any_report());

        let records = published();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, "battery/outputEquip");
        assert_eq!(records[0].1, br#"[{"sceneName":"day"}]"#.to_vec());
        assert_eq!(records[1].0, "battery/firmwareEquip");
    }

    #[test]
    fn refresh_rounds_are_rate_limited() {
        let mut collector = collector(ScriptedStatus {
            output: Ok(Some(b"{}".to_vec())),
            firmware: Ok(None),
        });

        collector.publish(&any_report());
        collector.publish(&any_report());
        assert_eq!(published().len(), 1);

        // once the floor has passed the next report fetches again
        collector.refresh_interval = Duration::ZERO;
        collector.publish(&any_report());
        assert_eq!(published().len(), 2);
    }

    #[test]
    fn one_failed_fetch_does_not_silence_the_other_topic() {
        let mut collector = collector(ScriptedStatus {
            output: Err(()),
            firmware: Ok(Some(br#"{"version":"1.3.7"}"#.to_vec())),
        });

        collector.publish(&any_report());

        let records = published();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "battery/firmwareEquip");
    }
}
