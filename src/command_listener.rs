use std::thread;
use std::time::Duration;

use log::{info, warn};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, Publish, QoS};
use storcube2mqtt::codec::{self, Command};
use storcube2mqtt::mqtt_config::MqttConfig;
use storcube2mqtt::rest::RestClient;

pub static SET_POWER_TOPIC: &str = "battery/set_power";
pub static SET_THRESHOLD_TOPIC: &str = "battery/set_threshold";
pub static OUTPUT_POWER_TOPIC: &str = "battery/outputPower";

enum Action {
    Resubscribe,
    Command(Publish),
    Skip,
    Backoff(ConnectionError),
}

// rumqttc reconnects with a clean session, so the subscriptions must be
// re-issued on every ConnAck or the listener goes deaf after a broker drop
fn classify(event: Result<Event, ConnectionError>) -> Action {
    match event {
        Ok(Event::Incoming(Packet::ConnAck(_))) => Action::Resubscribe,
        Ok(Event::Incoming(Packet::Publish(publish))) => Action::Command(publish),
        Ok(_) => Action::Skip,
        Err(e) => Action::Backoff(e),
    }
}

fn subscribe_command_topics(client: &Client) {
    for topic in [SET_POWER_TOPIC, SET_THRESHOLD_TOPIC] {
        if let Err(e) = client.subscribe(topic, QoS::AtMostOnce) {
            warn!("subscription to {topic} failed: {e}");
        }
    }
}

/// Listens for control requests on the command topics and forwards them to
/// the vendor API. Runs on its own client and thread; a broker or vendor
/// outage here never touches telemetry ingestion.
pub fn spawn(config: &MqttConfig, rest: RestClient, device_id: String) {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| "storcube-mqtt-publish".to_string());
    let mut mqttoptions = MqttOptions::new(
        client_id + "-cmd",
        &config.host,
        config.port.unwrap_or(1883),
    );
    mqttoptions.set_keep_alive(Duration::from_secs(5));

    if let Some((username, password)) = match (&config.username, &config.password) {
        (None, None) => None,
        (None, Some(_)) => None,
        (Some(username), None) => Some((username.clone(), "".into())),
        (Some(username), Some(password)) => Some((username.clone(), password.clone())),
    } {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut connection) = Client::new(mqttoptions, 10);

    thread::spawn(move || {
        for event in connection.iter() {
            match classify(event) {
                Action::Resubscribe => subscribe_command_topics(&client),
                Action::Command(publish) => handle(&client, &rest, &device_id, &publish),
                Action::Skip => {}
                Action::Backoff(e) => {
                    warn!("command listener mqtt error: {e}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        }
    });
}

fn handle(client: &Client, rest: &RestClient, device_id: &str, publish: &Publish) {
    match codec::parse_command(&publish.payload) {
        Ok(command) => {
            info!("command on {}: {command:?}", publish.topic);
            match rest.execute(device_id, command) {
                Ok(()) => confirm(client, command),
                Err(e) => warn!("command failed: {e}"),
            }
        }
        Err(e) => warn!("ignoring payload on {}: {e}", publish.topic),
    }
}

// Confirmations for power changes are retained on their own topic so a UI
// can pick the value up later. Threshold changes are only logged: the
// original feedback topic was the command topic itself, which loops.
fn confirm(client: &Client, command: Command) {
    match command {
        Command::SetPower(watts) => {
            let payload = format!("{{\"power\":{watts}}}");
            if let Err(e) = client.try_publish(OUTPUT_POWER_TOPIC, QoS::AtMostOnce, true, payload) {
                warn!("could not confirm power change: {e}");
            }
        }
        Command::SetThreshold(percent) => info!("threshold set to {percent}%"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode};

    #[test]
    fn every_connack_triggers_resubscription() {
        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        };
        let action = classify(Ok(Event::Incoming(Packet::ConnAck(connack))));
        assert!(matches!(action, Action::Resubscribe));
    }

    #[test]
    fn publishes_become_commands() {
        let publish = Publish::new(
            SET_POWER_TOPIC,
            rumqttc::QoS::AtMostOnce,
            br#"{"power":800}"#.to_vec(),
        );
        let action = classify(Ok(Event::Incoming(Packet::Publish(publish))));
        match action {
            Action::Command(publish) => assert_eq!(publish.topic, SET_POWER_TOPIC),
            _ => panic!("expected the publish to surface as a command"),
        }
    }

    #[test]
    fn other_traffic_is_skipped_and_errors_back_off() {
        assert!(matches!(
            classify(Ok(Event::Incoming(Packet::PingResp))),
            Action::Skip
        ));
        let lost = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            classify(Err(ConnectionError::Io(lost))),
            Action::Backoff(_)
        ));
    }
}
