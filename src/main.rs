mod command_listener;
mod config;
mod logging;
mod rumqttc_wrapper;

use std::time::Duration;

use config::Config;
use log::{error, info};
use rumqttc_wrapper::RumqttcWrapper;
use storcube2mqtt::link::WsConnector;
use storcube2mqtt::metric_collector::MetricCollector;
use storcube2mqtt::rest::{Credentials, RestClient, VendorUrls};
use storcube2mqtt::session::{SessionConfig, SessionManager, StopSignal};
use storcube2mqtt::simple_mqtt::SimpleMqtt;
use storcube2mqtt::status_mqtt::StatusMqtt;
use storcube2mqtt::value_cache::ValueCache;

fn main() {
    logging::init_logger(std::env::var("DEBUG").is_ok());
    info!("Running revision: {}", env!("GIT_HASH"));
    if std::env::args().len() > 1 {
        error!("Arguments passed. Tool is configured by config.toml in its path");
    }

    let config = Config::load();
    if !config.is_valid() {
        error!("config incomplete: device_id, login_name, password and mqtt.host are required");
        std::process::exit(1);
    }

    info!("device: {}", config.device_id);
    info!("mqtt broker: {}", config.mqtt.host);

    let credentials = Credentials {
        app_code: config.app_code(),
        login_name: config.login_name.clone(),
        password: config.password.clone(),
    };
    let vendor = config.vendor.clone().unwrap_or_default();
    let mut urls = VendorUrls::default();
    if let Some(login_url) = vendor.login_url {
        urls.login = login_url;
    }
    if let Some(set_power_url) = vendor.set_power_url {
        urls.set_power = set_power_url;
    }
    if let Some(set_threshold_url) = vendor.set_threshold_url {
        urls.set_threshold = set_threshold_url;
    }
    if let Some(output_url) = vendor.output_url {
        urls.output = output_url;
    }
    if let Some(firmware_url) = vendor.firmware_url {
        urls.firmware = firmware_url;
    }

    let rest = match RestClient::new(credentials, urls) {
        Ok(rest) => rest,
        Err(e) => {
            error!("could not build vendor http client: {e}");
            std::process::exit(1);
        }
    };

    command_listener::spawn(&config.mqtt, rest.clone(), config.device_id.clone());

    let collectors: Vec<Box<dyn MetricCollector>> = vec![
        Box::new(SimpleMqtt::<RumqttcWrapper>::new(&config.mqtt)),
        Box::new(StatusMqtt::<_, RumqttcWrapper>::new(
            &config.mqtt,
            rest.clone(),
            &config.device_id,
        )),
    ];

    let mut session_config = SessionConfig::new(&config.device_id);
    if let Some(ws_host) = vendor.ws_host {
        session_config.ws_host = ws_host;
    }
    if let Some(ws_port) = vendor.ws_port {
        session_config.ws_port = ws_port;
    }
    if let Some(secs) = config.heartbeat_interval {
        session_config.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(secs) = config.reconnect_delay {
        session_config.reconnect_delay = Duration::from_secs(secs);
    }

    let mut session = SessionManager::new(
        session_config,
        rest,
        WsConnector,
        ValueCache::new(),
        collectors,
    );

    // runs until the process is terminated; the stop signal exists for
    // embedders and tests
    let stop = StopSignal::new();
    session.run(&stop);
}
