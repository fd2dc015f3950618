use std::path::PathBuf;
use std::{env, fs};

use log::warn;
use serde::Deserialize;
use storcube2mqtt::mqtt_config::MqttConfig;

static DEFAULT_APP_CODE: &str = "Storcube";

/// Overrides for the vendor endpoints; the defaults baked into the library
/// are the observed production URLs.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VendorConfig {
    pub login_url: Option<String>,
    pub set_power_url: Option<String>,
    pub set_threshold_url: Option<String>,
    pub output_url: Option<String>,
    pub firmware_url: Option<String>,
    pub ws_host: Option<String>,
    pub ws_port: Option<u16>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    pub device_id: String,
    pub app_code: Option<String>,
    pub login_name: String,
    pub password: String,
    /// Seconds between upstream heartbeats while connected.
    pub heartbeat_interval: Option<u64>,
    /// Seconds to wait before restarting the login→connect cycle.
    pub reconnect_delay: Option<u64>,
    pub mqtt: MqttConfig,
    pub vendor: Option<VendorConfig>,
}

impl Config {
    pub fn app_code(&self) -> String {
        self.app_code
            .clone()
            .unwrap_or_else(|| DEFAULT_APP_CODE.to_string())
    }

    pub fn is_valid(&self) -> bool {
        !self.device_id.is_empty()
            && !self.login_name.is_empty()
            && !self.password.is_empty()
            && self.mqtt.is_valid()
    }

    pub fn load() -> Config {
        // parse config from TOML file if present
        let contents = match candidate_paths()
            .iter()
            .find_map(|path| fs::read_to_string(path).ok())
        {
            Some(contents) => contents,
            None => {
                warn!("no readable config.toml in the working directory or next to the executable");
                "".into()
            }
        };
        let mut config = match toml::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(e) => {
                warn!("toml config unparsable: {e}");
                Config::default()
            }
        };

        // overwrite config if environment variables are set
        // $DEVICE_ID
        if let Ok(device_id) = env::var("DEVICE_ID") {
            config.device_id = device_id;
        }
        // $APP_CODE (optional)
        if let Ok(app_code) = env::var("APP_CODE") {
            config.app_code = Some(app_code);
        }
        // $LOGIN_NAME
        if let Ok(login_name) = env::var("LOGIN_NAME") {
            config.login_name = login_name;
        }
        // $PASSWORD
        if let Ok(password) = env::var("PASSWORD") {
            config.password = password;
        }
        // $MQTT_BROKER_HOST
        if let Ok(host) = env::var("MQTT_BROKER_HOST") {
            config.mqtt.host = host;
        }
        // $MQTT_PORT (optional)
        if let Ok(port) = env::var("MQTT_PORT") {
            config.mqtt.port = Some(port.parse().unwrap_or(1883));
        }
        // $MQTT_USERNAME (optional)
        if let Ok(username) = env::var("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        // $MQTT_PASSWORD (optional)
        if let Ok(password) = env::var("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        // $MQTT_TOPIC (optional)
        if let Ok(topic) = env::var("MQTT_TOPIC") {
            config.mqtt.topic = Some(topic);
        }
        config
    }
}

// working directory first, then next to the executable
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("config.toml")];
    if let Some(dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
    {
        paths.push(dir.join("config.toml"));
    }
    paths
}
