use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::codec::{self, Frame};
use crate::link::{LinkConnector, TelemetryLink};
use crate::metric_collector::MetricCollector;
use crate::rest::TokenSource;
use crate::value_cache::ValueCache;

pub static DEFAULT_WS_HOST: &str = "baterway.com";
pub static DEFAULT_WS_PORT: u16 = 9501;
pub static DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub static DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Bounded wait for the first frame after the websocket opens. A silent
/// socket is a connect failure, not a data error.
static HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on any single blocking wait so the stop signal is observed
/// promptly.
static POLL_SLICE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connecting,
    Connected,
    Degraded(String),
    /// Terminal; only ever entered through the stop signal.
    Stopped,
}

/// Cooperative stop flag, checked at every suspension point of the session
/// loop. Once set, no further network call is issued.
#[derive(Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub device_id: String,
    pub ws_host: String,
    pub ws_port: u16,
    pub heartbeat_interval: Duration,
    /// Fixed wait before restarting the authenticate→connect cycle after
    /// any failure. Deliberately not exponential: the vendor tolerates one
    /// login a minute far better than a burst of retries.
    pub reconnect_delay: Duration,
}

impl SessionConfig {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ws_host: DEFAULT_WS_HOST.to_string(),
            ws_port: DEFAULT_WS_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    fn ws_url(&self, token: &str) -> String {
        format!(
            "ws://{}:{}/equip/info/{}?token={}",
            self.ws_host, self.ws_port, self.device_id, token
        )
    }
}

enum FirstFrame {
    Frame(Vec<u8>),
    Stop,
    Failed(String),
}

enum LoopExit {
    Stop,
    Degraded(String),
}

/// Owns one device's authenticate → connect → read cycle.
///
/// All failure categories (auth refusal, handshake timeout, socket drop,
/// heartbeat failure) funnel into the same fixed-delay restart from
/// `Authenticating`; the token is assumed stale after any drop and is never
/// reused. The goal is liveness, not minimal reconnect latency.
pub struct SessionManager<T: TokenSource, C: LinkConnector> {
    config: SessionConfig,
    tokens: T,
    connector: C,
    cache: ValueCache,
    collectors: Vec<Box<dyn MetricCollector>>,
    state: ConnectionState,
}

impl<T: TokenSource, C: LinkConnector> SessionManager<T, C> {
    pub fn new(
        config: SessionConfig,
        tokens: T,
        connector: C,
        cache: ValueCache,
        collectors: Vec<Box<dyn MetricCollector>>,
    ) -> Self {
        Self {
            config,
            tokens,
            connector,
            cache,
            collectors,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn cache(&self) -> &ValueCache {
        &self.cache
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("session state: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Drives the session until the stop signal is set. No vendor failure
    /// ever makes this return; the stop signal is the only way out.
    pub fn run(&mut self, stop: &StopSignal) {
        while !stop.is_set() {
            self.set_state(ConnectionState::Authenticating);
            let token = match self.tokens.fetch_token() {
                Ok(token) => token,
                Err(e) => {
                    warn!("authentication failed: {e}");
                    self.backoff(stop);
                    continue;
                }
            };

            if stop.is_set() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let url = self.config.ws_url(&token);
            let mut link = match self.connector.connect(&url) {
                Ok(link) => link,
                Err(e) => {
                    warn!("websocket connect failed: {e}");
                    self.backoff(stop);
                    continue;
                }
            };

            // announce which device we want reports for; the same payload
            // later doubles as the heartbeat
            let subscribe = codec::encode_heartbeat(&self.config.device_id);
            if let Err(e) = link.send(&subscribe) {
                warn!("report request failed: {e}");
                link.close();
                self.backoff(stop);
                continue;
            }

            match self.await_first_frame(&mut link, stop) {
                FirstFrame::Frame(frame) => {
                    self.set_state(ConnectionState::Connected);
                    self.handle_frame(&frame);
                }
                FirstFrame::Stop => {
                    link.close();
                    break;
                }
                FirstFrame::Failed(reason) => {
                    warn!("{reason}");
                    link.close();
                    self.backoff(stop);
                    continue;
                }
            }

            match self.read_loop(&mut link, stop) {
                LoopExit::Stop => {
                    link.close();
                    break;
                }
                LoopExit::Degraded(reason) => {
                    warn!("session degraded: {reason}");
                    self.set_state(ConnectionState::Degraded(reason));
                    link.close();
                    self.backoff(stop);
                }
            }
        }

        self.set_state(ConnectionState::Stopped);
        info!("session stopped");
    }

    fn await_first_frame(&mut self, link: &mut C::Link, stop: &StopSignal) -> FirstFrame {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        loop {
            if stop.is_set() {
                return FirstFrame::Stop;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return FirstFrame::Failed("no frame within the handshake window".to_string());
            }
            match link.recv(remaining.min(POLL_SLICE)) {
                Ok(Some(frame)) => return FirstFrame::Frame(frame),
                Ok(None) => {}
                Err(e) => return FirstFrame::Failed(format!("websocket lost in handshake: {e}")),
            }
        }
    }

    fn read_loop(&mut self, link: &mut C::Link, stop: &StopSignal) -> LoopExit {
        let heartbeat = codec::encode_heartbeat(&self.config.device_id);
        let mut last_heartbeat = Instant::now();
        loop {
            if stop.is_set() {
                return LoopExit::Stop;
            }

            if last_heartbeat.elapsed() >= self.config.heartbeat_interval {
                debug!("sending heartbeat");
                if let Err(e) = link.send(&heartbeat) {
                    return LoopExit::Degraded(format!("heartbeat send failed: {e}"));
                }
                last_heartbeat = Instant::now();
            }

            let until_heartbeat = self
                .config
                .heartbeat_interval
                .saturating_sub(last_heartbeat.elapsed());
            match link.recv(until_heartbeat.min(POLL_SLICE)) {
                Ok(Some(frame)) => self.handle_frame(&frame),
                Ok(None) => {}
                Err(e) => return LoopExit::Degraded(format!("websocket read failed: {e}")),
            }
        }
    }

    // a frame that fails to decode is logged and dropped; the session stays
    // Connected
    fn handle_frame(&mut self, frame: &[u8]) {
        match codec::decode(frame) {
            Ok(Frame::Ack) => debug!("acknowledgement frame"),
            Ok(Frame::Report(report)) => {
                debug!(
                    "report from {} with {} metrics",
                    report.equip_id,
                    report.metrics.len()
                );
                self.cache.store(&report);
                for collector in &mut self.collectors {
                    collector.publish(&report);
                }
            }
            Err(e) => warn!("discarding frame: {e}"),
        }
    }

    fn backoff(&mut self, stop: &StopSignal) {
        self.set_state(ConnectionState::Disconnected);
        debug!("retrying in {:?}", self.config.reconnect_delay);
        let deadline = Instant::now() + self.config.reconnect_delay;
        while !stop.is_set() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining.min(POLL_SLICE));
        }
    }
}
