use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Number of times one dispatch attempt may call the transport before the
/// job goes back to the queue.
pub const DEFAULT_MAX_SEND_ATTEMPTS: usize = 100;

/// Tuning for the dispatch coordinator and its event loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on transport calls made for a single job per trigger.
    pub max_send_attempts: usize,
    /// Deadline for one transport call.
    pub send_timeout: Duration,
    /// Reclaim jobs whose worker has been silent for this long.
    /// `None` disables the watchdog and relies on the transport to report
    /// lost connections.
    pub in_flight_timeout: Option<Duration>,
    /// How often the watchdog scans the in-flight jobs.
    pub watchdog_interval: Duration,
    /// How often the per-group benchmarking time sheets are cleared.
    pub time_sheet_reset_interval: Duration,
    /// Capacity of the command channel feeding the dispatch loop.
    pub command_channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: DEFAULT_MAX_SEND_ATTEMPTS,
            send_timeout: Duration::from_secs(5),
            in_flight_timeout: None,
            watchdog_interval: Duration::from_secs(30),
            time_sheet_reset_interval: Duration::from_secs(24 * 60 * 60),
            command_channel_capacity: 100,
        }
    }
}

impl DispatchConfig {
    pub fn with_max_send_attempts(mut self, attempts: usize) -> Self {
        self.max_send_attempts = attempts;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_in_flight_timeout(mut self, timeout: Duration) -> Self {
        self.in_flight_timeout = Some(timeout);
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Outbound frames buffered per worker session before sends fail.
    pub worker_channel_capacity: usize,
    /// Append received results to this file as JSON lines. Results are only
    /// logged when unset.
    pub results_file: Option<PathBuf>,
    pub dispatch: DispatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            worker_channel_capacity: 16,
            results_file: None,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_results_file(mut self, path: PathBuf) -> Self {
        self.results_file = Some(path);
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_config_default() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.max_send_attempts, 100);
        assert_eq!(cfg.send_timeout, Duration::from_secs(5));
        assert!(cfg.in_flight_timeout.is_none());
        assert_eq!(cfg.watchdog_interval, Duration::from_secs(30));
        assert_eq!(cfg.time_sheet_reset_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.command_channel_capacity, 100);
    }

    #[test]
    fn dispatch_config_builders() {
        let cfg = DispatchConfig::default()
            .with_max_send_attempts(3)
            .with_send_timeout(Duration::from_millis(250))
            .with_in_flight_timeout(Duration::from_secs(600))
            .with_watchdog_interval(Duration::from_secs(1));
        assert_eq!(cfg.max_send_attempts, 3);
        assert_eq!(cfg.send_timeout, Duration::from_millis(250));
        assert_eq!(cfg.in_flight_timeout, Some(Duration::from_secs(600)));
        assert_eq!(cfg.watchdog_interval, Duration::from_secs(1));
    }

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.worker_channel_capacity, 16);
        assert!(cfg.results_file.is_none());
        assert_eq!(cfg.dispatch.max_send_attempts, DEFAULT_MAX_SEND_ATTEMPTS);
    }

    #[test]
    fn server_config_new_keeps_defaults() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = ServerConfig::new(addr).with_results_file(PathBuf::from("/tmp/results.jsonl"));
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(
            cfg.results_file.as_deref(),
            Some(std::path::Path::new("/tmp/results.jsonl"))
        );
        assert_eq!(cfg.worker_channel_capacity, 16);
    }
}
