// Analyzer configuration, loaded from a YAML file.
//
// `dnspipe --gen` writes a fully-populated sample of this file; every
// key below maps one-to-one onto a field here.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Where packets come from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Capture,
    File,
}

/// The closed set of middleware handlers, in configuration order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MiddlewareKind {
    Session,
    Ipinfo,
    TunnelSec,
    TrafficDirection,
}

/// The closed set of result handlers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Dnslog,
    Dnsdb,
}

/// Serialization mode of the text sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub input_type: InputType,
    pub capture_files: Vec<String>,
    pub device_name: String,
    pub bpf_filter: String,
    pub decode_worker_count: usize,
    pub handler_worker_count: usize,
    pub middleware_handlers: Vec<MiddlewareKind>,
    pub result_handlers: Vec<ResultKind>,
    pub session: SessionConfig,
    pub ipinfo: IpInfoConfig,
    pub tunnel_sec: TunnelSecConfig,
    pub traffic_direction: TrafficDirectionConfig,
    pub dnslog: DnslogConfig,
    pub dnsdb: DnsdbConfig,
    pub enable_debug: bool,
    pub status_report_interval: String,
    pub pprof_enable: bool,
    pub pprof_http_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub enable: bool,
    pub session_cache_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { enable: true, session_cache_size: 100_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpInfoConfig {
    pub enable: bool,
    pub geoip_filename: String,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self { enable: true, geoip_filename: "addr.csv".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunnelSecConfig {
    pub enable: bool,
    pub special_tlds: Vec<String>,
    pub enable_subdomain_entropy: bool,
    pub enable_subdomain_encoding_detect: bool,
    pub encoding_detect_least_label_length: usize,
}

impl Default for TunnelSecConfig {
    fn default() -> Self {
        Self {
            enable: true,
            special_tlds: SPECIAL_TLDS.iter().map(|s| s.to_string()).collect(),
            enable_subdomain_entropy: true,
            enable_subdomain_encoding_detect: true,
            encoding_detect_least_label_length: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrafficDirectionConfig {
    pub enable: bool,
    pub self_ips: Vec<String>,
}

impl Default for TrafficDirectionConfig {
    fn default() -> Self {
        Self { enable: true, self_ips: vec!["172.31.21.23".into()] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnslogConfig {
    pub enable: bool,
    pub filename: String,
    /// Megabytes before the active file rotates.
    pub max_file_size: u64,
    pub max_file_count: usize,
    /// Days a rotated backup may live.
    pub max_file_age: u32,
    pub format: LogFormat,
}

impl Default for DnslogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            filename: "result/dnslog.log".into(),
            max_file_size: 100,
            max_file_count: 10,
            max_file_age: 10,
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DnsdbConfig {
    pub enable: bool,
    pub filename: String,
    pub max_file_row_count: u64,
    pub max_file_count: usize,
    pub max_rolling_interval: String,
}

impl Default for DnsdbConfig {
    fn default() -> Self {
        Self {
            enable: true,
            filename: "result/dnslog.db".into(),
            max_file_row_count: 100_000_000,
            max_file_count: 10,
            max_rolling_interval: "24h".into(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_type: InputType::File,
            capture_files: vec!["data.pcap".into()],
            device_name: "any".into(),
            bpf_filter: "udp and port 53".into(),
            decode_worker_count: 1,
            handler_worker_count: 1,
            middleware_handlers: vec![
                MiddlewareKind::Session,
                MiddlewareKind::Ipinfo,
                MiddlewareKind::TunnelSec,
                MiddlewareKind::TrafficDirection,
            ],
            result_handlers: vec![ResultKind::Dnslog, ResultKind::Dnsdb],
            session: SessionConfig::default(),
            ipinfo: IpInfoConfig::default(),
            tunnel_sec: TunnelSecConfig::default(),
            traffic_direction: TrafficDirectionConfig::default(),
            dnslog: DnslogConfig::default(),
            dnsdb: DnsdbConfig::default(),
            enable_debug: false,
            status_report_interval: "10s".into(),
            pprof_enable: false,
            pprof_http_port: 8000,
        }
    }
}

impl Config {
    /// Load and validate. Any failure here is fatal to startup.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config file `{}`", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parse config file `{}`", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write a fully-populated sample configuration.
    pub fn generate(path: &Path) -> Result<()> {
        let contents =
            serde_yaml::to_string(&Config::default()).context("serialize sample config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("write sample config `{}`", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.enabled_result_handlers().next().is_none() {
            bail!("should at least one result handler be enabled");
        }
        self.status_report_interval()
            .context("bad status_report_interval")?;
        if self.dnsdb_enabled() {
            self.dnsdb_rolling_interval()
                .context("bad dnsdb.max_rolling_interval")?;
        }
        Ok(())
    }

    pub fn status_report_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.status_report_interval)
            .with_context(|| format!("invalid duration `{}`", self.status_report_interval))
    }

    pub fn dnsdb_rolling_interval(&self) -> Result<Duration> {
        humantime::parse_duration(&self.dnsdb.max_rolling_interval)
            .with_context(|| format!("invalid duration `{}`", self.dnsdb.max_rolling_interval))
    }

    pub fn session_enabled(&self) -> bool {
        self.middleware_handlers.contains(&MiddlewareKind::Session) && self.session.enable
    }

    pub fn dnsdb_enabled(&self) -> bool {
        self.result_handlers.contains(&ResultKind::Dnsdb) && self.dnsdb.enable
    }

    pub fn enabled_result_handlers(&self) -> impl Iterator<Item = ResultKind> + '_ {
        self.result_handlers.iter().copied().filter(|kind| match kind {
            ResultKind::Dnslog => self.dnslog.enable,
            ResultKind::Dnsdb => self.dnsdb.enable,
        })
    }

    /// Pool sizes actually used. Pairing needs temporal order, so an
    /// enabled session handler forces both pools to a single worker.
    pub fn effective_worker_counts(&self) -> (usize, usize) {
        if self.session_enabled() {
            (1, 1)
        } else {
            (self.decode_worker_count.max(1), self.handler_worker_count.max(1))
        }
    }
}

/// Two-level public suffixes treated as part of the TLD when carving
/// the second-level domain out of a query name.
pub const SPECIAL_TLDS: &[&str] = &[
    "in-addr.arpa",
    "ip6.arpa",
    "edu.cn",
    "gov.cn",
    "com.cn",
    "net.cn",
    "org.cn",
    "ac.cn",
    "edu.hk",
    "edu.mo",
    "edu.tw",
    "edu.mn",
    "edu.kp",
    "ac.kr",
    "ac.jp",
    "edu.ph",
    "edu.vn",
    "edu.la",
    "edu.kh",
    "edu.mm",
    "ac.th",
    "edu.my",
    "edu.bn",
    "edu.sg",
    "ac.id",
    "edu.tl",
    "edu.np",
    "edu.bt",
    "edu.bd",
    "ac.bd",
    "edu.in",
    "ac.in",
    "edu.pk",
    "ac.lk",
    "edu.mv",
    "edu.kz",
    "edu.kg",
    "edu.uz",
    "edu.tm",
    "edu.af",
    "edu.iq",
    "ac.ir",
    "edu.sy",
    "edu.jo",
    "edu.lb",
    "ac.il",
    "edu.ps",
    "edu.sa",
    "edu.bh",
    "edu.qa",
    "ac.ae",
    "edu.om",
    "edu.ye",
    "edu.ge",
    "edu.az",
    "edu.tr",
    "ac.cy",
    "edu.ee",
    "edu.lv",
    "edu.by",
    "edu.ru",
    "ac.ru",
    "edu.ua",
    "edu.md",
    "edu.pl",
    "edu.sk",
    "ac.at",
    "ac.uk",
    "edu.ie",
    "ac.be",
    "edu.ro",
    "ac.rs",
    "edu.mk",
    "edu.al",
    "edu.gr",
    "edu.me",
    "ac.me",
    "edu.mt",
    "edu.ba",
    "edu.it",
    "edu.es",
    "edu.pt",
    "edu.gi",
    "edu.mx",
    "edu.gl",
    "edu.gt",
    "edu.bz",
    "edu.sv",
    "edu.hn",
    "edu.ni",
    "ac.cr",
    "ac.pa",
    "edu.bs",
    "edu.cu",
    "edu.jm",
    "edu.ht",
    "edu.ag",
    "edu.dm",
    "edu.lc",
    "edu.bb",
    "edu.tt",
    "edu.vg",
    "ac.tc",
    "edu.ky",
    "edu.co",
    "edu.ve",
    "edu.gy",
    "edu.ec",
    "edu.pe",
    "edu.bo",
    "edu.br",
    "edu.ar",
    "edu.uy",
    "edu.au",
    "ac.nz",
    "edu.ki",
    "ac.pg",
    "edu.sb",
    "edu.vu",
    "ac.fj",
    "edu.ws",
    "edu.to",
    "edu.ck",
    "edu.nu",
    "edu.eg",
    "edu.ly",
    "edu.dz",
    "ac.ma",
    "edu.sd",
    "edu.et",
    "edu.so",
    "edu.dj",
    "ac.ke",
    "ac.tz",
    "ac.ug",
    "ac.rw",
    "edu.bi",
    "ac.sc",
    "edu.cd",
    "edu.sn",
    "edu.gm",
    "edu.ml",
    "edu.cv",
    "edu.sl",
    "edu.lr",
    "edu.ci",
    "edu.gh",
    "edu.ng",
    "edu.zm",
    "ac.zm",
    "ac.zw",
    "ac.mw",
    "ac.mz",
    "ac.bw",
    "edu.na",
    "ac.za",
    "ac.ls",
    "edu.mg",
    "ac.mu",
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ── Defaults & round-trip ──────────────────────────────────────

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn generated_sample_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        Config::generate(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("input_type: capture\ndevice_name: eth0\n").unwrap();
        assert_eq!(cfg.input_type, InputType::Capture);
        assert_eq!(cfg.device_name, "eth0");
        assert_eq!(cfg.bpf_filter, "udp and port 53");
        assert_eq!(cfg.dnslog.max_file_size, 100);
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = serde_yaml::from_str::<Config>("input_type: stream\n").unwrap_err();
        assert!(err.to_string().contains("stream"));
    }

    #[test]
    fn zero_enabled_result_handlers_is_fatal() {
        let mut cfg = Config::default();
        cfg.dnslog.enable = false;
        cfg.dnsdb.enable = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn disabled_handler_does_not_count_as_result_handler() {
        let mut cfg = Config::default();
        cfg.result_handlers = vec![ResultKind::Dnslog];
        cfg.dnslog.enable = false;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_duration_is_fatal() {
        let mut cfg = Config::default();
        cfg.status_report_interval = "soon".into();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.dnsdb.max_rolling_interval = "whenever".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn durations_parse_humantime_forms() {
        let cfg = Config::default();
        assert_eq!(cfg.status_report_interval().unwrap(), Duration::from_secs(10));
        assert_eq!(
            cfg.dnsdb_rolling_interval().unwrap(),
            Duration::from_secs(24 * 3600)
        );
    }

    // ── Worker forcing ─────────────────────────────────────────────

    #[test]
    fn session_forces_single_worker_pools() {
        let mut cfg = Config::default();
        cfg.decode_worker_count = 4;
        cfg.handler_worker_count = 8;
        assert_eq!(cfg.effective_worker_counts(), (1, 1));

        cfg.session.enable = false;
        assert_eq!(cfg.effective_worker_counts(), (4, 8));
    }

    #[test]
    fn middleware_order_is_preserved_from_yaml() {
        let yaml = "middleware_handlers:\n  - tunnel_sec\n  - ipinfo\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.middleware_handlers,
            vec![MiddlewareKind::TunnelSec, MiddlewareKind::Ipinfo]
        );
    }
}
