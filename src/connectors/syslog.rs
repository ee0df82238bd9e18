//! Push-mode syslog connector.
//!
//! Binds a UDP, TCP, or TLS listener on the configured port. Every
//! datagram/line is parsed, passed through the facility/severity
//! allow-lists, and handed to the job queue. When the queue is full the
//! event is dropped and the error counter incremented; the listener task
//! never blocks.

use async_trait::async_trait;
use serde_json::json;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::error::ConnectorError;
use crate::domain::models::{
    ConnectionTest, ConnectorConfig, ConnectorPatch, ConnectorRecord, ConnectorStatus,
    JobPriority, RawEvent, SyslogConfig, SyslogFilter, SyslogProtocol,
};
use crate::domain::ports::Store;
use crate::services::event_bus::EventBus;
use crate::services::job_queue::JobQueue;

use super::{Connector, ConnectorCore};

/// One parsed syslog message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogMessage {
    pub facility: u8,
    pub severity: u8,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub message: String,
    pub raw: String,
}

/// Parse one syslog line, accepting RFC3164 and the RFC5424 header.
///
/// Lines without a PRI default to user.notice (13). Parsing is tolerant:
/// whatever cannot be interpreted stays in `message` verbatim.
pub fn parse_syslog_line(raw: &str) -> SyslogMessage {
    let mut facility = 1u8;
    let mut severity = 5u8;
    let mut rest = raw;

    if let Some(stripped) = raw.strip_prefix('<') {
        if let Some(end) = stripped.find('>') {
            if let Ok(pri) = stripped[..end].parse::<u16>() {
                if pri <= 191 {
                    facility = u8::try_from(pri / 8).unwrap_or(1);
                    severity = u8::try_from(pri % 8).unwrap_or(5);
                    rest = &stripped[end + 1..];
                }
            }
        }
    }
    let rest = rest.trim_start();

    if let Some(v5424) = rest.strip_prefix("1 ") {
        return parse_rfc5424(facility, severity, v5424, raw);
    }
    parse_rfc3164(facility, severity, rest, raw)
}

fn parse_rfc3164(facility: u8, severity: u8, rest: &str, raw: &str) -> SyslogMessage {
    let (header, message) = match rest.find(": ") {
        Some(i) => (&rest[..i], &rest[i + 2..]),
        None => ("", rest),
    };

    let tokens: Vec<&str> = header.split_whitespace().collect();
    // MMM dd HH:MM:SS hostname tag
    let (hostname, tag) = if tokens.len() >= 5 && tokens[2].contains(':') {
        (Some(tokens[3].to_string()), Some(tokens[4]))
    } else if tokens.len() == 2 && tokens[1].contains(':') {
        // No timestamp: "hostname tag: msg" is seen from relays.
        (Some(tokens[0].to_string()), Some(tokens[1]))
    } else {
        (None, tokens.last().copied())
    };

    let (app_name, proc_id) = split_tag(tag);

    SyslogMessage {
        facility,
        severity,
        hostname,
        app_name,
        proc_id,
        msg_id: None,
        message: message.to_string(),
        raw: raw.to_string(),
    }
}

fn parse_rfc5424(facility: u8, severity: u8, rest: &str, raw: &str) -> SyslogMessage {
    let mut parts = rest.splitn(6, ' ');
    let _timestamp = parts.next();
    let hostname = parts.next().filter(|s| *s != "-").map(ToString::to_string);
    let app_name = parts.next().filter(|s| *s != "-").map(ToString::to_string);
    let proc_id = parts.next().filter(|s| *s != "-").map(ToString::to_string);
    let msg_id = parts.next().filter(|s| *s != "-").map(ToString::to_string);
    let tail = parts.next().unwrap_or_default();

    // Skip structured data: either "-" or one or more bracketed blocks.
    let message = if let Some(stripped) = tail.strip_prefix("- ") {
        stripped
    } else if tail.starts_with('[') {
        match tail.rfind("] ") {
            Some(i) => &tail[i + 2..],
            None => "",
        }
    } else {
        tail
    };

    SyslogMessage {
        facility,
        severity,
        hostname,
        app_name,
        proc_id,
        msg_id,
        message: message.to_string(),
        raw: raw.to_string(),
    }
}

fn split_tag(tag: Option<&str>) -> (Option<String>, Option<String>) {
    match tag {
        Some(tag) => {
            let tag = tag.trim_end_matches(':');
            if let Some(open) = tag.find('[') {
                let app = tag[..open].to_string();
                let pid = tag[open + 1..].trim_end_matches(']').to_string();
                (Some(app), Some(pid))
            } else {
                (Some(tag.to_string()), None)
            }
        }
        None => (None, None),
    }
}

/// Push-mode syslog connector.
pub struct SyslogConnector {
    core: Arc<ConnectorCore>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyslogConnector {
    pub fn from_record(
        record: &ConnectorRecord,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        jobs: Arc<JobQueue>,
    ) -> Result<Self, ConnectorError> {
        let config = ConnectorConfig::from_record(record)?;
        if !matches!(config, ConnectorConfig::Syslog(_)) {
            return Err(ConnectorError::ConfigInvalid(
                "syslog connector requires a syslog configuration".to_string(),
            ));
        }
        Ok(Self {
            core: Arc::new(ConnectorCore::new(record, config, store, bus, jobs)),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn syslog_config(&self) -> Result<SyslogConfig, ConnectorError> {
        match self.core.config() {
            ConnectorConfig::Syslog(cfg) => Ok(cfg),
            _ => Err(ConnectorError::ConfigInvalid(
                "syslog connector requires a syslog configuration".to_string(),
            )),
        }
    }

    /// Parse, filter, and enqueue one received line. Queue-full drops are
    /// counted by the core and otherwise ignored so the listener can keep
    /// draining the socket.
    fn handle_line(core: &ConnectorCore, filter: Option<&SyslogFilter>, line: &str, peer: IpAddr) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let parsed = parse_syslog_line(line);
        if let Some(filter) = filter {
            if !filter.allows(parsed.facility, parsed.severity) {
                return;
            }
        }

        let event = RawEvent::new(
            "syslog",
            "syslog",
            json!({
                "facility": parsed.facility,
                "severity": parsed.severity,
                "hostname": parsed.hostname,
                "appName": parsed.app_name,
                "procId": parsed.proc_id,
                "msgId": parsed.msg_id,
                "message": parsed.message,
                "rawMessage": parsed.raw,
                "sourceIp": peer.to_string(),
            }),
        )
        .with_tags(vec!["syslog".to_string()])
        .with_connector(&core.id, &core.organization_id);

        if core.emit(event, JobPriority::Medium).is_err() {
            debug!(connector_id = %core.id, "queue full, syslog event dropped");
        }
    }

    async fn spawn_udp(
        &self,
        config: &SyslogConfig,
        mut stop: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ConnectorError> {
        let socket = UdpSocket::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                ConnectorError::AdapterUnavailable(format!(
                    "udp bind {}:{} failed: {e}",
                    config.host, config.port
                ))
            })?;
        info!(connector_id = %self.core.id, port = config.port, "udp syslog listener bound");

        let core = Arc::clone(&self.core);
        let filter = config.filtering.clone();
        Ok(tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    received = socket.recv_from(&mut buf) => match received {
                        Ok((len, peer)) => {
                            let line = String::from_utf8_lossy(&buf[..len]);
                            SyslogConnector::handle_line(&core, filter.as_ref(), &line, peer.ip());
                        }
                        Err(err) => {
                            warn!(connector_id = %core.id, error = %err, "udp receive failed");
                            core.metrics.record_error();
                        }
                    },
                }
            }
            debug!(connector_id = %core.id, "udp syslog listener stopped");
        }))
    }

    async fn spawn_tcp(
        &self,
        config: &SyslogConfig,
        mut stop: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>, ConnectorError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                ConnectorError::AdapterUnavailable(format!(
                    "tcp bind {}:{} failed: {e}",
                    config.host, config.port
                ))
            })?;
        info!(connector_id = %self.core.id, port = config.port, "tcp syslog listener bound");

        let tls = match config.protocol {
            SyslogProtocol::Tls => Some(Self::tls_acceptor(config)?),
            _ => None,
        };

        let core = Arc::clone(&self.core);
        let filter = config.filtering.clone();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let core = Arc::clone(&core);
                            let filter = filter.clone();
                            let tls = tls.clone();
                            let mut conn_stop = stop.clone();
                            tokio::spawn(async move {
                                match tls {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(stream) => {
                                            Self::read_lines(core, filter, stream, peer.ip(), &mut conn_stop)
                                                .await;
                                        }
                                        Err(err) => {
                                            warn!(error = %err, "tls handshake failed");
                                            core.metrics.record_error();
                                        }
                                    },
                                    None => {
                                        Self::read_lines(core, filter, stream, peer.ip(), &mut conn_stop)
                                            .await;
                                    }
                                }
                            });
                        }
                        Err(err) => {
                            warn!(connector_id = %core.id, error = %err, "tcp accept failed");
                            core.metrics.record_error();
                        }
                    },
                }
            }
            debug!(connector_id = %core.id, "tcp syslog listener stopped");
        }))
    }

    async fn read_lines<S>(
        core: Arc<ConnectorCore>,
        filter: Option<SyslogFilter>,
        stream: S,
        peer: IpAddr,
        stop: &mut watch::Receiver<bool>,
    ) where
        S: tokio::io::AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => Self::handle_line(&core, filter.as_ref(), &line, peer),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(connector_id = %core.id, error = %err, "syslog stream read failed");
                        break;
                    }
                },
            }
        }
    }

    fn tls_acceptor(config: &SyslogConfig) -> Result<tokio_rustls::TlsAcceptor, ConnectorError> {
        let tls = config.tls.as_ref().ok_or_else(|| {
            ConnectorError::ConfigInvalid("tls protocol requires certificate paths".to_string())
        })?;

        let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(
            std::fs::File::open(&tls.cert_path).map_err(|e| {
                ConnectorError::ConfigInvalid(format!("cannot open {}: {e}", tls.cert_path))
            })?,
        ))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectorError::ConfigInvalid(format!("invalid certificate: {e}")))?;

        let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(
            std::fs::File::open(&tls.key_path).map_err(|e| {
                ConnectorError::ConfigInvalid(format!("cannot open {}: {e}", tls.key_path))
            })?,
        ))
        .map_err(|e| ConnectorError::ConfigInvalid(format!("invalid key: {e}")))?
        .ok_or_else(|| ConnectorError::ConfigInvalid("no private key found".to_string()))?;

        let server_config = tokio_rustls::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ConnectorError::ConfigInvalid(format!("tls config: {e}")))?;
        Ok(tokio_rustls::TlsAcceptor::from(Arc::new(server_config)))
    }
}

#[async_trait]
impl Connector for SyslogConnector {
    fn core(&self) -> &ConnectorCore {
        &self.core
    }

    #[instrument(skip(self), fields(connector_id = %self.core.id))]
    async fn start(&self) -> Result<(), ConnectorError> {
        if self.core.status() == ConnectorStatus::Active {
            return Ok(());
        }
        let config = self.syslog_config()?;
        let (tx, rx) = watch::channel(false);

        let task = match config.protocol {
            SyslogProtocol::Udp => self.spawn_udp(&config, rx).await,
            SyslogProtocol::Tcp | SyslogProtocol::Tls => self.spawn_tcp(&config, rx).await,
        };
        let task = match task {
            Ok(task) => task,
            Err(err) => {
                self.core
                    .set_status(ConnectorStatus::Error, Some(err.to_string()))
                    .await?;
                return Err(err);
            }
        };

        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        self.core.metrics.mark_started();
        self.core.set_status(ConnectorStatus::Active, None).await
    }

    async fn stop(&self) -> Result<(), ConnectorError> {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(true);
        }
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.core.metrics.mark_stopped();
        self.core.set_status(ConnectorStatus::Paused, None).await
    }

    /// Push adapter: a unit of work is a stats refresh.
    async fn run_once(&self) -> Result<(), ConnectorError> {
        self.core
            .store()
            .update_connector(
                self.core.record_id,
                ConnectorPatch {
                    metrics: Some(self.core.metrics.snapshot()),
                    ..ConnectorPatch::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionTest {
        let Ok(config) = self.syslog_config() else {
            return ConnectionTest::failed("invalid syslog configuration");
        };
        if self.core.status() == ConnectorStatus::Active {
            return ConnectionTest::ok(format!(
                "listening on {}://{}:{}",
                config.protocol.as_str(),
                config.host,
                config.port
            ));
        }
        // Probe bindability without keeping the socket.
        let addr = (config.host.as_str(), config.port);
        let result = match config.protocol {
            SyslogProtocol::Udp => std::net::UdpSocket::bind(addr).map(drop),
            SyslogProtocol::Tcp | SyslogProtocol::Tls => {
                std::net::TcpListener::bind(addr).map(drop)
            }
        };
        match result {
            Ok(()) => ConnectionTest::ok(format!("port {} available", config.port)),
            Err(err) => ConnectionTest::failed(format!("port {} unavailable: {err}", config.port)),
        }
    }
}
