//! speedtest.net-compatible HTTP provider.
//!
//! Servers come from the public speedtest.net server list. Each listed server
//! exposes `latency.txt`, `random<N>x<N>.jpg` images and an `upload.php`
//! endpoint next to each other, which is all a measurement needs.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{MeasurementProvider, MeasurementResults, ProviderError, ServerInfo};

const DEFAULT_SERVER_LIST_URL: &str = "https://www.speedtest.net/api/js/servers";

/// Side lengths of the `random<N>x<N>.jpg` images fetched per download test.
const DOWNLOAD_IMAGE_SIZES: [u32; 4] = [350, 750, 1500, 2000];

/// Body sizes posted per upload test.
const UPLOAD_PAYLOAD_SIZES: [usize; 4] = [256 * 1024, 512 * 1024, 1024 * 1024, 2 * 1024 * 1024];

const LATENCY_SAMPLES: u32 = 3;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Settings for [`SpeedtestProvider`].
#[derive(Debug, Clone)]
pub struct SpeedtestConfig {
    /// Server list endpoint.
    pub server_list_url: String,
    /// Number of listed servers whose latency is probed.
    pub candidates: usize,
    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            server_list_url: DEFAULT_SERVER_LIST_URL.to_string(),
            candidates: 5,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Server list entry; only the fields the provider uses.
#[derive(Debug, Clone, Deserialize)]
struct ServerEntry {
    url: String,
    id: ServerId,
    #[serde(default)]
    sponsor: String,
    #[serde(default)]
    name: String,
}

/// The server list reports ids as strings, some mirrors as numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ServerId {
    Text(String),
    Number(u64),
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone)]
struct SelectedServer {
    info: ServerInfo,
    upload_url: Url,
    latency_ms: f64,
}

/// HTTP speed measurement against speedtest.net servers.
pub struct SpeedtestProvider {
    client: reqwest::Client,
    config: SpeedtestConfig,
    selected: Option<SelectedServer>,
    download: Option<f64>,
    upload: Option<f64>,
}

impl SpeedtestProvider {
    pub fn new(config: SpeedtestConfig) -> Result<Self, ProviderError> {
        install_rustls_provider();

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("internet-speed-log/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            selected: None,
            download: None,
            upload: None,
        })
    }

    async fn fetch_servers(&self) -> Result<Vec<ServerEntry>, ProviderError> {
        let limit = self.config.candidates.to_string();
        let url = Url::parse_with_params(
            &self.config.server_list_url,
            [
                ("engine", "js"),
                ("limit", limit.as_str()),
                ("https_functional", "true"),
            ],
        )
        .map_err(|e| ProviderError::InvalidResponse {
            endpoint: self.config.server_list_url.clone(),
            reason: e.to_string(),
        })?;

        let servers: Vec<ServerEntry> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(servers)
    }

    /// Average round-trip time to `latency.txt`, or `None` if any probe fails.
    async fn probe_latency(&self, upload_url: &Url) -> Option<f64> {
        let target = upload_url.join("latency.txt").ok()?;
        let mut total = Duration::ZERO;
        for _ in 0..LATENCY_SAMPLES {
            let started = Instant::now();
            let response = self
                .client
                .get(cache_busted(&target))
                .send()
                .await
                .and_then(|r| r.error_for_status());
            match response {
                Ok(r) => {
                    if r.bytes().await.is_err() {
                        return None;
                    }
                }
                Err(e) => {
                    debug!(url = %target, error = %e, "Latency probe failed");
                    return None;
                }
            }
            total += started.elapsed();
        }
        Some(total.as_secs_f64() * 1000.0 / f64::from(LATENCY_SAMPLES))
    }

    fn selected(&self) -> Result<&SelectedServer, ProviderError> {
        self.selected
            .as_ref()
            .ok_or(ProviderError::NotReady("a server was selected"))
    }
}

#[async_trait]
impl MeasurementProvider for SpeedtestProvider {
    async fn select_server(&mut self) -> Result<ServerInfo, ProviderError> {
        self.selected = None;
        self.download = None;
        self.upload = None;

        let servers = self.fetch_servers().await?;
        let candidates: Vec<(ServerEntry, Url)> = servers
            .into_iter()
            .take(self.config.candidates)
            .filter_map(|entry| match Url::parse(&entry.url) {
                Ok(url) => Some((entry, url)),
                Err(e) => {
                    warn!(url = %entry.url, error = %e, "Skipping server with invalid URL");
                    None
                }
            })
            .collect();

        let latencies = join_all(candidates.iter().map(|(_, url)| self.probe_latency(url))).await;

        let (entry, upload_url, latency_ms) = candidates
            .into_iter()
            .zip(latencies)
            .filter_map(|((entry, url), latency)| latency.map(|l| (entry, url, l)))
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .ok_or(ProviderError::NoServers)?;

        info!(
            server = %entry.id,
            sponsor = %entry.sponsor,
            name = %entry.name,
            latency_ms,
            "Selected test server"
        );

        let info = ServerInfo {
            url: entry.url,
            id: entry.id.to_string(),
        };
        self.selected = Some(SelectedServer {
            info: info.clone(),
            upload_url,
            latency_ms,
        });
        Ok(info)
    }

    async fn measure_download(&mut self) -> Result<f64, ProviderError> {
        let upload_url = self.selected()?.upload_url.clone();
        let targets = DOWNLOAD_IMAGE_SIZES
            .iter()
            .map(|n| {
                upload_url
                    .join(&format!("random{n}x{n}.jpg"))
                    .map(|u| cache_busted(&u))
                    .map_err(|e| ProviderError::InvalidResponse {
                        endpoint: upload_url.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let started = Instant::now();
        let responses = join_all(targets.into_iter().map(|url| {
            let client = self.client.clone();
            async move {
                let body = client.get(url).send().await?.error_for_status()?.bytes().await?;
                Ok::<usize, reqwest::Error>(body.len())
            }
        }))
        .await;
        let elapsed = started.elapsed();

        let mut received = 0usize;
        for response in responses {
            received += response?;
        }

        let bps = bits_per_second(received, elapsed);
        debug!(bytes = received, elapsed_ms = elapsed.as_millis() as u64, bps, "Download measured");
        self.download = Some(bps);
        Ok(bps)
    }

    async fn measure_upload(&mut self) -> Result<f64, ProviderError> {
        let upload_url = self.selected()?.upload_url.clone();

        let started = Instant::now();
        let responses = join_all(UPLOAD_PAYLOAD_SIZES.iter().map(|&size| {
            let client = self.client.clone();
            let url = cache_busted(&upload_url);
            async move {
                client
                    .post(url)
                    .body(upload_payload(size))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<usize, reqwest::Error>(size)
            }
        }))
        .await;
        let elapsed = started.elapsed();

        let mut sent = 0usize;
        for response in responses {
            sent += response?;
        }

        let bps = bits_per_second(sent, elapsed);
        debug!(bytes = sent, elapsed_ms = elapsed.as_millis() as u64, bps, "Upload measured");
        self.upload = Some(bps);
        Ok(bps)
    }

    fn results(&self) -> Result<MeasurementResults, ProviderError> {
        let selected = self.selected()?;
        let download = self
            .download
            .ok_or(ProviderError::NotReady("download was measured"))?;
        let upload = self
            .upload
            .ok_or(ProviderError::NotReady("upload was measured"))?;

        Ok(MeasurementResults {
            ping: selected.latency_ms,
            download,
            upload,
            server: selected.info.clone(),
        })
    }
}

/// Append a random query parameter so intermediate caches are bypassed.
fn cache_busted(url: &Url) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("x", &rand::random::<u64>().to_string());
    url
}

fn upload_payload(size: usize) -> Vec<u8> {
    const PREFIX: &[u8] = b"content1=";
    let mut body = Vec::with_capacity(size);
    body.extend_from_slice(PREFIX);
    body.extend(
        b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ"
            .iter()
            .cycle()
            .take(size.saturating_sub(PREFIX.len())),
    );
    body
}

fn bits_per_second(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs
}
