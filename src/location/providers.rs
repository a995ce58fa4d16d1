//! Location providers: gpsd, IP geolocation, and caller-reported fixes.

use super::types::{Coordinate, LocationError, LocationReading, LocationSource};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Default deadline for a single fix.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";
const GPSD_PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const IP_API_URL: &str = "https://ipapi.co/json/";
/// IP geolocation only knows the city.
const IP_ACCURACY_M: f64 = 25_000.0;
/// ureq's own deadline trails the outer one so the outer timer always fires first.
const IP_DEADLINE_SLACK: Duration = Duration::from_millis(500);

/// Anything that can produce the device's current position.
pub trait LocationProvider: Send + Sync {
    /// Fetch a fresh fix. Never served from a cache.
    fn current_location(&self) -> impl Future<Output = Result<LocationReading, LocationError>> + Send;

    fn name(&self) -> &'static str;
}

/// Which provider to use, chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// gpsd if a daemon answers, otherwise IP geolocation.
    #[default]
    Auto,
    Gpsd,
    Ip,
}

/// Settings shared by the network-backed providers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub gpsd_addr: String,
    pub timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            gpsd_addr: DEFAULT_GPSD_ADDR.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ─── gpsd (native location service) ─────────────────────────────

const GPSD_WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

/// Reports whose own timestamp is older than this, relative to the request, are stale.
const MAX_FIX_LAG_MS: i64 = 1000;

#[derive(Deserialize, Debug)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: Option<u8>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    eph: Option<f64>,
    #[serde(default)]
    epx: Option<f64>,
    #[serde(default)]
    epy: Option<f64>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    devices: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    message: Option<String>,
}

/// Reads a position from a running gpsd daemon.
#[derive(Debug, Clone)]
pub struct GpsdProvider {
    addr: String,
    timeout: Duration,
}

impl GpsdProvider {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self { addr: addr.into(), timeout }
    }

    /// Whether a gpsd daemon accepts connections at the configured address.
    pub async fn is_available(&self) -> bool {
        matches!(
            tokio::time::timeout(GPSD_PROBE_TIMEOUT, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }

    async fn read_fix(&self, requested_at: DateTime<Utc>) -> Result<LocationReading, LocationError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| connect_error(&self.addr, e))?;
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(GPSD_WATCH)
            .await
            .map_err(|e| LocationError::Network(e.to_string()))?;

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| LocationError::Network(e.to_string()))?
        {
            if let Some(reading) = parse_gpsd_report(&line, requested_at)? {
                return Ok(reading);
            }
        }
        Err(LocationError::NoFix)
    }
}

impl LocationProvider for GpsdProvider {
    async fn current_location(&self) -> Result<LocationReading, LocationError> {
        let requested_at = Utc::now();
        match tokio::time::timeout(self.timeout, self.read_fix(requested_at)).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout(self.timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "gpsd"
    }
}

fn connect_error(addr: &str, e: std::io::Error) -> LocationError {
    match e.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::AddrNotAvailable => {
            LocationError::Unsupported(format!("no gpsd listening at {}", addr))
        }
        ErrorKind::PermissionDenied => LocationError::PermissionDenied(e.to_string()),
        _ => LocationError::Network(e.to_string()),
    }
}

/// Interpret one gpsd JSON line. `Ok(None)` means keep reading.
fn parse_gpsd_report(line: &str, requested_at: DateTime<Utc>) -> Result<Option<LocationReading>, LocationError> {
    let report: GpsdReport = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!("skipping unparseable gpsd line: {}", e);
            return Ok(None);
        }
    };

    match report.class.as_str() {
        "DEVICES" if report.devices.as_ref().is_some_and(|d| d.is_empty()) => {
            Err(LocationError::Unsupported("gpsd reports no GPS devices".into()))
        }
        "ERROR" => Err(LocationError::InvalidResponse(
            report.message.unwrap_or_else(|| "gpsd error".into()),
        )),
        "TPV" => {
            // mode 0/1: no fix yet
            if report.mode.unwrap_or(0) < 2 {
                return Ok(None);
            }
            let (Some(lat), Some(lon)) = (report.lat, report.lon) else {
                return Ok(None);
            };

            let fix_time = report
                .time
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc));
            if let Some(t) = fix_time {
                if t < requested_at - ChronoDuration::milliseconds(MAX_FIX_LAG_MS) {
                    return Ok(None);
                }
            }

            let accuracy = report
                .eph
                .or_else(|| match (report.epx, report.epy) {
                    (Some(x), Some(y)) => Some(x.max(y)),
                    (x, y) => x.or(y),
                })
                .unwrap_or(0.0);

            let Ok(coordinate) = Coordinate::new(lat, lon) else {
                tracing::debug!("skipping gpsd fix with out-of-range position {}, {}", lat, lon);
                return Ok(None);
            };
            let mut reading = LocationReading::now(coordinate, accuracy, LocationSource::Gpsd);
            if let Some(t) = fix_time {
                reading.timestamp = t;
            }
            Ok(Some(reading))
        }
        _ => Ok(None),
    }
}

// ─── IP-based geolocation (network fallback) ───────────────────

#[derive(Deserialize)]
struct IpApiResult {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    error: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

/// Coarse position from the public IP address.
#[derive(Debug, Clone)]
pub struct IpProvider {
    url: String,
    timeout: Duration,
}

impl IpProvider {
    pub fn new(timeout: Duration) -> Self {
        Self::with_url(IP_API_URL, timeout)
    }

    /// Use a different endpoint speaking the ipapi.co JSON shape.
    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Self {
        Self { url: url.into(), timeout }
    }
}

impl LocationProvider for IpProvider {
    async fn current_location(&self) -> Result<LocationReading, LocationError> {
        let url = self.url.clone();
        let timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || ip_geolocate(&url, timeout));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(LocationError::Network(join.to_string())),
            Err(_) => Err(LocationError::Timeout(self.timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

fn ip_geolocate(url: &str, timeout: Duration) -> Result<LocationReading, LocationError> {
    let response = ureq::get(url)
        .set("User-Agent", "JiranLink/0.1")
        .timeout(timeout + IP_DEADLINE_SLACK)
        .call()
        .map_err(|e| ureq_error(e, timeout))?;

    let r: IpApiResult = response
        .into_json()
        .map_err(|e| LocationError::InvalidResponse(e.to_string()))?;

    if r.error == Some(true) {
        return Err(LocationError::InvalidResponse(
            r.reason.unwrap_or_else(|| "lookup refused".into()),
        ));
    }

    let lat = r.latitude.ok_or_else(|| LocationError::InvalidResponse("no latitude".into()))?;
    let lon = r.longitude.ok_or_else(|| LocationError::InvalidResponse("no longitude".into()))?;

    Ok(LocationReading::now(Coordinate::new(lat, lon)?, IP_ACCURACY_M, LocationSource::Ip))
}

fn ureq_error(e: ureq::Error, timeout: Duration) -> LocationError {
    match e {
        ureq::Error::Status(code @ (401 | 403 | 429), _) => {
            LocationError::PermissionDenied(format!("HTTP {}", code))
        }
        ureq::Error::Status(code, _) => LocationError::Network(format!("HTTP {}", code)),
        ureq::Error::Transport(t) if is_timeout(&t) => LocationError::Timeout(timeout),
        ureq::Error::Transport(t) => LocationError::Network(t.to_string()),
    }
}

/// Whether any io error in the chain is a read/connect timeout.
fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

// ─── Caller-reported fix ────────────────────────────────────────

/// A fix supplied by the caller, e.g. a phone posting its own GPS reading.
#[derive(Debug, Clone, Copy)]
pub struct ManualProvider {
    coordinate: Coordinate,
    accuracy_m: f64,
}

impl ManualProvider {
    pub fn new(lat: f64, lon: f64, accuracy_m: f64) -> Result<Self, LocationError> {
        Ok(Self {
            coordinate: Coordinate::new(lat, lon)?,
            accuracy_m: accuracy_m.max(0.0),
        })
    }
}

impl LocationProvider for ManualProvider {
    async fn current_location(&self) -> Result<LocationReading, LocationError> {
        Ok(LocationReading::now(self.coordinate, self.accuracy_m, LocationSource::Manual))
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

// ─── Startup selection ──────────────────────────────────────────

/// The provider variant picked for this process.
#[derive(Debug, Clone)]
pub enum PlatformProvider {
    Gpsd(GpsdProvider),
    Ip(IpProvider),
    Manual(ManualProvider),
}

impl PlatformProvider {
    /// Resolve `kind` to a concrete provider. `Auto` probes gpsd once.
    pub async fn select(kind: ProviderKind, settings: &ProviderSettings) -> Self {
        let gpsd = GpsdProvider::new(settings.gpsd_addr.clone(), settings.timeout);
        let selected = match kind {
            ProviderKind::Gpsd => Self::Gpsd(gpsd),
            ProviderKind::Ip => Self::Ip(IpProvider::new(settings.timeout)),
            ProviderKind::Auto => {
                if gpsd.is_available().await {
                    Self::Gpsd(gpsd)
                } else {
                    Self::Ip(IpProvider::new(settings.timeout))
                }
            }
        };
        tracing::info!(provider = selected.name(), "location provider selected");
        selected
    }
}

impl From<ManualProvider> for PlatformProvider {
    fn from(p: ManualProvider) -> Self {
        Self::Manual(p)
    }
}

impl LocationProvider for PlatformProvider {
    async fn current_location(&self) -> Result<LocationReading, LocationError> {
        match self {
            Self::Gpsd(p) => p.current_location().await,
            Self::Ip(p) => p.current_location().await,
            Self::Manual(p) => p.current_location().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Gpsd(p) => p.name(),
            Self::Ip(p) => p.name(),
            Self::Manual(p) => p.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve `lines` to the first client, then hold the connection open.
    async fn fake_gpsd(lines: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 128];
            let _ = sock.read(&mut buf).await;
            for line in lines {
                sock.write_all(line.as_bytes()).await.unwrap();
                sock.write_all(b"\n").await.unwrap();
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        addr
    }

    /// Answer one HTTP request with `status` and `body`.
    async fn fake_http(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            let resp = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
        });
        format!("http://{}/json/", addr)
    }

    fn now_rfc3339() -> String {
        Utc::now().to_rfc3339()
    }

    #[test]
    fn test_parse_tpv_fix() {
        let line = format!(
            r#"{{"class":"TPV","mode":3,"lat":3.139,"lon":101.6869,"eph":12.5,"time":"{}"}}"#,
            now_rfc3339()
        );
        let r = parse_gpsd_report(&line, Utc::now()).unwrap().unwrap();
        assert_eq!(r.source, LocationSource::Gpsd);
        assert!((r.coordinate.lat() - 3.139).abs() < 1e-9);
        assert_eq!(r.accuracy_m, 12.5);
    }

    #[test]
    fn test_parse_tpv_epx_epy_fallback() {
        let line = r#"{"class":"TPV","mode":2,"lat":1.5,"lon":103.75,"epx":8.0,"epy":15.0}"#;
        let r = parse_gpsd_report(line, Utc::now()).unwrap().unwrap();
        assert_eq!(r.accuracy_m, 15.0);
    }

    #[test]
    fn test_parse_skips_no_fix_and_other_classes() {
        let now = Utc::now();
        assert!(parse_gpsd_report(r#"{"class":"TPV","mode":1}"#, now).unwrap().is_none());
        assert!(parse_gpsd_report(r#"{"class":"VERSION","release":"3.25"}"#, now).unwrap().is_none());
        assert!(parse_gpsd_report("not json", now).unwrap().is_none());
    }

    #[test]
    fn test_parse_skips_stale_fix() {
        let line = r#"{"class":"TPV","mode":3,"lat":3.0,"lon":101.0,"time":"2020-01-01T00:00:00.000Z"}"#;
        assert!(parse_gpsd_report(line, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_parse_no_devices() {
        let err = parse_gpsd_report(r#"{"class":"DEVICES","devices":[]}"#, Utc::now()).unwrap_err();
        assert_eq!(err.reason(), "unsupported");
    }

    #[test]
    fn test_parse_skips_out_of_range() {
        let line = r#"{"class":"TPV","mode":3,"lat":123.0,"lon":0.0}"#;
        assert!(parse_gpsd_report(line, Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gpsd_skips_bad_fix_and_reads_next() {
        let addr = fake_gpsd(vec![
            r#"{"class":"TPV","mode":3,"lat":123.0,"lon":0.0}"#.into(),
            r#"{"class":"TPV","mode":3,"lat":4.5975,"lon":101.0901}"#.into(),
        ])
        .await;
        let r = GpsdProvider::new(addr, Duration::from_secs(2)).current_location().await.unwrap();
        assert!((r.coordinate.lat() - 4.5975).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_detected_in_error_chain() {
        let timed_out = std::io::Error::new(ErrorKind::TimedOut, "read timed out");
        assert!(is_timeout(&timed_out));
        let wrapped = std::io::Error::new(ErrorKind::Other, timed_out);
        assert!(is_timeout(&wrapped));
        let refused = std::io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert!(!is_timeout(&refused));
    }

    #[tokio::test]
    async fn test_gpsd_reads_first_fix() {
        let addr = fake_gpsd(vec![
            r#"{"class":"VERSION","release":"3.25"}"#.into(),
            r#"{"class":"DEVICES","devices":[{"path":"/dev/ttyUSB0"}]}"#.into(),
            r#"{"class":"TPV","mode":1}"#.into(),
            format!(r#"{{"class":"TPV","mode":3,"lat":1.50,"lon":103.75,"eph":5.0,"time":"{}"}}"#, now_rfc3339()),
        ])
        .await;

        let provider = GpsdProvider::new(addr, Duration::from_secs(2));
        let r = provider.current_location().await.unwrap();
        assert!((r.coordinate.lon() - 103.75).abs() < 1e-9);
        assert_eq!(r.accuracy_m, 5.0);
    }

    #[tokio::test]
    async fn test_gpsd_timeout() {
        let addr = fake_gpsd(vec![r#"{"class":"TPV","mode":1}"#.into()]).await;
        let provider = GpsdProvider::new(addr, Duration::from_millis(200));
        let err = provider.current_location().await.unwrap_err();
        assert_eq!(err, LocationError::Timeout(Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn test_gpsd_not_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let provider = GpsdProvider::new(addr, Duration::from_secs(2));
        assert!(!provider.is_available().await);
        let err = provider.current_location().await.unwrap_err();
        assert_eq!(err.reason(), "unsupported");
    }

    #[tokio::test]
    async fn test_ip_provider_ok() {
        let url = fake_http("200 OK", r#"{"latitude":3.1412,"longitude":101.6865,"city":"Kuala Lumpur"}"#).await;
        let r = IpProvider::with_url(url, Duration::from_secs(5)).current_location().await.unwrap();
        assert_eq!(r.source, LocationSource::Ip);
        assert_eq!(r.accuracy_m, IP_ACCURACY_M);
        assert!((r.coordinate.lat() - 3.1412).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ip_provider_rate_limited() {
        let url = fake_http("429 Too Many Requests", r#"{"error":true,"reason":"RateLimited"}"#).await;
        let err = IpProvider::with_url(url, Duration::from_secs(5)).current_location().await.unwrap_err();
        assert_eq!(err.reason(), "permission_denied");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ip_provider_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/json/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let provider = IpProvider::with_url(url, Duration::from_millis(100));
        for _ in 0..10 {
            let err = provider.current_location().await.unwrap_err();
            assert_eq!(err.reason(), "timeout");
            assert_eq!(err, LocationError::Timeout(Duration::from_millis(100)));
        }
    }

    #[tokio::test]
    async fn test_ip_provider_missing_coordinates() {
        let url = fake_http("200 OK", r#"{"city":"Nowhere"}"#).await;
        let err = IpProvider::with_url(url, Duration::from_secs(5)).current_location().await.unwrap_err();
        assert_eq!(err, LocationError::InvalidResponse("no latitude".into()));
    }

    #[tokio::test]
    async fn test_manual_provider() {
        let p = ManualProvider::new(5.4141, 100.3288, 30.0).unwrap();
        let r = p.current_location().await.unwrap();
        assert_eq!(r.source, LocationSource::Manual);
        assert_eq!(r.source.to_string(), p.name());
        assert_eq!(r.accuracy_m, 30.0);
        assert!(ManualProvider::new(-91.0, 0.0, 0.0).is_err());
    }

    #[tokio::test]
    async fn test_select_forced_variants() {
        let settings = ProviderSettings::default();
        assert_eq!(PlatformProvider::select(ProviderKind::Ip, &settings).await.name(), "ip");
        assert_eq!(PlatformProvider::select(ProviderKind::Gpsd, &settings).await.name(), "gpsd");
    }

    #[tokio::test]
    async fn test_select_auto_falls_back_to_ip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let settings = ProviderSettings { gpsd_addr: addr, timeout: Duration::from_secs(1) };
        assert_eq!(PlatformProvider::select(ProviderKind::Auto, &settings).await.name(), "ip");
    }
}
