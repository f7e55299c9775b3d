//! Machine-monitor probe client.
//!
//! A monitor answers a UDP `data\n` request with free-form
//! `Key: Value` lines. Only `MemoryUsage` and `CPU` matter for
//! placement; everything else is tolerated and ignored. Probe failures
//! are expected operation — the scorer turns them into penalties, never
//! into errors.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// The stat request body.
pub const STAT_REQUEST: &[u8] = b"data\n";

/// Why a probe produced no report.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No response within the bounded wait
    #[error("monitor did not answer within {0:?}")]
    Timeout(Duration),

    /// Socket-level failure
    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram arrived from someone other than the probed monitor
    #[error("response from unexpected host {0}")]
    WrongHost(SocketAddr),
}

/// Parsed monitor stats. A key that was missing or unparsable stays
/// `None`; the scorer charges for it separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    /// `MemoryUsage: <pct>%`, truncated to whole percent.
    pub memory_pct: Option<u64>,
    /// `CPU: <pct>%`, truncated to whole percent.
    pub cpu_pct: Option<u64>,
}

/// Parse a monitor response body.
pub fn parse_report(text: &str) -> MonitorReport {
    let mut report = MonitorReport::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "MemoryUsage" => report.memory_pct = parse_percent(value),
            "CPU" => report.cpu_pct = parse_percent(value),
            _ => {}
        }
    }
    report
}

/// Accepts `42%`, `42.7%`, or a bare number; fractions truncate.
fn parse_percent(value: &str) -> Option<u64> {
    let value = value.trim().trim_end_matches('%');
    let whole = value.split('.').next()?;
    whole.parse().ok()
}

/// Send one stat request and wait (bounded) for the reply.
pub async fn probe(endpoint: SocketAddr, timeout: Duration) -> Result<MonitorReport, ProbeError> {
    let bind: SocketAddr = if endpoint.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(STAT_REQUEST, endpoint).await?;

    let mut buf = vec![0u8; 65536];
    let (len, from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))??;
    if from != endpoint {
        return Err(ProbeError::WrongHost(from));
    }

    Ok(parse_report(&String::from_utf8_lossy(&buf[..len])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_scored_keys() {
        let report = parse_report("MemoryUsage: 34%\nCPU: 12%\n");
        assert_eq!(report.memory_pct, Some(34));
        assert_eq!(report.cpu_pct, Some(12));
    }

    #[test]
    fn tolerates_unknown_keys_and_noise() {
        let report = parse_report(
            "FreeMemory: 123456\nMemoryUsage: 34%\nUptime: 9 days\nnot a pair\nCPU: 1%\n",
        );
        assert_eq!(report.memory_pct, Some(34));
        assert_eq!(report.cpu_pct, Some(1));
    }

    #[test]
    fn fractional_percentages_truncate() {
        let report = parse_report("MemoryUsage: 34.9%\nCPU: 0.2%\n");
        assert_eq!(report.memory_pct, Some(34));
        assert_eq!(report.cpu_pct, Some(0));
    }

    #[test]
    fn missing_or_garbled_keys_stay_none() {
        let report = parse_report("MemoryUsage: lots\n");
        assert_eq!(report.memory_pct, None);
        assert_eq!(report.cpu_pct, None);
    }

    #[tokio::test]
    async fn probe_round_trip_against_fake_monitor() {
        let monitor = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = monitor.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (len, from) = monitor.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], STAT_REQUEST);
            monitor
                .send_to(b"MemoryUsage: 40%\nCPU: 5%\n", from)
                .await
                .unwrap();
        });

        let report = probe(endpoint, Duration::from_millis(500)).await.unwrap();
        assert_eq!(report.memory_pct, Some(40));
        assert_eq!(report.cpu_pct, Some(5));
    }

    #[tokio::test]
    async fn probe_times_out_against_silence() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = silent.local_addr().unwrap();

        let err = probe(endpoint, Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }
}
