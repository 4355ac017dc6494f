//! Periodic `server.version` ping that keeps idle connections open.

use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::client::WeakClient;
use super::methods;

/// Start the keepalive for `client`.
///
/// The first ping goes out one full `period` after start. The task holds
/// only a weak handle and stops by itself once the client is gone, or on
/// the first failed ping.
pub(super) fn spawn(client: WeakClient, period: Duration, params: Vec<Value>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(client) = client.upgrade() else {
                log::debug!("[Stratum] Keepalive stopping, client dropped");
                return;
            };
            if client.is_closed() {
                log::debug!("[Stratum] Keepalive stopping, connection closed");
                return;
            }

            // Fire and forget; the response lands in the replay buffer.
            match client.call(methods::SERVER_VERSION, params.clone()).await {
                Ok(id) => log::trace!("[Stratum] Keepalive ping #{}", id),
                Err(e) => {
                    log::warn!("[Stratum] Keepalive ping failed, stopping: {}", e);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::stratum::client::{ClientConfig, StratumClient};
    use serde_json::Value;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test(start_paused = true)]
    async fn test_pings_server_version_every_period() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let config = ClientConfig {
            keepalive_interval: Duration::from_secs(60),
            ..ClientConfig::default()
        };
        let _client = StratumClient::from_stream(client_end, config);
        let mut lines = BufReader::new(server_end).lines();

        for expected_id in 0..2u64 {
            let line = lines.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["id"].as_u64(), Some(expected_id));
            assert_eq!(request["method"], "server.version");
            assert_eq!(request["params"], serde_json::json!(["2.9.2", "0.10"]));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ping_before_first_period() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let _client = StratumClient::from_stream(client_end, ClientConfig::default());
        let mut lines = BufReader::new(server_end).lines();

        let early = tokio::time::timeout(Duration::from_secs(59), lines.next_line()).await;
        assert!(early.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_pings() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let client = StratumClient::from_stream(client_end, ClientConfig::default());
        let mut lines = BufReader::new(server_end).lines();

        client.close().await.unwrap();

        // Several periods later the server has seen EOF and nothing else.
        match tokio::time::timeout(Duration::from_secs(300), lines.next_line()).await {
            Ok(Ok(Some(line))) => panic!("unexpected line after close: {line}"),
            Ok(Ok(None)) | Err(_) => {}
            Ok(Err(e)) => panic!("read failed: {e}"),
        }
    }
}
