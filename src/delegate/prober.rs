//! Readiness probing of controller API servers.

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::Error;

/// Port the API server of every controller listens on.
pub const API_SERVER_PORT: u16 = 6443;

/// Checks that the controller reachable at an address serves requests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReadyProber: Send + Sync {
    async fn probe(&self, name: &str, address: &str) -> Result<(), Error>;
}

/// Probes `/readyz` of the API server over HTTPS.
pub struct HttpReadyProber {
    client: reqwest::Client,
    scheme: &'static str,
    port: u16,
}

impl HttpReadyProber {
    /// Build a prober trusting the given DER-encoded cluster CA certificates.
    pub fn new(root_certs: &[Vec<u8>], timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none());
        for der in root_certs {
            builder = builder.add_root_certificate(reqwest::Certificate::from_der(der)?);
        }
        Ok(Self {
            client: builder.build()?,
            scheme: "https",
            port: API_SERVER_PORT,
        })
    }

    fn url(&self, address: &str) -> String {
        let host = if address.contains(':') {
            format!("[{address}]")
        } else {
            address.to_string()
        };
        format!("{}://{host}:{}/readyz?verbose", self.scheme, self.port)
    }
}

#[async_trait]
impl ReadyProber for HttpReadyProber {
    async fn probe(&self, name: &str, address: &str) -> Result<(), Error> {
        let url = self.url(address);
        let failed = |message: String| Error::Probe {
            name: name.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| failed(format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(failed(format!("GET {url} returned {}", response.status())));
        }

        debug!(node = name, %url, "Controller is ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::health::{HealthState, router};

    fn plain_http(port: u16) -> HttpReadyProber {
        HttpReadyProber {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            scheme: "http",
            port,
        }
    }

    async fn serve_readyz(ready: bool) -> u16 {
        let state = HealthState::new();
        state.set_ready(ready);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });
        port
    }

    #[test]
    fn test_url() {
        let prober = HttpReadyProber::new(&[], Duration::from_secs(1)).unwrap();
        assert_eq!(prober.url("10.0.0.1"), "https://10.0.0.1:6443/readyz?verbose");
        assert_eq!(prober.url("fd00::1"), "https://[fd00::1]:6443/readyz?verbose");
    }

    #[tokio::test]
    async fn test_ready_server() {
        let port = serve_readyz(true).await;
        plain_http(port).probe("controller0", "127.0.0.1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unready_server() {
        let port = serve_readyz(false).await;
        let err = plain_http(port)
            .probe("controller0", "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Probe { name, message }
            if name == "controller0" && message.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = plain_http(port)
            .probe("controller1", "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Probe { name, .. } if name == "controller1"));
    }
}
