//! Connection sessions.

use crate::{
    config::SearchConfig,
    error::{Result, SearchError},
    index::AliasManager,
    observer::{LoggingObserver, RequestObserver},
    pool::RoundRobinConnectionPool,
    transport::{EngineRequest, EngineResponse, OpenSearchTransport, Transport},
};
use opensearch::{
    http::{
        transport::{SingleNodeConnectionPool, TransportBuilder},
        Url,
    },
    OpenSearch,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use trawler_config::Validate;
use trawler_log::{debug, info, warn};

/// Builds [`Session`]s from configuration.
pub struct SessionFactory;

impl SessionFactory {
    /// Open a session to the cluster described by `config`.
    ///
    /// Multiple hosts are balanced round-robin unless
    /// [`SearchConfig::single_node`] is set, in which case only the first host
    /// is used. No request is sent; see [`Session::ping`].
    pub fn build(config: &SearchConfig) -> Result<Session> {
        config.validate()?;
        info!("Initializing search session for: {}", config.url);

        let hosts = config
            .hosts()
            .iter()
            .map(|host| {
                Url::parse(host)
                    .map_err(|e| SearchError::InvalidConfig(format!("Invalid URL {}: {}", host, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let first = hosts
            .first()
            .cloned()
            .ok_or_else(|| SearchError::InvalidConfig("No URLs provided".to_string()))?;

        let mut builder = if config.single_node || hosts.len() == 1 {
            debug!("Using single node connection pool: {}", first);
            TransportBuilder::new(SingleNodeConnectionPool::new(first))
        } else {
            debug!("Using round-robin connection pool over {} hosts", hosts.len());
            TransportBuilder::new(RoundRobinConnectionPool::new(hosts)?)
        };

        builder = builder.timeout(config.request_timeout).disable_proxy();

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.auth(opensearch::auth::Credentials::Basic(
                user.clone(),
                pass.clone(),
            ));
        }

        builder = configure_tls(builder, config)?;

        let transport = builder
            .build()
            .map_err(|e| SearchError::Connection(e.to_string()))?;

        debug!("Search session initialized");

        Ok(Session::with_transport(
            OpenSearchTransport::new(OpenSearch::new(transport)),
            config.clone(),
        ))
    }
}

#[cfg(any(feature = "rustls", feature = "native-tls"))]
fn configure_tls(mut builder: TransportBuilder, config: &SearchConfig) -> Result<TransportBuilder> {
    use opensearch::cert::{Certificate, CertificateValidation};

    if config.tls.danger_accept_invalid_certs {
        warn!(
            "Certificate verification disabled for {}; do not use this against production clusters",
            config.url
        );
        builder = builder.cert_validation(CertificateValidation::None);
    } else if let Some(path) = &config.tls.ca_cert {
        let pem = std::fs::read(path).map_err(|e| {
            SearchError::InvalidConfig(format!("Cannot read CA certificate {}: {}", path, e))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|e| {
            SearchError::InvalidConfig(format!("Invalid CA certificate {}: {}", path, e))
        })?;
        builder = builder.cert_validation(CertificateValidation::Full(certificate));
    }

    Ok(builder)
}

#[cfg(not(any(feature = "rustls", feature = "native-tls")))]
fn configure_tls(builder: TransportBuilder, config: &SearchConfig) -> Result<TransportBuilder> {
    if config.tls.danger_accept_invalid_certs || config.tls.ca_cert.is_some() {
        warn!("TLS options ignored: built without a TLS backend");
    }
    Ok(builder)
}

/// A handle to one cluster.
///
/// Cheap to clone; clones share the transport and observer.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    observer: Arc<dyn RequestObserver>,
    config: Arc<SearchConfig>,
}

impl Session {
    /// Create a session over an arbitrary transport.
    pub fn with_transport(transport: impl Transport + 'static, config: SearchConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            observer: Arc::new(LoggingObserver),
            config: Arc::new(config),
        }
    }

    /// Replace the request observer.
    pub fn with_observer(mut self, observer: impl RequestObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// The configuration this session was built from.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Alias and index administration.
    pub fn aliases(&self) -> AliasManager {
        AliasManager::new(self.clone())
    }

    /// Send one request, notifying the observer.
    pub async fn send(&self, request: &EngineRequest) -> Result<EngineResponse> {
        self.observer.on_request(request);
        let started = Instant::now();

        match self.transport.send(request).await {
            Ok(response) => {
                self.observer.on_response(request, &response, started.elapsed());
                Ok(response)
            }
            Err(e) => {
                self.observer.on_error(request, &e, started.elapsed());
                Err(e)
            }
        }
    }

    /// Check that the cluster answers.
    pub async fn ping(&self) -> Result<bool> {
        let response = self.send(&EngineRequest::Ping).await?;
        Ok(response.is_success())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::transport::RequestKind;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl RequestObserver for Arc<Recorder> {
        fn on_request(&self, request: &EngineRequest) {
            self.seen.lock().unwrap().push(format!("req {}", request.endpoint()));
        }

        fn on_response(&self, _request: &EngineRequest, response: &EngineResponse, _: Duration) {
            self.seen.lock().unwrap().push(format!("res {}", response.status));
        }

        fn on_error(&self, _request: &EngineRequest, _error: &SearchError, _: Duration) {
            self.seen.lock().unwrap().push("err".to_string());
        }
    }

    fn config() -> SearchConfig {
        SearchConfig::new("http://localhost:9200", "people")
    }

    #[test]
    fn test_build_single_and_multi_node() {
        assert!(SessionFactory::build(&config()).is_ok());
        assert!(
            SessionFactory::build(&config().with_single_node(true)).is_ok()
        );

        let multi = SearchConfig::new("http://a:9200,http://b:9200", "people");
        assert!(SessionFactory::build(&multi).is_ok());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = SessionFactory::build(&SearchConfig::new("not a url", "people"));
        assert!(result.is_err());
    }

    #[cfg(any(feature = "rustls", feature = "native-tls"))]
    #[test]
    fn test_build_rejects_missing_ca_cert() {
        let config = config().with_tls(crate::TlsConfig::with_ca_cert("/nonexistent/ca.pem"));
        assert!(matches!(
            SessionFactory::build(&config),
            Err(SearchError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_observer_sees_round_trips() {
        let recorder = Arc::new(Recorder::default());
        let transport = MemoryTransport::new();
        transport.fail_nth(RequestKind::Ping, 2).await;

        let session = Session::with_transport(transport, config()).with_observer(recorder.clone());

        assert!(session.ping().await.unwrap());
        assert!(session.ping().await.is_err());

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["req HEAD /", "res 200", "req HEAD /", "err"]);
    }
}
