use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info};
use prometheus::TEXT_FORMAT;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;

use super::MetricsRegistry;
use crate::error::RegistryError;

const METRICS_PATH: &str = "/metrics";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Serves the registry on `GET /metrics`.
pub struct Exporter {
    listener: TcpListener,
    registry: Arc<MetricsRegistry>,
}

impl Exporter {
    pub async fn bind(addr: SocketAddr, registry: Arc<MetricsRegistry>) -> Result<Self, RegistryError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RegistryError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Exporter { listener, registry })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }

    /// Accepts scrapes until `shutdown` flips, then closes the listener.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Some(addr) = self.local_addr() {
            info!("Serving metrics on http://{addr}{METRICS_PATH}");
        }

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown.changed() => break,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Typically EMFILE; retrying at once would spin.
                    error!("Metrics listener accept failed: {e}");
                    tokio::select! {
                        _ = sleep(ACCEPT_BACKOFF) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            let registry = self.registry.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let registry = registry.clone();
                    async move { Ok::<_, Infallible>(respond(&registry, &req)) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!("Metrics connection from {peer} ended: {e}");
                }
            });
        }

        info!("Metrics listener closed");
    }
}

fn respond(registry: &MetricsRegistry, req: &Request<Incoming>) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != METRICS_PATH {
        return status(StatusCode::NOT_FOUND, "not found\n");
    }

    match registry.render() {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            response
        }
        Err(e) => {
            error!("Failed to render metrics: {e}");
            status(StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics\n")
        }
    }
}

fn status(code: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = code;
    response
}
