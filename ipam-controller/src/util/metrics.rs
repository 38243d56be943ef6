//! Prometheus metrics surfaced by the controller (spec.md §4.6) plus a tiny
//! `/metrics` + `/healthz` HTTP server, in the style of a sidecar exporter
//! rather than a full web framework.

use http_body_util::Full;
use hyper::{Response, body::Bytes, service::service_fn};
use hyper_util::{rt::TokioIo, server::conn::auto::Builder};
use lazy_static::lazy_static;
use owo_colors::OwoColorize;
use prometheus::{
    GaugeVec, HistogramVec, IntCounterVec, Opts, Registry, register_gauge_vec,
    register_histogram_vec, register_int_counter_vec,
};
use tokio::net::TcpListener;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref WORKQUEUE_DROPPED: IntCounterVec = register_int_counter_vec!(
        Opts::new(
            "workqueue_dropped_objects",
            "keys dropped after exhausting the retry budget"
        ),
        &["name"]
    )
    .unwrap();
    pub static ref MULTINETWORK_NODE_TOTAL: GaugeVec = register_gauge_vec!(
        Opts::new(
            "multinetwork_node_total",
            "nodes currently carrying a given non-default network"
        ),
        &["network"]
    )
    .unwrap();
    pub static ref GNP_OBJECTS: GaugeVec = register_gauge_vec!(
        Opts::new(
            "gnp_objects",
            "GKENetworkParamSet objects by readiness and device-mode usage"
        ),
        &["ready", "device_mode"]
    )
    .unwrap();
    pub static ref RECONCILE_TOTAL: IntCounterVec = register_int_counter_vec!(
        Opts::new("ipam_reconcile_total", "reconcile attempts per controller"),
        &["controller", "result"]
    )
    .unwrap();
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "ipam_reconcile_duration_seconds",
        "reconcile wall-clock time per controller",
        &["controller"]
    )
    .unwrap();
}

/// Moves a gauge-vec'd count from one label value to another; used for the
/// "decrement old, increment new" pattern both C3 and C4 rely on.
pub fn move_gauge(gauge: &GaugeVec, old_label: Option<&str>, new_label: Option<&str>) {
    if old_label == new_label {
        return;
    }
    if let Some(old) = old_label {
        gauge.with_label_values(&[old]).dec();
    }
    if let Some(new) = new_label {
        gauge.with_label_values(&[new]).inc();
    }
}

fn register_once() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        for c in [
            Box::new(WORKQUEUE_DROPPED.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(MULTINETWORK_NODE_TOTAL.clone()),
            Box::new(GNP_OBJECTS.clone()),
            Box::new(RECONCILE_TOTAL.clone()),
            Box::new(RECONCILE_DURATION.clone()),
        ] {
            let _ = REGISTRY.register(c);
        }
    });
}

async fn handle(
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = match req.uri().path() {
        "/healthz" | "/readyz" => "ok".to_string(),
        "/metrics" => {
            use prometheus::Encoder;
            let encoder = prometheus::TextEncoder::new();
            let families = REGISTRY.gather();
            let mut buf = Vec::new();
            encoder.encode(&families, &mut buf).unwrap();
            String::from_utf8(buf).unwrap()
        }
        _ => "not found".to_string(),
    };
    Ok(Response::new(Full::new(Bytes::from(body))))
}

/// Spawns the metrics/health server in the background. A `port` of 0 skips
/// it entirely, matching how operators disable the sidecar in tests.
pub fn maybe_spawn_metrics_server(port: u16) {
    if port == 0 {
        return;
    }
    register_once();
    tokio::spawn(async move {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("🛑 failed to bind metrics server to {addr}: {e}");
                return;
            }
        };
        println!("{}", format!("📈 metrics server listening on {addr}").green());
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let _ = Builder::new(hyper_util::rt::TokioExecutor::new())
                    .serve_connection(io, service_fn(handle))
                    .await;
            });
        }
    });
}
