use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;
use tracing::trace;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref CONFIG_MUTATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("config_mutations", "Successful Set/Rollback calls"),
        &["op"]
    )
    .expect("metric can not be created");

    pub static ref API_REQUEST_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("api_request_latency_ms", "Latency of config API calls in ms")
            .buckets(exponential_buckets(0.5, 2.0, 14).expect("valid buckets")),
        &["method"]
    )
    .expect("metric can not be created");

    pub static ref FEED_RECONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new("feed_reconnects", "Change feed reconnect attempts"),
        &["app"]
    )
    .expect("metric can not be created");

    pub static ref SDK_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new("sdk_updates", "Updates seen by the client reconciler"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref SDK_SYNC_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("sdk_sync_errors", "Failed fetch rounds of the client reconciler"),
        &["strategy"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers every collector of this crate. Already registered collectors are skipped.
pub fn register_custom_metrics(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(CONFIG_MUTATIONS.clone()),
        Box::new(API_REQUEST_LATENCY.clone()),
        Box::new(FEED_RECONNECTS.clone()),
        Box::new(SDK_UPDATES.clone()),
        Box::new(SDK_SYNC_ERRORS.clone()),
    ];
    for collector in collectors {
        match registry.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => error!("collector can not be registered: {:?}", e),
        }
    }
}

/// `GET /metrics` in Prometheus text format
pub fn metrics_route() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    register_custom_metrics(&REGISTRY);
    warp::path!("metrics").and(warp::get()).and_then(metrics_handler)
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text(&REGISTRY))
}

pub(crate) fn gather_text(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => {
            trace!(len = v.len(), "metrics gathered");
            v
        }
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
