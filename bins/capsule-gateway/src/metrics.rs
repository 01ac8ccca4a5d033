// Prometheus counters for gateway sessions
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SESSIONS_STARTED: IntCounter =
        IntCounter::new("capsule_sessions_started_total", "Sessions accepted by the gateway")
            .expect("metric can be created");
    pub static ref SESSIONS_FINISHED: IntCounter =
        IntCounter::new("capsule_sessions_finished_total", "Sessions whose container reported an exit status")
            .expect("metric can be created");
    pub static ref SESSIONS_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("capsule_sessions_failed_total", "Sessions that ended with an error"),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref SESSIONS_ACTIVE: IntGauge =
        IntGauge::new("capsule_sessions_active", "Sessions currently attached")
            .expect("metric can be created");
}

/// Register all collectors once at startup
pub fn register() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SESSIONS_STARTED.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_FINISHED.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_FAILED.clone()))?;
    REGISTRY.register(Box::new(SESSIONS_ACTIVE.clone()))?;
    Ok(())
}

pub fn render() -> prometheus::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
