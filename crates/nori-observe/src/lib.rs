//! nori-observe: vendor-neutral observability ABI.
//!
//! Core crates depend only on these traits and event types. Backends live elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: VizEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: VizEvent) {}
}

/// Typed events for live visualization (vector contents never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum VizEvent {
    Index(IndexEvt),
}

#[derive(Clone, Debug)]
pub struct IndexEvt {
    /// Vector dimensionality of the index emitting the event.
    pub dimensions: u32,
    pub kind: IndexKind,
}
#[derive(Clone, Debug)]
pub enum IndexKind {
    /// Fresh index created (and its empty file written).
    Created,
    /// Existing index file parsed and validated.
    Loaded { vectors: u64, bytes: u64 },
    /// In-memory state durably replaced the backing file.
    Flushed { vectors: u64, bytes: u64, ms: u32 },
    /// A new node became the entry point.
    EntryPointPromoted { id: u64, level: u8 },
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
#[macro_export]
macro_rules! obs_hist {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.histo($name, &[], $labels).observe($v as f64);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Tally(Arc<AtomicU64>);
    impl Counter for Tally {
        fn inc(&self, v: u64) {
            self.0.fetch_add(v, Ordering::Relaxed);
        }
    }

    struct CountingMeter {
        total: Arc<AtomicU64>,
    }
    impl Meter for CountingMeter {
        fn counter(
            &self,
            _n: &'static str,
            _l: &'static [(&'static str, &'static str)],
        ) -> Box<dyn Counter> {
            Box::new(Tally(self.total.clone()))
        }
        fn gauge(
            &self,
            n: &'static str,
            l: &'static [(&'static str, &'static str)],
        ) -> Box<dyn Gauge> {
            NoopMeter.gauge(n, l)
        }
        fn histo(
            &self,
            n: &'static str,
            b: &'static [f64],
            l: &'static [(&'static str, &'static str)],
        ) -> Box<dyn Histogram> {
            NoopMeter.histo(n, b, l)
        }
        fn emit(&self, _e: VizEvent) {}
    }

    #[test]
    fn test_noop_meter_accepts_everything() {
        let m = NoopMeter;
        obs_count!(m, "hnsw_add_total", &[], 1);
        obs_gauge!(m, "hnsw_vectors", &[], 10);
        obs_hist!(m, "hnsw_flush_ms", &[], 1.5);
        m.emit(VizEvent::Index(IndexEvt {
            dimensions: 3,
            kind: IndexKind::Created,
        }));
    }

    #[test]
    fn test_count_macro_routes_to_counter() {
        let total = Arc::new(AtomicU64::new(0));
        let m = CountingMeter {
            total: total.clone(),
        };

        obs_count!(m, "hnsw_add_total", &[], 2);
        obs_count!(m, "hnsw_add_total", &[], 3);

        assert_eq!(total.load(Ordering::Relaxed), 5);
    }
}
