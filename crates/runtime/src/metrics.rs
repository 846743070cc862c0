//! Metrics collection and Prometheus export.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tts_core::{ErrorKind, MediaType, TtsError, TtsResult};

/// Metrics recorder for serving operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtsMetrics;

impl TtsMetrics {
    /// Install the global Prometheus recorder.
    ///
    /// # Returns
    /// The recorder handle; render it to serve the scrape endpoint.
    pub fn install() -> TtsResult<(Self, PrometheusHandle)> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| TtsError::internal(format!("metrics init failed: {e}")))?;

        Self::register_metrics();

        Ok((Self, handle))
    }

    /// Metrics without a recorder; every call is a no-op.
    pub fn init_noop() -> Self {
        Self
    }

    fn register_metrics() {
        describe_counter!("tts_requests_total", "Synthesis requests received");
        describe_counter!(
            "tts_requests_completed",
            "Synthesis requests that delivered all audio"
        );
        describe_counter!(
            "tts_requests_failed",
            "Synthesis requests that failed, by error kind"
        );

        describe_counter!("tts_model_cache_hits", "Model cache lookups that hit");
        describe_counter!("tts_model_cache_misses", "Model cache lookups that built");
        describe_counter!("tts_model_cache_evictions", "Instances evicted from the cache");
        describe_gauge!("tts_model_cache_entries", "Instances currently cached");
        describe_histogram!(
            "tts_model_load_ms",
            "Model construction latency in milliseconds"
        );

        describe_counter!("tts_promotions", "Instances moved to serving residency");
        describe_counter!("tts_demotions", "Instances moved to host residency");

        describe_histogram!(
            "tts_time_to_first_chunk_ms",
            "Time from request to first packaged chunk in milliseconds"
        );
        describe_histogram!(
            "tts_total_latency_ms",
            "Total request latency in milliseconds"
        );
        describe_gauge!("tts_active_requests", "Syntheses currently running");
    }

    /// Record a new request received.
    pub fn request_received(&self) {
        counter!("tts_requests_total").increment(1);
    }

    /// Record a request that delivered all audio.
    pub fn request_completed(&self, media_type: MediaType) {
        counter!("tts_requests_completed", "media_type" => media_type.as_str()).increment(1);
    }

    /// Record a failed request.
    pub fn request_failed(&self, kind: ErrorKind) {
        counter!("tts_requests_failed", "kind" => kind.as_str()).increment(1);
    }

    pub fn cache_hit(&self) {
        counter!("tts_model_cache_hits").increment(1);
    }

    pub fn cache_miss(&self) {
        counter!("tts_model_cache_misses").increment(1);
    }

    pub fn cache_eviction(&self) {
        counter!("tts_model_cache_evictions").increment(1);
    }

    pub fn set_cache_entries(&self, count: usize) {
        gauge!("tts_model_cache_entries").set(count as f64);
    }

    /// Record model construction latency.
    pub fn record_model_load(&self, ms: f64) {
        histogram!("tts_model_load_ms").record(ms);
    }

    pub fn promotion(&self) {
        counter!("tts_promotions").increment(1);
    }

    pub fn demotion(&self) {
        counter!("tts_demotions").increment(1);
    }

    /// Record time to the first packaged chunk.
    pub fn record_time_to_first_chunk(&self, ms: f64) {
        histogram!("tts_time_to_first_chunk_ms").record(ms);
    }

    /// Record total latency.
    pub fn record_total_latency(&self, ms: f64) {
        histogram!("tts_total_latency_ms").record(ms);
    }

    /// Adjust the running synthesis count.
    pub fn active_requests_delta(&self, delta: f64) {
        gauge!("tts_active_requests").increment(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_noop() {
        let metrics = TtsMetrics::init_noop();

        // No recorder installed; none of these may panic.
        metrics.request_received();
        metrics.request_completed(MediaType::Wav);
        metrics.request_failed(ErrorKind::ClientInput);
        metrics.cache_hit();
        metrics.set_cache_entries(3);
        metrics.record_time_to_first_chunk(100.0);
        metrics.active_requests_delta(1.0);
    }
}
