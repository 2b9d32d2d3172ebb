use std::sync::LazyLock;

use prometheus::*;

static METRIC_QUERY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("kf_match_query_count", "count of the query images", &["status"])
        .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "kf_match_query_duration",
        "duration of the per-image query in seconds, embedding included"
    )
    .unwrap()
});

static METRIC_BEST_DISTANCE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "kf_match_best_distance",
        "squared distance of the closest key frame",
        exponential_buckets(0.01, 4., 12).unwrap()
    )
    .unwrap()
});

/// 记录一次成功的查询
pub fn observe_query(duration: f32, best_distance: Option<f32>) {
    METRIC_QUERY_COUNT.with_label_values(&["ok"]).inc();
    METRIC_QUERY_DURATION.observe(duration as f64);
    if let Some(distance) = best_distance {
        METRIC_BEST_DISTANCE.observe(distance as f64);
    }
}

/// 记录一次失败的查询
pub fn inc_query_error() {
    METRIC_QUERY_COUNT.with_label_values(&["error"]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_query() {
        let before = METRIC_QUERY_COUNT.with_label_values(&["ok"]).get();
        observe_query(0.01, Some(0.5));
        observe_query(0.01, None);
        assert_eq!(METRIC_QUERY_COUNT.with_label_values(&["ok"]).get(), before + 2);
        assert!(METRIC_BEST_DISTANCE.get_sample_count() >= 1);
    }
}
