//! Column-name to metric-name mapping

use std::collections::BTreeMap;

/// Perf CSV columns and their Prometheus-friendly names
pub const DEFAULT_MAPPING: &[(&str, &str)] = &[
    ("latency_p50_ms", "latency_p50_milliseconds"),
    ("latency_p75_ms", "latency_p75_milliseconds"),
    ("latency_p90_ms", "latency_p90_milliseconds"),
    ("latency_p95_ms", "latency_p95_milliseconds"),
    ("latency_p99_ms", "latency_p99_milliseconds"),
    ("latency_avg_ms", "latency_avg_milliseconds"),
    ("throughput_rps", "throughput_requests_per_second"),
];

/// Return a new record whose keys are renamed through `mapping`.
///
/// Keys absent from the mapping are kept as-is. The input is not modified.
pub fn rename_record_keys<K, V, I>(record: I, mapping: &[(&str, &str)]) -> BTreeMap<String, V>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
{
    record
        .into_iter()
        .map(|(key, value)| {
            let key = key.as_ref();
            let renamed = mapping
                .iter()
                .find(|(from, _)| *from == key)
                .map(|(_, to)| *to)
                .unwrap_or(key);
            (renamed.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let record = vec![
            ("concurrency", 2.0),
            ("latency_p50_ms", 60.0),
            ("throughput_rps", 20.0),
        ];
        let renamed = rename_record_keys(record, DEFAULT_MAPPING);

        assert_eq!(renamed.get("latency_p50_milliseconds"), Some(&60.0));
        assert_eq!(renamed.get("throughput_requests_per_second"), Some(&20.0));
        assert_eq!(renamed.get("concurrency"), Some(&2.0));
        assert!(!renamed.contains_key("latency_p50_ms"));
    }

    #[test]
    fn test_custom_mapping_leaves_unknown_keys() {
        let record = BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
        let renamed = rename_record_keys(&record, &[("a", "alpha")]);

        assert_eq!(renamed.get("alpha"), Some(&&1));
        assert_eq!(renamed.get("b"), Some(&&2));
        assert_eq!(record.len(), 2);
        assert!(record.contains_key("a"));
    }
}
