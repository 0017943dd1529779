use tally::{
    Config, Producer,
    aggregate::{Numeric, Quantile},
    dimension::FieldValue,
    event::LogEvent,
    pull::NoPull,
    report::{DumpLatency, ReportValue},
    sink::Noop,
};

const CONFIG: &str = r"
metric_id: 42
atom_id: 7
value_fields:
  - field: 1
  - field: 2
    aggregation: max
dimensions_in_what: [0]
bucket_size_nanos: 1000
has_condition: true
";

fn event(t: i64, what: &str, a: i64, b: i64) -> LogEvent {
    LogEvent::new(
        7,
        t,
        vec![
            FieldValue::Str(what.into()),
            FieldValue::Int(a),
            FieldValue::Int(b),
        ],
    )
}

#[test]
fn conditioned_metric_reports_sorted_slices() {
    let config = Config::from_yaml(CONFIG).expect("valid config");
    let producer: Producer<Numeric> =
        Producer::new(config, 0, 0, NoPull, Noop).expect("valid producer");

    producer.on_condition_changed(true, 0);
    producer.on_log_event(&event(100, "a", 1, 5));
    producer.on_log_event(&event(1_100, "a", 2, 3));
    producer.on_log_event(&event(1_200, "b", 4, 9));
    producer.on_log_event(&event(1_300, "a", 3, 8));
    producer.on_condition_changed(false, 1_500);
    producer.on_log_event(&event(1_600, "a", 100, 100));
    producer.on_condition_changed(true, 1_700);

    let report = producer.on_dump_report(2_000, false, true, DumpLatency::NoTimeConstraints);
    assert_eq!(report.metric_id, 42);
    assert_eq!(report.data.len(), 2);

    let a = &report.data[0];
    assert_eq!(a.dimensions_in_what.values(), &[FieldValue::Str("a".into())]);
    let bucket = &a.buckets[0];
    assert_eq!(bucket.bucket_num, Some(1));
    let values: Vec<_> = bucket.values.iter().map(|v| (v.index, v.value)).collect();
    assert_eq!(
        values,
        vec![(0, ReportValue::Long(5)), (1, ReportValue::Long(8))]
    );
    assert_eq!(bucket.condition_true_nanos, Some(800));
    assert_eq!(bucket.condition_correction_nanos, Some(-100));

    let b = &report.data[1];
    let values: Vec<_> = b.buckets[0].values.iter().map(|v| v.value).collect();
    assert_eq!(values, vec![ReportValue::Long(4), ReportValue::Long(9)]);

    assert_eq!(report.skipped.len(), 1);
    let json = serde_json::to_string(&report).expect("serializable");
    assert!(json.contains(r#""reason":"CONDITION_UNKNOWN""#), "{json}");

    let report = producer.on_dump_report(2_001, false, true, DumpLatency::NoTimeConstraints);
    assert!(report.data.is_empty());
    assert!(report.skipped.is_empty());
}

#[test]
fn quantile_metric_reports_sketch_summary() {
    let config = Config::from_yaml(
        r"
metric_id: 1
atom_id: 7
kind: quantile
value_fields:
  - field: 1
bucket_size_nanos: 1000
",
    )
    .expect("valid config");
    let producer: Producer<Quantile> =
        Producer::new(config, 0, 0, NoPull, Noop).expect("valid producer");
    for i in 1..=10 {
        producer.on_log_event(&event(i, "x", i * 10, 0));
    }

    let report = producer.on_dump_report(500, true, true, DumpLatency::Fast);
    let bucket = &report.data[0].buckets[0];
    assert_eq!(bucket.start_bucket_elapsed_nanos, Some(0));
    assert_eq!(bucket.end_bucket_elapsed_nanos, Some(500));
    let ReportValue::Sketch(summary) = bucket.values[0].value else {
        panic!("expected sketch");
    };
    assert_eq!(summary.count, 10);
    assert_eq!(summary.max, Some(100.0));
    assert_eq!(producer.byte_size(), 0);
}
