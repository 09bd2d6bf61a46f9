//! Property-style tests of the public parsing and statistics API

use testbed::core::batch::parse_batch;
use testbed::core::duration::parse_duration;
use testbed::core::{parse_range, parse_range_or_all, parse_topology_str, ElapsedStats};
use testbed::TestbedError;

#[test]
fn test_span_length_and_order() {
    for (a, b) in [(0usize, 0usize), (0, 4), (3, 9), (10, 12)] {
        let list = parse_range(&format!("[{a}-{b}]")).unwrap();
        assert_eq!(list.len(), b - a + 1);
        assert!(list.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(list.first(), Some(&a));
    }
}

#[test]
fn test_mixed_selector_keeps_token_order() {
    assert_eq!(parse_range("[2-4,0]").unwrap(), vec![2, 3, 4, 0]);
    assert_eq!(parse_range("0").unwrap(), vec![0]);
    assert_eq!(parse_range("[0]").unwrap(), vec![0]);
}

#[test]
fn test_bad_selectors() {
    for bad in ["", "[", "[1-]", "[a]", "-1", "[4-2]"] {
        assert!(parse_range(bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_missing_selector_means_everyone() {
    assert_eq!(parse_range_or_all(None, 3).unwrap(), vec![0, 1, 2]);
    assert_eq!(parse_range_or_all(Some("1"), 3).unwrap(), vec![1]);
}

#[test]
fn test_stats_over_small_sample() {
    // Arrange & Act
    let stats = ElapsedStats::from_secs(&[1.0, 2.0, 3.0]).unwrap();

    // Assert
    assert!((stats.mean - 2.0).abs() < 1e-9);
    assert!((stats.min - 1.0).abs() < 1e-9);
    assert!((stats.max - 3.0).abs() < 1e-9);
    assert!((stats.stddev - 0.816_496_580_927_726).abs() < 1e-9);
    assert!(ElapsedStats::from_secs(&[]).is_none());
}

#[test]
fn test_topology_errors_carry_line_numbers() {
    let err = parse_topology_str("0: 1\n# fine\n1 2\n", 3).unwrap_err();
    assert!(matches!(err, TestbedError::LineParseError { line: 3, .. }));

    let err = parse_topology_str("0: 1\n1: 7\n", 3).unwrap_err();
    assert!(matches!(err, TestbedError::LineParseError { line: 2, .. }));
}

#[test]
fn test_topology_rows_in_file_order() {
    let rows = parse_topology_str("2: 0\n0: 1,2\n0:\n", 3).unwrap();
    let origins: Vec<usize> = rows.iter().map(|r| r.origin).collect();
    assert_eq!(origins, vec![2, 0, 0]);
    assert!(rows[2].destinations.is_empty());
}

#[test]
fn test_batch_lines() {
    let lines = parse_batch("# warmup\n[0-1]: ipfs id\n\necho 'a b'\n").unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].range.as_deref(), Some("[0-1]"));
    assert_eq!(lines[0].command, vec!["ipfs", "id"]);
    assert_eq!(lines[1].range, None);
    assert_eq!(lines[1].command, vec!["echo", "a b"]);
}

#[test]
fn test_duration_units() {
    assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
    assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
    tokio_test::assert_err!(parse_duration("soon"));
}
