//! Topology files: one `origin: dest,dest,...` row per line

use std::path::Path;

use crate::error::{TestbedError, TestbedResult};

/// One connection-plan row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyRow {
    pub origin: usize,
    pub destinations: Vec<usize>,
}

impl TopologyRow {
    /// Flatten into `(from, to)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.destinations.iter().map(move |to| (self.origin, *to))
    }
}

/// Read and parse a topology file for a fleet of `total` nodes
pub async fn load_topology(path: &Path, total: usize) -> TestbedResult<Vec<TopologyRow>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_topology_str(&content, total)
}

/// Parse topology text; rows come back in file order, repeated origins unmerged
pub fn parse_topology_str(content: &str, total: usize) -> TestbedResult<Vec<TopologyRow>> {
    let mut rows = Vec::new();

    for (offset, raw) in content.lines().enumerate() {
        let line_no = offset + 1;
        if raw.trim().is_empty() || raw.starts_with('#') {
            continue;
        }

        let mut parts = raw.split(':');
        let (left, right) = match (parts.next(), parts.next(), parts.next()) {
            (Some(left), Some(right), None) => (left, right),
            _ => {
                return Err(TestbedError::line(
                    line_no,
                    "expected exactly one ':' separating origin from destinations",
                ))
            }
        };

        let origin = parse_node(left, total, line_no)?;
        let destinations = if right.trim().is_empty() {
            Vec::new()
        } else {
            right
                .split(',')
                .map(|token| parse_node(token, total, line_no))
                .collect::<TestbedResult<Vec<_>>>()?
        };

        rows.push(TopologyRow {
            origin,
            destinations,
        });
    }

    Ok(rows)
}

fn parse_node(token: &str, total: usize, line_no: usize) -> TestbedResult<usize> {
    let token = token.trim();
    let index = token
        .parse::<usize>()
        .map_err(|_| TestbedError::line(line_no, format!("invalid node index {token:?}")))?;
    if index >= total {
        return Err(TestbedError::line(
            line_no,
            format!("node index {index} is outside the fleet of {total} nodes"),
        ));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_in_file_order() {
        let rows = parse_topology_str("0: 1,2\n2:0\n0:3\n", 4).unwrap();
        assert_eq!(
            rows,
            vec![
                TopologyRow { origin: 0, destinations: vec![1, 2] },
                TopologyRow { origin: 2, destinations: vec![0] },
                TopologyRow { origin: 0, destinations: vec![3] },
            ]
        );
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let rows = parse_topology_str("# ring\n\n0:1\n\n# tail\n1:0\n", 2).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_empty_destinations_allowed() {
        let rows = parse_topology_str("1:\n", 2).unwrap();
        assert_eq!(rows[0].destinations, Vec::<usize>::new());
        assert_eq!(rows[0].pairs().count(), 0);
    }

    #[test]
    fn test_out_of_range_destination_reports_line() {
        let err = parse_topology_str("# header\n\n0:1\n1:0,5\n", 3).unwrap_err();
        match err {
            TestbedError::LineParseError { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_separator_count_enforced() {
        assert!(parse_topology_str("0 1\n", 2).is_err());
        assert!(parse_topology_str("0:1:1\n", 2).is_err());
    }

    #[test]
    fn test_bad_token_rejected() {
        let err = parse_topology_str("0:x\n", 2).unwrap_err();
        assert!(err.to_string().starts_with("Line 1:"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topo.txt");
        tokio::fs::write(&path, "0:1\n1:0\n").await.unwrap();
        let rows = load_topology(&path, 2).await.unwrap();
        assert_eq!(rows[1].pairs().collect::<Vec<_>>(), vec![(1, 0)]);
    }
}
