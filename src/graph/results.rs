// src/graph/results.rs

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::{Duration, SystemTime};

use crate::errors::ExecError;
use crate::exec::{EXIT_STATUS_UNKNOWN, ExecResponse, RequestHeader};

/// Outcome of one executed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub header: RequestHeader,
    pub exit_status: i32,
    pub err: Option<ExecError>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl ExecutionResult {
    pub fn from_response(
        response: ExecResponse,
        started_at: SystemTime,
        finished_at: SystemTime,
    ) -> Self {
        Self {
            header: response.header,
            exit_status: response.exit_status,
            err: response.err,
            started_at,
            finished_at,
        }
    }

    /// A result for a request that never reached an executor.
    pub fn rejected(header: RequestHeader, err: ExecError, at: SystemTime) -> Self {
        Self {
            header,
            exit_status: EXIT_STATUS_UNKNOWN,
            err: Some(err),
            started_at: at,
            finished_at: at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none() && self.exit_status == 0
    }

    pub fn duration(&self) -> Duration {
        self.finished_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct ResultEntries {
    all: Vec<ExecutionResult>,
    by_node: HashMap<String, Vec<usize>>,
}

/// Node id → results, in completion order. Append-only.
#[derive(Debug, Default)]
pub struct ExecutionResultIndex {
    entries: RwLock<ResultEntries>,
}

impl ExecutionResultIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ResultEntries> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn append(&self, result: ExecutionResult) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let position = entries.all.len();
        entries
            .by_node
            .entry(result.header.node_id.clone())
            .or_default()
            .push(position);
        entries.all.push(result);
    }

    /// Results recorded for `node_id`, oldest first.
    pub fn for_node(&self, node_id: &str) -> Vec<ExecutionResult> {
        let entries = self.read();
        entries
            .by_node
            .get(node_id)
            .map(|positions| positions.iter().map(|&i| entries.all[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Every result in completion order.
    pub fn all(&self) -> Vec<ExecutionResult> {
        self.read().all.clone()
    }

    pub fn len(&self) -> usize {
        self.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn result(node: &str, status: i32) -> ExecutionResult {
        let response = ExecResponse::from_outcome(RequestHeader::new("run", node), Ok(status));
        let now = SystemTime::now();
        ExecutionResult::from_response(response, now, now)
    }

    #[test]
    fn results_are_grouped_per_node_in_order() {
        let index = ExecutionResultIndex::new();
        index.append(result("a", 0));
        index.append(result("b", 1));
        index.append(result("a", 2));

        let a: Vec<i32> = index.for_node("a").iter().map(|r| r.exit_status).collect();
        assert_eq!(a, vec![0, 2]);
        assert_eq!(index.len(), 3);
        assert!(index.for_node("missing").is_empty());
        assert_eq!(index.all()[1].err, Some(ExecError::NonZeroExit(1)));
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let index = Arc::new(ExecutionResultIndex::new());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        index.append(result(&format!("n{i}"), 0));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(index.len(), 100);
        assert_eq!(index.for_node("n3").len(), 25);
    }
}
