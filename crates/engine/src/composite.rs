//! Composite execution structure: an ordered collection of requests (or
//! nested composites) executed sequentially or with bounded parallelism.
//!
//! Leaf counting and execution dispatch match on the node variant; the
//! type system guarantees at construction that every element is
//! executable, so there is no runtime capability probing.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, bail};
use tracing::debug;

use cpflow_types::{OperationResult, Request};

use crate::drivers::UnifiedDriver;

/// Default bounded-pool size for parallel execution.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// A leaf: one request plus its execute-at-most-once guard.
///
/// The guard exists to catch accidental double side-effects in retry
/// paths; a second execution attempt is a programmer error, reported as
/// an error rather than silently re-running the operation.
#[derive(Debug)]
pub struct LeafNode {
    request: Request,
    executed: AtomicBool,
}

impl LeafNode {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            executed: AtomicBool::new(false),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    fn execute(&self, driver: &UnifiedDriver) -> Result<OperationResult> {
        if self.executed.swap(true, Ordering::SeqCst) {
            bail!("request '{}' has already been executed", self.request.describe());
        }
        Ok(driver.execute(&self.request))
    }
}

/// One element of an execution structure.
#[derive(Debug)]
pub enum ExecutionNode {
    Leaf(LeafNode),
    Composite(CompositeStructure),
}

impl ExecutionNode {
    pub fn leaf(request: Request) -> Self {
        Self::Leaf(LeafNode::new(request))
    }

    /// Number of leaf requests reachable from this node, used for
    /// progress reporting.
    pub fn count_leaf_requests(&self) -> usize {
        match self {
            Self::Leaf(_) => 1,
            Self::Composite(composite) => composite.count_leaf_requests(),
        }
    }

    /// Executes this node: a leaf produces one result, a composite its
    /// sequential result list.
    pub fn execute(&self, driver: &UnifiedDriver) -> Result<Vec<OperationResult>> {
        match self {
            Self::Leaf(leaf) => Ok(vec![leaf.execute(driver)?]),
            Self::Composite(composite) => composite.execute_sequential(driver),
        }
    }

    /// Applies a presentation name to the node if it supports one.
    fn apply_name(&mut self, name: &str) {
        match self {
            Self::Leaf(leaf) => {
                if leaf.request.meta.name.is_none() {
                    leaf.request.meta.name = Some(name.to_string());
                }
            }
            Self::Composite(composite) => composite.name = Some(name.to_string()),
        }
    }
}

/// Ordered sequence of execution nodes.
#[derive(Debug, Default)]
pub struct CompositeStructure {
    name: Option<String>,
    nodes: Vec<ExecutionNode>,
}

impl CompositeStructure {
    pub fn new(nodes: Vec<ExecutionNode>) -> Self {
        Self { name: None, nodes }
    }

    pub fn named(nodes: Vec<ExecutionNode>, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            nodes,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recursive leaf total across nested composites.
    pub fn count_leaf_requests(&self) -> usize {
        self.nodes.iter().map(ExecutionNode::count_leaf_requests).sum()
    }

    /// Executes nodes strictly in order. The first failure stops the
    /// sequence unless the failing request allows failure; prior results
    /// and the failing result are always retained.
    pub fn execute_sequential(&self, driver: &UnifiedDriver) -> Result<Vec<OperationResult>> {
        let mut results = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let node_results = node.execute(driver)?;
            let fatal = node_results.iter().any(|result| !result.success && !result.allow_failure);
            results.extend(node_results);
            if fatal {
                debug!(composite = ?self.name, "sequential execution stopped at first fatal failure");
                break;
            }
        }
        Ok(results)
    }

    /// Executes nodes through a bounded worker pool.
    ///
    /// The aggregated result list preserves submission order regardless
    /// of completion order; nothing is guaranteed about the relative
    /// ordering of side effects, so callers must not submit steps with
    /// inter-step dependencies here. Once submitted, all nodes run to
    /// completion or failure; there is no mid-batch cancellation.
    pub fn execute_parallel(&self, driver: &UnifiedDriver, max_workers: usize) -> Result<Vec<OperationResult>> {
        if self.nodes.is_empty() {
            return Ok(Vec::new());
        }
        let worker_count = max_workers.max(1).min(self.nodes.len());

        let queue: Mutex<VecDeque<(usize, &ExecutionNode)>> = Mutex::new(self.nodes.iter().enumerate().collect());
        let slots: Vec<Mutex<Option<Result<Vec<OperationResult>>>>> = self.nodes.iter().map(|_| Mutex::new(None)).collect();

        thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| {
                    loop {
                        let next = queue.lock().expect("work queue lock poisoned").pop_front();
                        let Some((index, node)) = next else {
                            break;
                        };
                        let outcome = node.execute(driver);
                        *slots[index].lock().expect("result slot lock poisoned") = Some(outcome);
                    }
                });
            }
        });

        let mut results = Vec::with_capacity(self.nodes.len());
        for slot in slots {
            let outcome = slot
                .into_inner()
                .expect("result slot lock poisoned")
                .expect("worker pool completed without filling every slot");
            results.extend(outcome?);
        }
        Ok(results)
    }
}

/// Wraps `nodes` in a composite, except for the common single-element
/// case which is returned directly (with the name applied) to avoid a
/// layer of indirection.
pub fn make_optimal_structure(mut nodes: Vec<ExecutionNode>, name: Option<&str>) -> ExecutionNode {
    if nodes.len() == 1 {
        let mut node = nodes.remove(0);
        if let Some(name) = name {
            node.apply_name(name);
        }
        return node;
    }
    let composite = match name {
        Some(name) => CompositeStructure::named(nodes, name),
        None => CompositeStructure::new(nodes),
    };
    ExecutionNode::Composite(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::UnifiedDriver;
    use cpflow_types::{FileOp, Request, ShellRequest};

    fn touch_request(path: &str) -> Request {
        Request::file(FileOp::Touch, path)
    }

    fn driver() -> UnifiedDriver {
        UnifiedDriver::local()
    }

    #[test]
    fn count_leaf_requests_counts_plain_leaves() {
        let composite = CompositeStructure::new(vec![
            ExecutionNode::leaf(touch_request("a")),
            ExecutionNode::leaf(touch_request("b")),
            ExecutionNode::leaf(touch_request("c")),
        ]);
        assert_eq!(composite.count_leaf_requests(), 3);
    }

    #[test]
    fn count_leaf_requests_recurses_into_nested_composites() {
        let nested = CompositeStructure::new(vec![
            ExecutionNode::leaf(touch_request("x")),
            ExecutionNode::leaf(touch_request("y")),
        ]);
        let composite = CompositeStructure::new(vec![
            ExecutionNode::leaf(touch_request("a")),
            ExecutionNode::leaf(touch_request("b")),
            ExecutionNode::leaf(touch_request("c")),
            ExecutionNode::Composite(nested),
        ]);
        assert_eq!(composite.count_leaf_requests(), 5);
    }

    #[test]
    fn leaf_refuses_to_execute_twice() {
        let dir = tempfile::tempdir().expect("tempdir");
        let node = ExecutionNode::leaf(touch_request(dir.path().join("once.txt").to_str().expect("utf8 path")));
        let driver = driver();

        let first = node.execute(&driver).expect("first execution");
        assert!(first[0].success);

        let error = node.execute(&driver).expect_err("second execution must fail");
        assert!(
            error.to_string().contains("already been executed"),
            "unexpected error: {error}"
        );
    }

    #[test]
    fn make_optimal_structure_unwraps_single_requests() {
        let single = make_optimal_structure(vec![ExecutionNode::leaf(touch_request("a"))], Some("prepare"));
        match &single {
            ExecutionNode::Leaf(leaf) => assert_eq!(leaf.request().meta.name.as_deref(), Some("prepare")),
            ExecutionNode::Composite(_) => panic!("single request should not be wrapped"),
        }

        let wrapped = make_optimal_structure(
            vec![ExecutionNode::leaf(touch_request("a")), ExecutionNode::leaf(touch_request("b"))],
            Some("prepare"),
        );
        match &wrapped {
            ExecutionNode::Composite(composite) => {
                assert_eq!(composite.name(), Some("prepare"));
                assert_eq!(composite.len(), 2);
            }
            ExecutionNode::Leaf(_) => panic!("multiple requests should be wrapped"),
        }
    }

    #[test]
    fn sequential_execution_stops_after_fatal_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let after = dir.path().join("after.txt");
        let composite = CompositeStructure::new(vec![
            ExecutionNode::leaf(Request::shell(ShellRequest::new(["false"]))),
            ExecutionNode::leaf(touch_request(after.to_str().expect("utf8 path"))),
        ]);

        let results = composite.execute_sequential(&driver()).expect("execution runs");
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(!after.exists(), "steps after a fatal failure must not run");
    }

    #[test]
    fn sequential_execution_continues_past_allowed_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let after = dir.path().join("after.txt");
        let composite = CompositeStructure::new(vec![
            ExecutionNode::leaf(Request::shell(ShellRequest::new(["false"])).allowing_failure(true)),
            ExecutionNode::leaf(touch_request(after.to_str().expect("utf8 path"))),
        ]);

        let results = composite.execute_sequential(&driver()).expect("execution runs");
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert!(after.exists());
    }

    #[test]
    fn parallel_results_preserve_submission_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nodes: Vec<ExecutionNode> = (0..8)
            .map(|i| {
                let path = dir.path().join(format!("file-{i}.txt"));
                ExecutionNode::leaf(touch_request(path.to_str().expect("utf8 path")).named(format!("touch-{i}")))
            })
            .collect();
        let composite = CompositeStructure::new(nodes);

        let results = composite.execute_parallel(&driver(), 3).expect("parallel execution");
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert!(result.success);
            assert_eq!(result.label.as_deref(), Some(format!("touch-{i}").as_str()));
        }
    }
}
