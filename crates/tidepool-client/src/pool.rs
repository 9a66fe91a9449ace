//! Node pool: the registry of known nodes and their health
//!
//! The pool is the only long-lived shared mutable structure in the client.
//! Node health transitions go through a per-node lock so concurrent
//! failures never lose updates; the pool-wide write lock is taken only by
//! [`NodePool::reconcile`], which must not interleave with selection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use tidepool_core::types::{ClusterSnapshot, NodeRoles};

/// Mutable health record of one node
#[derive(Debug, Clone)]
pub struct NodeHealth {
    /// Whether the node is in normal rotation
    pub alive: bool,
    /// When a dead node becomes eligible for resurrection
    pub dead_until: Option<Instant>,
    /// Consecutive failures without an intervening success
    pub failed_attempts: u32,
    /// Last successful use, drives probe skipping
    pub last_used: Option<Instant>,
    /// Soft-removal mark set by reconcile while the node is in use
    pub doomed: bool,
}

impl Default for NodeHealth {
    fn default() -> Self {
        Self {
            alive: true,
            dead_until: None,
            failed_attempts: 0,
            last_used: None,
            doomed: false,
        }
    }
}

/// One addressable member of the target cluster
pub struct Node {
    endpoint: Url,
    roles: Mutex<NodeRoles>,
    health: Mutex<NodeHealth>,
}

impl Node {
    pub fn new(endpoint: Url, roles: NodeRoles) -> Self {
        Self {
            endpoint,
            roles: Mutex::new(roles),
            health: Mutex::new(NodeHealth::default()),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn roles(&self) -> NodeRoles {
        *self.roles.lock()
    }

    pub(crate) fn set_roles(&self, roles: NodeRoles) {
        *self.roles.lock() = roles;
    }

    /// Snapshot of the current health record
    pub fn health(&self) -> NodeHealth {
        self.health.lock().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.health.lock().alive
    }

    /// Run one atomic transition on the health record
    pub(crate) fn with_health<T>(&self, f: impl FnOnce(&mut NodeHealth) -> T) -> T {
        f(&mut self.health.lock())
    }

    /// Whether a probe is warranted before using this node
    pub fn needs_ping(&self, now: Instant, idle_window: Duration) -> bool {
        let health = self.health.lock();
        if !health.alive {
            return true;
        }
        match health.last_used {
            Some(used) => now.duration_since(used) > idle_window,
            None => true,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let health = self.health.lock();
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint.as_str())
            .field("alive", &health.alive)
            .field("failed_attempts", &health.failed_attempts)
            .finish()
    }
}

/// Aggregate pool health, for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

/// The live in-memory registry of known nodes
pub struct NodePool {
    /// Nodes in ring order
    nodes: RwLock<Vec<Arc<Node>>>,
    /// Round-robin cursor
    cursor: AtomicUsize,
    /// When the last successful discovery completed
    last_sniff: Mutex<Option<Instant>>,
    /// Endpoints currently serving an in-flight attempt; shared with the
    /// guards that release them
    in_use: Arc<Mutex<HashMap<Url, usize>>>,
    /// Dead-node avoidance mode: when probing is disabled, dead nodes
    /// stay out of rotation until something marks them alive again
    disable_pings: bool,
}

impl NodePool {
    /// Create a pool seeded with the given endpoints
    pub fn new(seeds: &[Url], disable_pings: bool) -> Self {
        let nodes = seeds
            .iter()
            .map(|endpoint| Arc::new(Node::new(endpoint.clone(), NodeRoles::default())))
            .collect();

        Self {
            nodes: RwLock::new(nodes),
            cursor: AtomicUsize::new(0),
            last_sniff: Mutex::new(None),
            in_use: Arc::new(Mutex::new(HashMap::new())),
            disable_pings,
        }
    }

    /// Pick the next candidate node for an attempt.
    ///
    /// Ring scan from the cursor, skipping excluded endpoints; the first
    /// alive node wins. With no alive node left the least-bad dead node
    /// (earliest `dead_until`) is offered for resurrection, unless probing
    /// is disabled.
    pub fn select(&self, excluding: &std::collections::HashSet<Url>, now: Instant) -> Option<Arc<Node>> {
        let nodes = self.nodes.read();
        if nodes.is_empty() {
            return None;
        }

        let len = nodes.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for i in 0..len {
            let node = &nodes[(start + i) % len];
            if excluding.contains(node.endpoint()) {
                continue;
            }
            if node.is_alive() {
                return Some(Arc::clone(node));
            }
        }

        if self.disable_pings {
            return None;
        }

        nodes
            .iter()
            .filter(|node| !excluding.contains(node.endpoint()))
            .min_by_key(|node| node.health().dead_until.unwrap_or(now))
            .map(Arc::clone)
    }

    /// The only alive node, if exactly one remains.
    ///
    /// Retrying an already-tried endpoint is allowed solely in this case.
    pub fn single_alive_node(&self) -> Option<Arc<Node>> {
        let nodes = self.nodes.read();
        let mut alive = nodes.iter().filter(|node| node.is_alive());
        match (alive.next(), alive.next()) {
            (Some(node), None) => Some(Arc::clone(node)),
            _ => None,
        }
    }

    /// Put a node back into rotation without touching its failure count.
    ///
    /// Resurrection after a successful probe; the backoff history still
    /// applies if the next real request fails.
    pub fn mark_alive(&self, node: &Node) {
        node.with_health(|health| {
            health.alive = true;
            health.dead_until = None;
        });
        debug!("node {} resurrected", node.endpoint());
    }

    /// Candidate nodes for a discovery call: alive nodes first, ring order
    pub fn sniff_candidates(&self) -> Vec<Arc<Node>> {
        let nodes = self.nodes.read();
        let mut candidates: Vec<Arc<Node>> = nodes.iter().filter(|n| n.is_alive()).cloned().collect();
        candidates.extend(nodes.iter().filter(|n| !n.is_alive()).cloned());
        candidates
    }

    /// Reconcile the pool against a freshly discovered snapshot.
    ///
    /// Known endpoints keep their health state, unknown ones join alive
    /// with zero failures. Endpoints absent from the snapshot are removed,
    /// unless currently serving an attempt: those are marked doomed and
    /// purged on the next reconcile.
    pub fn reconcile(&self, snapshot: &ClusterSnapshot) {
        if snapshot.is_empty() {
            warn!("discarding empty cluster snapshot, pool left unchanged");
            return;
        }

        let in_use = self.in_use.lock().keys().cloned().collect::<Vec<_>>();
        let mut nodes = self.nodes.write();

        let mut added = 0;
        for discovered in &snapshot.nodes {
            match nodes.iter().find(|n| n.endpoint() == &discovered.endpoint) {
                Some(existing) => {
                    existing.set_roles(discovered.roles);
                    existing.with_health(|health| health.doomed = false);
                }
                None => {
                    nodes.push(Arc::new(Node::new(
                        discovered.endpoint.clone(),
                        discovered.roles,
                    )));
                    added += 1;
                }
            }
        }

        let before = nodes.len();
        nodes.retain(|node| {
            let survives = snapshot
                .nodes
                .iter()
                .any(|d| &d.endpoint == node.endpoint());
            if survives {
                return true;
            }
            if in_use.contains(node.endpoint()) && !node.health().doomed {
                debug!("node {} absent from snapshot but in use, deferring removal", node.endpoint());
                node.with_health(|health| health.doomed = true);
                return true;
            }
            info!("node {} removed from pool", node.endpoint());
            false
        });

        info!(
            "pool reconciled: {} added, {} removed, {} total",
            added,
            before - nodes.len(),
            nodes.len()
        );
    }

    /// Track an endpoint as serving an in-flight attempt
    pub fn begin_use(&self, endpoint: &Url) -> InUseGuard {
        *self.in_use.lock().entry(endpoint.clone()).or_insert(0) += 1;
        InUseGuard {
            in_use: Arc::clone(&self.in_use),
            endpoint: endpoint.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_alive()).count()
    }

    /// All known endpoints in ring order
    pub fn endpoints(&self) -> Vec<Url> {
        self.nodes.read().iter().map(|n| n.endpoint().clone()).collect()
    }

    /// Look up a node by endpoint
    pub fn get(&self, endpoint: &Url) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.endpoint() == endpoint)
            .cloned()
    }

    pub fn stats(&self) -> PoolStats {
        let nodes = self.nodes.read();
        let alive = nodes.iter().filter(|n| n.is_alive()).count();
        PoolStats {
            total: nodes.len(),
            alive,
            dead: nodes.len() - alive,
        }
    }

    pub fn last_sniff(&self) -> Option<Instant> {
        *self.last_sniff.lock()
    }

    pub(crate) fn record_sniff(&self, at: Instant) {
        *self.last_sniff.lock() = Some(at);
    }
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("NodePool")
            .field("total", &stats.total)
            .field("alive", &stats.alive)
            .finish()
    }
}

/// RAII marker keeping an endpoint visible to reconcile's soft-removal
pub struct InUseGuard {
    in_use: Arc<Mutex<HashMap<Url, usize>>>,
    endpoint: Url,
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        let mut in_use = self.in_use.lock();
        if let Some(count) = in_use.get_mut(&self.endpoint) {
            *count -= 1;
            if *count == 0 {
                in_use.remove(&self.endpoint);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tidepool_core::types::DiscoveredNode;

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    fn seeded_pool(endpoints: &[&str]) -> Arc<NodePool> {
        let seeds: Vec<Url> = endpoints.iter().map(|e| url(e)).collect();
        Arc::new(NodePool::new(&seeds, false))
    }

    #[test]
    fn test_round_robin_selection() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200", "http://n3:9200"]);
        let none = HashSet::new();
        let now = Instant::now();

        let first = pool.select(&none, now).unwrap();
        let second = pool.select(&none, now).unwrap();
        let third = pool.select(&none, now).unwrap();
        let fourth = pool.select(&none, now).unwrap();

        assert_ne!(first.endpoint(), second.endpoint());
        assert_ne!(second.endpoint(), third.endpoint());
        assert_eq!(first.endpoint(), fourth.endpoint());
    }

    #[test]
    fn test_select_skips_excluded_and_dead() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200", "http://n3:9200"]);
        let now = Instant::now();

        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        n1.with_health(|h| {
            h.alive = false;
            h.dead_until = Some(now + Duration::from_secs(60));
        });

        let mut excluding = HashSet::new();
        excluding.insert(url("http://n2:9200"));

        for _ in 0..4 {
            let selected = pool.select(&excluding, now).unwrap();
            assert_eq!(selected.endpoint(), &url("http://n3:9200"));
        }
    }

    #[test]
    fn test_least_bad_dead_node_when_none_alive() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        let now = Instant::now();

        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        let n2 = pool.get(&url("http://n2:9200")).unwrap();
        n1.with_health(|h| {
            h.alive = false;
            h.dead_until = Some(now + Duration::from_secs(120));
        });
        n2.with_health(|h| {
            h.alive = false;
            h.dead_until = Some(now + Duration::from_secs(30));
        });

        let selected = pool.select(&HashSet::new(), now).unwrap();
        assert_eq!(selected.endpoint(), &url("http://n2:9200"));
    }

    #[test]
    fn test_no_resurrection_candidate_with_pings_disabled() {
        let seeds = vec![url("http://n1:9200")];
        let pool = Arc::new(NodePool::new(&seeds, true));
        let now = Instant::now();

        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        n1.with_health(|h| {
            h.alive = false;
            h.dead_until = Some(now - Duration::from_secs(1));
        });

        assert!(pool.select(&HashSet::new(), now).is_none());
    }

    #[test]
    fn test_select_empty_when_all_excluded() {
        let pool = seeded_pool(&["http://n1:9200"]);
        let mut excluding = HashSet::new();
        excluding.insert(url("http://n1:9200"));

        assert!(pool.select(&excluding, Instant::now()).is_none());
    }

    #[test]
    fn test_single_alive_node() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        assert!(pool.single_alive_node().is_none());

        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        n1.with_health(|h| h.alive = false);

        let only = pool.single_alive_node().unwrap();
        assert_eq!(only.endpoint(), &url("http://n2:9200"));
    }

    #[test]
    fn test_needs_ping_windows() {
        let node = Node::new(url("http://n1:9200"), NodeRoles::default());
        let now = Instant::now();
        let window = Duration::from_secs(60);

        // Alive but never used: probe it.
        assert!(node.needs_ping(now, window));

        node.with_health(|h| h.last_used = Some(now));
        assert!(!node.needs_ping(now, window));
        assert!(node.needs_ping(now + Duration::from_secs(61), window));

        node.with_health(|h| h.alive = false);
        assert!(node.needs_ping(now, window));
    }

    #[test]
    fn test_reconcile_keeps_state_adds_and_removes() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        let now = Instant::now();

        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        n1.with_health(|h| {
            h.alive = false;
            h.failed_attempts = 2;
            h.dead_until = Some(now + Duration::from_secs(60));
        });

        let snapshot = ClusterSnapshot::new(vec![
            DiscoveredNode::new(url("http://n1:9200")),
            DiscoveredNode::new(url("http://n3:9200")),
            DiscoveredNode::new(url("http://n4:9200")),
        ]);
        pool.reconcile(&snapshot);

        // n2 dropped, n3/n4 joined alive, n1 kept its failure history.
        assert_eq!(pool.len(), 3);
        assert!(pool.get(&url("http://n2:9200")).is_none());
        assert!(pool.get(&url("http://n3:9200")).unwrap().is_alive());
        let kept = pool.get(&url("http://n1:9200")).unwrap().health();
        assert!(!kept.alive);
        assert_eq!(kept.failed_attempts, 2);
    }

    #[test]
    fn test_reconcile_defers_removal_of_in_use_node() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        let guard = pool.begin_use(&url("http://n1:9200"));

        let snapshot = ClusterSnapshot::new(vec![DiscoveredNode::new(url("http://n2:9200"))]);
        pool.reconcile(&snapshot);

        // Still present, but doomed.
        let n1 = pool.get(&url("http://n1:9200")).unwrap();
        assert!(n1.health().doomed);
        assert_eq!(pool.len(), 2);

        // Second reconcile purges it.
        pool.reconcile(&snapshot);
        assert!(pool.get(&url("http://n1:9200")).is_none());
        assert_eq!(pool.len(), 1);

        drop(guard);
    }

    #[test]
    fn test_reconcile_resurrects_doomed_node_present_again() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        let guard = pool.begin_use(&url("http://n1:9200"));

        let without = ClusterSnapshot::new(vec![DiscoveredNode::new(url("http://n2:9200"))]);
        pool.reconcile(&without);
        assert!(pool.get(&url("http://n1:9200")).unwrap().health().doomed);

        let with = ClusterSnapshot::new(vec![
            DiscoveredNode::new(url("http://n1:9200")),
            DiscoveredNode::new(url("http://n2:9200")),
        ]);
        pool.reconcile(&with);
        assert!(!pool.get(&url("http://n1:9200")).unwrap().health().doomed);

        drop(guard);
    }

    #[test]
    fn test_reconcile_rejects_empty_snapshot() {
        let pool = seeded_pool(&["http://n1:9200"]);
        pool.reconcile(&ClusterSnapshot::new(vec![]));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_in_use_guard_releases_on_drop() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        {
            let _guard = pool.begin_use(&url("http://n1:9200"));
            let _second = pool.begin_use(&url("http://n1:9200"));
            assert!(pool.in_use.lock().contains_key(&url("http://n1:9200")));
        }
        assert!(pool.in_use.lock().is_empty());
    }

    #[test]
    fn test_stats() {
        let pool = seeded_pool(&["http://n1:9200", "http://n2:9200"]);
        pool.get(&url("http://n1:9200"))
            .unwrap()
            .with_health(|h| h.alive = false);

        assert_eq!(
            pool.stats(),
            PoolStats {
                total: 2,
                alive: 1,
                dead: 1
            }
        );
    }
}
