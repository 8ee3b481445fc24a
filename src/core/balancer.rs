/// Load balancing over the healthy set
use crate::core::Endpoint;
use crate::error::ConfigError;
use rand::Rng;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Load balancing algorithm trait
pub trait LoadBalancer: Send + Sync {
    /// Pick an index into `members`; `None` only when `members` is empty.
    fn pick(&self, members: &[Endpoint]) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Uniform random choice
#[derive(Debug, Default)]
pub struct Random;

impl LoadBalancer for Random {
    fn pick(&self, members: &[Endpoint]) -> Option<usize> {
        match members.len() {
            0 => None,
            1 => Some(0),
            len => Some(rand::thread_rng().gen_range(0..len)),
        }
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Round-robin load balancing algorithm
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn pick(&self, members: &[Endpoint]) -> Option<usize> {
        if members.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % members.len();
        Some(index)
    }

    fn name(&self) -> &'static str {
        "roundrobin"
    }
}

/// Balancer selection by configured name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    #[default]
    Random,
    RoundRobin,
}

impl LoadBalancerKind {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            LoadBalancerKind::Random => Arc::new(Random),
            LoadBalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
        }
    }
}

impl FromStr for LoadBalancerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(LoadBalancerKind::Random),
            "roundrobin" | "round_robin" | "round-robin" => Ok(LoadBalancerKind::RoundRobin),
            other => Err(ConfigError::invalid(
                "server.loadBalancer",
                format!("unknown load balancer {:?}", other),
            )),
        }
    }
}
