//! In-memory backends for unit tests.
//!
//! `MemoryCluster` emulates a set of Redis-speaking endpoints (and sentinels)
//! closely enough for the strategies, the supervisor and the pool to be
//! exercised without sockets. Endpoints can be taken down, have their open
//! links killed, be slowed down, or have a command's reply overridden.

use crate::core::command::Command;
use crate::core::connection::{Connection, Connector};
use crate::core::resp::RespValue;
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Str(Bytes),
    Hash(BTreeMap<String, Bytes>),
    Set(BTreeSet<String>),
    ZSet(Vec<(String, f64)>),
}

#[derive(Default)]
struct Node {
    data: BTreeMap<String, Value>,
    down: bool,
    generation: u64,
    connects: usize,
    delay: Option<Duration>,
    overrides: HashMap<String, RespValue>,
    log: Vec<String>,
    sentinel_masters: HashMap<String, Endpoint>,
}

#[derive(Default)]
struct Shared {
    nodes: Mutex<HashMap<Endpoint, Node>>,
}

impl Shared {
    fn nodes(&self) -> MutexGuard<'_, HashMap<Endpoint, Node>> {
        self.nodes.lock().unwrap()
    }
}

/// A set of in-memory endpoints sharing one connector
#[derive(Clone, Default)]
pub struct MemoryCluster {
    shared: Arc<Shared>,
}

impl MemoryCluster {
    pub fn new(endpoints: &[&str]) -> Self {
        let cluster = Self::default();
        for endpoint in endpoints {
            cluster.add_node(endpoint);
        }
        cluster
    }

    pub fn add_node(&self, endpoint: &str) {
        self.shared
            .nodes()
            .entry(self.endpoint(endpoint))
            .or_default();
    }

    pub fn endpoint(&self, endpoint: &str) -> Endpoint {
        Endpoint::parse(endpoint).unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            shared: Arc::clone(&self.shared),
        })
    }

    fn with_node<T>(&self, endpoint: &str, f: impl FnOnce(&mut Node) -> T) -> T {
        let endpoint = self.endpoint(endpoint);
        let mut nodes = self.shared.nodes();
        f(nodes.entry(endpoint).or_default())
    }

    /// Refuse new connects and fail every call on open links
    pub fn set_down(&self, endpoint: &str, down: bool) {
        self.with_node(endpoint, |node| node.down = down);
    }

    /// Break every currently open link; new connects still succeed
    pub fn kill_open_connections(&self, endpoint: &str) {
        self.with_node(endpoint, |node| node.generation += 1);
    }

    pub fn set_delay(&self, endpoint: &str, delay: Duration) {
        self.with_node(endpoint, |node| node.delay = Some(delay));
    }

    /// Answer every `command` (upper-case name) with `reply`
    pub fn override_reply(&self, endpoint: &str, command: &str, reply: RespValue) {
        self.with_node(endpoint, |node| {
            node.overrides.insert(command.to_string(), reply);
        });
    }

    pub fn clear_override(&self, endpoint: &str, command: &str) {
        self.with_node(endpoint, |node| {
            node.overrides.remove(command);
        });
    }

    pub fn connects(&self, endpoint: &str) -> usize {
        self.with_node(endpoint, |node| node.connects)
    }

    /// Command names executed on `endpoint`, in order
    pub fn commands(&self, endpoint: &str) -> Vec<String> {
        self.with_node(endpoint, |node| node.log.clone())
    }

    pub fn count_commands(&self, endpoint: &str, name: &str) -> usize {
        self.commands(endpoint).iter().filter(|c| *c == name).count()
    }

    pub fn put(&self, endpoint: &str, key: &str, value: impl Into<Bytes>) {
        let value = value.into();
        self.with_node(endpoint, |node| {
            node.data.insert(key.to_string(), Value::Str(value));
        });
    }

    pub fn raw(&self, endpoint: &str, key: &str) -> Option<Bytes> {
        self.with_node(endpoint, |node| match node.data.get(key) {
            Some(Value::Str(data)) => Some(data.clone()),
            _ => None,
        })
    }

    /// Copy `key` of any type from one endpoint to another, as replication would
    pub fn copy_key(&self, from: &str, to: &str, key: &str) {
        let value = self.with_node(from, |node| node.data.get(key).cloned());
        if let Some(value) = value {
            self.with_node(to, |node| {
                node.data.insert(key.to_string(), value);
            });
        }
    }

    pub fn contains(&self, endpoint: &str, key: &str) -> bool {
        self.with_node(endpoint, |node| node.data.contains_key(key))
    }

    pub fn key_count(&self, endpoint: &str) -> usize {
        self.with_node(endpoint, |node| node.data.len())
    }

    /// Make `sentinel` report `master` for `name`
    pub fn set_sentinel_master(&self, sentinel: &str, name: &str, master: &str) {
        let master = self.endpoint(master);
        self.with_node(sentinel, |node| {
            node.sentinel_masters.insert(name.to_string(), master);
        });
    }
}

struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> TejidoResult<Box<dyn Connection>> {
        let mut nodes = self.shared.nodes();
        let Some(node) = nodes.get_mut(endpoint) else {
            return Err(refused(endpoint));
        };
        if node.down {
            return Err(refused(endpoint));
        }
        node.connects += 1;
        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.clone(),
            shared: Arc::clone(&self.shared),
            generation: node.generation,
            broken: false,
        }))
    }
}

fn refused(endpoint: &Endpoint) -> TejidoError {
    TejidoError::connection(
        endpoint,
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
    )
}

struct MemoryConnection {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    generation: u64,
    broken: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    async fn pipeline(&mut self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        let delay = {
            let nodes = self.shared.nodes();
            nodes.get(&self.endpoint).and_then(|node| node.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut nodes = self.shared.nodes();
        let node = nodes.get_mut(&self.endpoint);
        let node = match node {
            Some(node) if !self.broken && !node.down && node.generation == self.generation => node,
            _ => {
                self.broken = true;
                return Err(TejidoError::connection(
                    &self.endpoint,
                    io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"),
                ));
            }
        };

        Ok(commands.iter().map(|cmd| node.apply(cmd)).collect())
    }
}

fn text(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn int(arg: &Bytes) -> i64 {
    text(arg).parse().unwrap_or(0)
}

fn float(arg: &Bytes) -> f64 {
    match text(arg).as_str() {
        "+inf" | "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse().unwrap_or(0.0),
    }
}

fn wrong_type() -> RespValue {
    RespValue::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
}

fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == key,
        Some((prefix, rest)) => {
            key.starts_with(prefix)
                && (rest.is_empty() || {
                    let tail = &key[prefix.len()..];
                    (0..=tail.len()).any(|i| glob_match(rest, &tail[i..]))
                })
        }
    }
}

impl Node {
    fn apply(&mut self, cmd: &Command) -> RespValue {
        let name = cmd.name().to_string();
        self.log.push(name.clone());
        if let Some(reply) = self.overrides.get(&name) {
            return reply.clone();
        }
        let args = &cmd.args()[1..];

        match name.as_str() {
            "PING" => RespValue::SimpleString("PONG".into()),
            "AUTH" | "SELECT" => RespValue::ok(),
            "GET" => match self.data.get(&text(&args[0])) {
                Some(Value::Str(v)) => RespValue::bulk(v.clone()),
                Some(_) => wrong_type(),
                None => RespValue::null(),
            },
            "SET" => {
                let key = text(&args[0]);
                let exists = self.data.contains_key(&key);
                let flags: Vec<String> = args[2..].iter().map(|a| text(a).to_uppercase()).collect();
                if (flags.contains(&"NX".to_string()) && exists)
                    || (flags.contains(&"XX".to_string()) && !exists)
                {
                    return RespValue::null();
                }
                self.data.insert(key, Value::Str(args[1].clone()));
                RespValue::ok()
            }
            "SETNX" => {
                let key = text(&args[0]);
                if self.data.contains_key(&key) {
                    RespValue::Integer(0)
                } else {
                    self.data.insert(key, Value::Str(args[1].clone()));
                    RespValue::Integer(1)
                }
            }
            "DEL" => RespValue::Integer(
                args.iter()
                    .filter(|k| self.data.remove(&text(k)).is_some())
                    .count() as i64,
            ),
            "INCR" => self.add(&args[0], 1),
            "DECR" => self.add(&args[0], -1),
            "INCRBY" => self.add(&args[0], int(&args[1])),
            "DECRBY" => self.add(&args[0], -int(&args[1])),
            "APPEND" => {
                let key = text(&args[0]);
                let mut current = match self.data.get(&key) {
                    Some(Value::Str(v)) => v.to_vec(),
                    Some(_) => return wrong_type(),
                    None => Vec::new(),
                };
                current.extend_from_slice(&args[1]);
                let len = current.len() as i64;
                self.data.insert(key, Value::Str(Bytes::from(current)));
                RespValue::Integer(len)
            }
            "EXISTS" => RespValue::Integer(self.data.contains_key(&text(&args[0])) as i64),
            "EXPIRE" => RespValue::Integer(self.data.contains_key(&text(&args[0])) as i64),
            "RENAME" => match self.data.remove(&text(&args[0])) {
                Some(value) => {
                    self.data.insert(text(&args[1]), value);
                    RespValue::ok()
                }
                None => RespValue::Error("ERR no such key".into()),
            },
            "FLUSHDB" => {
                self.data.clear();
                RespValue::ok()
            }
            "DBSIZE" => RespValue::Integer(self.data.len() as i64),
            "INFO" => RespValue::bulk(format!(
                "# Server\r\nredis_version:7.0.0\r\n# Keyspace\r\ndb0:keys={}\r\n",
                self.data.len()
            )),
            "KEYS" => {
                let pattern = text(&args[0]);
                RespValue::array(
                    self.data
                        .keys()
                        .filter(|k| glob_match(&pattern, k))
                        .map(|k| RespValue::bulk(k.clone()))
                        .collect(),
                )
            }
            "HSET" | "HMSET" => {
                let key = text(&args[0]);
                let entry = self
                    .data
                    .entry(key)
                    .or_insert_with(|| Value::Hash(BTreeMap::new()));
                let Value::Hash(hash) = entry else {
                    return wrong_type();
                };
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    if hash.insert(text(&pair[0]), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                if name == "HMSET" {
                    RespValue::ok()
                } else {
                    RespValue::Integer(added)
                }
            }
            "HGET" => match self.data.get(&text(&args[0])) {
                Some(Value::Hash(hash)) => hash
                    .get(&text(&args[1]))
                    .map(|v| RespValue::bulk(v.clone()))
                    .unwrap_or_else(RespValue::null),
                Some(_) => wrong_type(),
                None => RespValue::null(),
            },
            "HGETALL" | "HKEYS" => match self.data.get(&text(&args[0])) {
                Some(Value::Hash(hash)) => RespValue::array(
                    hash.iter()
                        .flat_map(|(f, v)| {
                            let mut out = vec![RespValue::bulk(f.clone())];
                            if name == "HGETALL" {
                                out.push(RespValue::bulk(v.clone()));
                            }
                            out
                        })
                        .collect(),
                ),
                Some(_) => wrong_type(),
                None => RespValue::array(Vec::new()),
            },
            "HDEL" | "HEXISTS" => match self.data.get_mut(&text(&args[0])) {
                Some(Value::Hash(hash)) => {
                    let field = text(&args[1]);
                    let present = if name == "HDEL" {
                        hash.remove(&field).is_some()
                    } else {
                        hash.contains_key(&field)
                    };
                    RespValue::Integer(present as i64)
                }
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "SADD" => {
                let entry = self
                    .data
                    .entry(text(&args[0]))
                    .or_insert_with(|| Value::Set(BTreeSet::new()));
                let Value::Set(set) = entry else {
                    return wrong_type();
                };
                RespValue::Integer(args[1..].iter().filter(|m| set.insert(text(m))).count() as i64)
            }
            "SISMEMBER" => match self.data.get(&text(&args[0])) {
                Some(Value::Set(set)) => RespValue::Integer(set.contains(&text(&args[1])) as i64),
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "ZADD" => {
                let entry = self
                    .data
                    .entry(text(&args[0]))
                    .or_insert_with(|| Value::ZSet(Vec::new()));
                let Value::ZSet(zset) = entry else {
                    return wrong_type();
                };
                let score = float(&args[1]);
                let member = text(&args[2]);
                let added = match zset.iter_mut().find(|(m, _)| *m == member) {
                    Some(existing) => {
                        existing.1 = score;
                        0
                    }
                    None => {
                        zset.push((member, score));
                        1
                    }
                };
                zset.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                RespValue::Integer(added)
            }
            "ZREM" => match self.data.get_mut(&text(&args[0])) {
                Some(Value::ZSet(zset)) => {
                    let before = zset.len();
                    let members: Vec<String> = args[1..].iter().map(text).collect();
                    zset.retain(|(m, _)| !members.contains(m));
                    RespValue::Integer((before - zset.len()) as i64)
                }
                Some(_) => wrong_type(),
                None => RespValue::Integer(0),
            },
            "ZRANGE" => self.with_zset(&args[0], |zset| {
                let len = zset.len() as i64;
                let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
                let (start, stop) = (norm(int(&args[1])), norm(int(&args[2])).min(len - 1));
                if start > stop {
                    return RespValue::array(Vec::new());
                }
                RespValue::array(
                    zset[start as usize..=stop as usize]
                        .iter()
                        .map(|(m, _)| RespValue::bulk(m.clone()))
                        .collect(),
                )
            }),
            "ZREVRANGEBYSCORE" => self.with_zset(&args[0], |zset| {
                let (max, min) = (float(&args[1]), float(&args[2]));
                let (offset, count) = (int(&args[4]) as usize, int(&args[5]));
                let hits = zset
                    .iter()
                    .rev()
                    .filter(|(_, s)| *s <= max && *s >= min)
                    .skip(offset);
                let hits: Vec<RespValue> = if count < 0 {
                    hits.map(|(m, _)| RespValue::bulk(m.clone())).collect()
                } else {
                    hits.take(count as usize)
                        .map(|(m, _)| RespValue::bulk(m.clone()))
                        .collect()
                };
                RespValue::array(hits)
            }),
            "ZCOUNT" => self.with_zset(&args[0], |zset| {
                let (min, max) = (float(&args[1]), float(&args[2]));
                RespValue::Integer(zset.iter().filter(|(_, s)| *s >= min && *s <= max).count() as i64)
            }),
            "ZSCAN" => self.with_zset(&args[0], |zset| {
                let mut pattern = None;
                for pair in args[2..].chunks(2) {
                    if text(&pair[0]).eq_ignore_ascii_case("MATCH") {
                        pattern = Some(text(&pair[1]));
                    }
                }
                let entries = zset
                    .iter()
                    .filter(|(m, _)| pattern.as_deref().map_or(true, |p| glob_match(p, m)))
                    .flat_map(|(m, s)| vec![RespValue::bulk(m.clone()), RespValue::bulk(s.to_string())])
                    .collect();
                RespValue::array(vec![RespValue::bulk("0"), RespValue::array(entries)])
            }),
            "SENTINEL" => match self.sentinel_masters.get(&text(&args[1])) {
                Some(master) => RespValue::array(vec![
                    RespValue::bulk(master.host().to_string()),
                    RespValue::bulk(master.port().to_string()),
                ]),
                None => RespValue::Array(None),
            },
            other => RespValue::Error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn add(&mut self, key: &Bytes, delta: i64) -> RespValue {
        let key = text(key);
        let current = match self.data.get(&key) {
            Some(Value::Str(v)) => match text(v).parse::<i64>() {
                Ok(n) => n,
                Err(_) => return RespValue::Error("ERR value is not an integer".into()),
            },
            Some(_) => return wrong_type(),
            None => 0,
        };
        let next = current + delta;
        self.data
            .insert(key, Value::Str(Bytes::from(next.to_string())));
        RespValue::Integer(next)
    }

    fn with_zset(&self, key: &Bytes, f: impl FnOnce(&[(String, f64)]) -> RespValue) -> RespValue {
        match self.data.get(&text(key)) {
            Some(Value::ZSet(zset)) => f(zset),
            Some(_) => wrong_type(),
            None => f(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("app:*", "app:k"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c", "abbc"));
        assert!(!glob_match("a*c", "abbd"));
        assert!(glob_match("exact", "exact"));
    }

    #[tokio::test]
    async fn test_memory_connection_interprets_commands() {
        let cluster = MemoryCluster::new(&["a:1"]);
        let mut conn = cluster
            .connector()
            .connect(&cluster.endpoint("a:1"))
            .await
            .unwrap();
        let replies = conn
            .pipeline(&[Command::set("k", "1"), Command::incr("k"), Command::get("k")])
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![RespValue::ok(), RespValue::Integer(2), RespValue::bulk("2")]
        );
        assert_eq!(cluster.commands("a:1"), vec!["SET", "INCR", "GET"]);
    }
}
