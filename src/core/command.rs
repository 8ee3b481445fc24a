/// Owned Redis requests, one constructor per command the fabric issues

use bytes::Bytes;
use std::fmt;

/// Conditional flag for the five-argument `SET`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Only set if the key does not exist
    Nx,
    /// Only set if the key already exists
    Xx,
}

/// Expiry flag for the five-argument `SET`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Seconds
    Ex(u64),
    /// Milliseconds
    Px(u64),
}

/// `MATCH`/`COUNT` arguments for `ZSCAN`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub pattern: Option<String>,
    pub count: Option<u64>,
}

/// A single request: command name plus binary-safe arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    fn new(name: &'static str) -> Self {
        Self {
            args: vec![Bytes::from_static(name.as_bytes())],
        }
    }

    fn arg<A: Into<Bytes>>(mut self, arg: A) -> Self {
        self.args.push(arg.into());
        self
    }

    fn key(self, key: &str) -> Self {
        self.arg(Bytes::copy_from_slice(key.as_bytes()))
    }

    fn text(self, value: &str) -> Self {
        self.arg(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn number<N: ToString>(self, value: N) -> Self {
        self.arg(value.to_string())
    }

    /// Command name, upper-case
    pub fn name(&self) -> &str {
        self.args
            .first()
            .and_then(|name| std::str::from_utf8(name).ok())
            .unwrap_or("")
    }

    /// All arguments including the command name
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn ping() -> Self {
        Self::new("PING")
    }

    pub fn auth(password: &str) -> Self {
        Self::new("AUTH").text(password)
    }

    pub fn select(database: u32) -> Self {
        Self::new("SELECT").number(database)
    }

    pub fn get(key: &str) -> Self {
        Self::new("GET").key(key)
    }

    pub fn set<V: Into<Bytes>>(key: &str, value: V) -> Self {
        Self::new("SET").key(key).arg(value)
    }

    pub fn set_with<V: Into<Bytes>>(
        key: &str,
        value: V,
        condition: SetCondition,
        expiry: Expiry,
    ) -> Self {
        let cmd = Self::new("SET").key(key).arg(value);
        let cmd = match condition {
            SetCondition::Nx => cmd.arg("NX"),
            SetCondition::Xx => cmd.arg("XX"),
        };
        match expiry {
            Expiry::Ex(secs) => cmd.arg("EX").number(secs),
            Expiry::Px(millis) => cmd.arg("PX").number(millis),
        }
    }

    pub fn setnx<V: Into<Bytes>>(key: &str, value: V) -> Self {
        Self::new("SETNX").key(key).arg(value)
    }

    pub fn del(key: &str) -> Self {
        Self::new("DEL").key(key)
    }

    pub fn incr(key: &str) -> Self {
        Self::new("INCR").key(key)
    }

    pub fn decr(key: &str) -> Self {
        Self::new("DECR").key(key)
    }

    pub fn incr_by(key: &str, delta: i64) -> Self {
        Self::new("INCRBY").key(key).number(delta)
    }

    pub fn decr_by(key: &str, delta: i64) -> Self {
        Self::new("DECRBY").key(key).number(delta)
    }

    pub fn append(key: &str, value: &str) -> Self {
        Self::new("APPEND").key(key).text(value)
    }

    pub fn exists(key: &str) -> Self {
        Self::new("EXISTS").key(key)
    }

    pub fn expire(key: &str, seconds: u64) -> Self {
        Self::new("EXPIRE").key(key).number(seconds)
    }

    pub fn rename(from: &str, to: &str) -> Self {
        Self::new("RENAME").key(from).key(to)
    }

    pub fn flushdb() -> Self {
        Self::new("FLUSHDB")
    }

    pub fn dbsize() -> Self {
        Self::new("DBSIZE")
    }

    pub fn info(section: Option<&str>) -> Self {
        match section {
            Some(section) => Self::new("INFO").text(section),
            None => Self::new("INFO"),
        }
    }

    pub fn keys(pattern: &str) -> Self {
        Self::new("KEYS").key(pattern)
    }

    pub fn hset<V: Into<Bytes>>(key: &str, field: &str, value: V) -> Self {
        Self::new("HSET").key(key).text(field).arg(value)
    }

    pub fn hmset<I, V>(key: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (String, V)>,
        V: Into<Bytes>,
    {
        entries
            .into_iter()
            .fold(Self::new("HMSET").key(key), |cmd, (field, value)| {
                cmd.arg(field).arg(value)
            })
    }

    pub fn hget(key: &str, field: &str) -> Self {
        Self::new("HGET").key(key).text(field)
    }

    pub fn hgetall(key: &str) -> Self {
        Self::new("HGETALL").key(key)
    }

    pub fn hkeys(key: &str) -> Self {
        Self::new("HKEYS").key(key)
    }

    pub fn hdel(key: &str, field: &str) -> Self {
        Self::new("HDEL").key(key).text(field)
    }

    pub fn hexists(key: &str, field: &str) -> Self {
        Self::new("HEXISTS").key(key).text(field)
    }

    pub fn sadd(key: &str, members: &[&str]) -> Self {
        members
            .iter()
            .fold(Self::new("SADD").key(key), |cmd, member| cmd.text(member))
    }

    pub fn sismember(key: &str, member: &str) -> Self {
        Self::new("SISMEMBER").key(key).text(member)
    }

    pub fn zadd(key: &str, score: f64, member: &str) -> Self {
        Self::new("ZADD").key(key).number(score).text(member)
    }

    pub fn zrem(key: &str, members: &[&str]) -> Self {
        members
            .iter()
            .fold(Self::new("ZREM").key(key), |cmd, member| cmd.text(member))
    }

    pub fn zrange(key: &str, start: i64, stop: i64) -> Self {
        Self::new("ZRANGE").key(key).number(start).number(stop)
    }

    pub fn zrevrangebyscore(key: &str, max: f64, min: f64, offset: i64, count: i64) -> Self {
        Self::new("ZREVRANGEBYSCORE")
            .key(key)
            .number(max)
            .number(min)
            .arg("LIMIT")
            .number(offset)
            .number(count)
    }

    pub fn zcount(key: &str, min: f64, max: f64) -> Self {
        Self::new("ZCOUNT").key(key).number(min).number(max)
    }

    pub fn zscan(key: &str, cursor: &str, options: &ScanOptions) -> Self {
        let mut cmd = Self::new("ZSCAN").key(key).text(cursor);
        if let Some(pattern) = &options.pattern {
            cmd = cmd.arg("MATCH").text(pattern);
        }
        if let Some(count) = options.count {
            cmd = cmd.arg("COUNT").number(count);
        }
        cmd
    }

    pub fn sentinel_master_addr(master_name: &str) -> Self {
        Self::new("SENTINEL")
            .arg("get-master-addr-by-name")
            .text(master_name)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for arg in &self.args {
            list.entry(&String::from_utf8_lossy(arg));
        }
        list.finish()
    }
}
