/// Client strategies and the operation surface they share
///
/// Every strategy implements [`KvClient`]. The provided operations build
/// namespaced commands and hand them to two dispatch hooks, [`KvClient::read`]
/// and [`KvClient::write`], so a strategy mostly decides *where* a pipeline
/// runs. Strategies that change the shape of an operation (write fan-out,
/// sharding) override the operation itself.
pub mod base;
pub mod readonly;
pub mod sentinel;
pub mod sentinel_rw;
pub mod sharded;
pub mod write_all;

pub use base::{ClientCore, Wiring};
pub use readonly::ReadOnlyClient;
pub use sentinel::SentinelClient;
pub use sentinel_rw::SentinelRwClient;
pub use sharded::ShardedClient;
pub use write_all::{FanOutOutcome, WriteAllClient};

use crate::codec::{merge_key, ValueCodec};
use crate::config::ClientType;
use crate::core::command::{Command, Expiry, ScanOptions, SetCondition};
use crate::core::lifecycle::Lifecycle;
use crate::core::reply::{self, ScanPage};
use crate::core::resp::RespValue;
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// The operation surface of a named client
#[async_trait]
pub trait KvClient: Lifecycle {
    fn core(&self) -> &ClientCore;

    /// Run a read pipeline; replies come back unchecked.
    async fn read(&self, commands: &[Command]) -> TejidoResult<Vec<RespValue>>;

    /// Run a mutating pipeline; `operation` names the caller for errors.
    async fn write(
        &self,
        operation: &'static str,
        commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>>;

    fn name(&self) -> &str {
        &self.core().name
    }

    fn namespace(&self) -> &str {
        &self.core().namespace
    }

    fn codec(&self) -> &ValueCodec {
        &self.core().codec
    }

    fn client_type(&self) -> ClientType {
        self.core().client_type
    }

    /// Refuse `operation` up front when the strategy never writes.
    ///
    /// Checked before a value is enveloped, so a refused write reports that
    /// rather than a codec limit.
    fn writable(&self, _operation: &'static str) -> TejidoResult<()> {
        Ok(())
    }

    /// Endpoints currently serving reads; empty for master-only strategies.
    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    /// Wire key for `key`
    fn key(&self, key: &str) -> String {
        merge_key(self.namespace(), key)
    }

    async fn read_one(&self, command: Command) -> TejidoResult<RespValue> {
        let replies = self.read(std::slice::from_ref(&command)).await?;
        single(&command, replies)
    }

    async fn write_one(&self, operation: &'static str, command: Command) -> TejidoResult<RespValue> {
        let replies = self.write(operation, std::slice::from_ref(&command)).await?;
        single(&command, replies)
    }

    // strings

    async fn get(&self, key: &str) -> TejidoResult<Option<String>> {
        reply::string(self.read_one(Command::get(&self.key(key))).await?)
    }

    /// Pipelined multi-key read; absent and empty values are left out.
    async fn get_many(&self, keys: &[&str]) -> TejidoResult<HashMap<String, String>> {
        let mut out = HashMap::with_capacity(keys.len());
        for (key, value) in self.read_many(keys).await? {
            let value = String::from_utf8(value.to_vec())
                .map_err(|e| TejidoError::operation(format!("{}: {}", key, e)))?;
            out.insert(key, value);
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: &str) -> TejidoResult<String> {
        let command = Command::set(&self.key(key), value.to_owned());
        reply::status(self.write_one("set", command).await?)
    }

    /// Five-argument `SET`; `None` when the condition did not hold.
    async fn set_with(
        &self,
        key: &str,
        value: &str,
        condition: SetCondition,
        expiry: Expiry,
    ) -> TejidoResult<Option<String>> {
        let command = Command::set_with(&self.key(key), value.to_owned(), condition, expiry);
        reply::optional_status(self.write_one("set_with", command).await?)
    }

    async fn setnx(&self, key: &str, value: &str) -> TejidoResult<bool> {
        let command = Command::setnx(&self.key(key), value.to_owned());
        reply::boolean(self.write_one("setnx", command).await?)
    }

    // enveloped bytes

    async fn get_bytes(&self, key: &str) -> TejidoResult<Option<Vec<u8>>> {
        match reply::bulk(self.read_one(Command::get(&self.key(key))).await?)? {
            Some(stored) => self.codec().unwrap(&stored).map(Some),
            None => Ok(None),
        }
    }

    async fn get_many_bytes(&self, keys: &[&str]) -> TejidoResult<HashMap<String, Vec<u8>>> {
        let mut out = HashMap::with_capacity(keys.len());
        for (key, stored) in self.read_many(keys).await? {
            out.insert(key, self.codec().unwrap(&stored)?);
        }
        Ok(out)
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> TejidoResult<String> {
        self.writable("set_bytes")?;
        let stored = self.codec().wrap(value)?;
        reply::status(self.write_one("set_bytes", Command::set(&self.key(key), stored)).await?)
    }

    async fn setnx_bytes(&self, key: &str, value: &[u8]) -> TejidoResult<bool> {
        self.writable("setnx_bytes")?;
        let stored = self.codec().wrap(value)?;
        reply::boolean(
            self.write_one("setnx_bytes", Command::setnx(&self.key(key), stored))
                .await?,
        )
    }

    // counters and keys

    async fn incr(&self, key: &str) -> TejidoResult<i64> {
        reply::integer(self.write_one("incr", Command::incr(&self.key(key))).await?)
    }

    async fn decr(&self, key: &str) -> TejidoResult<i64> {
        reply::integer(self.write_one("decr", Command::decr(&self.key(key))).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> TejidoResult<i64> {
        let command = Command::incr_by(&self.key(key), delta);
        reply::integer(self.write_one("incr_by", command).await?)
    }

    async fn decr_by(&self, key: &str, delta: i64) -> TejidoResult<i64> {
        let command = Command::decr_by(&self.key(key), delta);
        reply::integer(self.write_one("decr_by", command).await?)
    }

    /// Returns the length of the value after the append.
    async fn append(&self, key: &str, value: &str) -> TejidoResult<i64> {
        let command = Command::append(&self.key(key), value);
        reply::integer(self.write_one("append", command).await?)
    }

    async fn del(&self, key: &str) -> TejidoResult<i64> {
        reply::integer(self.write_one("del", Command::del(&self.key(key))).await?)
    }

    async fn exists(&self, key: &str) -> TejidoResult<bool> {
        reply::boolean(self.read_one(Command::exists(&self.key(key))).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> TejidoResult<bool> {
        let command = Command::expire(&self.key(key), seconds);
        reply::boolean(self.write_one("expire", command).await?)
    }

    /// Both names are namespaced.
    async fn rename(&self, from: &str, to: &str) -> TejidoResult<String> {
        let command = Command::rename(&self.key(from), &self.key(to));
        reply::status(self.write_one("rename", command).await?)
    }

    // hashes

    async fn hset(&self, key: &str, field: &str, value: &str) -> TejidoResult<i64> {
        let command = Command::hset(&self.key(key), field, value.to_owned());
        reply::integer(self.write_one("hset", command).await?)
    }

    async fn hset_bytes(&self, key: &str, field: &str, value: &[u8]) -> TejidoResult<i64> {
        self.writable("hset_bytes")?;
        let stored = self.codec().wrap(value)?;
        let command = Command::hset(&self.key(key), field, stored);
        reply::integer(self.write_one("hset_bytes", command).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> TejidoResult<Option<String>> {
        reply::string(self.read_one(Command::hget(&self.key(key), field)).await?)
    }

    async fn hget_bytes(&self, key: &str, field: &str) -> TejidoResult<Option<Vec<u8>>> {
        match reply::bulk(self.read_one(Command::hget(&self.key(key), field)).await?)? {
            Some(stored) => self.codec().unwrap(&stored).map(Some),
            None => Ok(None),
        }
    }

    async fn hmset(&self, key: &str, entries: &HashMap<String, String>) -> TejidoResult<String> {
        let command = Command::hmset(
            &self.key(key),
            entries.iter().map(|(f, v)| (f.clone(), v.clone())),
        );
        reply::status(self.write_one("hmset", command).await?)
    }

    async fn hmset_bytes(
        &self,
        key: &str,
        entries: &HashMap<String, Vec<u8>>,
    ) -> TejidoResult<String> {
        self.writable("hmset_bytes")?;
        let mut stored = Vec::with_capacity(entries.len());
        for (field, value) in entries {
            stored.push((field.clone(), self.codec().wrap(value)?));
        }
        let command = Command::hmset(&self.key(key), stored);
        reply::status(self.write_one("hmset_bytes", command).await?)
    }

    async fn hget_all(&self, key: &str) -> TejidoResult<HashMap<String, String>> {
        let fields = reply::field_map(self.read_one(Command::hgetall(&self.key(key))).await?)?;
        fields
            .into_iter()
            .map(|(field, value)| {
                String::from_utf8(value.to_vec())
                    .map(|value| (field, value))
                    .map_err(|e| TejidoError::operation(e.to_string()))
            })
            .collect()
    }

    async fn hget_all_bytes(&self, key: &str) -> TejidoResult<HashMap<String, Vec<u8>>> {
        let fields = reply::field_map(self.read_one(Command::hgetall(&self.key(key))).await?)?;
        let mut out = HashMap::with_capacity(fields.len());
        for (field, stored) in fields {
            out.insert(field, self.codec().unwrap(&stored)?);
        }
        Ok(out)
    }

    async fn hkeys(&self, key: &str) -> TejidoResult<Vec<String>> {
        reply::string_list(self.read_one(Command::hkeys(&self.key(key))).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> TejidoResult<i64> {
        let command = Command::hdel(&self.key(key), field);
        reply::integer(self.write_one("hdel", command).await?)
    }

    async fn hexists(&self, key: &str, field: &str) -> TejidoResult<bool> {
        reply::boolean(self.read_one(Command::hexists(&self.key(key), field)).await?)
    }

    // sets

    async fn sadd(&self, key: &str, members: &[&str]) -> TejidoResult<i64> {
        let command = Command::sadd(&self.key(key), members);
        reply::integer(self.write_one("sadd", command).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> TejidoResult<bool> {
        reply::boolean(
            self.read_one(Command::sismember(&self.key(key), member))
                .await?,
        )
    }

    // sorted sets

    async fn zadd(&self, key: &str, score: f64, member: &str) -> TejidoResult<i64> {
        let command = Command::zadd(&self.key(key), score, member);
        reply::integer(self.write_one("zadd", command).await?)
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> TejidoResult<i64> {
        let command = Command::zrem(&self.key(key), members);
        reply::integer(self.write_one("zrem", command).await?)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> TejidoResult<Vec<String>> {
        reply::string_list(
            self.read_one(Command::zrange(&self.key(key), start, stop))
                .await?,
        )
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: i64,
        count: i64,
    ) -> TejidoResult<Vec<String>> {
        let command = Command::zrevrangebyscore(&self.key(key), max, min, offset, count);
        reply::string_list(self.read_one(command).await?)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> TejidoResult<i64> {
        reply::integer(self.read_one(Command::zcount(&self.key(key), min, max)).await?)
    }

    async fn zscan(
        &self,
        key: &str,
        cursor: &str,
        options: &ScanOptions,
    ) -> TejidoResult<ScanPage> {
        let command = Command::zscan(&self.key(key), cursor, options);
        reply::scan_page(self.read_one(command).await?)
    }

    // server

    async fn flush_db(&self) -> TejidoResult<String> {
        reply::status(self.write_one("flush_db", Command::flushdb()).await?)
    }

    async fn db_size(&self) -> TejidoResult<i64> {
        reply::integer(self.read_one(Command::dbsize()).await?)
    }

    async fn info(&self, section: Option<&str>) -> TejidoResult<String> {
        Ok(reply::string(self.read_one(Command::info(section)).await?)?.unwrap_or_default())
    }

    /// Keys matching the namespaced `pattern`, as stored.
    async fn keys(&self, pattern: &str) -> TejidoResult<Vec<String>> {
        reply::string_list(self.read_one(Command::keys(&self.key(pattern))).await?)
    }

    /// One `GET` per key in a single pipeline, keyed by the caller's names.
    async fn read_many(&self, keys: &[&str]) -> TejidoResult<Vec<(String, Bytes)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let commands: Vec<Command> = keys.iter().map(|k| Command::get(&self.key(k))).collect();
        let replies = self.read(&commands).await?;
        if replies.len() != keys.len() {
            return Err(TejidoError::operation(format!(
                "expected {} replies, got {}",
                keys.len(),
                replies.len()
            )));
        }

        let mut out = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(replies) {
            match reply::bulk(value)? {
                Some(value) if !value.is_empty() => out.push((key.to_string(), value)),
                _ => {}
            }
        }
        Ok(out)
    }
}

fn single(command: &Command, mut replies: Vec<RespValue>) -> TejidoResult<RespValue> {
    replies
        .pop()
        .ok_or_else(|| TejidoError::operation(format!("no reply to {}", command.name())))
}

/// Serde-typed helpers over the byte operations
#[async_trait]
pub trait KvClientExt: KvClient {
    async fn set_object<T>(&self, key: &str, value: &T) -> TejidoResult<String>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = self.codec().to_bytes(value)?;
        self.set_bytes(key, &raw).await
    }

    async fn setnx_object<T>(&self, key: &str, value: &T) -> TejidoResult<bool>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = self.codec().to_bytes(value)?;
        self.setnx_bytes(key, &raw).await
    }

    async fn get_object<T>(&self, key: &str) -> TejidoResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_bytes(key).await? {
            Some(raw) if !raw.is_empty() => self.codec().from_bytes(&raw).map(Some),
            _ => Ok(None),
        }
    }

    async fn get_objects<T>(&self, keys: &[&str]) -> TejidoResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.get_many_bytes(keys).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, bytes) in raw {
            out.insert(key, self.codec().from_bytes(&bytes)?);
        }
        Ok(out)
    }

    async fn hset_object<T>(&self, key: &str, field: &str, value: &T) -> TejidoResult<i64>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = self.codec().to_bytes(value)?;
        self.hset_bytes(key, field, &raw).await
    }

    /// Typed `HGET`
    async fn hget_object<T>(&self, key: &str, field: &str) -> TejidoResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.hget_bytes(key, field).await? {
            Some(raw) if !raw.is_empty() => self.codec().from_bytes(&raw).map(Some),
            _ => Ok(None),
        }
    }

    async fn hmset_objects<T>(&self, key: &str, entries: &HashMap<String, T>) -> TejidoResult<String>
    where
        T: Serialize + Sync,
    {
        let mut raw = HashMap::with_capacity(entries.len());
        for (field, value) in entries {
            raw.insert(field.clone(), self.codec().to_bytes(value)?);
        }
        self.hmset_bytes(key, &raw).await
    }

    async fn hget_all_objects<T>(&self, key: &str) -> TejidoResult<HashMap<String, T>>
    where
        T: DeserializeOwned + Send,
    {
        let raw = self.hget_all_bytes(key).await?;
        let mut out = HashMap::with_capacity(raw.len());
        for (field, bytes) in raw {
            out.insert(field, self.codec().from_bytes(&bytes)?);
        }
        Ok(out)
    }
}

impl<C: KvClient + ?Sized> KvClientExt for C {}
