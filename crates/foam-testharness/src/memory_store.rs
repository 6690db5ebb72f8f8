//! ---
//! ems_section: "11-simulation-test-harness"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory Redis stand-in speaking the client wire protocol."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-memory stand-in for the Redis server.
//!
//! Sessions speak the client side of `redis::ConnectionLike`: packed RESP
//! commands are parsed and executed against shared state. Only the
//! commands the bridge and its tests issue are understood.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use foam_store::{ConnectionParams, Connector, StoreError, StoreSession};
use parking_lot::{Condvar, Mutex, MutexGuard};
use redis::{ConnectionLike, ErrorKind, RedisError, RedisResult, Value};

/// `client-output-buffer-limit` as reported by a stock server.
pub const DEFAULT_OUTPUT_BUFFER_LIMIT: &str =
    "normal 0 0 0 slave 268435456 67108864 60 pubsub 33554432 8388608 60";

/// Failure injected into the next command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Client-side read timeout.
    Timeout,
    /// Connection dropped by the peer.
    Disconnect,
    /// Error reply from the server.
    Response(String),
}

type StreamId = (u64, u64);

#[derive(Default)]
struct StreamLog {
    entries: Vec<(StreamId, Vec<(Vec<u8>, Vec<u8>)>)>,
    last: StreamId,
}

#[derive(Default)]
struct Subscription {
    channels: Vec<Vec<u8>>,
    patterns: Vec<Vec<u8>>,
    queue: VecDeque<Value>,
}

struct State {
    online: bool,
    hashes: HashMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>,
    streams: HashMap<Vec<u8>, StreamLog>,
    config: BTreeMap<String, String>,
    subscriptions: HashMap<u64, Subscription>,
    failures: VecDeque<(Option<String>, Failure)>,
    commands: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    next_session: u64,
    sessions_opened: usize,
    shutdowns: usize,
}

impl Default for State {
    fn default() -> Self {
        let mut config = BTreeMap::new();
        config.insert("maxmemory".to_owned(), "0".to_owned());
        config.insert(
            "client-output-buffer-limit".to_owned(),
            DEFAULT_OUTPUT_BUFFER_LIMIT.to_owned(),
        );
        Self {
            online: true,
            hashes: HashMap::new(),
            streams: HashMap::new(),
            config,
            subscriptions: HashMap::new(),
            failures: VecDeque::new(),
            commands: Vec::new(),
            published: Vec::new(),
            next_session: 1,
            sessions_opened: 0,
            shutdowns: 0,
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// Shared in-memory store; clones observe the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Store that accepts connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses connections until [`set_online`](Self::set_online).
    pub fn offline() -> Self {
        let store = Self::default();
        store.set_online(false);
        store
    }

    /// Bring the server up or down. Going down breaks open sessions.
    pub fn set_online(&self, online: bool) {
        self.state().online = online;
        self.shared.changed.notify_all();
    }

    /// Whether the server accepts connections.
    pub fn is_online(&self) -> bool {
        self.state().online
    }

    /// Make the next command fail with `failure`.
    pub fn fail_next(&self, failure: Failure) {
        self.state().failures.push_back((None, failure));
    }

    /// Make the next command named `command` (e.g. `"XADD"`) fail.
    pub fn fail_next_command(&self, command: &str, failure: Failure) {
        self.state()
            .failures
            .push_back((Some(command.to_uppercase()), failure));
    }

    /// Sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    /// Executed commands, e.g. `"HSET"` or `"CONFIG SET"`.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of executed commands named `name`.
    pub fn command_count(&self, name: &str) -> usize {
        self.state().commands.iter().filter(|c| *c == name).count()
    }

    /// Payloads published on `channel`.
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.state()
            .published
            .iter()
            .filter(|(ch, _)| ch == channel)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of `SHUTDOWN` commands received.
    pub fn shutdowns(&self) -> usize {
        self.state().shutdowns
    }

    /// Current configuration parameter.
    pub fn config_value(&self, name: &str) -> Option<String> {
        self.state().config.get(name).cloned()
    }

    /// Overwrite a configuration parameter.
    pub fn set_config(&self, name: &str, value: &str) {
        self.state()
            .config
            .insert(name.to_owned(), value.to_owned());
    }

    /// Raw value of a hash field.
    pub fn hash_field(&self, key: &str, field: &str) -> Option<Vec<u8>> {
        self.state()
            .hashes
            .get(key.as_bytes())
            .and_then(|hash| hash.get(field.as_bytes()))
            .cloned()
    }

    /// Write a hash field directly, bypassing the command log.
    pub fn put_hash_field(&self, key: &str, field: &str, value: impl Into<Vec<u8>>) {
        self.state()
            .hashes
            .entry(key.as_bytes().to_vec())
            .or_default()
            .insert(field.as_bytes().to_vec(), value.into());
    }

    /// Entries currently in the stream `key`.
    pub fn stream_len(&self, key: &str) -> usize {
        self.state()
            .streams
            .get(key.as_bytes())
            .map_or(0, |stream| stream.entries.len())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    fn execute(&self, session: u64, args: Vec<Vec<u8>>) -> RedisResult<Value> {
        let mut state = self.state();
        if !state.online {
            return Err(io_error(io::ErrorKind::BrokenPipe, "connection to store lost"));
        }
        let name = args
            .first()
            .map(|arg| String::from_utf8_lossy(arg).to_uppercase())
            .ok_or_else(|| client_error("empty command"))?;
        let logged = match (name.as_str(), args.get(1)) {
            ("CONFIG", Some(sub)) => format!("CONFIG {}", String::from_utf8_lossy(sub).to_uppercase()),
            _ => name.clone(),
        };
        state.commands.push(logged);

        let injected = state
            .failures
            .iter()
            .position(|(target, _)| target.as_ref().map_or(true, |target| *target == name))
            .and_then(|index| state.failures.remove(index));
        if let Some((_, failure)) = injected {
            return Err(match failure {
                Failure::Timeout => io_error(io::ErrorKind::TimedOut, "read timed out"),
                Failure::Disconnect => io_error(io::ErrorKind::ConnectionReset, "connection reset"),
                Failure::Response(message) => response_error(message),
            });
        }

        let args = &args[1..];
        match name.as_str() {
            "PING" => Ok(Value::SimpleString("PONG".to_owned())),
            "AUTH" | "SELECT" | "CLIENT" => Ok(Value::Okay),
            "SHUTDOWN" => {
                state.online = false;
                state.shutdowns += 1;
                self.shared.changed.notify_all();
                Err(io_error(io::ErrorKind::UnexpectedEof, "server closed the connection"))
            }
            "PUBLISH" => {
                let [channel, message] = exact::<2>(args)?;
                let delivered = publish(&mut state, channel, message);
                self.shared.changed.notify_all();
                Ok(Value::Int(delivered))
            }
            "SUBSCRIBE" | "PSUBSCRIBE" => subscribe(&mut state, session, &name, args),
            "CONFIG" => config(&mut state, args),
            "HSET" => hset(&mut state, args),
            "HGET" => {
                let [key, field] = exact::<2>(args)?;
                Ok(state
                    .hashes
                    .get(key)
                    .and_then(|hash| hash.get(field))
                    .map_or(Value::Nil, |value| bulk(value)))
            }
            "HMGET" => {
                let (key, fields) = split_first(args)?;
                let hash = state.hashes.get(key);
                Ok(Value::Array(
                    fields
                        .iter()
                        .map(|field| {
                            hash.and_then(|h| h.get(field))
                                .map_or(Value::Nil, |value| bulk(value))
                        })
                        .collect(),
                ))
            }
            "HDEL" => {
                let (key, fields) = split_first(args)?;
                let mut removed = 0;
                if let Some(hash) = state.hashes.get_mut(key) {
                    removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                    if hash.is_empty() {
                        state.hashes.remove(key);
                    }
                }
                Ok(Value::Int(removed as i64))
            }
            "HGETALL" => {
                let [key] = exact::<1>(args)?;
                let items = state
                    .hashes
                    .get(key)
                    .map(|hash| {
                        hash.iter()
                            .flat_map(|(field, value)| [bulk(field), bulk(value)])
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(Value::Array(items))
            }
            "HINCRBY" => {
                let [key, field, amount] = exact::<3>(args)?;
                let amount: i64 = parse(amount, "value is not an integer or out of range")?;
                let slot = state.hashes.entry(key.to_vec()).or_default();
                let current: i64 = match slot.get(field) {
                    Some(value) => parse(value, "hash value is not an integer")?,
                    None => 0,
                };
                let updated = current + amount;
                slot.insert(field.to_vec(), updated.to_string().into_bytes());
                Ok(Value::Int(updated))
            }
            "HINCRBYFLOAT" => {
                let [key, field, amount] = exact::<3>(args)?;
                let amount: f64 = parse(amount, "value is not a valid float")?;
                let slot = state.hashes.entry(key.to_vec()).or_default();
                let current: f64 = match slot.get(field) {
                    Some(value) => parse(value, "hash value is not a float")?,
                    None => 0.0,
                };
                let updated = (current + amount).to_string();
                slot.insert(field.to_vec(), updated.clone().into_bytes());
                Ok(Value::BulkString(updated.into_bytes()))
            }
            "XADD" => {
                let reply = xadd(&mut state, args);
                self.shared.changed.notify_all();
                reply
            }
            "XREAD" => self.xread(state, args),
            "XLEN" => {
                let [key] = exact::<1>(args)?;
                Ok(Value::Int(
                    state.streams.get(key).map_or(0, |s| s.entries.len()) as i64,
                ))
            }
            "DEL" => {
                let mut removed = 0;
                for key in args {
                    if state.hashes.remove(key).is_some() || state.streams.remove(key).is_some() {
                        removed += 1;
                    }
                }
                Ok(Value::Int(removed))
            }
            other => Err(response_error(format!("ERR unknown command '{other}'"))),
        }
    }

    fn xread(&self, mut state: MutexGuard<'_, State>, args: &[Vec<u8>]) -> RedisResult<Value> {
        let mut count = usize::MAX;
        let mut block = None;
        let mut index = 0;
        loop {
            let option = args
                .get(index)
                .map(|arg| String::from_utf8_lossy(arg).to_uppercase())
                .ok_or_else(|| response_error("ERR syntax error"))?;
            match option.as_str() {
                "COUNT" => {
                    count = parse(arg_at(args, index + 1)?, "value is not an integer")?;
                    index += 2;
                }
                "BLOCK" => {
                    let millis: u64 = parse(arg_at(args, index + 1)?, "timeout is not an integer")?;
                    block = Some(Duration::from_millis(millis));
                    index += 2;
                }
                "STREAMS" => {
                    index += 1;
                    break;
                }
                _ => return Err(response_error("ERR syntax error")),
            }
        }
        let [key, id] = exact::<2>(&args[index..])?;
        let after = if id.as_slice() == b"$" {
            state.streams.get(key).map_or((0, 0), |stream| stream.last)
        } else {
            parse_id(id)?
        };

        let deadline = block.map(|block| Instant::now() + block);
        loop {
            let entries: Vec<Value> = state
                .streams
                .get(key)
                .map(|stream| {
                    stream
                        .entries
                        .iter()
                        .filter(|(entry_id, _)| *entry_id > after)
                        .take(count)
                        .map(|(entry_id, fields)| {
                            Value::Array(vec![
                                Value::BulkString(format_id(*entry_id).into_bytes()),
                                Value::Array(
                                    fields
                                        .iter()
                                        .flat_map(|(f, v)| [bulk(f), bulk(v)])
                                        .collect(),
                                ),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default();
            if !entries.is_empty() {
                return Ok(Value::Array(vec![Value::Array(vec![
                    bulk(key),
                    Value::Array(entries),
                ])]));
            }
            let Some(deadline) = deadline else {
                return Ok(Value::Nil);
            };
            let now = Instant::now();
            if now >= deadline || !state.online {
                return Ok(Value::Nil);
            }
            self.shared.changed.wait_for(&mut state, deadline - now);
        }
    }

    fn recv_push(&self, session: u64, timeout: Duration) -> RedisResult<Option<Value>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if !state.online {
                return Err(io_error(io::ErrorKind::ConnectionReset, "connection to store lost"));
            }
            if let Some(value) = state
                .subscriptions
                .get_mut(&session)
                .and_then(|sub| sub.queue.pop_front())
            {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.shared.changed.wait_for(&mut state, deadline - now);
        }
    }
}

impl Connector for MemoryStore {
    fn open(&self, _params: &ConnectionParams) -> foam_store::Result<Box<dyn StoreSession>> {
        let mut state = self.state();
        if !state.online {
            return Err(StoreError::Redis(io_error(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let id = state.next_session;
        state.next_session += 1;
        state.sessions_opened += 1;
        Ok(Box::new(MemorySession {
            store: self.clone(),
            id,
        }))
    }
}

/// One client session of a [`MemoryStore`].
pub struct MemorySession {
    store: MemoryStore,
    id: u64,
}

impl ConnectionLike for MemorySession {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        let mut commands = parse_commands(cmd)?;
        if commands.len() != 1 {
            return Err(client_error("expected exactly one command"));
        }
        self.store.execute(self.id, commands.remove(0))
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        let mut replies = Vec::new();
        for args in parse_commands(cmd)? {
            replies.push(self.store.execute(self.id, args)?);
        }
        Ok(replies.into_iter().skip(offset).take(count).collect())
    }

    fn get_db(&self) -> i64 {
        0
    }

    fn check_connection(&mut self) -> bool {
        self.store.is_online()
    }

    fn is_open(&self) -> bool {
        self.store.is_online()
    }
}

impl StoreSession for MemorySession {
    fn connection(&mut self) -> &mut dyn ConnectionLike {
        self
    }

    fn recv_push(&mut self, timeout: Duration) -> RedisResult<Option<Value>> {
        self.store.recv_push(self.id, timeout)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.store.state().subscriptions.remove(&self.id);
    }
}

fn publish(state: &mut State, channel: &[u8], message: &[u8]) -> i64 {
    let mut delivered = 0;
    for subscription in state.subscriptions.values_mut() {
        if subscription.channels.iter().any(|c| c == channel) {
            subscription.queue.push_back(Value::Array(vec![
                bulk(b"message"),
                bulk(channel),
                bulk(message),
            ]));
            delivered += 1;
        }
        for pattern in &subscription.patterns {
            if glob_match(pattern, channel) {
                subscription.queue.push_back(Value::Array(vec![
                    bulk(b"pmessage"),
                    bulk(pattern),
                    bulk(channel),
                    bulk(message),
                ]));
                delivered += 1;
            }
        }
    }
    state
        .published
        .push((String::from_utf8_lossy(channel).into_owned(), message.to_vec()));
    delivered
}

fn subscribe(state: &mut State, session: u64, name: &str, targets: &[Vec<u8>]) -> RedisResult<Value> {
    if targets.is_empty() {
        return Err(wrong_arity(name));
    }
    let subscription = state.subscriptions.entry(session).or_default();
    let kind: &[u8] = if name == "SUBSCRIBE" { b"subscribe" } else { b"psubscribe" };
    let mut confirmations = Vec::new();
    for target in targets {
        let list = if name == "SUBSCRIBE" {
            &mut subscription.channels
        } else {
            &mut subscription.patterns
        };
        if !list.contains(target) {
            list.push(target.clone());
        }
        let total = subscription.channels.len() + subscription.patterns.len();
        confirmations.push(Value::Array(vec![
            bulk(kind),
            bulk(target),
            Value::Int(total as i64),
        ]));
    }
    let first = confirmations.remove(0);
    subscription.queue.extend(confirmations);
    Ok(first)
}

fn config(state: &mut State, args: &[Vec<u8>]) -> RedisResult<Value> {
    let (sub, rest) = split_first(args)?;
    match String::from_utf8_lossy(sub).to_uppercase().as_str() {
        "GET" => {
            let [name] = exact::<1>(rest)?;
            let name = String::from_utf8_lossy(name).into_owned();
            Ok(match state.config.get(&name) {
                Some(value) => Value::Array(vec![bulk(name.as_bytes()), bulk(value.as_bytes())]),
                None => Value::Array(Vec::new()),
            })
        }
        "SET" => {
            let [name, value] = exact::<2>(rest)?;
            let name = String::from_utf8_lossy(name).into_owned();
            let value = String::from_utf8_lossy(value).into_owned();
            let stored = match name.as_str() {
                "maxmemory" => {
                    let _: u64 = parse(value.as_bytes(), "Invalid argument for 'maxmemory'")?;
                    value
                }
                "client-output-buffer-limit" => {
                    let current = state.config.get(&name).cloned().unwrap_or_default();
                    merge_buffer_limits(&current, &value)?
                }
                _ => value,
            };
            state.config.insert(name, stored);
            Ok(Value::Okay)
        }
        other => Err(response_error(format!("ERR unknown CONFIG subcommand '{other}'"))),
    }
}

/// Replace the classes named in `update`, keep the others.
fn merge_buffer_limits(current: &str, update: &str) -> RedisResult<String> {
    let groups = |text: &str| -> RedisResult<Vec<Vec<String>>> {
        let tokens: Vec<String> = text.split_whitespace().map(str::to_owned).collect();
        if tokens.len() % 4 != 0 {
            return Err(response_error("ERR Invalid argument for 'client-output-buffer-limit'"));
        }
        Ok(tokens.chunks(4).map(<[String]>::to_vec).collect())
    };
    let mut merged = groups(current)?;
    for group in groups(update)? {
        match merged.iter_mut().find(|existing| existing[0] == group[0]) {
            Some(existing) => *existing = group,
            None => merged.push(group),
        }
    }
    Ok(merged.concat().join(" "))
}

fn hset(state: &mut State, args: &[Vec<u8>]) -> RedisResult<Value> {
    let (key, pairs) = split_first(args)?;
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(wrong_arity("hset"));
    }
    let hash = state.hashes.entry(key.clone()).or_default();
    let added = pairs
        .chunks(2)
        .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
        .count();
    Ok(Value::Int(added as i64))
}

fn xadd(state: &mut State, args: &[Vec<u8>]) -> RedisResult<Value> {
    let (key, rest) = split_first(args)?;
    let mut index = 0;
    let mut maxlen = None;
    if rest
        .first()
        .is_some_and(|arg| arg.eq_ignore_ascii_case(b"MAXLEN"))
    {
        index += 1;
        if matches!(rest.get(index).map(Vec::as_slice), Some(b"~") | Some(b"=")) {
            index += 1;
        }
        maxlen = Some(parse::<usize>(arg_at(rest, index)?, "value is not an integer")?);
        index += 1;
    }
    if arg_at(rest, index)?.as_slice() != b"*" {
        return Err(response_error("ERR only auto-generated ids are supported"));
    }
    let fields = &rest[index + 1..];
    if fields.is_empty() || fields.len() % 2 != 0 {
        return Err(wrong_arity("xadd"));
    }

    let stream = state.streams.entry(key.clone()).or_default();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64);
    let id = if now > stream.last.0 {
        (now, 0)
    } else {
        (stream.last.0, stream.last.1 + 1)
    };
    stream.last = id;
    stream.entries.push((
        id,
        fields
            .chunks(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect(),
    ));
    if let Some(maxlen) = maxlen {
        let excess = stream.entries.len().saturating_sub(maxlen);
        stream.entries.drain(..excess);
    }
    Ok(Value::BulkString(format_id(id).into_bytes()))
}

fn parse_id(raw: &[u8]) -> RedisResult<StreamId> {
    let text = String::from_utf8_lossy(raw);
    let (ms, seq) = text.split_once('-').unwrap_or((&text, "0"));
    match (ms.parse(), seq.parse()) {
        (Ok(ms), Ok(seq)) => Ok((ms, seq)),
        _ => Err(response_error(
            "ERR Invalid stream ID specified as stream command argument",
        )),
    }
}

fn format_id((ms, seq): StreamId) -> String {
    format!("{ms}-{seq}")
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn parse_commands(buf: &[u8]) -> RedisResult<Vec<Vec<Vec<u8>>>> {
    let mut commands = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        let count = read_header(buf, &mut pos, b'*')?;
        let mut args = Vec::with_capacity(count);
        for _ in 0..count {
            let len = read_header(buf, &mut pos, b'$')?;
            let end = pos + len;
            if buf.get(end..end + 2) != Some(b"\r\n".as_slice()) {
                return Err(client_error("truncated bulk string"));
            }
            args.push(buf[pos..end].to_vec());
            pos = end + 2;
        }
        commands.push(args);
    }
    Ok(commands)
}

fn read_header(buf: &[u8], pos: &mut usize, marker: u8) -> RedisResult<usize> {
    if buf.get(*pos) != Some(&marker) {
        return Err(client_error("unexpected RESP marker"));
    }
    let start = *pos + 1;
    let line_end = buf[start..]
        .windows(2)
        .position(|window| window == b"\r\n")
        .map(|offset| start + offset)
        .ok_or_else(|| client_error("unterminated RESP header"))?;
    let value = std::str::from_utf8(&buf[start..line_end])
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| client_error("invalid RESP length"))?;
    *pos = line_end + 2;
    Ok(value)
}

fn exact<const N: usize>(args: &[Vec<u8>]) -> RedisResult<[&Vec<u8>; N]> {
    if args.len() != N {
        return Err(response_error("ERR wrong number of arguments"));
    }
    Ok(std::array::from_fn(|i| &args[i]))
}

fn split_first(args: &[Vec<u8>]) -> RedisResult<(&Vec<u8>, &[Vec<u8>])> {
    args.split_first()
        .ok_or_else(|| response_error("ERR wrong number of arguments"))
}

fn arg_at(args: &[Vec<u8>], index: usize) -> RedisResult<&Vec<u8>> {
    args.get(index)
        .ok_or_else(|| response_error("ERR syntax error"))
}

fn parse<T: std::str::FromStr>(raw: &[u8], message: &str) -> RedisResult<T> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| response_error(format!("ERR {message}")))
}

fn bulk(bytes: impl AsRef<[u8]>) -> Value {
    Value::BulkString(bytes.as_ref().to_vec())
}

fn io_error(kind: io::ErrorKind, message: &str) -> RedisError {
    RedisError::from(io::Error::new(kind, message.to_owned()))
}

fn response_error(detail: impl Into<String>) -> RedisError {
    RedisError::from((
        ErrorKind::ResponseError,
        "An error was signalled by the server",
        detail.into(),
    ))
}

fn client_error(detail: &str) -> RedisError {
    RedisError::from((ErrorKind::ClientError, "malformed command", detail.to_owned()))
}

fn wrong_arity(command: &str) -> RedisError {
    response_error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_lowercase()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_packed_pipeline() {
        let mut pipe = redis::pipe();
        pipe.cmd("HSET").arg("h").arg("f").arg(b"\x00\x01".as_slice());
        pipe.cmd("PING");
        let packed = pipe.get_packed_pipeline();
        let commands = parse_commands(&packed).unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0][3], vec![0u8, 1]);
        assert_eq!(commands[1], vec![b"PING".to_vec()]);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match(b"log:*", b"log:warning"));
        assert!(glob_match(b"log:?nfo", b"log:info"));
        assert!(!glob_match(b"log:*", b"metrics:cpu"));
    }

    #[test]
    fn buffer_limit_merge_replaces_named_class() {
        let merged = merge_buffer_limits(
            DEFAULT_OUTPUT_BUFFER_LIMIT,
            "pubsub 536870912 134217728 60",
        )
        .unwrap();
        assert_eq!(
            merged,
            "normal 0 0 0 slave 268435456 67108864 60 pubsub 536870912 134217728 60"
        );
    }
}
