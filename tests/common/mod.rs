//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::TestGrid;
//! ```
//!
//! [`TestGrid`] is an in-process mock of the data-grid service: a TCP
//! listener with an in-memory namespace speaking the newline-delimited
//! JSON protocol the client expects. Query responses are capped at
//! [`PAGE_CAP`] rows per page so the continuation-cursor path is exercised
//! by ordinary fixtures.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use gridrun::config::GridEnv;
use gridrun::grid::Connection;

/// Rows per query response page.
pub const PAGE_CAP: usize = 2;

const NO_ROWS_FOUND: i32 = -808_000;
const PATH_NOT_FOUND: i32 = -310_000;
const ALREADY_EXISTS: i32 = -809_000;
const PERMISSION_DENIED: i32 = -818_000;
const OVERWRITE_WITHOUT_FORCE: i32 = -313_000;
const COLLECTION_NOT_EMPTY: i32 = -821_000;

#[derive(Debug, Clone)]
pub struct MockAvu {
    pub attribute: String,
    pub value: String,
    pub units: String,
}

#[derive(Debug, Clone)]
pub struct MockAccess {
    pub owner: String,
    pub zone: String,
    pub level: String,
}

#[derive(Debug, Clone)]
enum Entry {
    Collection {
        avus: Vec<MockAvu>,
        acl: Vec<MockAccess>,
    },
    Object {
        data: Vec<u8>,
        checksum: Option<String>,
        avus: Vec<MockAvu>,
        acl: Vec<MockAccess>,
    },
}

impl Entry {
    fn new_collection() -> Entry {
        Entry::Collection {
            avus: Vec::new(),
            acl: Vec::new(),
        }
    }

    fn new_object(data: Vec<u8>) -> Entry {
        Entry::Object {
            data,
            checksum: None,
            avus: Vec::new(),
            acl: Vec::new(),
        }
    }

    fn avus(&self) -> &Vec<MockAvu> {
        match self {
            Entry::Collection { avus, .. } | Entry::Object { avus, .. } => avus,
        }
    }

    fn avus_mut(&mut self) -> &mut Vec<MockAvu> {
        match self {
            Entry::Collection { avus, .. } | Entry::Object { avus, .. } => avus,
        }
    }

    fn acl_mut(&mut self) -> &mut Vec<MockAccess> {
        match self {
            Entry::Collection { acl, .. } | Entry::Object { acl, .. } => acl,
        }
    }

    fn acl(&self) -> &Vec<MockAccess> {
        match self {
            Entry::Collection { acl, .. } | Entry::Object { acl, .. } => acl,
        }
    }

    fn is_collection(&self) -> bool {
        matches!(self, Entry::Collection { .. })
    }
}

#[derive(Default)]
struct Namespace {
    entries: BTreeMap<String, Entry>,
}

enum Handle {
    CollIter { entries: Vec<Value>, next: usize },
    Read { path: String, offset: usize },
    Write { path: String, data: Vec<u8> },
}

struct ServerState {
    namespace: Mutex<Namespace>,
    handles: Mutex<BTreeMap<u64, Handle>>,
    next_handle: AtomicU64,
    connections: AtomicUsize,
    fail_login: bool,
    op_delay: Duration,
}

/// An in-process mock grid service with automatic port assignment.
pub struct TestGrid {
    port: u16,
    state: Arc<ServerState>,
}

impl TestGrid {
    /// Start a mock service that accepts logins and answers immediately.
    pub fn start() -> TestGrid {
        TestGrid::start_with(false, Duration::ZERO)
    }

    /// Start a mock service that rejects every login.
    pub fn start_rejecting_logins() -> TestGrid {
        TestGrid::start_with(true, Duration::ZERO)
    }

    /// Start a mock service that sleeps before answering each request.
    pub fn start_with_delay(op_delay: Duration) -> TestGrid {
        TestGrid::start_with(false, op_delay)
    }

    fn start_with(fail_login: bool, op_delay: Duration) -> TestGrid {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
        let port = listener.local_addr().expect("listener addr").port();
        let state = Arc::new(ServerState {
            namespace: Mutex::new(Namespace::default()),
            handles: Mutex::new(BTreeMap::new()),
            next_handle: AtomicU64::new(1),
            connections: AtomicUsize::new(0),
            fail_login,
            op_delay,
        });

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                state.connections.fetch_add(1, Ordering::SeqCst);
                thread::spawn(move || serve_client(stream, &state));
            }
        });

        TestGrid { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// An environment pointing at this mock service.
    pub fn env(&self) -> GridEnv {
        GridEnv {
            host: "127.0.0.1".into(),
            port: self.port,
            user: "tester".into(),
            zone: "test".into(),
            home: "/test/home/tester".into(),
        }
    }

    /// Open a logged-in client connection.
    pub fn connect(&self) -> Connection {
        Connection::connect(&self.env(), Duration::from_secs(5)).expect("connect to mock grid")
    }

    /// How many TCP connections the service has accepted.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    // ── Fixture setup ──

    pub fn add_collection(&self, path: &str) {
        let mut ns = self.state.namespace.lock().expect("namespace lock");
        ns.entries
            .insert(path.to_owned(), Entry::new_collection());
    }

    pub fn add_object(&self, path: &str, data: &[u8]) {
        let mut ns = self.state.namespace.lock().expect("namespace lock");
        ns.entries
            .insert(path.to_owned(), Entry::new_object(data.to_vec()));
    }

    pub fn add_avu(&self, path: &str, attribute: &str, value: &str, units: &str) {
        let mut ns = self.state.namespace.lock().expect("namespace lock");
        let entry = ns.entries.get_mut(path).expect("fixture path exists");
        entry.avus_mut().push(MockAvu {
            attribute: attribute.into(),
            value: value.into(),
            units: units.into(),
        });
    }

    pub fn add_access(&self, path: &str, owner: &str, zone: &str, level: &str) {
        let mut ns = self.state.namespace.lock().expect("namespace lock");
        let entry = ns.entries.get_mut(path).expect("fixture path exists");
        entry.acl_mut().push(MockAccess {
            owner: owner.into(),
            zone: zone.into(),
            level: level.into(),
        });
    }

    // ── Assertions ──

    pub fn has_entry(&self, path: &str) -> bool {
        let ns = self.state.namespace.lock().expect("namespace lock");
        ns.entries.contains_key(path)
    }

    pub fn object_data(&self, path: &str) -> Option<Vec<u8>> {
        let ns = self.state.namespace.lock().expect("namespace lock");
        match ns.entries.get(path) {
            Some(Entry::Object { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn avus(&self, path: &str) -> Vec<(String, String, String)> {
        let ns = self.state.namespace.lock().expect("namespace lock");
        ns.entries
            .get(path)
            .map(|e| {
                e.avus()
                    .iter()
                    .map(|a| (a.attribute.clone(), a.value.clone(), a.units.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn acl(&self, path: &str) -> Vec<(String, String, String)> {
        let ns = self.state.namespace.lock().expect("namespace lock");
        ns.entries
            .get(path)
            .map(|e| {
                e.acl()
                    .iter()
                    .map(|a| (a.owner.clone(), a.zone.clone(), a.level.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Checksum function used by the mock service.
pub fn mock_checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

// ─── Protocol handling ───────────────────────────────────────────────────────

fn serve_client(stream: TcpStream, state: &ServerState) {
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(_) => return,
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => break,
        };
        if !state.op_delay.is_zero() {
            thread::sleep(state.op_delay);
        }

        let id = request["id"].as_u64().unwrap_or(0);
        let op = request["op"].as_str().unwrap_or("");
        let params = &request["params"];

        let response = match handle_request(state, op, params) {
            Ok(result) => json!({"id": id, "ok": true, "result": result}),
            Err((code, message)) => json!({
                "id": id,
                "ok": false,
                "error": {"code": code, "message": message},
            }),
        };

        let mut line = response.to_string();
        line.push('\n');
        if writer.write_all(line.as_bytes()).is_err() {
            break;
        }
    }
}

type OpResult = Result<Value, (i32, String)>;

fn handle_request(state: &ServerState, op: &str, params: &Value) -> OpResult {
    match op {
        "auth.login" => {
            if state.fail_login {
                Err((PERMISSION_DENIED, "login denied".into()))
            } else {
                Ok(json!({}))
            }
        }
        "path.stat" => stat(state, params),
        "query.exec" => exec_query(state, params),
        "coll.open" => coll_open(state, params),
        "coll.read" => coll_read(state, params),
        "coll.close" => {
            let handle = params["handle"].as_u64().unwrap_or(0);
            state.handles.lock().expect("handles lock").remove(&handle);
            Ok(json!({}))
        }
        "coll.create" => coll_create(state, params),
        "coll.remove" => coll_remove(state, params),
        "meta.mod" => meta_mod(state, params),
        "acl.mod" => acl_mod(state, params),
        "obj.checksum" => obj_checksum(state, params),
        "obj.put" => obj_put(state, params),
        "obj.open" => obj_open(state, params),
        "obj.create" => obj_create(state, params),
        "obj.read" => obj_read(state, params),
        "obj.write" => obj_write(state, params),
        "obj.close" => obj_close(state, params),
        "obj.move" => obj_move(state, params),
        "obj.remove" => obj_remove(state, params),
        other => Err((-1, format!("unknown op '{other}'"))),
    }
}

fn path_param(params: &Value) -> Result<String, (i32, String)> {
    params["path"]
        .as_str()
        .map(str::to_owned)
        .ok_or((-1, "missing 'path'".into()))
}

fn stat(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get(&path) {
        None => Ok(json!({"kind": "absent"})),
        Some(Entry::Collection { .. }) => Ok(json!({
            "kind": "collection",
            "created": "1136214245",
            "modified": "1136214245",
        })),
        Some(Entry::Object { data, checksum, .. }) => Ok(json!({
            "kind": "data_object",
            "size": data.len(),
            "checksum": checksum,
            "created": "1136214245",
            "modified": "1136214245",
        })),
    }
}

fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) => "/".to_owned(),
        Some((parent, _)) => parent.to_owned(),
        None => "/".to_owned(),
    }
}

/// Direct children of a collection, in namespace (sorted) order.
fn children_of(ns: &Namespace, path: &str) -> Vec<Value> {
    let prefix = if path == "/" {
        "/".to_owned()
    } else {
        format!("{path}/")
    };
    ns.entries
        .iter()
        .filter(|(k, _)| {
            k.starts_with(&prefix) && !k[prefix.len()..].is_empty() && !k[prefix.len()..].contains('/')
        })
        .map(|(k, v)| match v {
            Entry::Collection { .. } => json!({"kind": "collection", "collection": k}),
            Entry::Object { .. } => json!({
                "kind": "data_object",
                "collection": parent_of(k),
                "data_object": k[prefix.len()..],
            }),
        })
        .collect()
}

fn coll_open(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get(&path) {
        Some(entry) if entry.is_collection() => {
            let entries = children_of(&ns, &path);
            drop(ns);
            let handle = state.next_handle.fetch_add(1, Ordering::SeqCst);
            state
                .handles
                .lock()
                .expect("handles lock")
                .insert(handle, Handle::CollIter { entries, next: 0 });
            Ok(json!({"handle": handle}))
        }
        Some(_) => Err((-1, format!("'{path}' is not a collection"))),
        None => Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
    }
}

fn coll_read(state: &ServerState, params: &Value) -> OpResult {
    let handle = params["handle"].as_u64().unwrap_or(0);
    let mut handles = state.handles.lock().expect("handles lock");
    match handles.get_mut(&handle) {
        Some(Handle::CollIter { entries, next }) => {
            if *next < entries.len() {
                let entry = entries[*next].clone();
                *next += 1;
                Ok(json!({"entry": entry}))
            } else {
                Ok(json!({"entry": null}))
            }
        }
        _ => Err((-1, "bad collection handle".into())),
    }
}

fn coll_create(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let parents = params["parents"].as_bool().unwrap_or(false);
    let mut ns = state.namespace.lock().expect("namespace lock");
    if ns.entries.contains_key(&path) {
        return Err((ALREADY_EXISTS, format!("'{path}' already exists")));
    }

    let parent = parent_of(&path);
    if parent != "/" && !ns.entries.contains_key(&parent) {
        if !parents {
            return Err((PATH_NOT_FOUND, format!("parent '{parent}' does not exist")));
        }
        let mut ancestor = String::new();
        for segment in path.trim_start_matches('/').split('/') {
            ancestor.push('/');
            ancestor.push_str(segment);
            ns.entries
                .entry(ancestor.clone())
                .or_insert_with(Entry::new_collection);
        }
        return Ok(json!({}));
    }

    ns.entries.insert(path, Entry::new_collection());
    Ok(json!({}))
}

fn coll_remove(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let recurse = params["recurse"].as_bool().unwrap_or(false);
    let mut ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get(&path) {
        Some(entry) if entry.is_collection() => {}
        Some(_) => return Err((-1, format!("'{path}' is not a collection"))),
        None => return Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
    }

    let has_children = !children_of(&ns, &path).is_empty();
    if has_children && !recurse {
        return Err((COLLECTION_NOT_EMPTY, format!("'{path}' is not empty")));
    }
    let prefix = format!("{path}/");
    ns.entries
        .retain(|k, _| k != &path && !k.starts_with(&prefix));
    Ok(json!({}))
}

fn meta_mod(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let verb = params["op"].as_str().unwrap_or("");
    let attribute = params["attribute"].as_str().unwrap_or("").to_owned();
    let value = params["value"].as_str().unwrap_or("").to_owned();
    let units = params["units"].as_str().unwrap_or("").to_owned();

    let mut ns = state.namespace.lock().expect("namespace lock");
    let entry = ns
        .entries
        .get_mut(&path)
        .ok_or((PATH_NOT_FOUND, format!("'{path}' does not exist")))?;
    let avus = entry.avus_mut();

    match verb {
        "add" => {
            let duplicate = avus
                .iter()
                .any(|a| a.attribute == attribute && a.value == value && a.units == units);
            if duplicate {
                return Err((ALREADY_EXISTS, "metadata already exists".into()));
            }
            avus.push(MockAvu {
                attribute,
                value,
                units,
            });
            Ok(json!({}))
        }
        "remove" => {
            let before = avus.len();
            avus.retain(|a| {
                !(a.attribute == attribute && a.value == value && a.units == units)
            });
            if avus.len() == before {
                return Err((PATH_NOT_FOUND, "metadata does not exist".into()));
            }
            Ok(json!({}))
        }
        other => Err((-1, format!("unknown metadata op '{other}'"))),
    }
}

fn acl_mod(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let owner = params["owner"].as_str().unwrap_or("").to_owned();
    let zone = params["zone"].as_str().unwrap_or("").to_owned();
    let level = params["level"].as_str().unwrap_or("").to_owned();
    let recurse = params["recurse"].as_bool().unwrap_or(false);

    let mut ns = state.namespace.lock().expect("namespace lock");
    if !ns.entries.contains_key(&path) {
        return Err((PATH_NOT_FOUND, format!("'{path}' does not exist")));
    }

    let prefix = format!("{path}/");
    let targets: Vec<String> = ns
        .entries
        .keys()
        .filter(|k| **k == path || (recurse && k.starts_with(&prefix)))
        .cloned()
        .collect();

    for target in targets {
        let entry = ns.entries.get_mut(&target).expect("listed key exists");
        let acl = entry.acl_mut();
        acl.retain(|a| !(a.owner == owner && a.zone == zone));
        if level != "null" {
            acl.push(MockAccess {
                owner: owner.clone(),
                zone: zone.clone(),
                level: level.clone(),
            });
        }
    }
    Ok(json!({}))
}

fn obj_checksum(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let force = params["force"].as_bool().unwrap_or(false);
    let mut ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get_mut(&path) {
        Some(Entry::Object { data, checksum, .. }) => {
            if force || checksum.is_none() {
                *checksum = Some(mock_checksum(data));
            }
            Ok(json!({"checksum": checksum}))
        }
        Some(_) => Err((-1, format!("'{path}' is not a data object"))),
        None => Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
    }
}

fn obj_put(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let force = params["force"].as_bool().unwrap_or(false);
    let want_checksum = params["checksum"].as_bool().unwrap_or(false);
    let data = BASE64
        .decode(params["data"].as_str().unwrap_or(""))
        .map_err(|e| (-1, format!("bad base64: {e}")))?;

    let mut ns = state.namespace.lock().expect("namespace lock");
    if let Some(entry) = ns.entries.get(&path) {
        if entry.is_collection() {
            return Err((-1, format!("'{path}' is a collection")));
        }
        if !force {
            return Err((
                OVERWRITE_WITHOUT_FORCE,
                format!("'{path}' exists; cannot overwrite without force"),
            ));
        }
    }
    let parent = parent_of(&path);
    if parent != "/" && !ns.entries.contains_key(&parent) {
        return Err((PATH_NOT_FOUND, format!("parent '{parent}' does not exist")));
    }

    let checksum = want_checksum.then(|| mock_checksum(&data));
    let mut entry = Entry::new_object(data);
    if let Entry::Object { checksum: c, .. } = &mut entry {
        *c = checksum.clone();
    }
    ns.entries.insert(path, entry);
    Ok(json!({"checksum": checksum}))
}

fn obj_open(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get(&path) {
        Some(Entry::Object { .. }) => {
            drop(ns);
            let handle = state.next_handle.fetch_add(1, Ordering::SeqCst);
            state
                .handles
                .lock()
                .expect("handles lock")
                .insert(handle, Handle::Read { path, offset: 0 });
            Ok(json!({"handle": handle}))
        }
        Some(_) => Err((-1, format!("'{path}' is not a data object"))),
        None => Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
    }
}

fn obj_create(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let force = params["force"].as_bool().unwrap_or(false);
    let ns = state.namespace.lock().expect("namespace lock");
    if let Some(entry) = ns.entries.get(&path) {
        if entry.is_collection() {
            return Err((-1, format!("'{path}' is a collection")));
        }
        if !force {
            return Err((
                OVERWRITE_WITHOUT_FORCE,
                format!("'{path}' exists; cannot overwrite without force"),
            ));
        }
    }
    drop(ns);
    let handle = state.next_handle.fetch_add(1, Ordering::SeqCst);
    state.handles.lock().expect("handles lock").insert(
        handle,
        Handle::Write {
            path,
            data: Vec::new(),
        },
    );
    Ok(json!({"handle": handle}))
}

fn obj_read(state: &ServerState, params: &Value) -> OpResult {
    let handle = params["handle"].as_u64().unwrap_or(0);
    let len = params["len"].as_u64().unwrap_or(0) as usize;
    let mut handles = state.handles.lock().expect("handles lock");
    match handles.get_mut(&handle) {
        Some(Handle::Read { path, offset }) => {
            let ns = state.namespace.lock().expect("namespace lock");
            let Some(Entry::Object { data, .. }) = ns.entries.get(path) else {
                return Err((PATH_NOT_FOUND, format!("'{path}' disappeared mid-read")));
            };
            let end = (*offset + len.max(1)).min(data.len());
            let chunk = &data[*offset..end];
            *offset = end;
            Ok(json!({"data": BASE64.encode(chunk)}))
        }
        _ => Err((-1, "bad object handle".into())),
    }
}

fn obj_write(state: &ServerState, params: &Value) -> OpResult {
    let handle = params["handle"].as_u64().unwrap_or(0);
    let chunk = BASE64
        .decode(params["data"].as_str().unwrap_or(""))
        .map_err(|e| (-1, format!("bad base64: {e}")))?;
    let mut handles = state.handles.lock().expect("handles lock");
    match handles.get_mut(&handle) {
        Some(Handle::Write { data, .. }) => {
            data.extend_from_slice(&chunk);
            Ok(json!({}))
        }
        _ => Err((-1, "bad object handle".into())),
    }
}

fn obj_close(state: &ServerState, params: &Value) -> OpResult {
    let handle = params["handle"].as_u64().unwrap_or(0);
    let want_checksum = params["checksum"].as_bool().unwrap_or(false);
    let removed = state.handles.lock().expect("handles lock").remove(&handle);
    match removed {
        Some(Handle::Write { path, data }) => {
            let checksum = want_checksum.then(|| mock_checksum(&data));
            let mut ns = state.namespace.lock().expect("namespace lock");
            let mut entry = Entry::new_object(data);
            if let Entry::Object { checksum: c, .. } = &mut entry {
                *c = checksum.clone();
            }
            ns.entries.insert(path, entry);
            Ok(json!({"checksum": checksum}))
        }
        Some(_) => Ok(json!({})),
        None => Err((-1, "bad object handle".into())),
    }
}

fn obj_move(state: &ServerState, params: &Value) -> OpResult {
    let from = params["from"]
        .as_str()
        .ok_or((-1, "missing 'from'".to_owned()))?
        .to_owned();
    let to = params["to"]
        .as_str()
        .ok_or((-1, "missing 'to'".to_owned()))?
        .to_owned();

    let mut ns = state.namespace.lock().expect("namespace lock");
    if !ns.entries.contains_key(&from) {
        return Err((PATH_NOT_FOUND, format!("'{from}' does not exist")));
    }
    if ns.entries.contains_key(&to) {
        return Err((ALREADY_EXISTS, format!("'{to}' already exists")));
    }

    let prefix = format!("{from}/");
    let moved: Vec<(String, Entry)> = ns
        .entries
        .iter()
        .filter(|(k, _)| **k == from || k.starts_with(&prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (k, _) in &moved {
        ns.entries.remove(k);
    }
    for (k, v) in moved {
        let new_key = format!("{to}{}", &k[from.len()..]);
        ns.entries.insert(new_key, v);
    }
    Ok(json!({}))
}

fn obj_remove(state: &ServerState, params: &Value) -> OpResult {
    let path = path_param(params)?;
    let mut ns = state.namespace.lock().expect("namespace lock");
    match ns.entries.get(&path) {
        Some(Entry::Object { .. }) => {
            ns.entries.remove(&path);
            Ok(json!({}))
        }
        Some(_) => Err((-1, format!("'{path}' is not a data object"))),
        None => Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
    }
}

// ─── Query engine ────────────────────────────────────────────────────────────

struct ParsedCond {
    column: String,
    operator: String,
    literal: String,
}

/// Parse the catalog's `<operator> '<literal>'` expression form.
fn parse_expr(expr: &str) -> Option<(String, String)> {
    let open = expr.find('\'')?;
    let close = expr.rfind('\'')?;
    if close <= open {
        return None;
    }
    let operator = expr[..open].trim().to_owned();
    let quoted = &expr[open + 1..close];
    Some((operator, quoted.replace("''", "'")))
}

fn match_text(operator: &str, text: &str, literal: &str) -> bool {
    match operator {
        "=" => text == literal,
        "!=" => text != literal,
        "like" => like_match(literal, text),
        "not like" => !like_match(literal, text),
        ">" => text > literal,
        "<" => text < literal,
        ">=" => text >= literal,
        "<=" => text <= literal,
        _ => false,
    }
}

/// SQL LIKE with `%` wildcards only.
fn like_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            let Some(after) = rest.strip_prefix(part) else {
                return false;
            };
            rest = after;
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            let Some(found) = rest.find(part) else {
                return false;
            };
            rest = &rest[found + part.len()..];
        }
    }
    true
}

fn exec_query(state: &ServerState, params: &Value) -> OpResult {
    let columns: Vec<String> = params["columns"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let conds: Vec<ParsedCond> = params["conditions"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|c| {
                    let column = c["column"].as_str()?.to_owned();
                    let (operator, literal) = parse_expr(c["expr"].as_str()?)?;
                    Some(ParsedCond {
                        column,
                        operator,
                        literal,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let cursor = params["cursor"].as_u64().unwrap_or(0) as usize;

    let ns = state.namespace.lock().expect("namespace lock");
    let rows = plan_rows(&ns, &columns, &conds)?;
    drop(ns);

    if rows.is_empty() {
        return Err((NO_ROWS_FOUND, "no rows found".into()));
    }

    let cursor = cursor.min(rows.len());
    let end = (cursor + PAGE_CAP).min(rows.len());
    let page: Vec<Value> = rows[cursor..end]
        .iter()
        .map(|r| json!(r.clone()))
        .collect();
    let next = if end < rows.len() { end as u64 } else { 0 };
    Ok(json!({"rows": page, "cursor": next}))
}

/// Evaluate the query shapes the client's builder produces.
fn plan_rows(
    ns: &Namespace,
    columns: &[String],
    conds: &[ParsedCond],
) -> Result<Vec<Vec<String>>, (i32, String)> {
    let has_col = |name: &str| columns.iter().any(|c| c == name);

    let cond_eq = |name: &str| -> Option<&str> {
        conds
            .iter()
            .find(|c| c.column == name && c.operator == "=")
            .map(|c| c.literal.as_str())
    };

    // Access listing
    if has_col("USER_NAME") {
        let path = entity_path_from_conds(conds)?;
        let entry = ns
            .entries
            .get(&path)
            .ok_or((PATH_NOT_FOUND, format!("'{path}' does not exist")))?;
        return Ok(entry
            .acl()
            .iter()
            .map(|a| vec![a.owner.clone(), a.zone.clone(), a.level.clone()])
            .collect());
    }

    // Replica listing: one valid replica per stored object
    if has_col("DATA_REPL_NUM") {
        let path = entity_path_from_conds(conds)?;
        match ns.entries.get(&path) {
            Some(Entry::Object { data, checksum, .. }) => {
                let checksum = checksum.clone().unwrap_or_else(|| mock_checksum(data));
                return Ok(vec![vec!["0".into(), checksum, "1".into()]]);
            }
            _ => return Err((PATH_NOT_FOUND, format!("'{path}' does not exist"))),
        }
    }

    // Metadata listing
    if has_col("META_DATA_ATTR_NAME") || has_col("META_COLL_ATTR_NAME") {
        let object_side = has_col("META_DATA_ATTR_NAME");
        let attr_col = if object_side {
            "META_DATA_ATTR_NAME"
        } else {
            "META_COLL_ATTR_NAME"
        };
        let path = entity_path_from_conds(conds)?;
        let entry = ns
            .entries
            .get(&path)
            .ok_or((PATH_NOT_FOUND, format!("'{path}' does not exist")))?;
        let attr_filter = cond_eq(attr_col);
        return Ok(entry
            .avus()
            .iter()
            .filter(|a| attr_filter.map_or(true, |f| a.attribute == f))
            .map(|a| vec![a.attribute.clone(), a.value.clone(), a.units.clone()])
            .collect());
    }

    // AVU search over collections or data objects
    let object_side =
        columns.len() == 2 && columns[0] == "COLL_NAME" && columns[1] == "DATA_NAME";
    let collection_side = columns.len() == 1 && columns[0] == "COLL_NAME";
    if !object_side && !collection_side {
        return Err((-1, format!("unsupported query shape: {columns:?}")));
    }

    let (name_col, value_col) = if object_side {
        ("META_DATA_ATTR_NAME", "META_DATA_ATTR_VALUE")
    } else {
        ("META_COLL_ATTR_NAME", "META_COLL_ATTR_VALUE")
    };

    // Pair each attribute-name condition with the value condition after it.
    let mut clauses: Vec<(String, String, String)> = Vec::new();
    let mut pending: Option<String> = None;
    let mut subtree: Option<String> = None;
    for cond in conds {
        if cond.column == name_col {
            pending = Some(cond.literal.clone());
        } else if cond.column == value_col {
            let attr = pending.take().ok_or((-1, "value clause without attribute".into()))?;
            clauses.push((attr, cond.operator.clone(), cond.literal.clone()));
        } else if cond.column == "COLL_NAME" && cond.operator == "like" {
            subtree = Some(cond.literal.clone());
        }
    }

    let matches = |entry: &Entry| -> bool {
        clauses.iter().all(|(attr, op, value)| {
            entry
                .avus()
                .iter()
                .any(|a| a.attribute == *attr && match_text(op, &a.value, value))
        })
    };

    let mut rows = Vec::new();
    for (path, entry) in &ns.entries {
        let in_subtree = |coll: &str| subtree.as_deref().map_or(true, |p| like_match(p, coll));
        match entry {
            Entry::Collection { .. } if collection_side => {
                if in_subtree(path) && matches(entry) {
                    rows.push(vec![path.clone()]);
                }
            }
            Entry::Object { .. } if object_side => {
                let coll = parent_of(path);
                let name = path.rsplit_once('/').map(|(_, n)| n).unwrap_or(path);
                if in_subtree(&coll) && matches(entry) {
                    rows.push(vec![coll, name.to_owned()]);
                }
            }
            _ => {}
        }
    }
    Ok(rows)
}

/// The entity path named by `COLL_NAME` (+ optional `DATA_NAME`) equality
/// conditions.
fn entity_path_from_conds(conds: &[ParsedCond]) -> Result<String, (i32, String)> {
    let coll = conds
        .iter()
        .find(|c| c.column == "COLL_NAME" && c.operator == "=")
        .map(|c| c.literal.clone())
        .ok_or((-1, "query names no collection".to_owned()))?;
    match conds
        .iter()
        .find(|c| c.column == "DATA_NAME" && c.operator == "=")
    {
        Some(data) => {
            if coll == "/" {
                Ok(format!("/{}", data.literal))
            } else {
                Ok(format!("{coll}/{}", data.literal))
            }
        }
        None => Ok(coll),
    }
}
