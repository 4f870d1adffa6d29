//! Client for the data-grid service.
//!
//! The service speaks newline-delimited JSON over TCP: one request object
//! per line (`{id, op, params}`), one response object per line
//! (`{id, ok, result}` or `{id, ok: false, error}`), correlated by `id`.
//! Binary payloads travel base64-encoded in `data` fields.
//!
//! The connection is owned by the stream loop and borrowed by primitives
//! for the duration of a single call. Iterators and transfer handles are
//! RAII guards that release their server-side resource on every exit path.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::GridEnv;
use crate::envelope::{Access, Avu};
use crate::error::GridError;

/// Classification of a catalog path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    DataObject,
    Collection,
    Absent,
}

/// Stat record for a catalog path.
#[derive(Debug, Clone, Deserialize)]
pub struct Stat {
    pub kind: ObjectKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

/// The side of an entity a metadata mutation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    DataObject,
    Collection,
}

/// Metadata mutation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaOp {
    Add,
    Remove,
}

/// One entry read from a collection iterator.
#[derive(Debug, Clone, Deserialize)]
pub struct CollEntry {
    pub kind: ObjectKind,
    pub collection: String,
    #[serde(default)]
    pub data_object: Option<String>,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u64,
    op: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    code: i32,
    #[serde(default)]
    name: Option<String>,
    message: String,
}

/// A logged-in connection to the grid service.
pub struct Connection {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: u64,
    opened_at: Instant,
    peer: String,
}

impl Connection {
    /// Connect to the service named by the environment and log in.
    pub fn connect(env: &GridEnv, timeout: Duration) -> Result<Connection, GridError> {
        let peer = format!("{}:{}", env.host, env.port);
        let addr = peer
            .to_socket_addrs()
            .map_err(|e| GridError::Protocol(format!("Cannot resolve '{peer}': {e}")))?
            .next()
            .ok_or_else(|| GridError::Protocol(format!("Cannot resolve '{peer}'")))?;

        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);

        let mut conn = Connection {
            writer: stream,
            reader,
            next_id: 0,
            opened_at: Instant::now(),
            peer,
        };
        conn.call(
            "auth.login",
            json!({"user": env.user, "zone": env.zone}),
        )?;
        tracing::debug!(
            peer = %conn.peer,
            user = %env.user,
            zone = %env.zone,
            "Logged in to the grid"
        );
        Ok(conn)
    }

    /// How long this connection has been open.
    pub fn open_duration(&self) -> Duration {
        self.opened_at.elapsed()
    }

    /// Close the connection. Best-effort; the server reaps on disconnect.
    pub fn disconnect(self) {
        let _ = self.writer.shutdown(std::net::Shutdown::Both);
    }

    /// Submit one request and wait for its response.
    pub fn call(&mut self, op: &str, params: Value) -> Result<Value, GridError> {
        self.next_id += 1;
        let request = RpcRequest {
            id: self.next_id,
            op,
            params,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| GridError::Protocol(format!("Cannot encode request: {e}")))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;

        let mut buf = String::new();
        let n = self.reader.read_line(&mut buf)?;
        if n == 0 {
            return Err(GridError::Protocol(format!(
                "Connection to {} closed mid-call",
                self.peer
            )));
        }
        let response: RpcResponse = serde_json::from_str(&buf)
            .map_err(|e| GridError::Protocol(format!("Malformed response: {e}")))?;
        if response.id != request.id {
            return Err(GridError::Protocol(format!(
                "Response id {} does not match request id {}",
                response.id, request.id
            )));
        }

        if response.ok {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            let err = response.error.ok_or_else(|| {
                GridError::Protocol("Failed response carries no error".into())
            })?;
            Err(GridError::Backend {
                code: err.code,
                name: err
                    .name
                    .or_else(|| crate::error::symbolic_name(err.code).map(str::to_owned)),
                message: err.message,
            })
        }
    }

    // ─── Typed operations ────────────────────────────────────────────────────

    /// Stat a catalog path. Absence is a normal result, not an error.
    pub fn stat(&mut self, path: &str) -> Result<Stat, GridError> {
        let result = self.call("path.stat", json!({"path": path}))?;
        serde_json::from_value(result)
            .map_err(|e| GridError::Protocol(format!("Malformed stat: {e}")))
    }

    /// Open a collection for iteration.
    pub fn open_collection(&mut self, path: &str) -> Result<CollectionIter<'_>, GridError> {
        let result = self.call("coll.open", json!({"path": path}))?;
        let handle = handle_of(&result)?;
        Ok(CollectionIter {
            conn: self,
            handle,
            done: false,
        })
    }

    /// Apply one metadata mutation to a path.
    pub fn modify_metadata(
        &mut self,
        path: &str,
        entity: EntityKind,
        op: MetaOp,
        avu: &Avu,
    ) -> Result<(), GridError> {
        self.call(
            "meta.mod",
            json!({
                "path": path,
                "entity": entity,
                "op": op,
                "attribute": avu.attribute,
                "value": avu.value,
                // Units are optional; the catalog stores the empty string.
                "units": avu.units.as_deref().unwrap_or(""),
            }),
        )?;
        Ok(())
    }

    /// Apply one permission entry to a path.
    pub fn modify_access(
        &mut self,
        path: &str,
        access: &Access,
        recurse: bool,
    ) -> Result<(), GridError> {
        self.call(
            "acl.mod",
            json!({
                "path": path,
                "owner": access.owner,
                "zone": access.zone,
                "level": access.level,
                "recurse": recurse,
            }),
        )?;
        Ok(())
    }

    /// Fetch (recalculating if `force`) the checksum of a data object.
    pub fn checksum(&mut self, path: &str, force: bool) -> Result<String, GridError> {
        let result = self.call("obj.checksum", json!({"path": path, "force": force}))?;
        result
            .get("checksum")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| GridError::Protocol("checksum response has no 'checksum'".into()))
    }

    /// Upload a whole object in one call; the server may fan out replication.
    ///
    /// Returns the stored checksum when `checksum` was requested.
    pub fn put_object(
        &mut self,
        path: &str,
        data: &[u8],
        force: bool,
        checksum: bool,
    ) -> Result<Option<String>, GridError> {
        let result = self.call(
            "obj.put",
            json!({
                "path": path,
                "data": BASE64.encode(data),
                "force": force,
                "checksum": checksum,
            }),
        )?;
        Ok(result
            .get("checksum")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    /// Open a data object for chunked reading.
    pub fn open_object(&mut self, path: &str) -> Result<ObjectReader<'_>, GridError> {
        let result = self.call("obj.open", json!({"path": path}))?;
        let handle = handle_of(&result)?;
        Ok(ObjectReader {
            conn: self,
            handle,
            eof: false,
        })
    }

    /// Create (or overwrite, with `force`) a data object for chunked writing.
    pub fn create_object(
        &mut self,
        path: &str,
        force: bool,
    ) -> Result<ObjectWriter<'_>, GridError> {
        let result = self.call("obj.create", json!({"path": path, "force": force}))?;
        let handle = handle_of(&result)?;
        Ok(ObjectWriter {
            conn: self,
            handle,
            closed: false,
        })
    }

    /// Rename a data object or collection.
    pub fn move_path(&mut self, from: &str, to: &str) -> Result<(), GridError> {
        self.call("obj.move", json!({"from": from, "to": to}))?;
        Ok(())
    }

    /// Remove a data object. `force` skips the trash collection.
    pub fn remove_object(&mut self, path: &str, force: bool) -> Result<(), GridError> {
        self.call("obj.remove", json!({"path": path, "force": force}))?;
        Ok(())
    }

    /// Create a collection. `parents` creates missing ancestors.
    pub fn create_collection(&mut self, path: &str, parents: bool) -> Result<(), GridError> {
        self.call("coll.create", json!({"path": path, "parents": parents}))?;
        Ok(())
    }

    /// Remove a collection.
    pub fn remove_collection(
        &mut self,
        path: &str,
        recurse: bool,
        force: bool,
    ) -> Result<(), GridError> {
        self.call(
            "coll.remove",
            json!({"path": path, "recurse": recurse, "force": force}),
        )?;
        Ok(())
    }
}

fn handle_of(result: &Value) -> Result<u64, GridError> {
    result
        .get("handle")
        .and_then(Value::as_u64)
        .ok_or_else(|| GridError::Protocol("response has no 'handle'".into()))
}

// ─── RAII handles ────────────────────────────────────────────────────────────

/// Iterator over the entries of an open collection.
///
/// The server-side handle is released when the iterator is dropped, on
/// success and error paths alike.
pub struct CollectionIter<'c> {
    conn: &'c mut Connection,
    handle: u64,
    done: bool,
}

impl CollectionIter<'_> {
    fn read_entry(&mut self) -> Result<Option<CollEntry>, GridError> {
        let result = self.conn.call("coll.read", json!({"handle": self.handle}))?;
        if result.get("entry").map_or(true, Value::is_null) {
            return Ok(None);
        }
        let entry = serde_json::from_value(result["entry"].clone())
            .map_err(|e| GridError::Protocol(format!("Malformed collection entry: {e}")))?;
        Ok(Some(entry))
    }
}

impl Iterator for CollectionIter<'_> {
    type Item = Result<CollEntry, GridError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for CollectionIter<'_> {
    fn drop(&mut self) {
        let _ = self
            .conn
            .call("coll.close", json!({"handle": self.handle}));
    }
}

/// Chunked reader over an open data object.
pub struct ObjectReader<'c> {
    conn: &'c mut Connection,
    handle: u64,
    eof: bool,
}

impl ObjectReader<'_> {
    /// Read up to `len` bytes. `Ok(None)` signals end of object.
    pub fn read_chunk(&mut self, len: usize) -> Result<Option<Vec<u8>>, GridError> {
        if self.eof {
            return Ok(None);
        }
        let result = self
            .conn
            .call("obj.read", json!({"handle": self.handle, "len": len}))?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| GridError::Protocol("read response has no 'data'".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| GridError::Protocol(format!("Invalid base64 payload: {e}")))?;
        if bytes.is_empty() {
            self.eof = true;
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}

impl Drop for ObjectReader<'_> {
    fn drop(&mut self) {
        let _ = self.conn.call("obj.close", json!({"handle": self.handle}));
    }
}

/// Chunked writer over a data object being created.
pub struct ObjectWriter<'c> {
    conn: &'c mut Connection,
    handle: u64,
    closed: bool,
}

impl ObjectWriter<'_> {
    /// Append one chunk.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), GridError> {
        self.conn.call(
            "obj.write",
            json!({"handle": self.handle, "data": BASE64.encode(data)}),
        )?;
        Ok(())
    }

    /// Close the object, optionally asking the server for its checksum.
    pub fn finish(mut self, checksum: bool) -> Result<Option<String>, GridError> {
        self.closed = true;
        let result = self.conn.call(
            "obj.close",
            json!({"handle": self.handle, "checksum": checksum}),
        )?;
        Ok(result
            .get("checksum")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }
}

impl Drop for ObjectWriter<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.conn.call(
                "obj.close",
                json!({"handle": self.handle, "checksum": false}),
            );
        }
    }
}
