//! Storage primitives.
//!
//! Each primitive is a pure function of `(connection, environment, target,
//! args)` returning an optional result payload or a typed error. Primitives
//! validate the target's classification against their precondition before
//! issuing backend calls; a mismatch is an invalid-argument error, never a
//! backend round trip.
//!
//! Primitives that mutate the catalog return the input target as their
//! result so every mutation echoes what it acted on. `get` in save or raw
//! mode and `write` return no payload; the stream loop then echoes the
//! input envelope unchanged.

use std::fs::File;
use std::io::Write;

use serde_json::{json, Map, Value};

use crate::config::GridEnv;
use crate::envelope::Target;
use crate::error::{code, GridError};
use crate::flags::OptionFlags;
use crate::grid::{Connection, EntityKind, MetaOp, ObjectKind};
use crate::path::{self, ResolvedPath};
use crate::query;

/// Per-call arguments: the computed flag set plus the scalars the
/// dispatcher extracts from the envelope and the session defaults.
#[derive(Debug, Clone, Default)]
pub struct OpArgs {
    pub flags: OptionFlags,
    pub buffer_size: usize,
    pub zone: Option<String>,
    /// Destination path for `move`.
    pub path: Option<String>,
}

/// List a data object or the children of a collection.
pub fn list(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    match resolved.kind {
        ObjectKind::DataObject => Ok(Some(object_record(conn, &resolved, args)?)),
        ObjectKind::Collection => {
            let entries = list_collection(conn, &resolved)?;
            Ok(Some(Value::Array(entries)))
        }
        ObjectKind::Absent => Err(GridError::NotFound(resolved.path.clone())),
    }
}

/// Read the children of a collection in backend iterator order.
fn list_collection(
    conn: &mut Connection,
    resolved: &ResolvedPath,
) -> Result<Vec<Value>, GridError> {
    let mut entries = Vec::new();
    // The iterator guard closes the server-side handle on every exit path,
    // including the error return below.
    let iter = conn.open_collection(&resolved.path)?;
    for entry in iter {
        let entry = entry?;
        let mut record = Map::new();
        record.insert("collection".to_owned(), Value::String(entry.collection));
        if let Some(name) = entry.data_object {
            record.insert("data_object".to_owned(), Value::String(name));
        }
        entries.push(Value::Object(record));
    }
    Ok(entries)
}

/// Build the flag-enriched record for a single data object.
fn object_record(
    conn: &mut Connection,
    resolved: &ResolvedPath,
    args: &OpArgs,
) -> Result<Value, GridError> {
    let (collection, name) = path::split_object(&resolved.path);
    let flags = args.flags;

    let mut record = Map::new();
    record.insert("collection".to_owned(), Value::String(collection.clone()));
    record.insert("data_object".to_owned(), Value::String(name.clone()));

    if flags.print_size {
        if let Some(size) = resolved.stat.size {
            record.insert("size".to_owned(), json!(size));
        }
    }
    if flags.print_timestamp {
        let mut stamps = Map::new();
        if let Some(created) = &resolved.stat.created {
            stamps.insert("created".to_owned(), json!(created));
        }
        if let Some(modified) = &resolved.stat.modified {
            stamps.insert("modified".to_owned(), json!(modified));
        }
        record.insert("timestamps".to_owned(), Value::Object(stamps));
    }
    if flags.print_checksum {
        let checksum = match &resolved.stat.checksum {
            Some(c) => c.clone(),
            None => conn.checksum(&resolved.path, false)?,
        };
        record.insert("checksum".to_owned(), Value::String(checksum));
    }
    if flags.print_replicate {
        let rows = query::object_replicate_query(&collection, &name).fetch_all(conn)?;
        let replicates: Vec<Value> = rows.into_iter().map(replicate_record).collect();
        record.insert("replicates".to_owned(), Value::Array(replicates));
    }
    if flags.print_acl {
        let rows = query::object_access_query(&collection, &name).fetch_all(conn)?;
        record.insert("access".to_owned(), Value::Array(rows));
    }
    if flags.print_avu {
        let avus = list_metadata(conn, resolved, None)?;
        record.insert("avus".to_owned(), avus);
    }
    if flags.print_contents {
        let text = ingest_object(conn, resolved, args.buffer_size)?;
        record.insert("data".to_owned(), Value::String(text));
    }

    Ok(Value::Object(record))
}

/// The catalog publishes replica numbers and validity as strings; present
/// them as an integer and a boolean.
fn replicate_record(row: Value) -> Value {
    let mut record = Map::new();
    if let Some(obj) = row.as_object() {
        if let Some(number) = obj.get("number").and_then(Value::as_str) {
            if let Ok(n) = number.parse::<u32>() {
                record.insert("number".to_owned(), json!(n));
            }
        }
        if let Some(checksum) = obj.get("checksum") {
            record.insert("checksum".to_owned(), checksum.clone());
        }
        if let Some(valid) = obj.get("valid").and_then(Value::as_str) {
            record.insert("valid".to_owned(), json!(valid == "1"));
        }
    }
    Value::Object(record)
}

/// List the metadata of a path as `{attribute, value, units?}` rows.
pub fn list_metadata(
    conn: &mut Connection,
    resolved: &ResolvedPath,
    attr: Option<&str>,
) -> Result<Value, GridError> {
    resolved.require_exists()?;
    let q = match resolved.kind {
        ObjectKind::DataObject => {
            let (collection, name) = path::split_object(&resolved.path);
            query::object_metadata_query(&collection, &name, attr)
        }
        ObjectKind::Collection => query::collection_metadata_query(&resolved.path, attr),
        ObjectKind::Absent => return Err(GridError::NotFound(resolved.path.clone())),
    };
    Ok(Value::Array(q.fetch_all(conn)?))
}

/// Search the catalog for entities matching every AVU clause.
///
/// Matching collections precede matching data objects; within each group
/// the backend's row order is preserved.
pub fn metaquery(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    let avus = t
        .avus
        .as_deref()
        .ok_or_else(|| GridError::invalid("No AVU data was supplied to search for"))?;

    // An explicit collection in the target restricts the search to that
    // subtree; it must name an existing collection.
    let root = match &t.collection {
        Some(c) => {
            let resolved = path::resolve(conn, env, c)?;
            resolved.require_exists()?;
            if resolved.kind != ObjectKind::Collection {
                return Err(GridError::invalid(format!(
                    "'{}' is not a collection",
                    resolved.path
                )));
            }
            Some(resolved.path)
        }
        None => None,
    };

    let (search_colls, search_objs) =
        match (args.flags.search_collections, args.flags.search_objects) {
            // Neither requested means search everything.
            (false, false) => (true, true),
            both => both,
        };

    let mut results = Vec::new();
    if search_colls {
        tracing::debug!("Searching for collections");
        let mut q = query::collection_search_query(avus)?;
        if let Some(root) = &root {
            q = q.with_subtree(root);
        }
        if let Some(zone) = &args.zone {
            q = q.with_zone(zone);
        }
        results.extend(q.fetch_all(conn)?);
    }
    if search_objs {
        tracing::debug!("Searching for data objects");
        let mut q = query::object_search_query(avus)?;
        if let Some(root) = &root {
            q = q.with_subtree(root);
        }
        if let Some(zone) = &args.zone {
            q = q.with_zone(zone);
        }
        results.extend(q.fetch_all(conn)?);
    }

    Ok(Some(Value::Array(results)))
}

/// Add or remove the target's AVUs.
pub fn metamod(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    let avus = t.avus.as_deref().ok_or_else(|| {
        GridError::invalid(format!("No AVU data was supplied for '{}'", resolved.path))
    })?;
    let op = if args.flags.add_avu {
        MetaOp::Add
    } else if args.flags.remove_avu {
        MetaOp::Remove
    } else {
        return Err(GridError::invalid(format!(
            "No metadata operation was specified for '{}'",
            resolved.path
        )));
    };
    let entity = entity_kind(&resolved)?;

    for avu in avus {
        conn.modify_metadata(&resolved.path, entity, op, avu)?;
    }

    Ok(Some(target.clone()))
}

/// Apply the target's access list.
pub fn chmod(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    let accesses = t.access.as_deref().ok_or_else(|| {
        GridError::invalid(format!(
            "No permissions data was supplied for '{}'",
            resolved.path
        ))
    })?;

    // Recursion only propagates below collections.
    let recurse = args.flags.recursive && resolved.kind == ObjectKind::Collection;
    for access in accesses {
        conn.modify_access(&resolved.path, access, recurse)?;
    }

    Ok(Some(target.clone()))
}

/// Report the checksum of a data object.
pub fn checksum(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    _args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if !t.represents_data_object() {
        return Err(GridError::invalid("cannot checksum a non-data-object"));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    let checksum = conn.checksum(&resolved.path, true)?;
    let (collection, name) = path::split_object(&resolved.path);
    Ok(Some(json!({
        "collection": collection,
        "data_object": name,
        "checksum": checksum,
    })))
}

/// Fetch a data object: to a local file, to raw stdout, or into the result.
pub fn get(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if !t.represents_data_object() {
        return Err(GridError::invalid("cannot get a non-data-object"));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    let bsize = args.buffer_size;
    tracing::debug!(buffer_size = bsize, "Fetching '{}'", resolved.path);

    if args.flags.save_files {
        let local = t.local_path()?;
        let mut file = File::create(&local).map_err(|e| {
            local_io(format!(
                "Failed to open '{}' for writing: {e}",
                local.display()
            ))
        })?;
        let mut reader = conn.open_object(&resolved.path)?;
        while let Some(chunk) = reader.read_chunk(bsize)? {
            file.write_all(&chunk)
                .map_err(|e| local_io(format!("Failed to write '{}': {e}", local.display())))?;
        }
        Ok(None)
    } else if args.flags.print_raw {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let mut reader = conn.open_object(&resolved.path)?;
        while let Some(chunk) = reader.read_chunk(bsize)? {
            out.write_all(&chunk)
                .map_err(|e| local_io(format!("Failed to write to stdout: {e}")))?;
        }
        out.flush()
            .map_err(|e| local_io(format!("Failed to flush stdout: {e}")))?;
        Ok(None)
    } else {
        let text = ingest_object(conn, &resolved, bsize)?;
        let mut record = object_record(conn, &resolved, args)?;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("data".to_owned(), Value::String(text));
        }
        Ok(Some(record))
    }
}

/// Read a whole object into UTF-8 text, transferring `bsize` bytes per call.
fn ingest_object(
    conn: &mut Connection,
    resolved: &ResolvedPath,
    bsize: usize,
) -> Result<String, GridError> {
    let mut data = Vec::new();
    let mut reader = conn.open_object(&resolved.path)?;
    while let Some(chunk) = reader.read_chunk(bsize)? {
        data.extend_from_slice(&chunk);
    }
    drop(reader);
    String::from_utf8(data).map_err(|_| {
        GridError::invalid(format!(
            "The contents of '{}' are not UTF-8 text; use save or raw mode",
            resolved.path
        ))
    })
}

/// Upload a local file as a data object in one bulk transfer.
pub fn put(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if !t.represents_data_object() {
        return Err(GridError::invalid("cannot put a non-data-object"));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    require_not_collection(&resolved)?;

    let local = t.local_path()?;
    let data = std::fs::read(&local).map_err(|e| {
        local_io(format!(
            "Failed to open '{}' for reading: {e}",
            local.display()
        ))
    })?;
    conn.put_object(
        &resolved.path,
        &data,
        args.flags.force,
        args.flags.calculate_checksum,
    )?;

    Ok(Some(target.clone()))
}

/// Upload a local file by streaming chunks through the connection.
///
/// This is the single-server fallback for `put`; the backend cannot fan the
/// transfer out, so bytes flow through this one socket in `buffer_size`
/// chunks.
pub fn write(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if !t.represents_data_object() {
        return Err(GridError::invalid(
            "cannot write a data object given a non-data-object",
        ));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    require_not_collection(&resolved)?;

    let local = t.local_path()?;
    let mut file = File::open(&local).map_err(|e| {
        local_io(format!(
            "Failed to open '{}' for reading: {e}",
            local.display()
        ))
    })?;
    tracing::debug!(buffer_size = args.buffer_size, "Writing '{}'", resolved.path);

    let mut writer = conn.create_object(&resolved.path, args.flags.force)?;
    let mut buf = vec![0u8; args.buffer_size.max(1)];
    loop {
        let n = std::io::Read::read(&mut file, &mut buf)
            .map_err(|e| local_io(format!("Failed to read '{}': {e}", local.display())))?;
        if n == 0 {
            break;
        }
        writer.write_chunk(&buf[..n])?;
    }
    writer.finish(args.flags.calculate_checksum)?;

    Ok(Some(target.clone()))
}

/// Rename a data object or collection to `args.path`.
pub fn move_entry(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    let new_path = args.path.as_deref().ok_or_else(|| {
        GridError::invalid(format!(
            "No destination path was supplied to move '{}'",
            resolved.path
        ))
    })?;
    let dest = path::absolute(env, new_path);
    tracing::debug!("Moving '{}' to '{}'", resolved.path, dest);
    conn.move_path(&resolved.path, &dest)?;

    Ok(Some(target.clone()))
}

/// Remove a data object.
pub fn remove(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if !t.represents_data_object() {
        return Err(GridError::invalid("cannot remove a non-data-object"));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;

    tracing::debug!("Removing data object '{}'", resolved.path);
    conn.remove_object(&resolved.path, args.flags.force)?;

    Ok(Some(target.clone()))
}

/// Create a collection.
pub fn mkcoll(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if t.represents_data_object() {
        return Err(GridError::invalid(
            "cannot make a collection given a data object",
        ));
    }
    let coll = match t.classify()? {
        crate::envelope::TargetPath::Collection(c) => c,
        crate::envelope::TargetPath::DataObject { .. } => unreachable!("checked above"),
    };
    let path = path::absolute(env, &coll);

    tracing::debug!("Creating collection '{}'", path);
    match conn.create_collection(&path, args.flags.recursive) {
        Ok(()) => {}
        // With force, creating an existing collection is idempotent.
        Err(GridError::Backend { code, .. })
            if code == code::ALREADY_EXISTS && args.flags.force =>
        {
            tracing::debug!("Collection '{}' already exists", path);
        }
        Err(e) => return Err(e),
    }

    Ok(Some(target.clone()))
}

/// Remove a collection.
pub fn rmcoll(
    conn: &mut Connection,
    env: &GridEnv,
    target: &Value,
    args: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let t = Target::from_value(target)?;
    if t.represents_data_object() {
        return Err(GridError::invalid(
            "cannot remove a collection given a data object",
        ));
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;
    if resolved.kind != ObjectKind::Collection {
        return Err(GridError::invalid(format!(
            "'{}' is not a collection",
            resolved.path
        )));
    }

    tracing::debug!("Removing collection '{}'", resolved.path);
    conn.remove_collection(&resolved.path, args.flags.recursive, args.flags.force)?;

    Ok(Some(target.clone()))
}

/// Fetch the checksum of the entity a result record names and attach it.
///
/// Used by the dispatcher to decorate `checksum` and `put` results when
/// checksum printing was requested.
pub fn attach_checksum(
    conn: &mut Connection,
    env: &GridEnv,
    result: &mut Value,
) -> Result<(), GridError> {
    let t = Target::from_value(result)?;
    if !t.represents_data_object() {
        return Ok(());
    }
    let resolved = path::resolve(conn, env, &t.classify()?.path())?;
    resolved.require_exists()?;
    let checksum = conn.checksum(&resolved.path, false)?;
    if let Some(obj) = result.as_object_mut() {
        obj.insert("checksum".to_owned(), Value::String(checksum));
    }
    Ok(())
}

fn entity_kind(resolved: &ResolvedPath) -> Result<EntityKind, GridError> {
    match resolved.kind {
        ObjectKind::DataObject => Ok(EntityKind::DataObject),
        ObjectKind::Collection => Ok(EntityKind::Collection),
        ObjectKind::Absent => Err(GridError::NotFound(resolved.path.clone())),
    }
}

fn require_not_collection(resolved: &ResolvedPath) -> Result<(), GridError> {
    if resolved.kind == ObjectKind::Collection {
        return Err(GridError::invalid(format!(
            "'{}' exists and is a collection",
            resolved.path
        )));
    }
    Ok(())
}

fn local_io(message: String) -> GridError {
    GridError::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
}
