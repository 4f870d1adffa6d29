//! Operation routing.
//!
//! The dispatcher maps an envelope's `operation` name to a storage
//! primitive. The per-call flag set starts from the session-wide defaults
//! and ORs in flags derived from the envelope's `arguments` object, so a
//! `--checksum` on the command line and a `"checksum": true` argument are
//! indistinguishable to the primitive.

use serde_json::{Map, Value};

use crate::config::GridEnv;
use crate::envelope;
use crate::error::GridError;
use crate::grid::Connection;
use crate::ops::{self, OpArgs};

/// Route one envelope to its primitive and return the result payload.
pub fn dispatch(
    conn: &mut Connection,
    env: &GridEnv,
    item: &Value,
    defaults: &OpArgs,
) -> Result<Option<Value>, GridError> {
    let op = envelope::operation(item)?;
    let target = envelope::target(item)?;

    let mut args = defaults.clone();
    args.path = None;
    if let Some(map) = envelope::arguments(item)? {
        apply_arguments(&mut args, map)?;
    }

    let span = tracing::debug_span!("dispatch", operation = op);
    let _guard = span.enter();
    tracing::debug!("Dispatching operation '{}'", op);

    let mut result = match op {
        "list" => ops::list(conn, env, target, &args),
        "chmod" => ops::chmod(conn, env, target, &args),
        "checksum" => ops::checksum(conn, env, target, &args),
        "metamod" => ops::metamod(conn, env, target, &args),
        "metaquery" => ops::metaquery(conn, env, target, &args),
        "get" => ops::get(conn, env, target, &args),
        "put" => {
            if args.flags.single_server {
                tracing::debug!("Single-server mode, falling back to streaming write");
                ops::write(conn, env, target, &args)
            } else {
                ops::put(conn, env, target, &args)
            }
        }
        "move" => ops::move_entry(conn, env, target, &args),
        "remove" => ops::remove(conn, env, target, &args),
        "mkcoll" => ops::mkcoll(conn, env, target, &args),
        "rmcoll" => ops::rmcoll(conn, env, target, &args),
        other => Err(GridError::invalid(format!("Invalid operation '{other}'"))),
    }?;

    // Checksum reporting decorates the result record after the fact, so
    // `put` and `checksum` share one code path for it.
    if matches!(op, "checksum" | "put") && args.flags.print_checksum {
        if let Some(result) = result.as_mut() {
            ops::attach_checksum(conn, env, result)?;
        }
    }

    Ok(result)
}

/// Fold the envelope's `arguments` into the per-call argument set.
fn apply_arguments(args: &mut OpArgs, map: &Map<String, Value>) -> Result<(), GridError> {
    let is_set = |key: &str| map.get(key).map_or(false, |v| v.as_bool().unwrap_or(false));

    let flags = &mut args.flags;
    if is_set("acl") {
        flags.print_acl = true;
    }
    if is_set("avu") {
        flags.print_avu = true;
    }
    if is_set("checksum") {
        flags.calculate_checksum = true;
        flags.print_checksum = true;
    }
    if is_set("contents") {
        flags.print_contents = true;
    }
    if is_set("replicate") {
        flags.print_replicate = true;
    }
    if is_set("size") {
        flags.print_size = true;
    }
    if is_set("timestamp") {
        flags.print_timestamp = true;
    }
    if is_set("recurse") {
        flags.recursive = true;
    }
    if is_set("force") {
        flags.force = true;
    }
    if is_set("collection") {
        flags.search_collections = true;
    }
    if is_set("object") {
        flags.search_objects = true;
    }
    if is_set("single-server") {
        flags.single_server = true;
    }
    if is_set("save") {
        flags.save_files = true;
    }
    if is_set("raw") {
        flags.print_raw = true;
    }

    if let Some(nested) = map.get("operation") {
        let nested = nested.as_str().ok_or_else(|| {
            GridError::invalid("Metadata operation argument is not a string")
        })?;
        match nested {
            "add" => flags.add_avu = true,
            "rem" => flags.remove_avu = true,
            other => {
                return Err(GridError::invalid(format!(
                    "Invalid metadata operation argument '{other}'"
                )))
            }
        }
    }

    if let Some(path) = map.get("path") {
        let path = path
            .as_str()
            .ok_or_else(|| GridError::invalid("'path' argument is not a string"))?;
        args.path = Some(path.to_owned());
    }

    Ok(())
}
