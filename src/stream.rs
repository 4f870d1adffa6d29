//! The streaming request/response loop.
//!
//! Reads JSON items from the input stream, manages the connection
//! lifecycle, dispatches each item, and writes exactly one JSON response
//! per well-formed input object, in input order. Per-item failures are
//! annotated and counted; only login failure and an unwritable output
//! stream terminate the loop.

pub mod scan;

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::GridEnv;
use crate::dispatch;
use crate::envelope;
use crate::error::GridError;
use crate::grid::Connection;
use crate::ops::OpArgs;
use crate::stream::scan::JsonScanner;

/// Session-wide settings for one run of the loop.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Defaults copied into every item's per-call arguments.
    pub defaults: OpArgs,
    /// Close and reopen the connection once it has been open this many
    /// seconds. Zero disables recycling.
    pub max_connect_time: u64,
    /// TCP connect timeout for each login attempt.
    pub connect_timeout: Duration,
}

/// Run the loop to end of input, returning the total error count.
///
/// The connection is opened lazily on the first item that dispatches and
/// recycled when its open-duration exceeds `max_connect_time`. Login
/// failure is fatal: the loop logs its tallies and returns an error so the
/// caller exits non-zero.
pub fn run_stream<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    env: &GridEnv,
    opts: &StreamOptions,
) -> Result<u64> {
    let mut scanner = JsonScanner::new(input);
    let mut connection: Option<Connection> = None;
    let mut reconnect = false;
    let mut item_count: u64 = 0;
    let mut error_count: u64 = 0;
    let flush = opts.defaults.flags.flush;

    loop {
        let item = match scanner.next_item().context("Failed to read input")? {
            Some(item) => item,
            None => break,
        };
        let mut item = match item {
            Ok(v) => v,
            Err(e) => {
                // A stream-boundary failure produces no output line; the
                // typed error exists for its status code and the tally.
                let e = GridError::Stream(e.to_string());
                tracing::error!(code = e.status(), "{}", e);
                error_count += 1;
                continue;
            }
        };

        if !item.is_object() {
            tracing::error!(
                "Item {} in stream was not a JSON object; skipping",
                item_count
            );
            error_count += 1;
            continue;
        }

        let conn = match &mut connection {
            Some(conn) => conn,
            slot @ None => {
                let conn = match Connection::connect(env, opts.connect_timeout) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("Failed to log in to the grid: {}", e);
                        tracing::error!(
                            "Processed {} items with {} errors",
                            item_count,
                            error_count
                        );
                        return Err(e).context("Failed to log in to the grid");
                    }
                };
                if reconnect {
                    tracing::info!("Re-connected to the grid");
                } else {
                    tracing::info!("Connected to the grid");
                }
                slot.insert(conn)
            }
        };

        match dispatch::dispatch(conn, env, &item, &opts.defaults) {
            Err(e) => {
                // The error is attached to the input envelope; the stream
                // carries on.
                tracing::error!(code = e.status(), "Operation failed: {}", e);
                error_count += 1;
                envelope::add_error(&mut item, &e);
                emit(&mut output, &item, flush)?;
            }
            Ok(result) => {
                if envelope::has_operation(&item) && envelope::has_target(&item) {
                    if let Some(result) = result {
                        if let Err(e) = envelope::add_result(&mut item, result) {
                            tracing::error!(
                                "Failed to add result to item {} in stream: {}",
                                item_count,
                                e
                            );
                            error_count += 1;
                        }
                    }
                    emit(&mut output, &item, flush)?;
                } else if let Some(result) = result {
                    // No envelope shape: print the bare result.
                    emit(&mut output, &result, flush)?;
                } else {
                    // Void operation: echo the input.
                    emit(&mut output, &item, flush)?;
                }
            }
        }

        item_count += 1;

        if opts.max_connect_time > 0 {
            let open_secs = connection
                .as_ref()
                .map(|c| c.open_duration().as_secs())
                .unwrap_or(0);
            if open_secs > opts.max_connect_time {
                tracing::info!(
                    "The connection has been open for {} seconds, the maximum \
                     allowed is {}; closing the connection to reopen a new one",
                    open_secs,
                    opts.max_connect_time
                );
                if let Some(conn) = connection.take() {
                    conn.disconnect();
                }
                reconnect = true;
            }
        }
    }

    if let Some(conn) = connection.take() {
        conn.disconnect();
    }

    if error_count > 0 {
        tracing::warn!("Processed {} items with {} errors", item_count, error_count);
    } else {
        tracing::debug!("Processed {} items with {} errors", item_count, error_count);
    }

    Ok(error_count)
}

fn emit<W: Write>(output: &mut W, value: &Value, flush: bool) -> Result<()> {
    serde_json::to_writer(&mut *output, value).context("Failed to write response")?;
    output.write_all(b"\n").context("Failed to write response")?;
    if flush {
        output.flush().context("Failed to flush output")?;
    }
    Ok(())
}
