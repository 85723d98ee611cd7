//! Free-port discovery for the segment server.

use std::net::TcpListener;
use tracing::debug;

use crate::error::StreamError;

/// How many consecutive ports are tried before giving up.
pub const MAX_ATTEMPTS: u16 = 100;

/// First port at or above `preferred` that `host` could bind a moment ago.
///
/// The probe listener is dropped before returning, so this is a hint rather
/// than a reservation; the caller's own bind is the authoritative check.
pub fn allocate(host: &str, preferred: u16) -> Result<u16, StreamError> {
    let mut last_error = String::from("no ports tried");
    for offset in 0..MAX_ATTEMPTS {
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                drop(listener);
                debug!(port, "Allocated segment server port");
                return Ok(port);
            }
            Err(e) => {
                debug!(port, error = %e, "Port unavailable, trying next");
                last_error = e.to_string();
            }
        }
    }

    Err(StreamError::PortBindFailed {
        port: preferred,
        reason: format!(
            "no free port in {} attempts starting at {}: {}",
            MAX_ATTEMPTS, preferred, last_error
        ),
    })
}
