//! Input validation and sanitization
//!
//! Node names, relay names and paths arrive from HTTP requests and end up in
//! file names and command lines, so they are checked before use.

use crate::error::FleetError;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Validate a node or relay name (alphanumeric, dashes, underscores)
pub fn validate_name(kind: &str, name: &str) -> Result<(), FleetError> {
    if name.is_empty() {
        return Err(FleetError::Validation(format!("{} name cannot be empty", kind)));
    }

    if name.len() > 64 {
        return Err(FleetError::Validation(format!(
            "{} name too long (max 64 characters)",
            kind
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(FleetError::Validation(format!(
            "Invalid {} name '{}': only alphanumeric, dash, and underscore allowed",
            kind.to_lowercase(),
            name
        )));
    }

    if name.starts_with('-') || name.starts_with('_') {
        return Err(FleetError::Validation(format!(
            "{} name cannot start with dash or underscore",
            kind
        )));
    }

    Ok(())
}

/// Validate a node name
pub fn validate_node_name(name: &str) -> Result<(), FleetError> {
    validate_name("Node", name)
}

/// Validate a relay name
pub fn validate_relay_name(name: &str) -> Result<(), FleetError> {
    validate_name("Relay", name)
}

/// Validate a WireGuard interface name as wg-quick derives it from a file stem
pub fn validate_interface_name(name: &str) -> Result<(), FleetError> {
    if name.is_empty() {
        return Err(FleetError::Validation(
            "Interface name cannot be empty".to_string(),
        ));
    }

    // Linux IFNAMSIZ
    if name.len() > 15 {
        return Err(FleetError::Validation(format!(
            "Interface name '{}' too long (max 15 characters)",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
    {
        return Err(FleetError::Validation(format!(
            "Invalid interface name '{}'",
            name
        )));
    }

    Ok(())
}

/// Sanitize file path to prevent directory traversal
pub fn sanitize_path(path: &str) -> Result<PathBuf, FleetError> {
    if path.contains('\0') {
        return Err(FleetError::Validation("Path contains null byte".to_string()));
    }

    let path = Path::new(path.trim());
    for component in path.components() {
        if let std::path::Component::ParentDir = component {
            warn!("Path contains parent directory reference: {:?}", path);
            return Err(FleetError::Validation(
                "Path contains invalid parent directory reference".to_string(),
            ));
        }
    }

    Ok(path.to_path_buf())
}

/// Validate IPv4 address string
pub fn validate_ipv4(ip: &str) -> Result<(), FleetError> {
    ip.parse::<std::net::Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| FleetError::Validation(format!("Invalid IPv4 address: {}", ip)))
}

/// Validate a `host:port` endpoint
pub fn validate_endpoint(endpoint: &str) -> Result<(), FleetError> {
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        FleetError::Validation(format!("Endpoint '{}' is missing a port", endpoint))
    })?;

    if host.is_empty() {
        return Err(FleetError::Validation(format!(
            "Endpoint '{}' is missing a host",
            endpoint
        )));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(FleetError::Validation(format!(
            "Invalid port in endpoint '{}'",
            endpoint
        ))),
        Ok(_) => Ok(()),
    }
}
