//! Security hardening
//!
//! This module provides:
//! - Input validation and sanitization for names and paths
//! - Owner-only file writes for state and credentials
//! - Privilege detection

mod permissions;
mod privileges;
mod validation;

pub use permissions::{ensure_dir, set_permissions, write_secret, SecureFileMode};
pub use privileges::{warn_if_unprivileged, PrivilegeLevel};
pub use validation::{
    sanitize_path, validate_endpoint, validate_interface_name, validate_ipv4,
    validate_node_name, validate_relay_name,
};
