//! IPv4 address-space partitioning
//!
//! Builds the split-tunnel route list: every IPv4 address except one, covered
//! by aligned CIDR blocks emitted in increasing address order.

use crate::error::{FleetError, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// An aligned IPv4 block `start/prefix`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CidrBlock {
    /// First address of the block, big-endian numeric form
    pub start: u32,
    /// Prefix length (0..=32)
    pub prefix: u8,
}

impl CidrBlock {
    /// Number of addresses covered by the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    /// Last address of the block
    pub fn end(&self) -> u32 {
        (u64::from(self.start) + self.size() - 1) as u32
    }

    /// Whether `addr` falls inside the block
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr <= self.end()
    }

    /// Whether `start` sits on a multiple of the block size
    pub fn is_aligned(&self) -> bool {
        u64::from(self.start) % self.size() == 0
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.start), self.prefix)
    }
}

/// Longest prefix whose alignment `start` already satisfies.
///
/// An address with `k` trailing zero bits can head a block of `2^k`
/// addresses. Zero counts as 32 trailing zeros, i.e. `0.0.0.0/0`.
fn max_aligned_prefix(start: u32) -> u8 {
    (32 - start.trailing_zeros()) as u8
}

/// Partition the IPv4 space into blocks covering everything except `excluded`.
///
/// Walks the space from `0.0.0.0` upward. At each position the largest
/// aligned block is tried first and shrunk one prefix bit at a time until it
/// no longer contains `excluded`. The excluded address itself is stepped
/// over. The walk stops once the cursor passes `255.255.255.255`.
pub fn partition(excluded: u32) -> Vec<CidrBlock> {
    let mut blocks = Vec::new();
    // u64 cursor so the final advance past u32::MAX is observable
    let mut cursor: u64 = 0;

    while cursor <= u64::from(u32::MAX) {
        let start = cursor as u32;

        if start == excluded {
            cursor += 1;
            continue;
        }

        let mut prefix = max_aligned_prefix(start);
        loop {
            let block = CidrBlock { start, prefix };
            if !block.contains(excluded) {
                blocks.push(block);
                cursor += block.size();
                break;
            }
            // A /32 only contains `excluded` when start == excluded, handled above
            prefix += 1;
        }
    }

    blocks
}

/// Render blocks as the comma-separated list used in `AllowedIPs`
pub fn join_cidrs(blocks: &[CidrBlock]) -> String {
    blocks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a dotted-quad IPv4 address into its numeric form
pub fn ipv4_to_u32(addr: &str) -> Result<u32> {
    addr.trim()
        .parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| FleetError::Validation(format!("Not an IPv4 address: {}", addr)))
}

/// Route list that sends everything except `excluded` through the tunnel
pub fn allowed_ips_except(excluded: &str) -> Result<String> {
    let excluded = ipv4_to_u32(excluded)?;
    Ok(join_cidrs(&partition(excluded)))
}
