use crate::db::core::{DbError, Topology};
use crate::db::indices::FpgaId;
use anyhow::{Context, Result};
use std::fs;

const MAX_FPGA_ID: u32 = 1 << 16;

pub fn parse(topology: &mut Topology, filename: &str) -> Result<()> {
    let text = fs::read_to_string(filename)
        .context(format!("Failed to open system file: {}", filename))?;
    parse_str(topology, &text).context(format!("Malformed system file: {}", filename))?;
    log::info!(
        "Loaded topology: {} FPGAs, {} interconnections",
        topology.num_fpgas(),
        topology.interconnect_count()
    );
    Ok(())
}

pub fn parse_str(topology: &mut Topology, text: &str) -> Result<(), DbError> {
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (a, b, pairs) = parse_line(line).map_err(|msg| DbError::Parse { line: n + 1, msg })?;
        topology.add_link(a, b, pairs);
    }
    Ok(())
}

fn parse_line(line: &str) -> Result<(FpgaId, FpgaId, u32), String> {
    let (link, pairs) = line
        .split_once(',')
        .ok_or_else(|| "missing ', pairs=' field".to_string())?;
    let pairs = pairs
        .trim()
        .strip_prefix("pairs=")
        .ok_or_else(|| format!("expected 'pairs=<n>', got '{}'", pairs.trim()))?
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad pair count: {}", e))?;
    let (lhs, rhs) = link
        .split_once("---")
        .ok_or_else(|| "missing '---' separator".to_string())?;
    Ok((parse_endpoint(lhs)?, parse_endpoint(rhs)?, pairs))
}

// `U<u>/M<m>/F<f>[SLR<s>]` -> 100u + 10m + f, with m and f single digits.
// The SLR suffix is ignored.
fn parse_endpoint(s: &str) -> Result<FpgaId, String> {
    let s = s.trim();
    let body = s.split('[').next().unwrap_or(s);
    let mut parts = body.split('/');
    let mut field = |prefix: char| -> Result<u32, String> {
        parts
            .next()
            .and_then(|p| p.strip_prefix(prefix))
            .ok_or_else(|| format!("endpoint '{}' missing {} field", s, prefix))?
            .parse::<u32>()
            .map_err(|e| format!("endpoint '{}': {}", s, e))
    };
    let u = field('U')?;
    let m = field('M')?;
    let f = field('F')?;
    if m > 9 || f > 9 {
        return Err(format!("endpoint '{}': M and F must be single digits", s));
    }
    let id = u
        .checked_mul(100)
        .and_then(|v| v.checked_add(10 * m + f))
        .filter(|&id| id < MAX_FPGA_ID)
        .ok_or_else(|| format!("endpoint '{}': FPGA id exceeds {}", s, MAX_FPGA_ID - 1))?;
    Ok(FpgaId(id))
}
