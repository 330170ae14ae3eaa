// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Table rendering and humanized values for the listing commands.

use bollard::models::Port;
use chrono::Utc;

/// Column-aligned output; widths are computed over all appended rows.
#[derive(Default)]
pub struct Table {
    rows: Vec<Vec<String>>,
    widths: Vec<usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, cols: &[&str]) {
        if self.widths.is_empty() {
            self.widths = vec![0; cols.len()];
        }
        assert_eq!(cols.len(), self.widths.len(), "table: column count mismatch");
        let row: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
        for (width, col) in self.widths.iter_mut().zip(&row) {
            *width = (*width).max(col.len());
        }
        self.rows.push(row);
    }

    pub fn write(&self, prefix: &str) {
        for row in &self.rows {
            let mut line = prefix.to_string();
            for (col, width) in row.iter().zip(&self.widths) {
                line.push_str(&format!("{col:<width$}   ", width = *width));
            }
            println!("{}", line.trim_end());
        }
    }
}

/// `docker ps`-style port column: `ip:pub->priv/proto` for published
/// ports, `priv/proto` otherwise.
pub fn format_ports(ports: &[Port]) -> String {
    let mut parts = Vec::new();
    for port in ports {
        let proto = port
            .typ
            .map(|typ| typ.to_string())
            .unwrap_or_else(|| "tcp".to_string());
        match (&port.ip, port.public_port) {
            (Some(ip), Some(public)) if !ip.is_empty() => {
                parts.push(format!("{}:{}->{}/{}", ip, public, port.private_port, proto));
            }
            _ => parts.push(format!("{}/{}", port.private_port, proto)),
        }
    }
    parts.join(", ")
}

/// A rough "x units ago" for unix timestamps.
pub fn humanize_age(created: i64) -> String {
    let seconds = (Utc::now().timestamp() - created).max(0);
    let (value, unit) = if seconds < 60 {
        (seconds, "second")
    } else if seconds < 3600 {
        (seconds / 60, "minute")
    } else if seconds < 86_400 {
        (seconds / 3600, "hour")
    } else if seconds < 86_400 * 30 {
        (seconds / 86_400, "day")
    } else if seconds < 86_400 * 365 {
        (seconds / (86_400 * 30), "month")
    } else {
        (seconds / (86_400 * 365), "year")
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

/// SI-style size for image listings.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "kB", "MB", "GB", "TB", "PB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Parse human byte counts: bare numbers, SI suffixes (`10MB` = 10^6) and
/// binary suffixes (`10MiB` = 2^20).
pub fn parse_bytes(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let digits_end = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(digits_end);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte count: {input}"))?;

    let suffix = suffix.trim().to_ascii_lowercase();
    let multiplier: u64 = match suffix.as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1000,
        "m" | "mb" => 1000 * 1000,
        "g" | "gb" => 1000 * 1000 * 1000,
        "t" | "tb" => 1000u64.pow(4),
        "ki" | "kib" => 1 << 10,
        "mi" | "mib" => 1 << 20,
        "gi" | "gib" => 1 << 30,
        "ti" | "tib" => 1 << 40,
        _ => return Err(format!("unknown byte suffix: {suffix}")),
    };
    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_parsing() {
        assert_eq!(parse_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_bytes("10MB").unwrap(), 10_000_000);
        assert_eq!(parse_bytes("10MiB").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_bytes("1.5kb").unwrap(), 1500);
        assert!(parse_bytes("10XB").is_err());
        assert!(parse_bytes("abc").is_err());
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1500), "1.5 kB");
        assert_eq!(format_bytes(2_000_000_000), "2.0 GB");
    }

    #[test]
    fn age_formatting() {
        let now = Utc::now().timestamp();
        assert_eq!(humanize_age(now), "0 seconds ago");
        assert_eq!(humanize_age(now - 3700), "1 hour ago");
        assert_eq!(humanize_age(now - 2 * 86_400), "2 days ago");
    }
}
