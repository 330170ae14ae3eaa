// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host address enumeration and display helpers.

use std::io;
use std::net::IpAddr;

/// Interfaces whose addresses are never advertised to peers.
const SKIPPED_INTERFACES: &[&str] = &["docker0"];

/// Non-loopback, non-multicast addresses of every interface except
/// docker0, ordered private-first and link-local last. Order within a
/// class follows the enumeration order of the platform.
pub fn list_ip_addrs() -> io::Result<Vec<String>> {
    let mut addrs: Vec<IpAddr> = if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|iface| !SKIPPED_INTERFACES.contains(&iface.name.as_str()))
        .map(|iface| iface.ip())
        .filter(|ip| !ip.is_loopback() && !ip.is_multicast())
        .collect();
    addrs.sort_by_key(|ip| network_class(ip));
    Ok(addrs.iter().map(|ip| ip.to_string()).collect())
}

/// Preference rank of an address: 192.168/16, 172.16/12, 10/8,
/// 169.254/16, then everything else.
pub fn network_class(ip: &IpAddr) -> usize {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            if octets[0] == 192 && octets[1] == 168 {
                0
            } else if octets[0] == 172 && (16..32).contains(&octets[1]) {
                1
            } else if octets[0] == 10 {
                2
            } else if octets[0] == 169 && octets[1] == 254 {
                3
            } else {
                4
            }
        }
        IpAddr::V6(_) => 4,
    }
}

/// Shorten an `host[:port]` address for display: hostnames lose their
/// domain part, IP addresses stay as-is, the port survives unless asked
/// not to.
pub fn short_hostname(addr: &str, omit_port: bool) -> String {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => (host, Some(port)),
        _ => (addr, None),
    };
    let host = if host.parse::<IpAddr>().is_ok() {
        host.to_string()
    } else {
        host.split('.').next().unwrap_or(host).to_string()
    };
    match port {
        Some(port) if !omit_port => format!("{host}:{port}"),
        _ => host,
    }
}
