//! Default facts collector: hostname/fqdn, network interfaces, platform,
//! uname, cpu, and memory, read directly from `/proc`, `/sys`, and a
//! handful of libc calls — no `psutil`-equivalent crate is part of this
//! stack, so the collection itself is direct syscall/filesystem access.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::fs;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, Ipv6Addr};

use fleet_domain::Value;

pub fn collect_facts() -> Value {
    let mut root = BTreeMap::new();

    let hostname = read_hostname().unwrap_or_default();
    let fqdn = resolve_fqdn(&hostname).unwrap_or_else(|| hostname.clone());
    root.insert("hostname".to_string(), Value::Str(hostname));
    root.insert("fqdn".to_string(), Value::Str(fqdn));

    let interfaces = collect_interfaces();
    let mut primary_v4 = Vec::new();
    let mut primary_v6 = Vec::new();
    let mut iface_map = BTreeMap::new();
    for iface in &interfaces {
        if iface.name != "lo" {
            primary_v4.extend(iface.ipv4.iter().cloned());
            primary_v6.extend(iface.ipv6.iter().cloned());
        }
        let mut entry = BTreeMap::new();
        entry.insert(
            "ipv4".to_string(),
            Value::List(iface.ipv4.iter().cloned().map(Value::Str).collect()),
        );
        entry.insert(
            "ipv6".to_string(),
            Value::List(iface.ipv6.iter().cloned().map(Value::Str).collect()),
        );
        if let Some(mac) = &iface.mac {
            entry.insert("mac".to_string(), Value::Str(mac.clone()));
        }
        iface_map.insert(iface.name.clone(), Value::Map(entry));
    }
    root.insert("interfaces".to_string(), Value::Map(iface_map));

    let mut primary = BTreeMap::new();
    primary.insert(
        "ipv4".to_string(),
        Value::List(primary_v4.into_iter().map(Value::Str).collect()),
    );
    primary.insert(
        "ipv6".to_string(),
        Value::List(primary_v6.into_iter().map(Value::Str).collect()),
    );
    root.insert("primary_address".to_string(), Value::Map(primary));

    root.insert("platform".to_string(), Value::Str(std::env::consts::OS.to_string()));

    if let Some(uname) = read_uname() {
        root.insert("uname".to_string(), uname);
    }
    if let Some(cpu) = read_cpu() {
        root.insert("cpu".to_string(), cpu);
    }
    if let Some(memory) = read_memory() {
        root.insert("memory".to_string(), memory);
    }
    if let Some(vendor) = read_sys_vendor() {
        root.insert("sys_vendor".to_string(), Value::Str(vendor));
    }
    if is_qemu() {
        root.insert("qemu".to_string(), Value::Bool(true));
    }

    Value::Map(root)
}

fn read_hostname() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Best-effort canonical name via `getaddrinfo(AI_CANONNAME)`, mirroring
/// what `socket.getfqdn()` does under the hood.
fn resolve_fqdn(hostname: &str) -> Option<String> {
    if hostname.is_empty() {
        return None;
    }
    let cname = CString::new(hostname).ok()?;
    let mut hints: libc::addrinfo = unsafe { MaybeUninit::zeroed().assume_init() };
    hints.ai_flags = libc::AI_CANONNAME;
    hints.ai_family = libc::AF_UNSPEC;

    let mut res: *mut libc::addrinfo = std::ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(cname.as_ptr(), std::ptr::null(), &hints, &mut res) };
    if rc != 0 || res.is_null() {
        return None;
    }
    let canon = unsafe {
        let name = (*res).ai_canonname;
        if name.is_null() {
            None
        } else {
            Some(CStr::from_ptr(name).to_string_lossy().into_owned())
        }
    };
    unsafe { libc::freeaddrinfo(res) };
    canon.filter(|s| !s.is_empty())
}

struct Interface {
    name: String,
    ipv4: Vec<String>,
    ipv6: Vec<String>,
    mac: Option<String>,
}

/// Enumerates interfaces via `getifaddrs(3)`.
fn collect_interfaces() -> Vec<Interface> {
    let mut by_name: BTreeMap<String, Interface> = BTreeMap::new();
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Vec::new();
    }

    let mut cursor = head;
    while !cursor.is_null() {
        let ifa = unsafe { &*cursor };
        if ifa.ifa_name.is_null() || ifa.ifa_addr.is_null() {
            cursor = ifa.ifa_next;
            continue;
        }
        let name = unsafe { CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned() };
        let entry = by_name.entry(name.clone()).or_insert_with(|| Interface {
            name: name.clone(),
            ipv4: Vec::new(),
            ipv6: Vec::new(),
            mac: None,
        });

        let family = unsafe { (*ifa.ifa_addr).sa_family as i32 };
        match family {
            libc::AF_INET => {
                let sa = ifa.ifa_addr as *const libc::sockaddr_in;
                let addr = u32::from_be(unsafe { (*sa).sin_addr.s_addr });
                entry.ipv4.push(Ipv4Addr::from(addr).to_string());
            }
            libc::AF_INET6 => {
                let sa = ifa.ifa_addr as *const libc::sockaddr_in6;
                let octets = unsafe { (*sa).sin6_addr.s6_addr };
                entry.ipv6.push(Ipv6Addr::from(octets).to_string());
            }
            #[cfg(target_os = "linux")]
            libc::AF_PACKET => {
                let sa = ifa.ifa_addr as *const libc::sockaddr_ll;
                let len = unsafe { (*sa).sll_halen as usize };
                let bytes = unsafe { &(*sa).sll_addr[..len.min(8)] };
                if len == 6 {
                    entry.mac = Some(
                        bytes
                            .iter()
                            .map(|b| format!("{b:02x}"))
                            .collect::<Vec<_>>()
                            .join(":"),
                    );
                }
            }
            _ => {}
        }

        cursor = ifa.ifa_next;
    }

    unsafe { libc::freeifaddrs(head) };
    by_name.into_values().collect()
}

fn read_uname() -> Option<Value> {
    let mut buf: libc::utsname = unsafe { MaybeUninit::zeroed().assume_init() };
    if unsafe { libc::uname(&mut buf) } != 0 {
        return None;
    }
    let mut m = BTreeMap::new();
    m.insert("sysname".to_string(), Value::Str(cstr_field(&buf.sysname)));
    m.insert("nodename".to_string(), Value::Str(cstr_field(&buf.nodename)));
    m.insert("release".to_string(), Value::Str(cstr_field(&buf.release)));
    m.insert("version".to_string(), Value::Str(cstr_field(&buf.version)));
    m.insert("machine".to_string(), Value::Str(cstr_field(&buf.machine)));
    Some(Value::Map(m))
}

fn cstr_field(field: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = field.iter().map(|&c| c as u8).collect();
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_cpu() -> Option<Value> {
    let text = fs::read_to_string("/proc/cpuinfo").ok()?;
    let mut threads = 0u64;
    let mut cores: Option<u64> = None;
    let mut mhz_sum = 0.0;
    let mut mhz_count = 0u64;
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            match key {
                "processor" => threads += 1,
                "cpu cores" => cores = value.parse().ok(),
                "cpu MHz" => {
                    if let Ok(mhz) = value.parse::<f64>() {
                        mhz_sum += mhz;
                        mhz_count += 1;
                    }
                }
                _ => {}
            }
        }
    }
    if threads == 0 {
        return None;
    }
    let mut m = BTreeMap::new();
    m.insert("threads".to_string(), Value::Int(threads as i64));
    m.insert("cores".to_string(), Value::Int(cores.unwrap_or(threads) as i64));
    if mhz_count > 0 {
        m.insert("frequency".to_string(), Value::Float(mhz_sum / mhz_count as f64));
    }
    Some(Value::Map(m))
}

fn read_memory() -> Option<Value> {
    let text = fs::read_to_string("/proc/meminfo").ok()?;
    let mut ram = None;
    let mut swap = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            ram = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("SwapTotal:") {
            swap = parse_kb(rest);
        }
    }
    if ram.is_none() && swap.is_none() {
        return None;
    }
    let mut m = BTreeMap::new();
    if let Some(ram) = ram {
        m.insert("ram".to_string(), Value::Int(ram));
    }
    if let Some(swap) = swap {
        m.insert("swap".to_string(), Value::Int(swap));
    }
    Some(Value::Map(m))
}

fn parse_kb(field: &str) -> Option<i64> {
    let kb: i64 = field.trim().trim_end_matches(" kB").trim().parse().ok()?;
    Some(kb * 1024)
}

fn read_sys_vendor() -> Option<String> {
    let text = fs::read_to_string("/sys/class/dmi/id/sys_vendor").ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_qemu() -> bool {
    read_sys_vendor().map(|v| v.to_ascii_lowercase().contains("qemu")).unwrap_or(false)
        || fs::read_to_string("/sys/class/dmi/id/product_name")
            .map(|v| v.to_ascii_lowercase().contains("qemu"))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_facts_always_has_hostname_and_platform() {
        let facts = collect_facts();
        let Value::Map(m) = facts else { panic!("expected map") };
        assert!(m.contains_key("hostname"));
        assert!(m.contains_key("platform"));
        assert!(m.contains_key("interfaces"));
        assert!(m.contains_key("primary_address"));
    }

    #[test]
    fn parse_kb_converts_to_bytes() {
        assert_eq!(parse_kb("16384 kB"), Some(16384 * 1024));
    }
}
