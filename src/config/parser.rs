//! FortiGate configuration parser.
//!
//! Turns one raw configuration export into a structured record:
//! hostname, serial, firmware, HA settings, VDOM list, interfaces,
//! address objects, service objects and firewall policies, each tagged
//! with the VDOM scope it was declared under.
//!
//! The parser never fails: anything it cannot extract becomes
//! `None`/empty and the caller decides what to do about it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::scanner::{find_block, set_list, set_value, split_entries, split_vdom_sections};
use crate::logging::structured::LogContext;

lazy_static! {
    /// `#config-version=FG2H0G-7.4.8-FW-build2795-250523...`
    static ref FIRMWARE: Regex = Regex::new(r"#config-version=(\S+)").unwrap();

    /// `#global_vdom=0:vd_name=routing/routing` - VDOM-scoped export.
    static ref VDOM_HEADER: Regex = Regex::new(r"vd_name=([^/\s]+)/\S+").unwrap();

    static ref HOSTNAME_QUOTED: Regex = Regex::new(r#"set hostname "([^"]+)""#).unwrap();
    static ref HOSTNAME_BARE: Regex = Regex::new(r"set hostname (\S+)").unwrap();

    /// Serial is frequently absent from exports by vendor design.
    static ref SERIAL: Regex =
        Regex::new(r#"(?i)set serial[- ]number\s+"([^"]*)""#).unwrap();
    static ref SERIAL_BARE: Regex =
        Regex::new(r"(?i)set serial[- ]number\s+([A-Z0-9]+)").unwrap();
    static ref HA_SERIAL: Regex =
        Regex::new(r#"(?is)set override\s+enable.*?set serial\s+"?([A-Z0-9]+)"?"#).unwrap();

    static ref INTERFACE_IP: Regex =
        Regex::new(r"(\d+\.\d+\.\d+\.\d+)\s+(\d+\.\d+\.\d+\.\d+)").unwrap();
}

/// Parsed interface record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInterface {
    pub name: String,
    pub ip: String,
    pub vdom: String,
    pub status: String,
    #[serde(rename = "type")]
    pub intf_type: String,
    pub alias: String,
    pub role: String,
    pub vlan_id: Option<u32>,
    pub allowaccess: Vec<String>,
}

/// Parsed address object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub name: String,
    pub vdom: String,
    #[serde(rename = "type")]
    pub addr_type: String,
    pub subnet: Option<String>,
    pub start_ip: Option<String>,
    pub end_ip: Option<String>,
    pub fqdn: Option<String>,
    pub country: Option<String>,
    pub members: Vec<String>,
    pub associated_interface: Option<String>,
    pub comments: Option<String>,
}

/// Parsed service object (custom service or group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedService {
    pub name: String,
    pub vdom: String,
    pub protocol: Option<String>,
    pub tcp_portrange: Option<String>,
    pub udp_portrange: Option<String>,
    pub category: Option<String>,
    pub icmptype: Option<i32>,
    pub icmpcode: Option<i32>,
    pub is_group: bool,
    pub members: Vec<String>,
    pub comments: Option<String>,
}

/// Parsed firewall policy, pre-diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPolicy {
    pub id: String,
    pub vdom: String,
    pub name: String,
    pub uuid: Option<String>,
    pub action: String,
    pub status: String,
    pub srcintf: Vec<String>,
    pub dstintf: Vec<String>,
    pub srcaddr: Vec<String>,
    pub dstaddr: Vec<String>,
    pub service: Vec<String>,
    pub nat: String,
    pub raw_config: String,
}

/// HA settings; absence of the block means standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    pub mode: String,
    pub enabled: bool,
    pub group_name: Option<String>,
    pub group_id: Option<i64>,
    pub heartbeat_device: Option<String>,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            mode: "standalone".to_string(),
            enabled: false,
            group_name: None,
            group_id: None,
            heartbeat_device: None,
        }
    }
}

/// The config_data payload of a parsed export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigData {
    pub system: BTreeMap<String, String>,
    pub interfaces: Vec<ParsedInterface>,
    pub vdoms: Vec<String>,
    pub ha: HaConfig,
    pub addresses: Vec<ParsedAddress>,
    pub services: Vec<ParsedService>,
    pub policies: Vec<ParsedPolicy>,
}

/// Full parse result for one configuration export.
///
/// `serial: None` means "not found in the document" - callers prompt
/// for a manual value or synthesize a temporary identifier. A present
/// but empty serial is `Some("")`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedConfig {
    pub hostname: String,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    pub vdom_name: Option<String>,
    pub config_data: ConfigData,
}

/// Parse a full configuration export. Never fails; missing data
/// degrades to `None`/empty fields.
pub fn parse_config(content: &str, ctx: &LogContext) -> ParsedConfig {
    let mut parsed = ParsedConfig {
        hostname: "Unknown-Device".to_string(),
        ..Default::default()
    };

    parsed.firmware = FIRMWARE
        .captures(content)
        .map(|c| c[1].to_string());

    parsed.vdom_name = VDOM_HEADER.captures(content).map(|c| c[1].to_string());

    if let Some(caps) = HOSTNAME_QUOTED.captures(content) {
        parsed.hostname = caps[1].to_string();
    } else if let Some(caps) = HOSTNAME_BARE.captures(content) {
        parsed.hostname = caps[1].to_string();
    }

    parsed.serial = extract_serial(content);
    if parsed.serial.is_none() {
        log::debug!("{} SERIAL_NOT_FOUND hostname={}", ctx, parsed.hostname);
    }

    if let Some(global) = find_block(content, "system global") {
        if let Some(tz) = set_value(&global, "timezone") {
            parsed.config_data.system.insert("timezone".to_string(), tz);
        }
        if let Some(timeout) = set_value(&global, "admintimeout") {
            parsed
                .config_data
                .system
                .insert("admintimeout".to_string(), timeout);
        }
    }

    parsed.config_data.ha = parse_ha(content);

    let fallback = parsed.vdom_name.as_deref().unwrap_or("root");
    let sections = split_vdom_sections(content, fallback);
    let has_vdom_wrapper = sections.len() > 1 || sections[0].body.len() != content.len();
    if has_vdom_wrapper {
        parsed.config_data.vdoms = sections.iter().map(|s| s.name.clone()).collect();
    }

    for section in &sections {
        parse_scope(section.body.as_str(), &section.name, &mut parsed.config_data);
    }

    log::info!(
        "{} CONFIG_PARSED hostname={} vdoms={} interfaces={} addresses={} services={} policies={}",
        ctx,
        parsed.hostname,
        parsed.config_data.vdoms.len(),
        parsed.config_data.interfaces.len(),
        parsed.config_data.addresses.len(),
        parsed.config_data.services.len(),
        parsed.config_data.policies.len()
    );

    parsed
}

/// Serial extraction probes, in priority order. FortiOS exports often
/// omit the serial entirely, so "not found" must stay distinguishable
/// from "found but empty".
fn extract_serial(content: &str) -> Option<String> {
    if let Some(caps) = SERIAL.captures(content) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = SERIAL_BARE.captures(content) {
        return Some(caps[1].to_string());
    }
    if let Some(caps) = HA_SERIAL.captures(content) {
        return Some(caps[1].to_string());
    }
    None
}

fn parse_ha(content: &str) -> HaConfig {
    let block = match find_block(content, "system ha") {
        Some(b) => b,
        None => return HaConfig::default(),
    };

    let mode = set_value(&block, "mode").unwrap_or_else(|| "standalone".to_string());
    HaConfig {
        enabled: mode != "standalone",
        group_name: set_value(&block, "group-name"),
        group_id: set_value(&block, "group-id").and_then(|v| v.parse().ok()),
        heartbeat_device: set_value(&block, "hbdev"),
        mode,
    }
}

/// Parse the per-VDOM sections of one scope body.
fn parse_scope(body: &str, vdom: &str, data: &mut ConfigData) {
    if let Some(block) = find_block(body, "system interface") {
        for entry in split_entries(&block) {
            data.interfaces
                .push(parse_interface(&entry.id, &entry.body, vdom));
        }
    }

    if let Some(block) = find_block(body, "firewall address") {
        for entry in split_entries(&block) {
            data.addresses
                .push(parse_address(&entry.id, &entry.body, vdom, false));
        }
    }
    if let Some(block) = find_block(body, "firewall addrgrp") {
        for entry in split_entries(&block) {
            data.addresses
                .push(parse_address(&entry.id, &entry.body, vdom, true));
        }
    }

    if let Some(block) = find_block(body, "firewall service custom") {
        for entry in split_entries(&block) {
            data.services
                .push(parse_service(&entry.id, &entry.body, vdom, false));
        }
    }
    if let Some(block) = find_block(body, "firewall service group") {
        for entry in split_entries(&block) {
            data.services
                .push(parse_service(&entry.id, &entry.body, vdom, true));
        }
    }

    if let Some(block) = find_block(body, "firewall policy") {
        for entry in split_entries(&block) {
            data.policies
                .push(parse_policy(&entry.id, &entry.body, vdom));
        }
    }
}

fn parse_interface(name: &str, body: &str, scope_vdom: &str) -> ParsedInterface {
    let ip = set_value(body, "ip")
        .and_then(|v| {
            INTERFACE_IP
                .captures(&v)
                .map(|c| format!("{}/{}", &c[1], &c[2]))
        })
        .unwrap_or_else(|| "0.0.0.0/0.0.0.0".to_string());

    let vlan_id: Option<u32> = set_value(body, "vlanid").and_then(|v| v.parse().ok());

    // Type inference priority: explicit `set type`, then vdom-link
    // naming, then VLAN-id presence, defaulting to physical.
    let intf_type = match set_value(body, "type") {
        Some(t) => t,
        None => {
            let lower = name.to_lowercase();
            if lower.contains("vdom") || lower.contains("vlink") || lower.contains("npu") {
                "vdom-link".to_string()
            } else if vlan_id.is_some() {
                "vlan".to_string()
            } else {
                "physical".to_string()
            }
        }
    };

    ParsedInterface {
        name: name.to_string(),
        ip,
        vdom: set_value(body, "vdom").unwrap_or_else(|| scope_vdom.to_string()),
        status: set_value(body, "status").unwrap_or_else(|| "up".to_string()),
        intf_type,
        alias: set_value(body, "alias").unwrap_or_default(),
        role: set_value(body, "role").unwrap_or_else(|| "undefined".to_string()),
        vlan_id,
        allowaccess: set_list(body, "allowaccess"),
    }
}

fn parse_address(name: &str, body: &str, vdom: &str, is_group: bool) -> ParsedAddress {
    let addr_type = if is_group {
        "group".to_string()
    } else {
        set_value(body, "type").unwrap_or_else(|| "ipmask".to_string())
    };

    ParsedAddress {
        name: name.to_string(),
        vdom: vdom.to_string(),
        addr_type,
        subnet: set_value(body, "subnet"),
        start_ip: set_value(body, "start-ip"),
        end_ip: set_value(body, "end-ip"),
        fqdn: set_value(body, "fqdn"),
        country: set_value(body, "country"),
        members: set_list(body, "member"),
        associated_interface: set_value(body, "associated-interface"),
        comments: set_value(body, "comment"),
    }
}

fn parse_service(name: &str, body: &str, vdom: &str, is_group: bool) -> ParsedService {
    let tcp_portrange = set_value(body, "tcp-portrange");
    let udp_portrange = set_value(body, "udp-portrange");

    let protocol = set_value(body, "protocol").or_else(|| {
        if tcp_portrange.is_some() || udp_portrange.is_some() {
            Some("TCP/UDP/SCTP".to_string())
        } else {
            None
        }
    });

    ParsedService {
        name: name.to_string(),
        vdom: vdom.to_string(),
        protocol,
        tcp_portrange,
        udp_portrange,
        category: set_value(body, "category"),
        icmptype: set_value(body, "icmptype").and_then(|v| v.parse().ok()),
        icmpcode: set_value(body, "icmpcode").and_then(|v| v.parse().ok()),
        is_group,
        members: set_list(body, "member"),
        comments: set_value(body, "comment"),
    }
}

fn parse_policy(id: &str, body: &str, vdom: &str) -> ParsedPolicy {
    let nat = match set_value(body, "nat").as_deref() {
        Some("enable") => "Enabled".to_string(),
        _ => "Disabled".to_string(),
    };

    ParsedPolicy {
        id: id.to_string(),
        vdom: vdom.to_string(),
        name: set_value(body, "name").unwrap_or_default(),
        uuid: set_value(body, "uuid"),
        action: set_value(body, "action").unwrap_or_else(|| "deny".to_string()),
        status: set_value(body, "status").unwrap_or_else(|| "enable".to_string()),
        srcintf: set_list(body, "srcintf"),
        dstintf: set_list(body, "dstintf"),
        srcaddr: set_list(body, "srcaddr"),
        dstaddr: set_list(body, "dstaddr"),
        service: set_list(body, "service"),
        nat,
        raw_config: body.to_string(),
    }
}
