//! Threat keyword scanning and classification
//!
//! Shared by the firewall (advisory threat scan) and the monitor (keyword
//! detection windows). Multi-pattern matching uses Aho-Corasick so a single
//! pass over the body finds every keyword family member.

use aho_corasick::AhoCorasick;
use lazy_static::lazy_static;
use std::collections::BTreeSet;
use std::fmt;

/// High-priority malware family; a single hit is immediately suspicious
pub const THREAT_KEYWORDS: [&str; 6] = [
    "malware",
    "virus",
    "exploit",
    "trojan",
    "worm",
    "ransomware",
];

/// Low-priority insider family; suspicious only at rate (3 hits / 60 s)
pub const INSIDER_KEYWORDS: [&str; 6] = [
    "failed login",
    "failed_login",
    "unauthorized",
    "exfiltration",
    "backdoor",
    "lateral",
];

/// Payload keywords that exploit an unpatched node into patient zero
pub const INFECTION_KEYWORDS: [&str; 4] = ["trojan", "worm", "exploit", "ransomware"];

lazy_static! {
    static ref THREAT_SCANNER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(THREAT_KEYWORDS)
        .expect("threat scanner build");
    static ref INSIDER_SCANNER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(INSIDER_KEYWORDS)
        .expect("insider scanner build");
    static ref INFECTION_SCANNER: AhoCorasick = AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(INFECTION_KEYWORDS)
        .expect("infection scanner build");
}

fn distinct_matches(scanner: &AhoCorasick, patterns: &'static [&'static str], body: &str) -> Vec<&'static str> {
    let mut seen = BTreeSet::new();
    for m in scanner.find_overlapping_iter(body) {
        seen.insert(m.pattern().as_usize());
    }
    seen.into_iter().map(|i| patterns[i]).collect()
}

/// Distinct high-priority threat keywords found in `body`
pub fn scan_threat_keywords(body: &str) -> Vec<&'static str> {
    distinct_matches(&THREAT_SCANNER, &THREAT_KEYWORDS, body)
}

/// Distinct insider-family keywords found in `body`
pub fn scan_insider_keywords(body: &str) -> Vec<&'static str> {
    distinct_matches(&INSIDER_SCANNER, &INSIDER_KEYWORDS, body)
}

/// First infection-capable keyword found in `body`, if any
pub fn scan_infection_keyword(body: &str) -> Option<&'static str> {
    INFECTION_SCANNER
        .find(body)
        .map(|m| INFECTION_KEYWORDS[m.pattern().as_usize()])
}

/// Classified threat families driving the response strategy
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThreatType {
    Malware,
    Ddos,
    InsiderThreat,
    ResourceAnomaly,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Malware => "malware",
            ThreatType::Ddos => "ddos",
            ThreatType::InsiderThreat => "insider_threat",
            ThreatType::ResourceAnomaly => "resource_anomaly",
        }
    }
}

impl fmt::Display for ThreatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
