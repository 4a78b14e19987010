//! Final simulation report: stdout summary plus a single-row CSV

use crate::network::NodeSnapshot;
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Write;
use std::path::Path;

#[derive(Clone, Debug)]
pub struct FinalReport {
    /// Attack packets that survived every firewall (summed over nodes)
    pub total_leakage: u64,
    pub total_overload_ticks: u64,
    pub nodes_alive: usize,
    pub nodes_total: usize,
    pub total_pings_answered: u64,
    pub refused_cfps: u64,
    pub attack_start: Option<DateTime<Utc>>,
    pub mitigation_start: Option<DateTime<Utc>>,
    pub node_status: Vec<NodeSnapshot>,
    /// JIDs the attackers were configured against
    pub victims: Vec<String>,
    pub victim_peak_cpu: f64,
    pub victim_crashed: bool,
}

impl FinalReport {
    /// Seconds from first attack to first mitigation, when both happened
    pub fn time_to_mitigation_secs(&self) -> Option<f64> {
        match (self.attack_start, self.mitigation_start) {
            (Some(attack), Some(mitigation)) => {
                Some((mitigation - attack).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    pub fn csv_header() -> &'static str {
        "Raw_Leakage_Count,Overload_Ticks,Nodes_Alive,Nodes_Total,\
         Metric4_Service_Availability,Refused_CFPs,Metric3_Response_Time,\
         Metric6_Victim_Peak_CPU,Metric7_Victim_Crashed"
    }

    pub fn csv_row(&self) -> String {
        let response_time = self
            .time_to_mitigation_secs()
            .map(|s| format!("{:.3}s", s))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "{},{},{},{},{} Pings OK,{},{},{:.1}%,{}",
            self.total_leakage,
            self.total_overload_ticks,
            self.nodes_alive,
            self.nodes_total,
            self.total_pings_answered,
            self.refused_cfps,
            response_time,
            self.victim_peak_cpu,
            if self.victim_crashed { "YES" } else { "NO" }
        )
    }

    pub fn write_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", Self::csv_header())?;
        writeln!(file, "{}", self.csv_row())?;
        Ok(())
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "================ SIMULATION REPORT ================")?;
        writeln!(f, "DDoS leakage (packets through):   {}", self.total_leakage)?;
        writeln!(f, "CPU overload ticks (>90%):        {}", self.total_overload_ticks)?;
        writeln!(
            f,
            "Nodes alive:                      {}/{}",
            self.nodes_alive, self.nodes_total
        )?;
        writeln!(f, "Pings answered:                   {}", self.total_pings_answered)?;
        writeln!(f, "Refused CFPs:                     {}", self.refused_cfps)?;
        match self.attack_start {
            Some(t) => writeln!(f, "Attack start:                     {}", t.to_rfc3339())?,
            None => writeln!(f, "Attack start:                     n/a")?,
        }
        match self.mitigation_start {
            Some(t) => writeln!(f, "First mitigation:                 {}", t.to_rfc3339())?,
            None => writeln!(f, "First mitigation:                 n/a")?,
        }
        if let Some(secs) = self.time_to_mitigation_secs() {
            writeln!(f, "Time to mitigation:               {:.3}s", secs)?;
        }
        writeln!(f, "Victim peak CPU:                  {:.1}%", self.victim_peak_cpu)?;
        writeln!(
            f,
            "Victim crashed:                   {}",
            if self.victim_crashed { "YES" } else { "NO" }
        )?;
        writeln!(f, "--------------------------------------------------")?;
        for node in &self.node_status {
            writeln!(
                f,
                "{}: cpu_peak={:.1}% ddos_rx={} pings={} infected={} compromised={} dead={}",
                node.jid,
                node.cpu_peak,
                node.ddos_packets_received,
                node.pings_answered,
                node.is_infected,
                node.compromised,
                node.node_dead
            )?;
        }
        write!(f, "==================================================")
    }
}
