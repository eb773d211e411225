//! Subnet host discovery through an external nmap ping scan.
//!
//! The scanner is spawned with XML output on stdout and the report is
//! decoded from the pipe while the scan is still running; nothing here
//! interprets the network itself.

use log::{debug, info};
use serde::Deserialize;
use std::io::{self, BufReader};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("could not launch {0}: {1}")]
    Launch(String, #[source] io::Error),
    #[error("malformed scan report: {0}")]
    ReportDecode(#[from] quick_xml::DeError),
    #[error("{0} exited with {1}")]
    ScanProcess(String, ExitStatus),
    #[error("error waiting for {0}: {1}")]
    ScanWait(String, #[source] io::Error),
}

/// Produces a live-host report for a subnet. The external tool sits behind
/// this seam so the command layer can run against a stub.
pub trait Scanner {
    fn discover(&self, subnet: Ipv4Addr) -> Result<ScanReport, ScanError>;
}

/// Which host records `ScanReport::addresses` keeps. The scanner reports
/// every probed host with a state; whether non-up entries are interesting
/// is the caller's call, not the decoder's.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateFilter {
    Any,
    Up,
}

/// Decoded form of the scanner's XML report. Only the per-host address is
/// consumed downstream; the rest is carried for logging.
#[derive(Debug, Deserialize)]
pub struct ScanReport {
    #[serde(rename = "@scanner")]
    pub scanner: Option<String>,
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "@start")]
    pub start: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<Host>,
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Deserialize)]
pub struct Host {
    pub status: Status,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub times: Option<Times>,
}

#[derive(Debug, Deserialize)]
pub struct Status {
    #[serde(rename = "@state")]
    pub state: HostState,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    Down,
    Skipped,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addrtype: Option<String>,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Times {
    #[serde(rename = "@srtt")]
    pub srtt: Option<i64>,
    #[serde(rename = "@rttvar")]
    pub rttvar: Option<i64>,
    #[serde(rename = "@to")]
    pub to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RunStats {
    pub finished: Option<Finished>,
    pub hosts: Option<HostCounts>,
}

#[derive(Debug, Deserialize)]
pub struct Finished {
    #[serde(rename = "@timestr")]
    pub timestr: Option<String>,
    #[serde(rename = "@elapsed")]
    pub elapsed: Option<f32>,
    #[serde(rename = "@summary")]
    pub summary: Option<String>,
    #[serde(rename = "@exit")]
    pub exit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HostCounts {
    #[serde(rename = "@up")]
    pub up: u32,
    #[serde(rename = "@down")]
    pub down: u32,
    #[serde(rename = "@total")]
    pub total: u32,
}

impl ScanReport {
    /// One address string per host record, in report order. The first
    /// address entry is the host's network address; the scanner appends
    /// hardware addresses after it when it knows them.
    pub fn addresses(&self, filter: StateFilter) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|host| match filter {
                StateFilter::Any => true,
                StateFilter::Up => host.status.state == HostState::Up,
            })
            .filter_map(|host| host.addresses.first())
            .map(|address| address.addr.clone())
            .collect()
    }
}

/// Mask `addr` down to the /24 network base used as the scan target.
pub fn subnet_base(addr: Ipv4Addr) -> Ipv4Addr {
    let octets = addr.octets();
    Ipv4Addr::new(octets[0], octets[1], octets[2], 0)
}

/// Runs `nmap -sn -oX - <subnet>/24` and decodes its report.
pub struct Nmap {
    program: PathBuf,
}

impl Nmap {
    pub fn new() -> Nmap {
        Nmap::with_program("nmap")
    }

    /// Use a specific binary instead of `nmap` from `$PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Nmap {
        Nmap {
            program: program.into(),
        }
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl Default for Nmap {
    fn default() -> Nmap {
        Nmap::new()
    }
}

impl Scanner for Nmap {
    fn discover(&self, subnet: Ipv4Addr) -> Result<ScanReport, ScanError> {
        let target = format!("{}/24", subnet);
        info!("scanning {} with {}", target, self.program_name());

        let mut child = Command::new(&self.program)
            .args(["-sn", "-oX", "-"])
            .arg(&target)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| ScanError::Launch(self.program_name(), err))?;

        // Decode straight off the pipe so parsing overlaps the scan, then
        // reap the process.
        let stdout = child.stdout.take().expect("child stdout was piped");
        let decoded = quick_xml::de::from_reader(BufReader::new(stdout));
        let status = child
            .wait()
            .map_err(|err| ScanError::ScanWait(self.program_name(), err))?;

        // Exit status takes precedence: a failed scan truncates the
        // stream too, and the decode fallout would mask the real cause.
        if !status.success() {
            return Err(ScanError::ScanProcess(self.program_name(), status));
        }
        let report: ScanReport = decoded?;
        debug!(
            "scan report: {} host record(s), summary {:?}",
            report.hosts.len(),
            report
                .runstats
                .as_ref()
                .and_then(|stats| stats.finished.as_ref())
                .and_then(|finished| finished.summary.as_deref())
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use crate::scan::*;

    const SAMPLE_REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/bin/../share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -sn -oX - 10.0.0.0/24" start="1659881161" startstr="Sun Aug  7 16:06:01 2022" version="7.92" xmloutputversion="1.03">
<verbose level="0"/>
<debugging level="0"/>
<host><status state="up" reason="arp-response"/>
<address addr="10.0.0.1" addrtype="ipv4"/>
<address addr="A4:91:B1:11:22:33" addrtype="mac" vendor="Example"/>
<hostnames><hostname name="router.lan" type="PTR"/></hostnames>
<times srtt="210" rttvar="3765" to="100000"/>
</host>
<host><status state="down" reason="no-response"/>
<address addr="10.0.0.2" addrtype="ipv4"/>
<hostnames></hostnames>
</host>
<host><status state="up" reason="syn-ack"/>
<address addr="10.0.0.5" addrtype="ipv4"/>
<hostnames/>
<times srtt="4587" rttvar="4059" to="100000"/>
</host>
<runstats><finished time="1659881166" timestr="Sun Aug  7 16:06:06 2022" summary="Nmap done; 256 IP addresses (2 hosts up) scanned in 4.91 seconds" elapsed="4.91" exit="success"/><hosts up="2" down="254" total="256"/>
</runstats>
</nmaprun>
"#;

    fn sample_report() -> ScanReport {
        quick_xml::de::from_str(SAMPLE_REPORT).unwrap()
    }

    #[test]
    fn decodes_every_host_record() {
        let report = sample_report();
        assert_eq!(report.hosts.len(), 3);
        assert_eq!(report.scanner.as_deref(), Some("nmap"));
        assert_eq!(report.hosts[0].status.state, HostState::Up);
        assert_eq!(report.hosts[1].status.state, HostState::Down);
        let counts = report.runstats.unwrap().hosts.unwrap();
        assert_eq!((counts.up, counts.down, counts.total), (2, 254, 256));
    }

    #[test]
    fn addresses_preserve_report_order() {
        let report = sample_report();
        assert_eq!(
            report.addresses(StateFilter::Any),
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.5"]
        );
    }

    #[test]
    fn up_filter_drops_down_hosts() {
        let report = sample_report();
        assert_eq!(
            report.addresses(StateFilter::Up),
            vec!["10.0.0.1", "10.0.0.5"]
        );
    }

    #[test]
    fn network_address_wins_over_hardware_address() {
        let report = sample_report();
        assert_eq!(report.addresses(StateFilter::Any)[0], "10.0.0.1");
    }

    #[test]
    fn empty_report_has_no_addresses() {
        let report: ScanReport = quick_xml::de::from_str(
            r#"<nmaprun scanner="nmap"><runstats><hosts up="0" down="256" total="256"/></runstats></nmaprun>"#,
        )
        .unwrap();
        assert!(report.hosts.is_empty());
        assert!(report.addresses(StateFilter::Any).is_empty());
    }

    #[test]
    fn unrecognized_state_decodes_as_unknown() {
        let report: ScanReport = quick_xml::de::from_str(
            r#"<nmaprun><host><status state="filtered"/><address addr="10.0.0.9" addrtype="ipv4"/></host></nmaprun>"#,
        )
        .unwrap();
        assert_eq!(report.hosts[0].status.state, HostState::Unknown);
        assert!(report.addresses(StateFilter::Up).is_empty());
    }

    #[test]
    fn malformed_report_is_an_error() {
        let err = quick_xml::de::from_str::<ScanReport>("<nmaprun><host>").unwrap_err();
        let _ = ScanError::from(err);
    }

    #[test]
    fn subnet_base_masks_to_slash_24() {
        assert_eq!(
            subnet_base(Ipv4Addr::new(192, 168, 1, 42)),
            Ipv4Addr::new(192, 168, 1, 0)
        );
        assert_eq!(
            subnet_base(Ipv4Addr::new(10, 0, 0, 0)),
            Ipv4Addr::new(10, 0, 0, 0)
        );
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let scanner = Nmap::with_program("/nonexistent/bin/nmap");
        let err = scanner.discover(Ipv4Addr::new(192, 168, 1, 0)).unwrap_err();
        assert!(matches!(err, ScanError::Launch(_, _)));
    }

    #[test]
    fn nonzero_exit_is_a_process_error() {
        // `false` ignores the nmap arguments and exits 1 with empty output.
        let scanner = Nmap::with_program("false");
        let err = scanner.discover(Ipv4Addr::new(192, 168, 1, 0)).unwrap_err();
        assert!(matches!(err, ScanError::ScanProcess(_, _)));
    }

    struct StubScanner;

    impl Scanner for StubScanner {
        fn discover(&self, _subnet: Ipv4Addr) -> Result<ScanReport, ScanError> {
            Ok(sample_report())
        }
    }

    #[test]
    fn scanner_seam_takes_a_stub() {
        let scanner: Box<dyn Scanner> = Box::new(StubScanner);
        let report = scanner.discover(Ipv4Addr::new(10, 0, 0, 0)).unwrap();
        assert_eq!(report.addresses(StateFilter::Up).len(), 2);
    }
}
