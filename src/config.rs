//! Harness configuration
//!
//! Mirrors the command-line surface: scenario roots, the device under test,
//! and runner switches.

use std::path::PathBuf;

/// Default SIP port the device under test listens on.
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Binary looked up on `PATH` when none is configured.
pub const DEFAULT_SIPP_BINARY: &str = "sipp";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Scenario database roots (`--sipp-scen`, repeatable)
    pub sipp_scen: Vec<PathBuf>,
    /// Port the device under test listens on for SIP requests
    pub sip_port: u16,
    /// Address of the device under test
    pub dut_ip: String,
    /// Name or path of the SIPp executable
    pub sipp_binary: String,
    /// Print one line per test
    pub verbose: bool,
    /// Only run items whose name or keywords contain this
    pub keyword: Option<String>,
    /// Stop after the first failure
    pub exitfirst: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            sipp_scen: Vec::new(),
            sip_port: DEFAULT_SIP_PORT,
            dut_ip: "127.0.0.1".to_string(),
            sipp_binary: DEFAULT_SIPP_BINARY.to_string(),
            verbose: false,
            keyword: None,
            exitfirst: false,
        }
    }
}

impl HarnessConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scenario database root
    pub fn with_sipp_scen(mut self, path: impl Into<PathBuf>) -> Self {
        self.sipp_scen.push(path.into());
        self
    }

    /// Set the SIP port of the device under test
    pub fn with_sip_port(mut self, port: u16) -> Self {
        self.sip_port = port;
        self
    }

    /// Set the address of the device under test
    pub fn with_dut_ip(mut self, ip: impl Into<String>) -> Self {
        self.dut_ip = ip.into();
        self
    }

    pub fn with_sipp_binary(mut self, binary: impl Into<String>) -> Self {
        self.sipp_binary = binary.into();
        self
    }

    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_exitfirst(mut self, exitfirst: bool) -> Self {
        self.exitfirst = exitfirst;
        self
    }

    /// The device-under-test socket as `(ip, port)`.
    pub fn proxy_socket(&self) -> (String, u16) {
        (self.dut_ip.clone(), self.sip_port)
    }
}
