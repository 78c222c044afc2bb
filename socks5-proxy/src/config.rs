//! Command-line configuration.

use std::fmt;
use std::time::Duration;

pub const USAGE: &str = "[-4] [-6] [--listenAddress <HOST>] [--listenPort <PORT>] [-v]";

pub const DEFAULT_LISTEN_ADDRESS: &str = "localhost";
pub const DEFAULT_LISTEN_PORT: u16 = 1080;

pub const PREGREETING_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const CLOSE_GRACE_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code for a usage error, matching the BSD `sysexits.h` convention the teacher
/// workspace's CLI tools also follow.
pub const EX_USAGE: i32 = 64;
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Both,
    Ipv4Only,
    Ipv6Only,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: String,
    pub listen_port: u16,
    pub family: AddressFamily,
    pub verbose: bool,
    pub pregreeting_timeout: Duration,
    pub connect_timeout: Duration,
    pub close_grace_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_owned(),
            listen_port: DEFAULT_LISTEN_PORT,
            family: AddressFamily::Both,
            verbose: false,
            pregreeting_timeout: PREGREETING_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            close_grace_timeout: CLOSE_GRACE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UsageError {}

/// What to do after parsing: run with this config, or print usage and exit cleanly.
pub enum Action {
    Run(Config),
    ShowUsage,
}

pub fn parse_args(mut input: &[&str]) -> Result<Action, UsageError> {
    let mut config = Config::default();
    let mut saw_v4_only = false;
    let mut saw_v6_only = false;

    loop {
        match input {
            ["-4", rest @ ..] => {
                saw_v4_only = true;
                config.family = AddressFamily::Ipv4Only;
                input = rest;
            }
            ["-6", rest @ ..] => {
                saw_v6_only = true;
                config.family = AddressFamily::Ipv6Only;
                input = rest;
            }
            ["--listenAddress", value, rest @ ..] => {
                config.listen_address = (*value).to_owned();
                input = rest;
            }
            ["--listenPort", value, rest @ ..] => {
                config.listen_port = value
                    .parse()
                    .map_err(|e| UsageError(format!("listen port malformed: {e}")))?;
                input = rest;
            }
            ["-v" | "--verbose", rest @ ..] => {
                config.verbose = true;
                input = rest;
            }
            ["-h" | "--help", ..] => return Ok(Action::ShowUsage),
            [unexpected, ..] => return Err(UsageError(format!("unexpected argument: {unexpected}"))),
            [] => break,
        }
    }

    if saw_v4_only && saw_v6_only {
        return Err(UsageError("-4 and -6 are mutually exclusive".to_owned()));
    }

    Ok(Action::Run(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(action: Action) -> Config {
        match action {
            Action::Run(config) => config,
            Action::ShowUsage => panic!("expected Action::Run"),
        }
    }

    #[test]
    fn defaults_are_both_families_on_default_port() {
        let config = run_config(parse_args(&[]).unwrap());
        assert_eq!(config.family, AddressFamily::Both);
        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
        assert!(!config.verbose);
    }

    #[test]
    fn both_v4_and_v6_only_is_a_usage_error() {
        assert!(parse_args(&["-4", "-6"]).is_err());
    }

    #[test]
    fn missing_option_argument_is_a_usage_error() {
        assert!(parse_args(&["--listenPort"]).is_err());
    }

    #[test]
    fn listen_address_and_port_are_parsed() {
        let config = run_config(parse_args(&["--listenAddress", "0.0.0.0", "--listenPort", "9050"]).unwrap());
        assert_eq!(config.listen_address, "0.0.0.0");
        assert_eq!(config.listen_port, 9050);
    }

    #[test]
    fn help_short_circuits_to_usage() {
        assert!(matches!(parse_args(&["--help"]).unwrap(), Action::ShowUsage));
    }
}
