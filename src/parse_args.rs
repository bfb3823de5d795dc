const HELP: &str = "\
Okto Frontend - Okto 8-bit machine frontend

Bridges the emulated SIO bus to a NetSIO peripheral emulator or a real
serial port. Locally mounted ATR images always take priority over the
remote peer.

USAGE:
  okto-frontend [OPTIONS]

OPTIONS:
  -h, --help              Prints help information
  --netsio <host[:port]>  Connect to a NetSIO peripheral emulator
                          (default port 9997; IPv6 as [addr]:port)
  --serial <device>       Pass the SIO bus through a real serial port
  --mount <N:file[:ro]>   Mount an ATR image on drive N (repeatable)
  --baud <rate>           Initial bus speed (default: 19200)
  --no-sio-patch          Disable the fast SIO bypass (realistic timing)
  --no-boot-config        Skip the config disk on first boot
  --frames <n>            Run a fixed number of frames, then exit
  -v, --verbose           Show connection and bus events
  -vv, --trace            Show all NetSIO messages
";

/// Verbosity level for debug output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    /// Connection events, mounts, errors
    Verbose = 1,
    /// All NetSIO messages
    Trace = 2,
}

#[derive(Debug)]
pub struct MountSpec {
    pub drive: u8,
    pub path: String,
    pub read_only: bool,
}

/// Parse a `N:file[:ro]` mount argument
fn parse_mount(s: &str) -> Result<MountSpec, String> {
    let (drive, rest) = s
        .split_once(':')
        .ok_or_else(|| format!("expected N:file[:ro], got '{}'", s))?;
    let drive: u8 = drive
        .parse()
        .map_err(|_| format!("bad drive number '{}'", drive))?;
    if !(1..=8).contains(&drive) {
        return Err(format!("drive number {} out of range 1-8", drive));
    }
    let (path, read_only) = match rest.strip_suffix(":ro") {
        Some(path) => (path, true),
        None => (rest, false),
    };
    if path.is_empty() {
        return Err(format!("missing image path in '{}'", s));
    }
    Ok(MountSpec {
        drive,
        path: path.to_string(),
        read_only,
    })
}

/// Split `host[:port]`; a missing or malformed port falls back to the
/// NetSIO default chosen by the caller. IPv6 literals carry their own
/// colons, so with a port they need the `[addr]:port` bracket form; a
/// bare multi-colon string is taken as a host with no port.
pub fn split_host_port(target: &str) -> (&str, Option<u16>) {
    if let Some(rest) = target.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            let port = after.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (target, None);
    }
    if target.matches(':').count() > 1 {
        return (target, None);
    }
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (target, None),
        },
        None => (target, None),
    }
}

#[derive(Debug)]
pub struct AppArgs {
    pub netsio: Option<String>,
    pub serial: Option<String>,
    pub mounts: Vec<MountSpec>,
    pub baud: Option<u32>,
    pub sio_patch: bool,
    pub boot_config: bool,
    pub frames: Option<u64>,
    pub verbosity: Verbosity,
}

pub fn parse_args() -> Result<AppArgs, pico_args::Error> {
    let mut pargs = pico_args::Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{}", HELP);
        std::process::exit(0);
    }

    let mounts = pargs.values_from_fn("--mount", parse_mount)?;

    let verbosity = if pargs.contains("--trace") || pargs.contains("-vv") {
        Verbosity::Trace
    } else if pargs.contains(["-v", "--verbose"]) {
        Verbosity::Verbose
    } else {
        Verbosity::Quiet
    };

    let args = AppArgs {
        netsio: pargs.opt_value_from_str("--netsio")?,
        serial: pargs.opt_value_from_str("--serial")?,
        mounts,
        baud: pargs.opt_value_from_str("--baud")?,
        sio_patch: !pargs.contains("--no-sio-patch"),
        boot_config: !pargs.contains("--no-boot-config"),
        frames: pargs.opt_value_from_str("--frames")?,
        verbosity,
    };

    let remaining = pargs.finish();
    if !remaining.is_empty() {
        eprintln!("Warning: unused arguments left: {:?}.", remaining);
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mount() {
        let spec = parse_mount("1:dos.atr").unwrap();
        assert_eq!((spec.drive, spec.read_only), (1, false));
        assert_eq!(spec.path, "dos.atr");

        let spec = parse_mount("3:/images/game.atr:ro").unwrap();
        assert_eq!((spec.drive, spec.read_only), (3, true));
        assert_eq!(spec.path, "/images/game.atr");

        assert!(parse_mount("dos.atr").is_err());
        assert!(parse_mount("9:dos.atr").is_err());
        assert!(parse_mount("2:").is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost"), ("localhost", None));
        assert_eq!(split_host_port("localhost:9997"), ("localhost", Some(9997)));
        assert_eq!(split_host_port("fujinet.local:bad"), ("fujinet.local:bad", None));
    }

    #[test]
    fn test_split_host_port_ipv6() {
        assert_eq!(split_host_port("fe80::1"), ("fe80::1", None));
        assert_eq!(split_host_port("[fe80::1]:9997"), ("fe80::1", Some(9997)));
        assert_eq!(split_host_port("[::1]"), ("::1", None));
        assert_eq!(split_host_port("[::1]:bad"), ("::1", None));
    }
}
