mod parse_args;

use std::time::{Duration, Instant};

use log::info;
use okto_sio::frame::{CommandFrame, BYTE_COMPLETE, CMD_STATUS, DEVICE_DISK_FIRST};
use okto_sio::{BusMode, ConnState, ConnStatus, DiskOp, SioSystem};
use parse_args::{parse_args, split_host_port, Verbosity};

const FRAME_DURATION: Duration = Duration::from_micros(16_667); // 60 Hz

fn main() {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error parsing arguments: {}", e);
            std::process::exit(1);
        }
    };

    let filter = match args.verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Verbose => "info",
        Verbosity::Trace => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let mut system = SioSystem::new();
    system.set_sio_patch(args.sio_patch);
    system.set_boot_config(args.boot_config);

    for mount in &args.mounts {
        if let Err(e) = system.mount(mount.drive, &mount.path, mount.read_only) {
            eprintln!("Cannot mount '{}' on D{}: {}", mount.path, mount.drive, e);
            std::process::exit(1);
        }
    }

    if let Some(target) = &args.netsio {
        let (host, port) = split_host_port(target);
        system.configure_netsio(host, port);
    } else if let Some(device) = &args.serial {
        system.configure_serial(device);
    } else {
        eprintln!("No peripheral attached; pass --netsio or --serial for a live bus");
    }

    if let Some(baud) = args.baud {
        system.bus_mut().set_baud(baud);
    }

    system.set_activity_sink(Some(Box::new(|drive: u8, op: DiskOp| {
        info!(
            "D{}: {}",
            drive,
            match op {
                DiskOp::Read => "read",
                DiskOp::Write => "write",
            }
        );
    })));

    for mount in &args.mounts {
        status_smoke_test(&mut system, mount.drive);
    }

    run(system, args.frames);
}

/// One status transaction against a freshly mounted drive, confirming the
/// bus answers before the frame loop starts
fn status_smoke_test(system: &mut SioSystem, drive: u8) {
    let bus = system.bus_mut();
    bus.set_command_line(true);
    for byte in CommandFrame::new(DEVICE_DISK_FIRST + drive - 1, CMD_STATUS, 0, 0).to_bytes() {
        bus.put_byte(byte);
    }
    bus.set_command_line(false);

    let mut response = Vec::new();
    for _ in 0..64 {
        match bus.get_byte() {
            Some(byte) => response.push(byte),
            None => break,
        }
    }
    if response.len() > 3 && response[1] == BYTE_COMPLETE {
        info!("D{}: status ok ({:02X?})", drive, &response[2..response.len() - 1]);
    } else {
        info!("D{}: no status answer", drive);
    }
}

/// Frame loop: backend housekeeping at 60 Hz plus a connection-state
/// report whenever the NetSIO link changes state
fn run(mut system: SioSystem, frames: Option<u64>) {
    let mut next_frame = Instant::now();
    let mut frame: u64 = 0;
    let mut last_state: Option<ConnState> = None;

    loop {
        system.frame_tick();

        if system.mode() == BusMode::NetSio {
            if let Some(status) = system.connection_status() {
                if last_state != Some(status.state) {
                    report_state(&status);
                    last_state = Some(status.state);
                }
            }
        }

        frame += 1;
        if let Some(limit) = frames {
            if frame >= limit {
                break;
            }
        }

        next_frame += FRAME_DURATION;
        let now = Instant::now();
        if next_frame > now {
            std::thread::sleep(next_frame - now);
        } else {
            // Dropped behind; resynchronize rather than spiral
            next_frame = now;
        }
    }
}

fn report_state(status: &ConnStatus) {
    match status.state {
        ConnState::Connected => {
            eprintln!("NetSIO: connected ({} baud)", status.baud);
        }
        ConnState::Reconnecting if status.unreachable => {
            eprintln!(
                "NetSIO: peer unreachable after {} attempts (still retrying)",
                status.error_count
            );
        }
        state => {
            info!("NetSIO: {:?} (errors: {})", state, status.error_count);
        }
    }
}
