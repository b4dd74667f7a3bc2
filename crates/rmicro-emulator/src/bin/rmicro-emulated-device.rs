//! Emulated device on standard input/output
//!
//! Runs an [`EmulatedDevice`] as a host binary, so it can be "flashed" with
//! [`rmicro_emulator::HostFlasher`] and reached over pipes.
//!
//! Usage: `rmicro-emulated-device [--silent] [--no-confirm] [--nonce N]`

use std::io::{self, Read, Write};

use rmicro_emulator::{EmulatedDevice, EmulatorConfig};

fn parse_args() -> Result<EmulatorConfig, String> {
    let mut config = EmulatorConfig {
        banner: Some(format!("rmicro emulated device (pid {})", std::process::id())),
        ..Default::default()
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--silent" => config.reply_to_start = false,
            "--no-confirm" => config.confirm = false,
            "--nonce" => {
                let value = args.next().ok_or("--nonce needs a value")?;
                config.nonce_seed = value
                    .parse()
                    .map_err(|_| format!("invalid nonce: {}", value))?;
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(config)
}

fn flush(device: &mut EmulatedDevice, out: &mut impl Write) -> io::Result<()> {
    if device.pending() > 0 {
        out.write_all(&device.take(usize::MAX))?;
        out.flush()?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut device = EmulatedDevice::new(parse_args()?)?;
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut buf = [0u8; 256];

    flush(&mut device, &mut stdout)?;
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        device.receive(&buf[..n])?;
        flush(&mut device, &mut stdout)?;
    }
    Ok(())
}
