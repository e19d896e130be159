/*
 * This file is part of pciscope.
 *
 * Copyright (C) 2025 pciscope contributors
 *
 * pciscope is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * pciscope is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with pciscope. If not, see <https://www.gnu.org/licenses/>.
 */

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, warn};

use pciscope::config::{self, SessionConfig};
use pciscope::logger;
use pciscope::{Device, LookupIds, Session};

#[derive(Parser, Debug)]
#[command(name = "pciscope")]
#[command(about = "List PCI devices and inspect their configuration space")]
#[command(version)]
struct Args {
    /// Show only devices in the selected slot: [[[domain]:]bus]:][slot][.func]
    #[arg(short = 's', value_name = "SLOT")]
    slot: Option<String>,

    /// Show only devices with the selected ids: [vendor]:[device][:class[:progif]]
    #[arg(short = 'd', value_name = "IDS")]
    ids: Option<String>,

    /// Show numeric ids (twice: names and numbers)
    #[arg(short = 'n', action = clap::ArgAction::Count)]
    numeric: u8,

    /// Be verbose
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Hex dump of config space (repeat for 256 and 4096 bytes)
    #[arg(short = 'x', action = clap::ArgAction::Count)]
    hex: u8,

    /// Access method
    #[arg(short = 'A', value_name = "METHOD")]
    method: Option<String>,

    /// Use this pci.ids file
    #[arg(short = 'i', value_name = "FILE")]
    id_file: Option<PathBuf>,

    /// Read device data from an lspci -x style dump
    #[arg(short = 'F', value_name = "FILE")]
    dump: Option<PathBuf>,

    /// Set an access method parameter
    #[arg(short = 'O', value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Session config file (default: XDG config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Record config space writes to an audit log
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = logger::DEFAULT_LOG_PATH)]
    logging: Option<PathBuf>,

    /// List access methods and exit
    #[arg(long)]
    list_methods: bool,
}

fn init_tracing() {
    let filter = std::env::var("PCISCOPE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut cfg = match &args.config {
        Some(path) => config::try_load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => config::load_config(),
    };

    if let Some(method) = &args.method {
        cfg.method = method.clone();
    }
    if let Some(dump) = &args.dump {
        cfg.method = "dump".to_string();
        cfg.params
            .insert("dump.name".to_string(), dump.to_string_lossy().into_owned());
    }
    for kv in &args.params {
        let Some((k, v)) = kv.split_once('=') else {
            bail!("parameter '{}' is not of the form KEY=VALUE", kv);
        };
        cfg.params.insert(k.to_string(), v.to_string());
    }
    if let Some(ids) = &args.id_file {
        cfg.id_file_name = Some(ids.clone());
    }
    match args.numeric {
        0 => {}
        1 => cfg.numeric_ids = true,
        _ => {
            cfg.numeric_ids = false;
            cfg.id_lookup_mode.push("mixed".to_string());
        }
    }
    config::validate_config(&cfg).context("invalid session settings")?;
    Ok(cfg)
}

fn hex_len(level: u8) -> usize {
    match level {
        0 => 0,
        1 => 64,
        2 => 256,
        _ => 4096,
    }
}

fn print_hex(dev: &mut Device<'_>, len: usize) {
    let data = match dev.read(0, len) {
        Ok(d) => d,
        Err(e) => {
            debug!("{}: full read failed ({}), falling back to 64 bytes", dev.addr(), e);
            match dev.read(0, 64) {
                Ok(d) => d,
                Err(e) => {
                    warn!("{}: cannot read config space: {}", dev.addr(), e);
                    return;
                }
            }
        }
    };
    for (row, chunk) in data.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("{:02x}: {}", row * 16, bytes.join(" "));
    }
    println!();
}

fn print_verbose(session: &Session, dev: &mut Device<'_>, level: u8) -> pciscope::Result<()> {
    if let (Ok(sv), Ok(sd)) = (dev.subsys_vendor_id(), dev.subsys_id()) {
        if sv != 0 && sv != 0xffff {
            let ids = LookupIds::new()
                .vendor(dev.vendor_id()?)
                .device(dev.device_id()?)
                .subvendor(sv)
                .subdev(sd);
            if let Some(name) = session.lookup(ids).subsystem_vendor_device()? {
                println!("\tSubsystem: {}", name);
            }
        }
    }
    if let Ok(Some(slot)) = dev.phys_slot() {
        println!("\tPhysical Slot: {}", slot);
    }
    if let Ok(Some(label)) = dev.label() {
        println!("\tDeviceName: {}", label);
    }
    if let Ok(irq) = dev.irq() {
        if irq != 0 {
            println!("\tIRQ {}", irq);
        }
    }
    if let Ok(Some(node)) = dev.numa_node() {
        println!("\tNUMA node: {}", node);
    }
    if let Ok(Some(group)) = dev.iommu_group() {
        println!("\tIOMMU group: {}", group);
    }

    let bases = dev.base_addr().unwrap_or_default();
    let sizes = dev.size().unwrap_or_default();
    for (i, &bar) in bases.iter().enumerate() {
        if bar == 0 {
            continue;
        }
        let size = sizes.get(i).copied().unwrap_or(0);
        if bar & 1 != 0 {
            print!("\tRegion {}: I/O ports at {:x}", i, bar & !0x3);
        } else {
            print!("\tRegion {}: Memory at {:x}", i, bar & !0xf);
            print!(" ({}-bit, {})", if bar & 0x4 != 0 { 64 } else { 32 },
                if bar & 0x8 != 0 { "prefetchable" } else { "non-prefetchable" });
        }
        if size != 0 {
            print!(" [size={:#x}]", size);
        }
        println!();
    }
    if let Ok(rom) = dev.rom_base_addr() {
        if rom != 0 {
            println!("\tExpansion ROM at {:x}", rom & !0x7ff);
        }
    }

    if level > 1 {
        match dev.caps() {
            Ok(caps) => {
                for cap in caps {
                    println!("\tCapabilities: {}", cap);
                }
            }
            Err(e) => warn!("{}: capability walk failed: {}", dev.addr(), e),
        }
    }
    if let Ok(Some(driver)) = dev.driver() {
        println!("\tKernel driver in use: {}", driver);
    }
    if let Ok(Some(alias)) = dev.module_alias() {
        println!("\tModule alias: {}", alias);
    }
    Ok(())
}

fn print_device(session: &Session, dev: &mut Device<'_>, args: &Args) -> pciscope::Result<()> {
    let addr = dev.addr();
    let slot = if addr.domain == 0 && !session.buscentric() {
        format!("{:02x}:{:02x}.{:x}", addr.bus, addr.dev, addr.func)
    } else {
        addr.to_string()
    };
    let class = dev
        .device_class_name()?
        .unwrap_or_else(|| format!("Class {}", dev.device_class().map(|c| c.to_string()).unwrap_or_default()));
    let ids = LookupIds::new().vendor(dev.vendor_id()?).device(dev.device_id()?);
    let name = session.lookup(ids).vendor_device()?.unwrap_or_default();
    let rev = match dev.revision() {
        Ok(r) if r != 0 => format!(" (rev {:02x})", r),
        _ => String::new(),
    };
    println!("{} {}: {}{}", slot, class, name, rev);

    if args.verbose > 0 {
        print_verbose(session, dev, args.verbose)?;
        if args.hex == 0 {
            println!();
        }
    }
    if args.hex > 0 {
        print_hex(dev, hex_len(args.hex));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    if args.list_methods {
        let mut i = 0;
        while let Some(name) = Session::method_name(i) {
            println!("{:2} {}", i, name);
            i += 1;
        }
        return Ok(());
    }

    if unsafe { libc::geteuid() } != 0 && args.dump.is_none() {
        warn!("not running as root: configuration space beyond the first 64 bytes is unavailable");
    }

    let cfg = build_config(&args)?;

    if let Some(path) = &args.logging {
        logger::init_logging(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        logger::log_event("startup", serde_json::json!({
            "args": std::env::args().collect::<Vec<_>>(),
            "method": cfg.method,
        }));
    }

    let session = Session::from_config(&cfg).context("failed to open PCI access")?;
    session.scan_bus().context("bus scan failed")?;

    let mut filter = session.filter();
    if let Some(slot) = &args.slot {
        filter.set_slot_filter(slot).context("bad slot filter")?;
    }
    if let Some(ids) = &args.ids {
        filter.set_id_filter(ids).context("bad id filter")?;
    }
    debug!("Filter: {}", filter);

    for mut dev in session.devices()? {
        match filter.matches(&mut dev) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("{}: {}", dev.addr(), e);
                continue;
            }
        }
        if let Err(e) = print_device(&session, &mut dev, &args) {
            warn!("{}: {}", dev.addr(), e);
        }
    }

    logger::shutdown_logging();
    Ok(())
}
