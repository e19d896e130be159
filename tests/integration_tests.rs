/*
 * Integration tests for pciscope
 *
 * These tests drive the public API end to end over the dump backend and a
 * sysfs tree built in a temporary directory.
 */

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use pciscope::config::{save_config, try_load_config, SessionConfig};
use pciscope::logger;
use pciscope::{
    AccessMethod, CapId, CapType, CapabilityId, FillFlags, LookupIds, LookupMode, PciError, Session,
};
use serial_test::serial;
use tempfile::TempDir;

const IDS: &str = "\
15d9  Super Micro Computer Inc
8086  Intel Corporation
\t1533  I210 Gigabit Network Connection
\t\t15d9 1533  X10SLM motherboard
\ta33c  Cannon Lake PCH PCI Express Root Port
C 02  Network controller
\t00  Ethernet controller
C 06  Bridge
\t04  PCI bridge
";

// Test utilities
fn nic_config() -> Vec<u8> {
    let mut cfg = vec![0u8; 256];
    cfg[0x00..0x04].copy_from_slice(&[0x86, 0x80, 0x33, 0x15]);
    cfg[0x06] = 0x10;
    cfg[0x08] = 0x03;
    cfg[0x0a..0x0c].copy_from_slice(&[0x00, 0x02]);
    cfg[0x10..0x14].copy_from_slice(&0xf7a0_0000u32.to_le_bytes());
    cfg[0x18..0x1c].copy_from_slice(&0x0000_e001u32.to_le_bytes());
    cfg[0x2c..0x30].copy_from_slice(&[0xd9, 0x15, 0x33, 0x15]);
    cfg[0x34] = 0x40;
    cfg[0x3c] = 0x11;
    // PM -> MSI -> PCI Express
    cfg[0x40..0x42].copy_from_slice(&[0x01, 0x50]);
    cfg[0x50..0x52].copy_from_slice(&[0x05, 0x70]);
    cfg[0x70..0x72].copy_from_slice(&[0x10, 0x00]);
    cfg
}

fn bridge_config() -> Vec<u8> {
    let mut cfg = vec![0u8; 64];
    cfg[0x00..0x04].copy_from_slice(&[0x86, 0x80, 0x3c, 0xa3]);
    cfg[0x0a..0x0c].copy_from_slice(&[0x04, 0x06]);
    cfg[0x0e] = 0x81;
    cfg
}

fn dump_text(entries: &[(&str, Vec<u8>)]) -> String {
    let mut out = String::new();
    for (addr, cfg) in entries {
        out.push_str(&format!("{} Test device\n", addr));
        for (row, chunk) in cfg.chunks(16).enumerate() {
            let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            out.push_str(&format!("{:02x}: {}\n", row * 16, bytes.join(" ")));
        }
        out.push('\n');
    }
    out
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pci.ids"), IDS).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn dump_config(&self) -> SessionConfig {
        let text = dump_text(&[("00:1c.0", bridge_config()), ("02:00.0", nic_config())]);
        fs::write(self.path("lspci.txt"), text).unwrap();
        let mut cfg = SessionConfig {
            method: "dump".to_string(),
            id_file_name: Some(self.path("pci.ids")),
            ..SessionConfig::default()
        };
        cfg.params
            .insert("dump.name".to_string(), self.path("lspci.txt").to_string_lossy().into_owned());
        cfg
    }

    fn sysfs_config(&self) -> SessionConfig {
        let root = self.path("sysfs");
        let dev = root.join("devices").join("0000:02:00.0");
        fs::create_dir_all(&dev).unwrap();
        fs::create_dir_all(root.join("slots").join("4")).unwrap();
        fs::write(root.join("slots/4/address"), "0000:02:00\n").unwrap();
        let attrs = [
            ("vendor", "0x8086"),
            ("device", "0x1533"),
            ("class", "0x020000"),
            ("irq", "17"),
            ("numa_node", "-1"),
            ("label", "Onboard LAN"),
            (
                "resource",
                "0x00000000f7a00000 0x00000000f7a1ffff 0x0000000000040200\n\
                 0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
                 0x000000000000e000 0x000000000000e01f 0x0000000000040101\n\
                 0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
                 0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
                 0x0000000000000000 0x0000000000000000 0x0000000000000000\n\
                 0x0000000000000000 0x0000000000000000 0x0000000000000000",
            ),
        ];
        for (name, value) in attrs {
            fs::write(dev.join(name), format!("{}\n", value)).unwrap();
        }
        fs::write(dev.join("config"), nic_config()).unwrap();
        symlink("../../../bus/pci/drivers/igb", dev.join("driver")).unwrap();
        symlink("../../../kernel/iommu_groups/7", dev.join("iommu_group")).unwrap();

        let mut cfg = SessionConfig {
            method: "linux-sysfs".to_string(),
            id_file_name: Some(self.path("pci.ids")),
            ..SessionConfig::default()
        };
        cfg.params
            .insert("sysfs.path".to_string(), root.to_string_lossy().into_owned());
        cfg
    }
}

fn open(cfg: &SessionConfig) -> Session {
    let session = Session::from_config(cfg).unwrap();
    session.scan_bus().unwrap();
    session
}

#[test]
fn test_dump_enumeration_and_names() {
    let fx = Fixture::new();
    let session = open(&fx.dump_config());
    assert_eq!(session.method(), AccessMethod::Dump);

    let mut seen = Vec::new();
    for mut dev in session.devices().unwrap() {
        seen.push((dev.addr().to_string(), dev.vendor().unwrap(), dev.device_class_name().unwrap()));
    }
    assert_eq!(
        seen,
        vec![
            (
                "0000:00:1c.0".to_string(),
                Some("Intel Corporation".to_string()),
                Some("PCI bridge".to_string())
            ),
            (
                "0000:02:00.0".to_string(),
                Some("Intel Corporation".to_string()),
                Some("Ethernet controller".to_string())
            ),
        ]
    );
}

#[test]
fn test_dump_device_fields_and_caps() {
    let fx = Fixture::new();
    let session = open(&fx.dump_config());
    let mut nic = session.get_dev(0, 2, 0, 0).unwrap();

    assert_eq!(nic.device().unwrap().as_deref(), Some("I210 Gigabit Network Connection"));
    assert_eq!(nic.subsystem_name().unwrap().as_deref(), Some("Super Micro Computer Inc X10SLM motherboard"));
    assert_eq!(nic.revision().unwrap(), 3);
    assert_eq!(nic.irq().unwrap(), 17);
    assert_eq!(nic.base_addr().unwrap(), vec![0xf7a0_0000, 0, 0xe001]);

    let caps = nic.caps().unwrap();
    let ids: Vec<CapabilityId> = caps.iter().map(|c| c.id).collect();
    assert_eq!(
        ids,
        vec![
            CapabilityId::Normal(CapId::Pm),
            CapabilityId::Normal(CapId::Msi),
            CapabilityId::Normal(CapId::Exp),
        ]
    );
    assert_eq!(nic.find_cap(CapId::Msi, CapType::Normal).unwrap(), Some(0x50));

    let mut bridge = session.get_dev(0, 0, 0x1c, 0).unwrap();
    assert!(bridge.caps().unwrap().is_empty());
}

#[test]
fn test_dump_unsupported_fields() {
    let fx = Fixture::new();
    let session = open(&fx.dump_config());
    let mut nic = session.get_dev(0, 2, 0, 0).unwrap();
    assert!(matches!(
        nic.driver(),
        Err(PciError::UnsupportedField { field: "driver", method: "dump" })
    ));
    assert!(!nic.known_fields().contains(FillFlags::DRIVER));
}

#[test]
fn test_filters_over_dump() {
    let fx = Fixture::new();
    let session = open(&fx.dump_config());

    let mut filter = session.filter();
    filter.set_id_filter("8086:1533").unwrap();
    let hits: Vec<String> = session
        .devices()
        .unwrap()
        .filter_map(|mut d| filter.matches(&mut d).unwrap().then(|| d.addr().to_string()))
        .collect();
    assert_eq!(hits, vec!["0000:02:00.0"]);

    let mut filter = session.filter();
    filter.set_slot_filter("00:1c").unwrap();
    assert_eq!(filter.slot_filter(), "*:00:1c.*");
    let hits = session
        .devices()
        .unwrap()
        .filter_map(|mut d| filter.matches(&mut d).ok())
        .filter(|m| *m)
        .count();
    assert_eq!(hits, 1);
}

#[test]
fn test_numeric_and_mixed_lookups() {
    let fx = Fixture::new();
    let session = open(&fx.dump_config());
    let lookup = session.lookup(LookupIds::new().vendor(0x8086).device(0x1533));

    session.set_id_lookup_mode(LookupMode::MIXED);
    assert_eq!(lookup.vendor().unwrap().as_deref(), Some("Intel Corporation [8086]"));

    session.set_id_lookup_mode(LookupMode::empty());
    session.set_numeric_ids(true);
    assert_eq!(lookup.vendor_device().unwrap().as_deref(), Some("8086:1533"));
}

#[test]
fn test_sysfs_session() {
    let fx = Fixture::new();
    let session = open(&fx.sysfs_config());
    assert_eq!(session.parameters().keys(), vec!["sysfs.path".to_string()]);

    let mut devs = session.devices().unwrap();
    let mut nic = devs.next().unwrap();
    assert!(devs.next().is_none());

    assert_eq!(nic.vendor_id().unwrap(), 0x8086);
    assert_eq!(nic.known_fields(), FillFlags::IDENT | FillFlags::CLASS);
    assert_eq!(nic.irq().unwrap(), 17);
    assert_eq!(nic.size().unwrap(), vec![0x20000, 0, 0x20]);
    assert_eq!(nic.label().unwrap().as_deref(), Some("Onboard LAN"));
    assert_eq!(nic.phys_slot().unwrap().as_deref(), Some("4"));
    assert_eq!(nic.driver().unwrap().as_deref(), Some("igb"));
    assert_eq!(nic.iommu_group().unwrap().as_deref(), Some("7"));
    assert_eq!(nic.numa_node().unwrap(), None);
    assert_eq!(nic.caps().unwrap().len(), 3);
}

#[test]
#[serial]
fn test_sysfs_write_is_audited() {
    let fx = Fixture::new();
    let mut cfg = fx.sysfs_config();
    cfg.writeable = true;
    let session = open(&cfg);

    let log = fx.path("audit").join("audit.json");
    logger::init_logging(&log).unwrap();
    let mut nic = session.get_dev(0, 2, 0, 0).unwrap();
    nic.write_byte(0x3c, 0x0b).unwrap();
    logger::shutdown_logging();

    assert_eq!(nic.read_byte(0x3c).unwrap(), 0x0b);
    let on_disk = fs::read(fx.path("sysfs/devices/0000:02:00.0/config")).unwrap();
    assert_eq!(on_disk[0x3c], 0x0b);

    let content = fs::read_to_string(&log).unwrap();
    let record: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(record["event"], "config_write");
    assert_eq!(record["data"]["device"], "0000:02:00.0");
    assert_eq!(record["data"]["pos"], 0x3c);
}

#[test]
fn test_read_only_session_rejects_writes() {
    let fx = Fixture::new();
    let session = open(&fx.sysfs_config());
    let mut nic = session.get_dev(0, 2, 0, 0).unwrap();
    assert!(matches!(nic.write_word(0x04, 0), Err(PciError::ReadOnly)));
}

#[test]
fn test_config_file_drives_session() {
    let fx = Fixture::new();
    let mut cfg = fx.dump_config();
    cfg.numeric_ids = true;
    let path: &Path = &fx.path("conf/config.json");
    save_config(path, &cfg).unwrap();

    let loaded = try_load_config(path).unwrap();
    assert_eq!(loaded, cfg);
    let session = open(&loaded);
    assert!(session.numeric_ids());
    let mut nic = session.get_dev(0, 2, 0, 0).unwrap();
    assert_eq!(nic.vendor().unwrap().as_deref(), Some("8086"));
}

#[test]
fn test_closed_session() {
    let fx = Fixture::new();
    let mut session = open(&fx.dump_config());
    session.close();
    assert!(matches!(session.devices(), Err(PciError::SessionClosed)));
    session.close();
}
