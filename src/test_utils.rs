/*
 * Test utilities and fixtures for pciscope
 *
 * Config space images, a fake sysfs tree and a small id database shared by
 * the unit tests of several modules.
 */

use std::fs;
use std::io::Write;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};

pub const SAMPLE_IDS: &str = "\
# sample
8086  Intel Corporation
\t1533  I210 Gigabit Network Connection
\t\t15d9 1533  X10SLM motherboard
\t\t8086 0001  Ethernet Server Adapter I210-T1
\ta33c  Cannon Lake PCH PCI Express Root Port
10de  NVIDIA Corporation
C 02  Network controller
\t00  Ethernet controller
C 06  Bridge
\t04  PCI bridge
\t\t00  Normal decode
C 0c  Serial bus controller
\t03  USB controller
\t\t30  XHCI
";

fn put16(cfg: &mut [u8], pos: usize, v: u16) {
    cfg[pos..pos + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(cfg: &mut [u8], pos: usize, v: u32) {
    cfg[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
}

/// I210 NIC: legacy config space with PM -> MSI -> EXP.
pub fn nic_config() -> Vec<u8> {
    let mut cfg = vec![0u8; 256];
    put16(&mut cfg, 0x00, 0x8086);
    put16(&mut cfg, 0x02, 0x1533);
    put16(&mut cfg, 0x04, 0x0407);
    put16(&mut cfg, 0x06, 0x0010);
    cfg[0x08] = 0x03;
    put16(&mut cfg, 0x0a, 0x0200);
    put32(&mut cfg, 0x10, 0xf7a0_0000);
    put32(&mut cfg, 0x18, 0x0000_e001);
    put32(&mut cfg, 0x1c, 0xf7b0_0000);
    put16(&mut cfg, 0x2c, 0x15d9);
    put16(&mut cfg, 0x2e, 0x1533);
    cfg[0x34] = 0x40;
    cfg[0x3c] = 0x11;
    cfg[0x3d] = 0x01;
    cfg[0x40] = 0x01;
    cfg[0x41] = 0x50;
    put16(&mut cfg, 0x42, 0xc823);
    cfg[0x50] = 0x05;
    cfg[0x51] = 0x70;
    cfg[0x70] = 0x10;
    cfg[0x71] = 0x00;
    cfg
}

/// Root port as seen by an unprivileged reader: the 64-byte header only.
pub fn bridge_config() -> Vec<u8> {
    let mut cfg = vec![0u8; 64];
    put16(&mut cfg, 0x00, 0x8086);
    put16(&mut cfg, 0x02, 0xa33c);
    put16(&mut cfg, 0x06, 0x0010);
    cfg[0x08] = 0xf0;
    put16(&mut cfg, 0x0a, 0x0604);
    cfg[0x0e] = 0x81;
    cfg[0x34] = 0x40;
    cfg
}

/// Render a config image the way `lspci -x` prints it.
pub fn to_dump(addr: &str, cfg: &[u8]) -> String {
    let mut out = format!("{} Fixture device\n", addr);
    for (row, chunk) in cfg.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        out.push_str(&format!("{:02x}: {}\n", row * 16, bytes.join(" ")));
    }
    out.push('\n');
    out
}

/// Write [`SAMPLE_IDS`] to a temporary file.
pub fn sample_ids_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(SAMPLE_IDS.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// VPD of the fixture NIC: identifier string tag followed by the end tag.
pub const NIC_VPD: &[u8] = b"\x82\x04\x00I210\x78";

/// Minimal `/sys/bus/pci` lookalike in a temporary directory.
pub struct FakeSysfs {
    dir: TempDir,
}

impl Default for FakeSysfs {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeSysfs {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("devices")).unwrap();
        fs::create_dir_all(dir.path().join("slots")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a device directory with the given text attributes and config image.
    pub fn add_device(&self, addr: &str, attrs: &[(&str, &str)], config: &[u8]) -> PathBuf {
        let path = self.dir.path().join("devices").join(addr);
        fs::create_dir_all(&path).unwrap();
        for (name, value) in attrs {
            fs::write(path.join(name), format!("{}\n", value)).unwrap();
        }
        fs::write(path.join("config"), config).unwrap();
        path
    }

    pub fn add_slot(&self, name: &str, address: &str) {
        let slot = self.dir.path().join("slots").join(name);
        fs::create_dir_all(&slot).unwrap();
        fs::write(slot.join("address"), format!("{}\n", address)).unwrap();
    }

    fn link(&self, dev: &Path, name: &str, target: &str) {
        symlink(target, dev.join(name)).unwrap();
    }

    pub fn add_nic(&self, addr: &str) -> PathBuf {
        let resource = [
            "0x00000000f7a00000 0x00000000f7a1ffff 0x0000000000040200",
            "0x0000000000000000 0x0000000000000000 0x0000000000000000",
            "0x000000000000e000 0x000000000000e01f 0x0000000000040101",
            "0x00000000f7b00000 0x00000000f7b03fff 0x0000000000040200",
            "0x0000000000000000 0x0000000000000000 0x0000000000000000",
            "0x0000000000000000 0x0000000000000000 0x0000000000000000",
            "0x0000000000000000 0x0000000000000000 0x0000000000000000",
        ]
        .join("\n");
        let dev = self.add_device(
            addr,
            &[
                ("vendor", "0x8086"),
                ("device", "0x1533"),
                ("class", "0x020000"),
                ("revision", "0x03"),
                ("subsystem_vendor", "0x15d9"),
                ("subsystem_device", "0x1533"),
                ("irq", "17"),
                ("numa_node", "-1"),
                ("modalias", "pci:v00008086d00001533sv000015D9sd00001533bc02sc00i00"),
                ("resource", &resource),
            ],
            &nic_config(),
        );
        fs::write(dev.join("vpd"), NIC_VPD).unwrap();
        self.link(&dev, "driver", "../../../bus/pci/drivers/igb");
        self.link(&dev, "iommu_group", "../../../kernel/iommu_groups/14");
        // slot address drops the function number
        if let Some((slot_addr, _)) = addr.rsplit_once('.') {
            self.add_slot("4", slot_addr);
        }
        dev
    }

    pub fn add_bridge(&self, addr: &str) -> PathBuf {
        self.add_device(
            addr,
            &[
                ("vendor", "0x8086"),
                ("device", "0xa33c"),
                ("class", "0x060400"),
                ("revision", "0xf0"),
                ("label", "Onboard PCIe Root"),
                ("numa_node", "0"),
            ],
            &bridge_config(),
        )
    }
}
