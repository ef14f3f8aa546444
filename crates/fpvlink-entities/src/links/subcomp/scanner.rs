use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fpvlink_core::{FreqBand, InterfaceIndex, InterfaceKind, PhysicalRadioInterface};

/// USB vendor ids of the serial bridges found on SiK modems (FTDI, Silicon Labs)
const SIK_USB_VIDS: [u16; 2] = [0x0403, 0x10c4];

/// Source of physical radio interfaces
pub trait InterfaceScanner: Send {
    fn scan(&mut self) -> io::Result<Vec<PhysicalRadioInterface>>;
}

/// Scans sysfs for WiFi cards and the serial port list for SiK modems
pub struct SysfsScanner {
    net_root: PathBuf,
    scan_serial: bool,
}

impl SysfsScanner {
    pub fn new() -> Self {
        Self {
            net_root: PathBuf::from("/sys/class/net"),
            scan_serial: true,
        }
    }

    pub fn with_root(net_root: impl Into<PathBuf>, scan_serial: bool) -> Self {
        Self {
            net_root: net_root.into(),
            scan_serial,
        }
    }

    fn scan_wifi(&self, first_index: InterfaceIndex) -> io::Result<Vec<PhysicalRadioInterface>> {
        let mut names: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.net_root)? {
            let entry = entry?;
            let path = entry.path();
            if path.join("phy80211").exists() {
                names.push((entry.file_name().to_string_lossy().into_owned(), path));
            }
        }
        names.sort();

        let mut found = Vec::new();
        for (i, (name, path)) in names.into_iter().enumerate() {
            let hw_id = read_trimmed(&path.join("address")).unwrap_or_else(|| name.clone());
            let mut iface = PhysicalRadioInterface::new(
                first_index + i as InterfaceIndex,
                hw_id,
                InterfaceKind::Wifi,
                vec![FreqBand::Band2G4, FreqBand::Band5G8],
            );
            iface.usb_path = fs::read_link(path.join("device")).ok().map(|p| p.display().to_string());
            tracing::debug!("scan: wifi {} -> interface {} ({})", name, iface.index, iface.hw_id);
            found.push(iface);
        }
        Ok(found)
    }

    fn scan_sik(&self, first_index: InterfaceIndex) -> Vec<PhysicalRadioInterface> {
        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(e) => {
                tracing::warn!("scan: serial port enumeration failed: {}", e);
                return vec![];
            }
        };

        let mut found = Vec::new();
        for port in ports {
            let serialport::SerialPortType::UsbPort(usb) = &port.port_type else {
                continue;
            };
            if !SIK_USB_VIDS.contains(&usb.vid) {
                continue;
            }
            let mut iface = PhysicalRadioInterface::new(
                first_index + found.len() as InterfaceIndex,
                port.port_name.clone(),
                InterfaceKind::Sik,
                vec![FreqBand::Sub1G],
            );
            iface.usb_path = usb.serial_number.clone();
            tracing::debug!("scan: sik {} ({:04x}:{:04x}) -> interface {}", port.port_name, usb.vid, usb.pid, iface.index);
            found.push(iface);
        }
        found
    }
}

impl Default for SysfsScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceScanner for SysfsScanner {
    fn scan(&mut self) -> io::Result<Vec<PhysicalRadioInterface>> {
        let mut all = self.scan_wifi(0)?;
        if self.scan_serial {
            let next = all.len() as InterfaceIndex;
            all.extend(self.scan_sik(next));
        }
        Ok(all)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Fixed interface list, for tests and setups without scanning
pub struct StaticScanner(pub Vec<PhysicalRadioInterface>);

impl InterfaceScanner for StaticScanner {
    fn scan(&mut self) -> io::Result<Vec<PhysicalRadioInterface>> {
        Ok(self.0.clone())
    }
}
