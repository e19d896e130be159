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

//! PCI class codes

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaseClass {
    NotDefined = 0x00,
    Storage = 0x01,
    Network = 0x02,
    Display = 0x03,
    Multimedia = 0x04,
    Memory = 0x05,
    Bridge = 0x06,
    Communication = 0x07,
    System = 0x08,
    Input = 0x09,
    Docking = 0x0a,
    Processor = 0x0b,
    Serial = 0x0c,
    Wireless = 0x0d,
    Intelligent = 0x0e,
    Satellite = 0x0f,
    Crypt = 0x10,
    Signal = 0x11,
    Others = 0xff,
}

impl BaseClass {
    pub fn from_raw(raw: u8) -> Option<Self> {
        use BaseClass::*;
        Some(match raw {
            0x00 => NotDefined,
            0x01 => Storage,
            0x02 => Network,
            0x03 => Display,
            0x04 => Multimedia,
            0x05 => Memory,
            0x06 => Bridge,
            0x07 => Communication,
            0x08 => System,
            0x09 => Input,
            0x0a => Docking,
            0x0b => Processor,
            0x0c => Serial,
            0x0d => Wireless,
            0x0e => Intelligent,
            0x0f => Satellite,
            0x10 => Crypt,
            0x11 => Signal,
            0xff => Others,
            _ => return None,
        })
    }

    /// Whether `class` belongs to this base class.
    pub fn contains(self, class: DeviceClass) -> bool {
        class.base() == self as u8
    }
}

const CLASS_NAMES: &[(u16, &str)] = &[
    (0x0000, "NotDefined"),
    (0x0001, "NotDefinedVga"),
    (0x0100, "StorageScsi"),
    (0x0101, "StorageIde"),
    (0x0102, "StorageFloppy"),
    (0x0103, "StorageIpi"),
    (0x0104, "StorageRaid"),
    (0x0105, "StorageAta"),
    (0x0106, "StorageSata"),
    (0x0107, "StorageSas"),
    (0x0108, "StorageNvme"),
    (0x0180, "StorageOther"),
    (0x0200, "NetworkEthernet"),
    (0x0201, "NetworkTokenRing"),
    (0x0202, "NetworkFddi"),
    (0x0203, "NetworkAtm"),
    (0x0204, "NetworkIsdn"),
    (0x0280, "NetworkOther"),
    (0x0300, "DisplayVga"),
    (0x0301, "DisplayXga"),
    (0x0302, "Display3d"),
    (0x0380, "DisplayOther"),
    (0x0400, "MultimediaVideo"),
    (0x0401, "MultimediaAudio"),
    (0x0402, "MultimediaPhone"),
    (0x0403, "MultimediaAudioDev"),
    (0x0480, "MultimediaOther"),
    (0x0500, "MemoryRam"),
    (0x0501, "MemoryFlash"),
    (0x0580, "MemoryOther"),
    (0x0600, "BridgeHost"),
    (0x0601, "BridgeIsa"),
    (0x0602, "BridgeEisa"),
    (0x0603, "BridgeMc"),
    (0x0604, "BridgePci"),
    (0x0605, "BridgePcmcia"),
    (0x0606, "BridgeNubus"),
    (0x0607, "BridgeCardbus"),
    (0x0608, "BridgeRaceway"),
    (0x0609, "BridgePciSemi"),
    (0x060a, "BridgeIbToPci"),
    (0x0680, "BridgeOther"),
    (0x0700, "CommunicationSerial"),
    (0x0701, "CommunicationParallel"),
    (0x0702, "CommunicationMserial"),
    (0x0703, "CommunicationModem"),
    (0x0780, "CommunicationOther"),
    (0x0800, "SystemPic"),
    (0x0801, "SystemDma"),
    (0x0802, "SystemTimer"),
    (0x0803, "SystemRtc"),
    (0x0804, "SystemPciHotplug"),
    (0x0880, "SystemOther"),
    (0x0900, "InputKeyboard"),
    (0x0901, "InputPen"),
    (0x0902, "InputMouse"),
    (0x0980, "InputOther"),
    (0x0a00, "DockingGeneric"),
    (0x0a80, "DockingOther"),
    (0x0b00, "Processor386"),
    (0x0b01, "Processor486"),
    (0x0b02, "ProcessorPentium"),
    (0x0b10, "ProcessorAlpha"),
    (0x0b20, "ProcessorPowerpc"),
    (0x0b30, "ProcessorMips"),
    (0x0b40, "ProcessorCo"),
    (0x0c00, "SerialFirewire"),
    (0x0c01, "SerialAccess"),
    (0x0c02, "SerialSsa"),
    (0x0c03, "SerialUsb"),
    (0x0c04, "SerialFiber"),
    (0x0c05, "SerialSmbus"),
    (0x0c06, "SerialInfiniband"),
    (0x0d00, "WirelessIrda"),
    (0x0d01, "WirelessConsumerIr"),
    (0x0d10, "WirelessRf"),
    (0x0d80, "WirelessOther"),
    (0x0e00, "IntelligentI2o"),
    (0x0f00, "SatelliteTv"),
    (0x0f01, "SatelliteAudio"),
    (0x0f02, "SatelliteVoice"),
    (0x0f03, "SatelliteData"),
    (0x1000, "CryptNetwork"),
    (0x1010, "CryptEntertainment"),
    (0x1080, "CryptOther"),
    (0x1100, "SignalDpio"),
    (0x1101, "SignalPerfCtr"),
    (0x1110, "SignalSynchronizer"),
    (0x1180, "SignalOther"),
    (0x00ff, "Others"),
];

/// 16-bit class code (base class in the high byte, subclass in the low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceClass(pub u16);

impl DeviceClass {
    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn base(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn subclass(self) -> u8 {
        self.0 as u8
    }

    pub fn base_class(self) -> Option<BaseClass> {
        BaseClass::from_raw(self.base())
    }

    /// Symbolic name when the class code is a well-known one.
    pub fn name(self) -> Option<&'static str> {
        CLASS_NAMES.iter().find(|(c, _)| *c == self.0).map(|(_, n)| *n)
    }
}

impl From<u16> for DeviceClass {
    fn from(v: u16) -> Self {
        DeviceClass(v)
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}
