use fpvlink_core::{InterfaceIndex, LinkId, PlatformLimits, RemoteRadioInterface, UserVideoParams};

/// The vehicle the controller is currently paired with
#[derive(Debug, Clone)]
pub struct VehicleInfo {
    pub name: String,
    pub interfaces: Vec<RemoteRadioInterface>,
}

impl VehicleInfo {
    pub fn interfaces_for_link(&self, link: LinkId) -> impl Iterator<Item = &RemoteRadioInterface> {
        self.interfaces.iter().filter(move |i| i.link == Some(link))
    }

    pub fn interface(&self, index: InterfaceIndex) -> Option<&RemoteRadioInterface> {
        self.interfaces.iter().find(|i| i.index == index)
    }
}

/// Everything the core needs to know about the active pairing.
/// Passed explicitly to every entity; several contexts can coexist in tests.
#[derive(Debug, Clone, Default)]
pub struct PairingContext {
    pub vehicle: Option<VehicleInfo>,
    /// Video parameters of the active camera, inherited by profile tiers
    pub video: UserVideoParams,
    pub limits: PlatformLimits,
}

impl PairingContext {
    pub fn unpaired(limits: PlatformLimits, video: UserVideoParams) -> Self {
        Self { vehicle: None, video, limits }
    }

    pub fn paired(vehicle: VehicleInfo, limits: PlatformLimits, video: UserVideoParams) -> Self {
        Self {
            vehicle: Some(vehicle),
            video,
            limits,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.vehicle.is_some()
    }
}
