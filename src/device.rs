//! The boundary to the vendor radio API.
//!
//! Everything the acquisition controller needs from the hardware layer goes through
//! [`RadioApi`]; samples and events come back asynchronously through a [`StreamHandler`]
//! invoked on a thread the vendor layer owns.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Status codes reported by the vendor API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Success,
    Fail,
    InvalidParam,
    OutOfRange,
    GainUpdateError,
    RfUpdateError,
    FsUpdateError,
    HwError,
    AliasingError,
    AlreadyInitialised,
    NotInitialised,
    NotEnabled,
    HwVerError,
    OutOfMemError,
    ServiceNotResponding,
    StartPending,
    StopPending,
    InvalidMode,
    FailedVerification(u8),
    InvalidServiceVersion,
    Unknown(u32),
}

impl ApiStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Fail,
            2 => Self::InvalidParam,
            3 => Self::OutOfRange,
            4 => Self::GainUpdateError,
            5 => Self::RfUpdateError,
            6 => Self::FsUpdateError,
            7 => Self::HwError,
            8 => Self::AliasingError,
            9 => Self::AlreadyInitialised,
            10 => Self::NotInitialised,
            11 => Self::NotEnabled,
            12 => Self::HwVerError,
            13 => Self::OutOfMemError,
            14 => Self::ServiceNotResponding,
            15 => Self::StartPending,
            16 => Self::StopPending,
            17 => Self::InvalidMode,
            18..=23 => Self::FailedVerification((code - 17) as u8),
            24 => Self::InvalidServiceVersion,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::Fail => 1,
            Self::InvalidParam => 2,
            Self::OutOfRange => 3,
            Self::GainUpdateError => 4,
            Self::RfUpdateError => 5,
            Self::FsUpdateError => 6,
            Self::HwError => 7,
            Self::AliasingError => 8,
            Self::AlreadyInitialised => 9,
            Self::NotInitialised => 10,
            Self::NotEnabled => 11,
            Self::HwVerError => 12,
            Self::OutOfMemError => 13,
            Self::ServiceNotResponding => 14,
            Self::StartPending => 15,
            Self::StopPending => 16,
            Self::InvalidMode => 17,
            Self::FailedVerification(n) => 17 + n as u32,
            Self::InvalidServiceVersion => 24,
            Self::Unknown(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "sdrplay_api_Success",
            Self::Fail => "sdrplay_api_Fail",
            Self::InvalidParam => "sdrplay_api_InvalidParam",
            Self::OutOfRange => "sdrplay_api_OutOfRange",
            Self::GainUpdateError => "sdrplay_api_GainUpdateError",
            Self::RfUpdateError => "sdrplay_api_RfUpdateError",
            Self::FsUpdateError => "sdrplay_api_FsUpdateError",
            Self::HwError => "sdrplay_api_HwError",
            Self::AliasingError => "sdrplay_api_AliasingError",
            Self::AlreadyInitialised => "sdrplay_api_AlreadyInitialised",
            Self::NotInitialised => "sdrplay_api_NotInitialised",
            Self::NotEnabled => "sdrplay_api_NotEnabled",
            Self::HwVerError => "sdrplay_api_HwVerError",
            Self::OutOfMemError => "sdrplay_api_OutOfMemError",
            Self::ServiceNotResponding => "sdrplay_api_ServiceNotResponding",
            Self::StartPending => "sdrplay_api_StartPending",
            Self::StopPending => "sdrplay_api_StopPending",
            Self::InvalidMode => "sdrplay_api_InvalidMode",
            Self::FailedVerification(_) => "sdrplay_api_FailedVerification",
            Self::InvalidServiceVersion => "sdrplay_api_InvalidServiceVersion",
            Self::Unknown(_) => "sdrplay_api_Unknown",
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Hardware revision reported during enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwVersion {
    Rsp1,
    Rsp1a,
    Rsp2,
    RspDuo,
    RspDx,
    Rsp1b,
    RspDxR2,
    Unknown(u8),
}

impl HwVersion {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::Rsp1,
            255 => Self::Rsp1a,
            2 => Self::Rsp2,
            3 => Self::RspDuo,
            4 => Self::RspDx,
            6 => Self::Rsp1b,
            7 => Self::RspDxR2,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for HwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsp1 => write!(f, "RSP1"),
            Self::Rsp1a => write!(f, "RSP1A"),
            Self::Rsp2 => write!(f, "RSP2"),
            Self::RspDuo => write!(f, "RSPduo"),
            Self::RspDx => write!(f, "RSPdx"),
            Self::Rsp1b => write!(f, "RSP1B"),
            Self::RspDxR2 => write!(f, "RSPdxR2"),
            Self::Unknown(id) => write!(f, "unknown ({id})"),
        }
    }
}

/// A device as returned by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub hw_version: HwVersion,
}

/// Pick the device to use: the first RSP1A if there is one, else the first device
pub fn select_preferred(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| d.hw_version == HwVersion::Rsp1a)
        .or_else(|| devices.first())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfType {
    #[default]
    Zero,
    If450,
    If1620,
    If2048,
}

impl IfType {
    pub fn khz(self) -> u32 {
        match self {
            IfType::Zero => 0,
            IfType::If450 => 450,
            IfType::If1620 => 1620,
            IfType::If2048 => 2048,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Isochronous USB transfers, 14-bit samples
    Isoch,
    /// Bulk USB transfers, 12-bit samples
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgcControl {
    Disabled,
    Enabled,
}

/// A single parameter write to the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceParam {
    SampleRate { hz: f64 },
    TransferMode(TransferMode),
    RfNotch(bool),
    DabNotch(bool),
    RfFrequency { hz: f64 },
    Bandwidth { khz: u32 },
    IfType(IfType),
    GainReduction { db: u8 },
    LnaState(u8),
    MinGainReduction { db: u8 },
    Agc(AgcControl),
    DcOffsetCorrection(bool),
    IqImbalanceCorrection(bool),
    BiasTee(bool),
}

impl DeviceParam {
    /// Name of the operation, used when the device rejects the write
    pub fn op(&self) -> &'static str {
        match self {
            DeviceParam::SampleRate { .. } => "set_sample_rate",
            DeviceParam::TransferMode(_) => "set_transfer_mode",
            DeviceParam::RfNotch(_) => "set_rf_notch",
            DeviceParam::DabNotch(_) => "set_dab_notch",
            DeviceParam::RfFrequency { .. } => "set_rf_frequency",
            DeviceParam::Bandwidth { .. } => "set_bandwidth",
            DeviceParam::IfType(_) => "set_if_type",
            DeviceParam::GainReduction { .. } => "set_gain_reduction",
            DeviceParam::LnaState(_) => "set_lna_state",
            DeviceParam::MinGainReduction { .. } => "set_min_gain_reduction",
            DeviceParam::Agc(_) => "set_agc",
            DeviceParam::DcOffsetCorrection(_) => "set_dc_offset_correction",
            DeviceParam::IqImbalanceCorrection(_) => "set_iq_imbalance_correction",
            DeviceParam::BiasTee(_) => "set_bias_tee",
        }
    }
}

/// The full set of device parameters applied before streaming starts
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    pub rf_hz: f64,
    pub fs_hz: f64,
    pub bandwidth_khz: u32,
    pub if_type: IfType,
    pub gain_reduction_db: u8,
    pub lna_state: u8,
    pub min_gain_reduction_db: u8,
    pub agc: AgcControl,
    pub dc_offset_correction: bool,
    pub iq_imbalance_correction: bool,
    pub rf_notch: bool,
    pub dab_notch: bool,
    pub transfer_mode: TransferMode,
}

impl DeviceParams {
    pub fn from_config(config: &Config) -> Self {
        let rx = &config.receiver;
        Self {
            rf_hz: rx.center_freq_mhz * 1e6,
            fs_hz: rx.sample_rate_mhz * 1e6,
            bandwidth_khz: rx.bandwidth_khz,
            if_type: rx.if_type,
            gain_reduction_db: rx.gain_reduction_db,
            lna_state: rx.lna_state,
            min_gain_reduction_db: rx.min_gain_reduction_db,
            agc: if rx.agc_enabled {
                AgcControl::Enabled
            } else {
                AgcControl::Disabled
            },
            dc_offset_correction: rx.dc_offset_correction,
            iq_imbalance_correction: rx.iq_imbalance_correction,
            rf_notch: rx.rf_notch,
            dab_notch: rx.dab_notch,
            transfer_mode: TransferMode::Isoch,
        }
    }

    /// The ordered list of writes needed to program the device.
    /// The bias-tee is always switched off, the LNA is powered externally.
    pub fn writes(&self) -> Vec<DeviceParam> {
        vec![
            DeviceParam::SampleRate { hz: self.fs_hz },
            DeviceParam::TransferMode(self.transfer_mode),
            DeviceParam::RfNotch(self.rf_notch),
            DeviceParam::DabNotch(self.dab_notch),
            DeviceParam::RfFrequency { hz: self.rf_hz },
            DeviceParam::Bandwidth {
                khz: self.bandwidth_khz,
            },
            DeviceParam::IfType(self.if_type),
            DeviceParam::GainReduction {
                db: self.gain_reduction_db,
            },
            DeviceParam::LnaState(self.lna_state),
            DeviceParam::MinGainReduction {
                db: self.min_gain_reduction_db,
            },
            DeviceParam::Agc(self.agc),
            DeviceParam::DcOffsetCorrection(self.dc_offset_correction),
            DeviceParam::IqImbalanceCorrection(self.iq_imbalance_correction),
            DeviceParam::BiasTee(false),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadState {
    Detected,
    Corrected,
}

/// Asynchronous notifications from the vendor layer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HardwareEvent {
    GainChanged { gain_reduction_db: u32, lna_gr_db: u32 },
    PowerOverloadChanged(OverloadState),
    DeviceRemoved,
    DeviceFailure,
    /// Anything else the vendor layer reports, by raw id
    Other(u32),
}

/// Receiver of streaming data and events.
///
/// Called on a thread owned by the vendor layer, possibly concurrently with the
/// controller's own calls, so implementations must never block for long.
pub trait StreamHandler: Send + Sync {
    /// `num_samples` is the packet length reported by the hardware; `reset` signals the
    /// stream was (re)initialized and buffered history should be discarded
    fn on_samples(&self, xi: &[i16], xq: &[i16], num_samples: usize, reset: bool);

    fn on_event(&self, event: HardwareEvent);
}

/// The lifecycle calls the acquisition controller makes on the vendor API
pub trait RadioApi: Send {
    fn open(&mut self) -> Result<(), ApiStatus>;
    fn close(&mut self) -> Result<(), ApiStatus>;
    fn lock(&mut self) -> Result<(), ApiStatus>;
    fn unlock(&mut self) -> Result<(), ApiStatus>;
    fn devices(&mut self) -> Result<Vec<DeviceInfo>, ApiStatus>;
    fn select(&mut self, device: &DeviceInfo) -> Result<(), ApiStatus>;
    fn set_param(&mut self, param: DeviceParam) -> Result<(), ApiStatus>;
    /// Register the handler and start streaming
    fn init(&mut self, handler: Arc<dyn StreamHandler>) -> Result<(), ApiStatus>;
    /// Stop streaming
    fn uninit(&mut self) -> Result<(), ApiStatus>;
    fn release(&mut self, device: &DeviceInfo) -> Result<(), ApiStatus>;
}
