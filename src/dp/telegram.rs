use crate::fdl::{FdlStatusRequest, FdlStatusResponse, ResponseStatus};

/// Minimum T<sub>SDR</sub> requested from parameterized stations, in bits.
const DEFAULT_MIN_TSDR: u8 = 11;

bitflags::bitflags! {
    /// Station status byte of a Set_Prm request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct StationStatus: u8 {
        const WD_ON =      0b00001000;
        const FREEZE_REQ = 0b00010000;
        const SYNC_REQ =   0b00100000;
        const UNLOCK_REQ = 0b01000000;
        const LOCK_REQ =   0b10000000;
    }
}

bitflags::bitflags! {
    /// Status flags of a Slave_Diag response.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DiagnosticFlags: u16 {
        // const STATION_NON_EXISTENT = 0b00000001;
        const STATION_NOT_READY =       0b00000010;
        const CONFIGURATION_FAULT =     0b00000100;
        const EXT_DIAG =                0b00001000;
        const NOT_SUPPORTED =           0b00010000;
        // const INVALID_RESPONSE =     0b00100000;
        const PARAMETER_FAULT =         0b01000000;
        // const MASTER_LOCK =          0b10000000;

        const PARAMETER_REQUIRED =      0b00000001_00000000;
        const STATUS_DIAGNOSTICS =      0b00000010_00000000;
        const PERMANENT_BIT =           0b00000100_00000000;
        const WATCHDOG_ON =             0b00001000_00000000;
        const FREEZE_MODE =             0b00010000_00000000;
        const SYNC_MODE =               0b00100000_00000000;
        // const RESERVED =             0b01000000_00000000;
        // const DEACTIVATED =          0b10000000_00000000;
    }
}

bitflags::bitflags! {
    /// Control command bits of a Global_Control request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ControlCommand: u8 {
        const CLEAR_DATA = 0b00000010;
        const UNFREEZE =   0b00000100;
        const FREEZE =     0b00001000;
        const UNSYNC =     0b00010000;
        const SYNC =       0b00100000;
    }
}

/// Set_Prm request establishing a station's operating parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPrmRequest {
    /// Destination Address
    pub da: u8,
    /// Source Address, assigned by the master right before sending
    pub sa: u8,
    pub station_status: StationStatus,
    /// Watchdog timeout factor 1
    pub wd_fact_1: u8,
    /// Watchdog timeout factor 2
    pub wd_fact_2: u8,
    /// Minimum station delay time before replying, in bits
    pub min_tsdr: u8,
    /// Ident number the station must match
    pub ident_number: u16,
    /// Group membership mask for Global_Control addressing
    pub group_ident: u8,
    /// Vendor specific parameter bytes
    pub user_prm_data: Vec<u8>,
}

impl SetPrmRequest {
    pub fn new(da: u8, ident_number: u16) -> Self {
        Self {
            da,
            sa: 0,
            station_status: StationStatus::LOCK_REQ,
            wd_fact_1: 1,
            wd_fact_2: 1,
            min_tsdr: DEFAULT_MIN_TSDR,
            ident_number,
            group_ident: 0,
            user_prm_data: Vec::new(),
        }
    }
}

/// Chk_Cfg request describing the expected I/O layout of a station.
///
/// The configuration bytes are opaque to the session logic; they are
/// typically generated from the station's device description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChkCfgRequest {
    /// Destination Address
    pub da: u8,
    /// Source Address, assigned by the master right before sending
    pub sa: u8,
    pub cfg_data: Vec<u8>,
}

impl ChkCfgRequest {
    pub fn new(da: u8) -> Self {
        Self {
            da,
            sa: 0,
            cfg_data: Vec::new(),
        }
    }
}

/// Slave_Diag request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDiagRequest {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
}

/// Slave_Diag response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveDiagResponse {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    pub flags: DiagnosticFlags,
    /// Address of the master this station is locked to (255 = none)
    pub master_address: u8,
    pub ident_number: u16,
    /// Raw extended diagnostics blocks, empty when none were reported
    pub ext_diag_data: Vec<u8>,
}

impl SlaveDiagResponse {
    /// Whether the station reports extended diagnostics information.
    pub fn has_ext_diag(&self) -> bool {
        self.flags.contains(DiagnosticFlags::EXT_DIAG)
    }

    /// Whether the station accepted its parameters and configuration and
    /// will now answer cyclic Data_Exchange requests.
    pub fn is_ready_for_exchange(&self) -> bool {
        !self.flags.intersects(
            DiagnosticFlags::STATION_NOT_READY
                | DiagnosticFlags::CONFIGURATION_FAULT
                | DiagnosticFlags::PARAMETER_FAULT
                | DiagnosticFlags::PARAMETER_REQUIRED,
        )
    }

    /// Whether the station asks to be parameterized again.
    pub fn needs_new_parameterization(&self) -> bool {
        self.flags.contains(DiagnosticFlags::PARAMETER_REQUIRED)
    }

    /// Decode the extended diagnostics bytes into their blocks.
    pub fn iter_ext_diag_blocks(&self) -> super::ExtDiagBlockIter<'_> {
        super::diagnostics::ExtDiagBlockIter::new(&self.ext_diag_data)
    }
}

/// Cyclic Data_Exchange request carrying the output process data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataExchangeRequest {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    pub data_unit: Vec<u8>,
}

/// Cyclic Data_Exchange response carrying the input process data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataExchangeResponse {
    /// Destination Address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    /// Response function status, which may ask for a diagnostics cycle
    pub status: ResponseStatus,
    pub data_unit: Vec<u8>,
}

/// Global_Control request toggling sync/freeze mode on a station group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalControlRequest {
    /// Destination Address, always the broadcast address
    pub da: u8,
    /// Source Address
    pub sa: u8,
    pub control_command: ControlCommand,
    /// Addressed groups; 0 selects all stations
    pub group_select: u8,
}

impl GlobalControlRequest {
    pub fn new(da: u8, sa: u8) -> Self {
        Self {
            da,
            sa,
            control_command: ControlCommand::empty(),
            group_select: 0,
        }
    }
}

/// A single addressed application-layer message.
///
/// Wire encoding and decoding of these variants is the transceiver's
/// responsibility; the session logic only reads the named fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telegram {
    FdlStatusRequest(FdlStatusRequest),
    FdlStatusResponse(FdlStatusResponse),
    SlaveDiagRequest(SlaveDiagRequest),
    SlaveDiagResponse(SlaveDiagResponse),
    SetPrmRequest(SetPrmRequest),
    ChkCfgRequest(ChkCfgRequest),
    DataExchangeRequest(DataExchangeRequest),
    DataExchangeResponse(DataExchangeResponse),
    GlobalControlRequest(GlobalControlRequest),
}

impl Telegram {
    /// Destination address of this telegram.
    pub fn destination(&self) -> u8 {
        match self {
            Telegram::FdlStatusRequest(t) => t.da,
            Telegram::FdlStatusResponse(t) => t.da,
            Telegram::SlaveDiagRequest(t) => t.da,
            Telegram::SlaveDiagResponse(t) => t.da,
            Telegram::SetPrmRequest(t) => t.da,
            Telegram::ChkCfgRequest(t) => t.da,
            Telegram::DataExchangeRequest(t) => t.da,
            Telegram::DataExchangeResponse(t) => t.da,
            Telegram::GlobalControlRequest(t) => t.da,
        }
    }

    /// Source address of this telegram.
    pub fn source(&self) -> u8 {
        match self {
            Telegram::FdlStatusRequest(t) => t.sa,
            Telegram::FdlStatusResponse(t) => t.sa,
            Telegram::SlaveDiagRequest(t) => t.sa,
            Telegram::SlaveDiagResponse(t) => t.sa,
            Telegram::SetPrmRequest(t) => t.sa,
            Telegram::ChkCfgRequest(t) => t.sa,
            Telegram::DataExchangeRequest(t) => t.sa,
            Telegram::DataExchangeResponse(t) => t.sa,
            Telegram::GlobalControlRequest(t) => t.sa,
        }
    }
}

impl From<FdlStatusRequest> for Telegram {
    fn from(value: FdlStatusRequest) -> Self {
        Self::FdlStatusRequest(value)
    }
}

impl From<FdlStatusResponse> for Telegram {
    fn from(value: FdlStatusResponse) -> Self {
        Self::FdlStatusResponse(value)
    }
}

impl From<SlaveDiagRequest> for Telegram {
    fn from(value: SlaveDiagRequest) -> Self {
        Self::SlaveDiagRequest(value)
    }
}

impl From<SlaveDiagResponse> for Telegram {
    fn from(value: SlaveDiagResponse) -> Self {
        Self::SlaveDiagResponse(value)
    }
}

impl From<SetPrmRequest> for Telegram {
    fn from(value: SetPrmRequest) -> Self {
        Self::SetPrmRequest(value)
    }
}

impl From<ChkCfgRequest> for Telegram {
    fn from(value: ChkCfgRequest) -> Self {
        Self::ChkCfgRequest(value)
    }
}

impl From<DataExchangeRequest> for Telegram {
    fn from(value: DataExchangeRequest) -> Self {
        Self::DataExchangeRequest(value)
    }
}

impl From<DataExchangeResponse> for Telegram {
    fn from(value: DataExchangeResponse) -> Self {
        Self::DataExchangeResponse(value)
    }
}

impl From<GlobalControlRequest> for Telegram {
    fn from(value: GlobalControlRequest) -> Self {
        Self::GlobalControlRequest(value)
    }
}
