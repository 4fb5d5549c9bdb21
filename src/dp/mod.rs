//! PROFIBUS-DP (Decentralized Peripherals) application layer.
//!
//! This module implements the master side of a DP session: management of
//! the projected peripherals, the per-station parameterization sequence,
//! diagnostics polling, cyclic data exchange, and Global_Control
//! broadcasts.

mod diagnostics;
mod master;
mod peripheral;
mod telegram;
mod transceiver;

pub use diagnostics::{
    ChannelDataType, ChannelDiagnostics, ChannelError, ExtDiagBlock, ExtDiagBlockIter,
};
pub use master::{DpError, DpMaster, MasterClass, PeripheralStorage};
pub use peripheral::{Peripheral, PeripheralState};
pub use telegram::{
    ChkCfgRequest, ControlCommand, DataExchangeRequest, DataExchangeResponse, DiagnosticFlags,
    GlobalControlRequest, SetPrmRequest, SlaveDiagRequest, SlaveDiagResponse, StationStatus,
    Telegram,
};
pub use transceiver::{Transceiver, TransferOutcome};
