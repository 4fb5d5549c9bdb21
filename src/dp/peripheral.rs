use crate::dp::telegram::{ChkCfgRequest, SetPrmRequest, SlaveDiagResponse, StationStatus};
use crate::dp::DpError;
use crate::fdl::FrameCountBit;
use crate::time::Duration;

/// Lifecycle state of a peripheral within the master session.
///
/// States advance strictly in order during initialization; `Fault` is
/// reachable from any of them.  The cause of a fault travels in the
/// [`DpError`] returned to the caller, the state only records where the
/// sequence stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PeripheralState {
    #[default]
    Idle,
    /// Awaiting the reply to the early FDL status request.
    StatusProbe,
    /// Station answered; frame counting is active from here on.
    FcbPrimed,
    /// Awaiting the first Slave_Diag reply.
    DiagPre,
    /// Set_Prm has been sent.
    ParamSent,
    /// Chk_Cfg has been sent.
    ConfigSent,
    /// Awaiting the Slave_Diag reply that signals data exchange readiness.
    DiagFinal,
    /// Initialization completed; cyclic data exchange may run.
    Ready,
    /// Initialization aborted.
    Fault,
}

impl PeripheralState {
    #[inline(always)]
    pub fn is_ready(self) -> bool {
        self == PeripheralState::Ready
    }

    #[inline(always)]
    pub fn is_fault(self) -> bool {
        self == PeripheralState::Fault
    }
}

/// Descriptor of one remote station (slave) managed by the master.
///
/// Holds the station's identity, the prepared Set_Prm and Chk_Cfg request
/// templates, and the frame count bit context used for every transaction
/// with this station.
#[derive(Debug, PartialEq, Eq)]
pub struct Peripheral {
    /// Station address of this peripheral (slave)
    address: u8,
    /// Ident number the station must report
    ident_number: u16,
    /// Size of the input address range, in bytes
    input_length: u8,
    /// Size of the output address range, in bytes
    output_length: u8,
    /// Prepared Set_Prm request
    pub(crate) set_prm: SetPrmRequest,
    /// Prepared Chk_Cfg request
    pub(crate) chk_cfg: ChkCfgRequest,
    /// FCB tracking for this peripheral
    pub(crate) fcb: FrameCountBit,
    /// Current lifecycle state
    pub(crate) state: PeripheralState,
    /// Set once a full initialization sequence went through; locks the
    /// parameter mutators.
    parameterized: bool,
    /// Last diagnostics received from this peripheral
    pub(crate) diag: Option<SlaveDiagResponse>,
    /// The station asked for a diagnostics cycle during data exchange.
    pub(crate) diag_pending: bool,
}

impl Peripheral {
    pub fn new(address: u8, ident_number: u16) -> Self {
        Self {
            address,
            ident_number,
            input_length: 0,
            output_length: 0,
            set_prm: SetPrmRequest::new(address, ident_number),
            chk_cfg: ChkCfgRequest::new(address),
            fcb: FrameCountBit::new(),
            state: PeripheralState::Idle,
            parameterized: false,
            diag: None,
            diag_pending: false,
        }
    }

    /// Address of this peripheral.
    #[inline(always)]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Ident number of this peripheral.
    #[inline(always)]
    pub fn ident_number(&self) -> u16 {
        self.ident_number
    }

    #[inline(always)]
    pub fn input_length(&self) -> u8 {
        self.input_length
    }

    #[inline(always)]
    pub fn output_length(&self) -> u8 {
        self.output_length
    }

    /// Current lifecycle state.
    #[inline(always)]
    pub fn state(&self) -> PeripheralState {
        self.state
    }

    /// Whether this peripheral completed a full initialization sequence.
    #[inline(always)]
    pub fn is_parameterized(&self) -> bool {
        self.parameterized
    }

    /// Whether the station asked for a diagnostics cycle during data
    /// exchange.  Cleared by the next diagnostics poll.
    #[inline(always)]
    pub fn diagnostics_requested(&self) -> bool {
        self.diag_pending
    }

    /// Get the last diagnostics information received from this peripheral.
    #[inline]
    pub fn last_diagnostics(&self) -> Option<&SlaveDiagResponse> {
        self.diag.as_ref()
    }

    /// Set the sizes of the input and output address ranges, in bytes.
    ///
    /// These are usually resolved from the station's device description.
    pub fn set_io_lengths(&mut self, input: u8, output: u8) {
        self.input_length = input;
        self.output_length = output;
    }

    /// Enable/disable sync-mode.  Must be called before parameterization.
    pub fn set_sync_mode(&mut self, enabled: bool) -> Result<(), DpError> {
        self.check_mutable()?;
        self.set_prm
            .station_status
            .set(StationStatus::SYNC_REQ, enabled);
        Ok(())
    }

    /// Enable/disable freeze-mode.  Must be called before parameterization.
    pub fn set_freeze_mode(&mut self, enabled: bool) -> Result<(), DpError> {
        self.check_mutable()?;
        self.set_prm
            .station_status
            .set(StationStatus::FREEZE_REQ, enabled);
        Ok(())
    }

    /// Assign the station to one or more Global_Control groups.  Must be
    /// called before parameterization.
    pub fn set_group_mask(&mut self, group_mask: u8) -> Result<(), DpError> {
        self.check_mutable()?;
        self.set_prm.group_ident = group_mask;
        Ok(())
    }

    /// Set the vendor specific parameter bytes of the Set_Prm request.
    /// Must be called before parameterization.
    pub fn set_user_prm_data(&mut self, data: Vec<u8>) -> Result<(), DpError> {
        self.check_mutable()?;
        self.set_prm.user_prm_data = data;
        Ok(())
    }

    /// Set the configuration bytes of the Chk_Cfg request.  Must be called
    /// before parameterization.
    pub fn set_config_data(&mut self, data: Vec<u8>) -> Result<(), DpError> {
        self.check_mutable()?;
        self.chk_cfg.cfg_data = data;
        Ok(())
    }

    /// Set the response watchdog of the station.
    ///
    /// `None` or a zero duration disables the watchdog.  The timeout is
    /// rounded up to the nearest value representable in the factor
    /// encoding; timeouts beyond the encodable range fail with
    /// [`DpError::WatchdogOutOfRange`] without touching any state.
    pub fn set_watchdog(&mut self, timeout: Option<Duration>) -> Result<(), DpError> {
        self.check_mutable()?;

        let timeout_ms: u64 = timeout
            .map(|t| t.as_millis().try_into().unwrap_or(u64::MAX))
            .unwrap_or(0);
        if timeout_ms == 0 {
            self.set_prm.station_status.remove(StationStatus::WD_ON);
            return Ok(());
        }

        let (fact_1, fact_2) = watchdog_factors(timeout_ms)?;
        self.set_prm.station_status.insert(StationStatus::WD_ON);
        self.set_prm.wd_fact_1 = fact_1;
        self.set_prm.wd_fact_2 = fact_2;
        Ok(())
    }

    pub(crate) fn mark_parameterized(&mut self) {
        self.parameterized = true;
    }

    fn check_mutable(&self) -> Result<(), DpError> {
        if self.parameterized {
            Err(DpError::AlreadyParameterized {
                address: self.address,
            })
        } else {
            Ok(())
        }
    }
}

/// Calculate the watchdog factor pair for a timeout in milliseconds.
///
/// The watchdog expires after `fact_1 * fact_2 * 10` milliseconds.  Factor 2
/// is the smallest power of two that brings factor 1 into range, which keeps
/// the 10 ms resolution for all timeouts up to 2.55 s.
fn watchdog_factors(timeout_ms: u64) -> Result<(u8, u8), DpError> {
    debug_assert!(timeout_ms > 0);

    let mut fact_2: u64 = 1;
    while timeout_ms > 2550 * fact_2 {
        fact_2 *= 2;
        if fact_2 > 255 {
            return Err(DpError::WatchdogOutOfRange { timeout_ms });
        }
    }

    // ceil(timeout_ms / (10 * fact_2)), guaranteed in range by the loop
    let fact_1 = (timeout_ms + 10 * fact_2 - 1) / (10 * fact_2);
    Ok((fact_1.clamp(1, 255) as u8, fact_2 as u8))
}
