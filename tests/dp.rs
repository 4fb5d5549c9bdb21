use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use profisync::dp::{
    DataExchangeResponse, DiagnosticFlags, DpError, DpMaster, MasterClass, Peripheral,
    SlaveDiagResponse, StationStatus, Telegram, Transceiver, TransferOutcome,
};
use profisync::fdl::{
    FdlStatusResponse, FrameCountBit, FunctionCode, RequestType, ResponseState, ResponseStatus,
};

const MASTER_ADDRESS: u8 = 2;
const BROADCAST: u8 = 127;

/// Emulates compliant slave stations behind the transceiver seam.
///
/// Every request the master sends is recorded; the reply behavior is
/// controlled per telegram type so tests can script fault scenarios.
struct BusEmulator {
    /// All requests, in the order the master sent them.
    sent: Vec<Telegram>,
    rx_filters: Vec<Vec<u8>>,
    /// Function code of FDL status replies; `None` silences the probe.
    status_fc: Option<FunctionCode>,
    /// Diagnostics flags to reply with; the last entry repeats forever.
    diag_flags: VecDeque<DiagnosticFlags>,
    /// Input data returned on data exchange; `None` means no reply.
    exchange_data: Option<Vec<u8>>,
    exchange_status: ResponseStatus,
    /// Reply with a wrong telegram type to data exchange requests.
    exchange_wrong_reply: bool,
    /// Outcome of Global_Control sends.
    broadcast_outcome: TransferOutcome,
    /// Per-call latency, keeps timeout tests from busy-spinning.
    latency: Duration,
}

impl Default for BusEmulator {
    fn default() -> Self {
        Self {
            sent: Vec::new(),
            rx_filters: Vec::new(),
            status_fc: Some(FunctionCode::Response {
                state: ResponseState::Slave,
                status: ResponseStatus::Ok,
            }),
            diag_flags: VecDeque::new(),
            exchange_data: Some(Vec::new()),
            exchange_status: ResponseStatus::DataLow,
            exchange_wrong_reply: false,
            broadcast_outcome: TransferOutcome::SentNoReply,
            latency: Duration::from_millis(1),
        }
    }
}

impl BusEmulator {
    fn next_diag_flags(&mut self) -> DiagnosticFlags {
        if self.diag_flags.len() > 1 {
            self.diag_flags.pop_front().unwrap()
        } else {
            self.diag_flags
                .front()
                .copied()
                .unwrap_or(DiagnosticFlags::empty())
        }
    }

    fn diag_response(&mut self, da: u8, sa: u8) -> SlaveDiagResponse {
        SlaveDiagResponse {
            da,
            sa,
            flags: self.next_diag_flags(),
            master_address: MASTER_ADDRESS,
            ident_number: 0xb754,
            ext_diag_data: Vec::new(),
        }
    }
}

impl Transceiver for BusEmulator {
    fn send_sync(
        &mut self,
        fcb: &mut FrameCountBit,
        telegram: &Telegram,
        _timeout: Duration,
    ) -> TransferOutcome {
        std::thread::sleep(self.latency);
        self.sent.push(telegram.clone());
        match telegram {
            Telegram::FdlStatusRequest(req) => match self.status_fc {
                Some(fc) => TransferOutcome::Reply(Telegram::FdlStatusResponse(
                    FdlStatusResponse {
                        da: req.sa,
                        sa: req.da,
                        fc,
                    },
                )),
                None => TransferOutcome::Failed,
            },
            Telegram::SlaveDiagRequest(req) => {
                fcb.cycle();
                let response = self.diag_response(req.sa, req.da);
                TransferOutcome::Reply(Telegram::SlaveDiagResponse(response))
            }
            Telegram::SetPrmRequest(_) | Telegram::ChkCfgRequest(_) => {
                fcb.cycle();
                TransferOutcome::SentNoReply
            }
            Telegram::DataExchangeRequest(req) => {
                if self.exchange_wrong_reply {
                    let response = self.diag_response(req.sa, req.da);
                    return TransferOutcome::Reply(Telegram::SlaveDiagResponse(response));
                }
                match self.exchange_data.clone() {
                    Some(data_unit) => {
                        fcb.cycle();
                        TransferOutcome::Reply(Telegram::DataExchangeResponse(
                            DataExchangeResponse {
                                da: req.sa,
                                sa: req.da,
                                status: self.exchange_status,
                                data_unit,
                            },
                        ))
                    }
                    None => TransferOutcome::Failed,
                }
            }
            Telegram::GlobalControlRequest(_) => self.broadcast_outcome.clone(),
            _ => TransferOutcome::Failed,
        }
    }

    fn set_rx_filter(&mut self, addresses: &[u8]) {
        self.rx_filters.push(addresses.to_vec());
    }
}

/// Shared handle so tests can inspect and reconfigure the emulator while
/// the master owns its transceiver end.
#[derive(Clone)]
struct BusHandle(Rc<RefCell<BusEmulator>>);

impl BusHandle {
    fn new() -> Self {
        Self(Rc::new(RefCell::new(BusEmulator::default())))
    }

    fn sent(&self) -> Vec<Telegram> {
        self.0.borrow().sent.clone()
    }

    fn sent_kinds(&self) -> Vec<&'static str> {
        self.0.borrow().sent.iter().map(kind).collect()
    }
}

impl Transceiver for BusHandle {
    fn send_sync(
        &mut self,
        fcb: &mut FrameCountBit,
        telegram: &Telegram,
        timeout: Duration,
    ) -> TransferOutcome {
        self.0.borrow_mut().send_sync(fcb, telegram, timeout)
    }

    fn set_rx_filter(&mut self, addresses: &[u8]) {
        self.0.borrow_mut().set_rx_filter(addresses)
    }
}

fn kind(telegram: &Telegram) -> &'static str {
    match telegram {
        Telegram::FdlStatusRequest(_) => "FdlStatus.req",
        Telegram::FdlStatusResponse(_) => "FdlStatus.con",
        Telegram::SlaveDiagRequest(_) => "SlaveDiag.req",
        Telegram::SlaveDiagResponse(_) => "SlaveDiag.con",
        Telegram::SetPrmRequest(_) => "SetPrm.req",
        Telegram::ChkCfgRequest(_) => "ChkCfg.req",
        Telegram::DataExchangeRequest(_) => "DataExchange.req",
        Telegram::DataExchangeResponse(_) => "DataExchange.con",
        Telegram::GlobalControlRequest(_) => "GlobalControl.req",
    }
}

fn new_master(bus: &BusHandle) -> DpMaster<'static, BusHandle> {
    DpMaster::new(
        MasterClass::Class1,
        MASTER_ADDRESS,
        bus.clone(),
        BTreeMap::new(),
    )
}

#[test]
fn full_initialization_sequence() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    let mut master = new_master(&bus);

    let mut remoteio = Peripheral::new(7, 0xb754);
    remoteio.set_sync_mode(true).unwrap();
    remoteio.set_group_mask(0x01).unwrap();
    remoteio
        .set_watchdog(Some(Duration::from_millis(400)))
        .unwrap();
    remoteio.set_user_prm_data(vec![0xaa]).unwrap();
    remoteio.set_config_data(vec![0x11, 0x21]).unwrap();
    master.add(remoteio);

    assert_eq!(master.initialize(), Ok(true));

    let remoteio = master.get(7).unwrap();
    assert!(remoteio.state().is_ready());
    assert!(remoteio.is_parameterized());
    assert!(remoteio.last_diagnostics().is_some());

    // The link layer accepts telegrams for us and for broadcast.
    assert_eq!(
        bus.0.borrow().rx_filters,
        vec![vec![MASTER_ADDRESS, BROADCAST]]
    );

    // The handshake runs in the documented order, no step skipped.
    assert_eq!(
        bus.sent_kinds(),
        vec![
            "FdlStatus.req",
            "SlaveDiag.req",
            "SetPrm.req",
            "ChkCfg.req",
            "SlaveDiag.req",
        ]
    );
    for telegram in bus.sent() {
        assert_eq!(telegram.destination(), 7);
        assert_eq!(telegram.source(), MASTER_ADDRESS);
    }

    // The Set_Prm telegram carries the configured settings.
    let sent = bus.sent();
    let set_prm = match &sent[2] {
        Telegram::SetPrmRequest(t) => t,
        other => panic!("unexpected telegram {:?}", other),
    };
    assert!(set_prm.station_status.contains(
        StationStatus::LOCK_REQ | StationStatus::SYNC_REQ | StationStatus::WD_ON
    ));
    assert!(!set_prm.station_status.contains(StationStatus::FREEZE_REQ));
    assert_eq!(set_prm.wd_fact_1, 40);
    assert_eq!(set_prm.wd_fact_2, 1);
    assert_eq!(set_prm.group_ident, 0x01);
    assert_eq!(set_prm.ident_number, 0xb754);
    assert_eq!(set_prm.user_prm_data, vec![0xaa]);

    let chk_cfg = match &sent[3] {
        Telegram::ChkCfgRequest(t) => t,
        other => panic!("unexpected telegram {:?}", other),
    };
    assert_eq!(chk_cfg.cfg_data, vec![0x11, 0x21]);
    assert_eq!(chk_cfg.sa, MASTER_ADDRESS);
}

#[test]
fn initialization_covers_stations_in_address_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    let mut master = new_master(&bus);
    master.add(Peripheral::new(12, 0x1234));
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(master.initialize(), Ok(true));

    let destinations: Vec<u8> = bus.sent().iter().map(|t| t.destination()).collect();
    assert_eq!(destinations, vec![7, 7, 7, 7, 7, 12, 12, 12, 12, 12]);
    assert!(master.iter().all(|p| p.is_parameterized()));
}

#[test]
fn status_probe_rejects_request_bit() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().status_fc = Some(FunctionCode::Request {
        fcb: false,
        fcv: false,
        req: RequestType::FdlStatus,
    });
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.initialize(),
        Err(DpError::RequestBitSet { address: 7 })
    );

    // Fail-fast: nothing beyond the status probe went out.
    assert_eq!(bus.sent_kinds(), vec!["FdlStatus.req"]);
    let remoteio = master.get(7).unwrap();
    assert!(remoteio.state().is_fault());
    assert!(!remoteio.is_parameterized());
}

#[test]
fn status_probe_rejects_wrong_station_type() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().status_fc = Some(FunctionCode::Response {
        state: ResponseState::MasterInRing,
        status: ResponseStatus::Ok,
    });
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.initialize(),
        Err(DpError::NotASlave {
            address: 7,
            detected: ResponseState::MasterInRing,
        })
    );
    assert_eq!(bus.sent_kinds(), vec!["FdlStatus.req"]);
}

#[test]
fn readiness_poll_times_out() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0
        .borrow_mut()
        .diag_flags
        .push_back(DiagnosticFlags::STATION_NOT_READY);
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.initialize(),
        Err(DpError::Timeout {
            address: 7,
            step: "final Slave_Diag request",
        })
    );

    let remoteio = master.get(7).unwrap();
    assert!(remoteio.state().is_fault());
    assert!(!remoteio.is_parameterized());

    // Set_Prm and Chk_Cfg did go out before the readiness poll gave up.
    let kinds = bus.sent_kinds();
    assert_eq!(&kinds[..4], ["FdlStatus.req", "SlaveDiag.req", "SetPrm.req", "ChkCfg.req"]);
    assert!(kinds[4..].iter().all(|k| *k == "SlaveDiag.req"));
}

#[test]
fn data_exchange_returns_input_data() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().exchange_data = Some(vec![0xde, 0xad]);
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.data_exchange(7, &[0x80, 0x01]),
        Ok(Some(vec![0xde, 0xad]))
    );
    assert!(!master.get(7).unwrap().diagnostics_requested());

    let sent = bus.sent();
    let request = match &sent[0] {
        Telegram::DataExchangeRequest(t) => t,
        other => panic!("unexpected telegram {:?}", other),
    };
    assert_eq!(request.data_unit, vec![0x80, 0x01]);
}

#[test]
fn data_exchange_missed_cycle_is_no_data() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().exchange_data = None;
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(master.data_exchange(7, &[0x80]), Ok(None));
    assert_eq!(bus.sent_kinds(), vec!["DataExchange.req"]);

    // The next cycle may succeed again.
    bus.0.borrow_mut().exchange_data = Some(vec![0x01]);
    assert_eq!(master.data_exchange(7, &[0x80]), Ok(Some(vec![0x01])));
}

#[test]
fn data_exchange_signals_pending_diagnostics() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().exchange_status = ResponseStatus::DataHigh;
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(master.data_exchange(7, &[0x80]), Ok(Some(Vec::new())));
    assert!(master.get(7).unwrap().diagnostics_requested());

    // The diagnostics cycle is not run automatically; the periodic poll
    // clears the request.
    assert_eq!(bus.sent_kinds(), vec!["DataExchange.req"]);
    let diag = master.diag_slave(7).unwrap();
    assert!(diag.is_ready_for_exchange());
    assert!(!master.get(7).unwrap().diagnostics_requested());
}

#[test]
fn data_exchange_service_not_active() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().exchange_status = ResponseStatus::SapNotEnabled;
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.data_exchange(7, &[0x80]),
        Err(DpError::ServiceNotActive { address: 7 })
    );
}

#[test]
fn data_exchange_rejects_wrong_reply_type() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().exchange_wrong_reply = true;
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.data_exchange(7, &[0x80]),
        Err(DpError::UnexpectedReply { address: 7 })
    );
}

#[test]
fn data_exchange_requires_registered_station() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));

    assert_eq!(
        master.data_exchange(21, &[0x80]),
        Err(DpError::UnknownPeripheral { address: 21 })
    );
    assert_eq!(
        master.diag_slave(21).unwrap_err(),
        DpError::UnknownPeripheral { address: 21 }
    );
    // No telegram went out for either call.
    assert!(bus.sent().is_empty());
}

#[test]
fn diag_slaves_aggregate() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));
    master.add(Peripheral::new(12, 0x1234));

    assert_eq!(master.diag_slaves(), Ok(true));
    let destinations: Vec<u8> = bus.sent().iter().map(|t| t.destination()).collect();
    assert_eq!(destinations, vec![7, 12]);
}

#[test]
fn global_control_always_targets_broadcast() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    let mut master = new_master(&bus);
    master.add(Peripheral::new(7, 0xb754));
    master.add(Peripheral::new(12, 0x1234));

    master.sync_mode(0).unwrap();
    master.freeze_mode(0x05).unwrap();
    master.sync_mode_cancel(0).unwrap();
    master.freeze_mode_cancel(0x05).unwrap();

    use profisync::dp::ControlCommand;
    let sent = bus.sent();
    assert_eq!(sent.len(), 4);
    let expected = [
        (ControlCommand::SYNC, 0x00),
        (ControlCommand::FREEZE, 0x05),
        (ControlCommand::UNSYNC, 0x00),
        (ControlCommand::UNFREEZE, 0x05),
    ];
    for (telegram, (command, group_select)) in sent.iter().zip(expected) {
        let request = match telegram {
            Telegram::GlobalControlRequest(t) => t,
            other => panic!("unexpected telegram {:?}", other),
        };
        assert_eq!(request.da, BROADCAST);
        assert_eq!(request.sa, MASTER_ADDRESS);
        assert_eq!(request.control_command, command);
        assert_eq!(request.group_select, group_select);
    }
}

#[test]
fn global_control_transport_failure_is_fatal() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().broadcast_outcome = TransferOutcome::Failed;
    let mut master = new_master(&bus);

    assert_eq!(
        master.sync_mode(0),
        Err(DpError::TransferFailed {
            address: BROADCAST,
            step: "Global_Control",
        })
    );
}

#[test]
fn global_control_must_not_see_a_reply() {
    let _ = env_logger::builder().is_test(true).try_init();
    let bus = BusHandle::new();
    bus.0.borrow_mut().broadcast_outcome =
        TransferOutcome::Reply(Telegram::SlaveDiagRequest(profisync::dp::SlaveDiagRequest {
            da: MASTER_ADDRESS,
            sa: 7,
        }));
    let mut master = new_master(&bus);

    assert_eq!(
        master.freeze_mode(0),
        Err(DpError::UnexpectedReply { address: BROADCAST })
    );
}
