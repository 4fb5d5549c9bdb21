//! # `profisync` - A synchronous PROFIBUS-DP master stack
//!
//! _profisync_ implements the master side of PROFIBUS-DP (Decentralized
//! Peripherals) as a blocking, strictly sequential session: one telegram is
//! outstanding at a time and every operation is a full
//! send-then-wait-for-reply exchange.
//!
//! - The [`fdl`] module holds the _Fieldbus Data Link_ vocabulary shared
//!   with transceiver implementations: function codes, the frame count bit
//!   context, and the FDL status message cycle.
//! - The [`dp`] module implements the DP application layer.  This is where
//!   peripherals are projected, parameterized, and cyclically exchanged
//!   with.
//!
//! Bus access itself (serial PHY, telegram framing, token passing) is not
//! part of this crate.  It is provided by an implementation of the
//! [`dp::Transceiver`] trait.
//!
//! # Example
//! ```no_run
//! use profisync::dp;
//! use std::time::Duration;
//!
//! # struct LinkDriver;
//! # impl dp::Transceiver for LinkDriver {
//! #     fn send_sync(
//! #         &mut self,
//! #         _fcb: &mut profisync::fdl::FrameCountBit,
//! #         _telegram: &dp::Telegram,
//! #         _timeout: Duration,
//! #     ) -> dp::TransferOutcome {
//! #         dp::TransferOutcome::Failed
//! #     }
//! #     fn set_rx_filter(&mut self, _addresses: &[u8]) {}
//! # }
//! # fn connect_link_driver() -> LinkDriver { LinkDriver }
//! # fn main() -> Result<(), dp::DpError> {
//! // Set up the DP master with its bus transceiver:
//! // ==============================================
//! let transceiver = connect_link_driver();
//! let mut master = dp::DpMaster::new(
//!     dp::MasterClass::Class1,
//!     2,
//!     transceiver,
//!     std::collections::BTreeMap::new(),
//! );
//!
//! // Let's project a peripheral:
//! // ===========================
//! let remoteio_address = 7;
//! let mut remoteio = dp::Peripheral::new(remoteio_address, 0xb754);
//! remoteio.set_watchdog(Some(Duration::from_millis(500)))?;
//! remoteio.set_config_data(vec![0x11, 0x21])?;
//! remoteio.set_io_lengths(2, 1);
//! master.add(remoteio);
//!
//! // Parameterize all projected peripherals:
//! // =======================================
//! let all_ready = master.initialize()?;
//! assert!(all_ready);
//!
//! // Cyclic data exchange:
//! // =====================
//! let inputs = master.data_exchange(remoteio_address, &[0x80])?;
//! if let Some(inputs) = inputs {
//!     println!("Inputs: {:?}", inputs);
//! }
//! # Ok(())
//! # }
//! ```

pub mod dp;
pub mod fdl;
pub mod time;
