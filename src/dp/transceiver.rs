use crate::dp::Telegram;
use crate::fdl::FrameCountBit;
use crate::time::Duration;

/// Outcome of one synchronous telegram exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// A matching reply was received within the timeout.
    Reply(Telegram),
    /// The telegram went out and was acknowledged at the link layer, but no
    /// application reply is expected (SDN/broadcast message cycles).
    SentNoReply,
    /// No usable exchange happened within this attempt.  The caller decides
    /// whether to retry.
    Failed,
}

impl TransferOutcome {
    /// Whether the exchange itself succeeded (with or without a reply).
    #[inline(always)]
    pub fn is_ok(&self) -> bool {
        !matches!(self, TransferOutcome::Failed)
    }

    pub fn into_reply(self) -> Option<Telegram> {
        match self {
            TransferOutcome::Reply(telegram) => Some(telegram),
            TransferOutcome::SentNoReply | TransferOutcome::Failed => None,
        }
    }
}

/// Synchronous access to the bus.
///
/// Implementations wrap the FDL framing/token layer and the physical
/// transport.  The session logic issues strictly sequential exchanges; at
/// most one telegram is outstanding at any time.
pub trait Transceiver {
    /// Send `telegram` and wait up to `timeout` for the matching reply.
    ///
    /// One attempt only; retry discipline is the caller's business.  The
    /// frame count bit context belongs to the addressed station and must be
    /// cycled by the implementation after every acknowledged exchange, so
    /// that a retransmission of a lost frame keeps its bit value.
    fn send_sync(
        &mut self,
        fcb: &mut FrameCountBit,
        telegram: &Telegram,
        timeout: Duration,
    ) -> TransferOutcome;

    /// Configure the destination addresses accepted by the link layer.
    ///
    /// Called once at session initialization with the master's own address
    /// and the broadcast address.
    fn set_rx_filter(&mut self, addresses: &[u8]);
}
