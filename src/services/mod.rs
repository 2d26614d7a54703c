//! Services module for settlement, refunds and checkout

pub mod checkout;
pub mod notification;
pub mod refund_orchestrator;
pub mod retry;
pub mod settlement;

pub use checkout::{CheckoutError, CheckoutRequest, CheckoutResponse, CheckoutService};
pub use notification::{DiscordNotifier, LogNotifier, NotificationEvent, Notifier};
pub use refund_orchestrator::{RefundError, RefundOrchestrator, RefundResult, RefundResultOutcome};
pub use settlement::{SettlementError, SettlementOutcome, SettlementProcessor};
