// Transaction state tracking
//
// One small state machine per connector-issued tracking ID, driven only by
// asynchronous `TransactionUpdate` callbacks.

pub mod errors;
pub mod events;
pub mod states;
pub mod tracker;
pub mod transaction_state_machine;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::TransactionEvent;
pub use states::TransactionState;
pub use tracker::TransactionTracker;
pub use transaction_state_machine::{TransactionStateMachine, TransactionTransition};
