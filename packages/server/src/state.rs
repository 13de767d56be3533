use crate::handler::EthHandler;

/// Shared application state.
pub struct AppState {
    /// Dispatcher for the configured chain.
    pub handler: EthHandler,
}
