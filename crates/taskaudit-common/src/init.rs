//! Global initialization utilities for the application

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the application environment
///
/// Loads variables from a `.env` file in the current directory (or any
/// parent) before configuration is read. Safe to call multiple times - only
/// the first call has an effect.
pub fn initialize_environment() {
    INIT.call_once(|| {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            eprintln!("Ignoring unreadable .env file: {e}");
        }
    });
}
