// Public modules
pub mod config;
pub mod database;
pub mod domains;
pub mod errors;
pub mod rest;

// Private modules
mod db_migration;

/// Set up `env_logger`. `RUST_LOG` defaults to `debug` in debug builds and
/// `info` otherwise. Safe to call more than once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }

    // Initialize env_logger if not already initialized
    let _ = env_logger::try_init();
}
