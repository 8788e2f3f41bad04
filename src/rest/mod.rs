pub mod appstate;
pub mod caller;
pub mod exports_handler;
pub mod responses_handler;


pub use appstate::{create_app, AppState, SharedState};
pub use caller::{CallerEmail, USER_EMAIL_HEADER};
