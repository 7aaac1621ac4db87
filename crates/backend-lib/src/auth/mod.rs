// ============================
// callverify backend-lib/src/auth/mod.rs
// ============================
//! Request signing towards the provider and callback authentication.

pub mod callback;
pub mod token;

pub use callback::{callback_token, verify_callback_token};
pub use token::generate_auth_token;
