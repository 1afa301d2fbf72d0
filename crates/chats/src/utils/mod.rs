//! Internal utilities.

pub mod call_token;
pub mod validation;

pub use call_token::generate_room_token;
pub use validation::Validator;
