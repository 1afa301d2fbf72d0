//! Policy built on top of the store.

pub mod access;

pub use access::AccessGate;
