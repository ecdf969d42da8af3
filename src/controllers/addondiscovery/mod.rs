pub mod cache;
pub mod controller;
pub mod key;
pub mod patcher;
pub mod reconcilers;

pub use controller::run;
pub use key::ReconcileKey;
