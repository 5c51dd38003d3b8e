//! Notification collaborators

#[cfg(feature = "email")]
pub mod email;

#[cfg(feature = "email")]
pub use email::EmailNotifier;
