pub mod artifacts;
pub mod cli;
pub mod constants;
pub mod error;
pub mod filesystem;
pub mod handlers;
pub mod logging;
pub mod policy;
pub mod server;
pub mod verifier;

#[cfg(test)]
pub(crate) mod tests;
