pub mod auth;
pub mod comments;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod mturk;
pub mod recipients;
pub mod state;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;
