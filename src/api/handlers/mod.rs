pub mod admin;
pub mod auth;
pub mod health;
pub mod sessions;
pub mod types;

pub use self::health::health;

#[cfg(test)]
mod tests;
