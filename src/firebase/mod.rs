//! Firebase: ID token verification for admin routes and the Firestore REST
//! API used as the document store.

pub mod auth;
pub mod firestore;
pub mod oauth;

#[cfg(test)]
pub mod fake;
