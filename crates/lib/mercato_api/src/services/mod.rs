//! Thin service layer between handlers and `mercato_core`.

pub mod auth;
