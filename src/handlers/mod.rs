// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod comments;
pub mod engagement;
pub mod posts;
pub mod users;
