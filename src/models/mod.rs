// src/models/mod.rs

pub mod admin;
pub mod category;
pub mod comment;
pub mod market;
pub mod prediction;
pub mod rank;
pub mod user;
pub mod vote;
