// src/services/mod.rs

pub mod lifecycle;
pub mod overlay;
pub mod payout;
pub mod rank_engine;
pub mod rank_service;
pub mod tally;
