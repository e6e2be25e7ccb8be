//! Language-learning memo cards.
//!
//! A user picks a language to learn and the languages they already know;
//! for every phrase they enter, an AI service writes translations, example
//! sentences and notes, and the result is stored per user.

pub mod auth;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod generation;
pub mod i18n;
pub mod models;
pub mod server;
