//! Crop Advisor
//!
//! Web backend for farmers: crop recommendations from a farm description and
//! background leaf-disease diagnosis from uploaded photos, both answered by a
//! Gemini-style generative AI provider.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
