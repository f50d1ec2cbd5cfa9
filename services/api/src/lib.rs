//! IELTS Coach API Library Crate
//!
//! This library contains the web service around `coach-core`: configuration,
//! the Postgres profile store, REST handlers for registration and login, the
//! WebSocket chat screen, and routing. The `api` binary is a thin wrapper
//! around this library.

pub mod audio_utils;
pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
