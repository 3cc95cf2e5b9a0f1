//! API route definitions
//!
//! The page-rendering frontend lives elsewhere; this backend exposes REST
//! endpoints for health, job control, media retention actions, and the AI
//! rule pipeline.

pub mod ai;
pub mod health;
pub mod jobs;
pub mod media;
