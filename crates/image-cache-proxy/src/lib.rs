//! Image cache proxy
//!
//! Serves resized images from a durable disk cache, shrinks cached originals
//! by transcoding them to AVIF in the background, and falls back to an
//! external proxy service when the origin refuses to hand out an image.

pub mod cache;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod imaging;
pub mod scheduler;
pub mod transcoding;
pub mod transport;
pub mod upstream;
pub mod web;
