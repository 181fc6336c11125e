//! Audio plumbing for SmartPlayer.
//!
//! Decoding (Symphonia), resampling (Rubato) and device streams (CPAL) for one
//! output track at a time, plus a metering input stream.

pub mod capture;
pub mod config;
pub mod decode;
pub mod device;
pub mod gain;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod resample;
