//! Process wiring for the pushgate gateway binaries.

pub mod controller;
