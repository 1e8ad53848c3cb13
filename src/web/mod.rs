//! The web module for the status HTTP server.
//! This file declares the other files in this directory as sub-modules.

pub mod api;
