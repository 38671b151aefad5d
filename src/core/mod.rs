//! Core domain models for pipeworks
//!
//! This module defines the typed value model (concepts, stuff, working
//! memory), the blueprint model, and the declarative domain documents.

pub mod blueprint;
pub mod concept;
pub mod config;
pub mod error;
pub mod expression;
pub mod library;
pub mod memory;
pub mod state;
pub mod stuff;
pub mod template;

pub use blueprint::*;
pub use concept::*;
pub use error::*;
pub use library::PipeLibrary;
pub use memory::*;
pub use state::*;
pub use stuff::*;
