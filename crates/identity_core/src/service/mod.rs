//! Use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls and resolution rules into the Identify use-case.
//! - Keep callers decoupled from storage details.

pub mod identify_service;
