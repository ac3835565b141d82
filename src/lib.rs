//! MindGym · skills trainer backend
//!
//! A course is a set of modules with graded exercises. A session walks the user
//! through them one answer at a time; an LLM judge decides whether each answer is
//! acceptable. Everything the user sees is an append-only command log that is
//! persisted per course and replayed on return.

pub mod catalog;
pub mod coach;
pub mod config;
pub mod course;
pub mod error;
pub mod generator;
pub mod judge;
pub mod library;
pub mod progress;
pub mod protocol;
pub mod render;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod util;
pub mod validation;
