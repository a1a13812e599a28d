//! StoryShare - A multilingual community for sharing kidney-disease stories
//!
//! Members write stories in their own language, others translate them, and
//! moderators review everything before it is published. The crate serves a
//! JSON API under `/api/v1` and server-rendered pages for everything else.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod view;
pub mod web;
