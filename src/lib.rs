//! Wakegate - an HTTP gate that wakes on-demand services before letting traffic through
//!
//! This library provides a host-routed gate that:
//! - Routes HTTP traffic based on the Host header to configured gates
//! - Asks an external orchestrator to wake each gate's services on every request
//! - Either serves a self-refreshing loading page (dynamic mode) or holds the
//!   request until the services are up (blocking mode)
//! - Forwards ready requests to the gate's upstream through a pooled client
//! - Reports configured gates over a localhost admin API

use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;

pub mod admin;
pub mod config;
pub mod duration;
pub mod error;
pub mod forward;
pub mod pages;
pub mod pool;
pub mod probe;
pub mod server;
pub mod service;
pub mod strategy;

/// Response body type shared by every handler
pub type GateBody = BoxBody<Bytes, hyper::Error>;
