//! Payment-gated API gateway for Stacks, built on the
//! [x402 protocol](https://www.x402.org).
//!
//! The gateway fronts a catalog of small compute and storage endpoints with
//! per-request blockchain micropayments: an unpaid request to a priced route
//! receives an HTTP 402 challenge describing price, accepted tokens, and
//! recipient; the client signs a transfer and retries; the gateway settles
//! the transfer through an external relay and executes the endpoint with
//! the payer's identity bound to the request.
//!
//! # Modules
//!
//! - [`adapters`] — Thin clients for the inference, chain-lookup, embedding,
//!   and log-sink dependencies.
//! - [`config`] — CLI/environment configuration with recipient validation.
//! - [`discovery`] — The `/x402.json` manifest and companion documents.
//! - [`facilitator`] — Client for the external settlement relay.
//! - [`gateway`] — Shared process state, injected into dispatch.
//! - [`handlers`] — Endpoint handlers and shared request/response helpers.
//! - [`metrics`] — Global counters and the recent-request ring.
//! - [`model_cache`] — TTL-bounded, single-flight model catalog snapshot.
//! - [`network`] — Stacks network identity and CAIP-2 chain ids.
//! - [`payment`] — The per-request payment state machine middleware.
//! - [`pricing`] — Fixed-tier and dynamic price estimation.
//! - [`proto`] — x402 wire types.
//! - [`registry`] — The declarative endpoint table and router builder.
//! - [`safety`] — Fire-and-forget content-safety scanning.
//! - [`shard`] — Per-payer isolated storage over embedded SQLite.
//! - [`stacks`] — c32check, Clarity value, and signed-message codecs.
//! - [`telemetry`] — Tracing subscriber setup.
//! - [`tokens`] — Accepted payment tokens and atomic amounts.
//! - [`trace_id`] — Correlation-id middleware.

pub mod adapters;
pub mod config;
pub mod discovery;
pub mod facilitator;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod model_cache;
pub mod network;
pub mod payment;
pub mod pricing;
pub mod proto;
pub mod registry;
pub mod safety;
pub mod shard;
pub mod stacks;
pub mod telemetry;
pub mod tokens;
pub mod trace_id;
pub mod util;
