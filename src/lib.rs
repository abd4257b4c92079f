//! # Tenancy Controller
//!
//! A Kubernetes control plane that provisions tenant resources on behalf of
//! teams through declarative, finalizer-guarded reconcile loops.
//!
//! ## Overview
//!
//! 1. **Object store** - watchable store with optimistic concurrency, backed by
//!    the API server ([`store::KubeStore`]) or in memory ([`store::MemoryStore`])
//! 2. **Dispatcher** - watches one kind, drops status-only events, coalesces
//!    keys and feeds a worker pool
//! 3. **Reconcilers** - per-kind logic; [`controller::team`] owns a namespace per team
//! 4. **Managers and supervisor** - supervised restart, readiness and graceful shutdown
//!
//! ## Features
//!
//! - **Leak-proof deletion**: finalizers are only released after dependent resources are gone
//! - **Level-triggered**: every pass re-reads current state; replays are harmless
//! - **Per-key serialization**: one object is never reconciled twice at once
//! - **Prometheus metrics**: reconciles, errors, requeues, restarts and queue depth
//! - **Health probes**: `/healthz` and `/readyz`

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod store;
