//! Subzone Entitlement Ledger
//!
//! Per-tenant subdomain quota built from stacked entitlement grants.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ENTITLEMENT LEDGER                               │
//! │                                                                         │
//! │   Billing webhooks        Sweep timer            Resource requests      │
//! │         │                      │                         │              │
//! │  ┌──────▼───────┐     ┌────────▼────────┐     ┌──────────▼─────────┐   │
//! │  │  Lifecycle   │     │   Expiration    │     │     Admission      │   │
//! │  │   Engine     │     │     Sweep       │     │      Gateway       │   │
//! │  └──────┬───────┘     └────────┬────────┘     └──────────┬─────────┘   │
//! │         │                      │                         │              │
//! │  ┌──────▼──────────────────────▼─────────────────────────▼──────────┐  │
//! │  │                 PER-TENANT LOCKS  (no global lock)               │  │
//! │  └──────┬──────────────────────┬─────────────────────────┬──────────┘  │
//! │         │                      │                         │              │
//! │  ┌──────▼───────┐     ┌────────▼────────┐     ┌──────────▼─────────┐   │
//! │  │ Grant Store  │     │ Quota Allocator │     │  Resource Store    │   │
//! │  │              │     │     (pure)      │     │                    │   │
//! │  └──────────────┘     └─────────────────┘     └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A tenant's quota is the baseline capacity plus, for each live addon, the
//! addon capacity minus the baseline capacity. Usage is attributed
//! baseline-first, then by grant creation time.

#![warn(missing_docs)]

pub mod model;
pub mod error;
pub mod config;
pub mod store;
pub mod locks;
pub mod allocator;
pub mod collaborators;
pub mod events;
pub mod lifecycle;
pub mod sweep;
pub mod admission;
pub mod ledger;
pub mod scheduler;

pub use model::{Grant, GrantId, GrantStatus, GrantTier, Resource, TenantId};
pub use error::{CollaboratorError, LedgerError, LedgerResult};
pub use config::LedgerConfig;
pub use store::{GrantStore, InMemoryGrantStore, InMemoryResourceStore, ResourceStore, StoreError};
pub use allocator::{QuotaAllocator, QuotaSummary};
pub use collaborators::{BillingGateway, Notifier, Provisioner, ResourceParams};
pub use events::{BillingEvent, IngestOutcome};
pub use lifecycle::CancelOutcome;
pub use sweep::SweepReport;
pub use admission::AdmissionOutcome;
pub use ledger::{Collaborators, EntitlementLedger};
pub use scheduler::SweepScheduler;
