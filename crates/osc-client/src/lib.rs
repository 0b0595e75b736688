//! Outscale API Client
//!
//! A Rust client library for the subset of the Outscale API (OAPI) used by the
//! cloud controller: VMs, subnets, route tables, public IPs, security groups
//! and load balancers (LBU).
//!
//! # Example
//!
//! ```no_run
//! use osc_client::{Credentials, OscClient, OscClientTrait, ResourceFilter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OscClient::new(
//!     "eu-west-2".to_string(),
//!     None,
//!     Credentials {
//!         access_key: "AK".to_string(),
//!         secret_key: "SK".to_string(),
//!     },
//! )?;
//!
//! // Subnets dedicated to public load balancers of cluster "c1"
//! let filter = ResourceFilter::new()
//!     .tag_key("OscK8sClusterID/c1")
//!     .tag_key("OscK8sRole/service");
//! let subnets = client.read_subnets(&filter).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Request signing**: OSC4-HMAC-SHA256 on every call
//! - **Typed filters**: one [`ResourceFilter`] rendered per resource family
//! - **Error taxonomy**: throttling, conflicts and duplicates are told apart
//! - **Mock**: in-memory [`MockOscClient`] behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod osc_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::OscClient;
pub use common::filters::{FilterKind, Filterable, ResourceFilter};
pub use common::signing::Credentials;
pub use common::HttpClient;
pub use error::OscError;
pub use models::*;
pub use osc_trait::OscClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{InjectedFailure, MockOscClient};
