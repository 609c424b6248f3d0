//! Type-safe Rust client for the synthetic-monitoring API.
//!
//! This crate provides the wire types for checks and probes plus a thin,
//! bearer-token-authenticated HTTP client over the management endpoints the
//! controller needs: listing probes and checks, and adding, updating and
//! deleting checks.
//!
//! # Example
//!
//! ```no_run
//! use synthmon_client::Client;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new("https://synthetic-monitoring-api.example.com", "my-token")?;
//!
//! let probes = client.list_probes().await?;
//! println!("{} probes available", probes.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return `Result<T, ClientError>`:
//!
//! ```no_run
//! # use synthmon_client::{Client, ClientError};
//! # async fn example() -> Result<(), ClientError> {
//! # let client = Client::new("https://api.example.com", "token")?;
//! match client.delete_check(42).await {
//!     Ok(()) => println!("check removed"),
//!     Err(ClientError::Api { status: 404, .. }) => println!("check not found"),
//!     Err(e) => println!("error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod client;
mod error;
mod types;

pub use client::Client;
pub use error::{ClientError, Result};
pub use types::{Check, CheckSettings, IpVersion, Label, Probe, TcpSettings};
