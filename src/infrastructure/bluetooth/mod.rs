//! Bluetooth Module
//!
//! Manages one session with a SYM Pixl peripheral over an abstract GATT
//! transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (handle: connect, disconnect, commands, observables)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ requests (mpsc)
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 service actor (tokio task)               │
//! │  session state machine + command queue, one op in flight │
//! └──────┬──────────────┬──────────────┬───────────┬────────┘
//!        │              │              │           │
//!        ▼              ▼              ▼           ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌───────────┐
//! │ Connection │ │  Catalog   │ │ Dispatcher │ │ Transport │
//! │            │ │            │ │            │ │           │
//! │ - Retry    │ │ - Required │ │ - Decode   │ │ - GATT    │
//! │ - Session  │ │   services │ │ - Latest   │ │   ops     │
//! │            │ │ - Validate │ │   values   │ │ - Events  │
//! └────────────┘ └────────────┘ └────────────┘ └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs and the characteristic payload codec
//! - [`catalog`] - Required services/characteristics and discovery validation
//! - [`transport`] - The GATT transport contract
//! - [`connection`] - Session state and connect with retry
//! - [`queue`] - Serialized command queue and completion receipts
//! - [`dispatcher`] - Notification decoding and published latest values
//! - [`service`] - Public handle and the actor behind it
//! - [`simulator`] - In-memory SYM Pixl peripheral

pub mod catalog;
pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod queue;
pub mod service;
pub mod simulator;
pub mod transport;

// Re-export main service for convenience
pub use service::BluetoothService;
