//! Web of Needs client runtime
//!
//! Holds the client-side view of a Web of Needs account and drives it
//! against a node through a [`Transport`].
//!
//! # Architecture
//!
//! - **State**: atoms, connections and their message logs, changed only by
//!   folding [`Event`]s into a [`ClientState`]
//! - **Process**: per-resource load bookkeeping from `won-process`
//! - **Client**: async loads and sends with duplicate suppression, and
//!   agreement reconciliation through `won-agreement`
//! - **Replay**: offline evaluation of recorded connections (`won-replay`)
//!
//! # Example
//!
//! ```no_run
//! use won_client::{Client, ClientConfig, Transport};
//! use won_protocol::{OutboundAction, Uri};
//!
//! async fn chat<T: Transport>(transport: T) -> won_client::Result<()> {
//!     let client = Client::new(transport, ClientConfig::from_env()?);
//!     let connection = Uri::from("https://node.example/won/resource/atom/a/c/1");
//!     client.load_messages(&connection).await;
//!     client
//!         .send(&connection, OutboundAction::Chat { text: "hello".into() })
//!         .await?;
//!     client.reconcile_agreements(&connection).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod replay;
pub mod state;
pub mod transport;

pub use client::{Client, LoadOutcome};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use replay::{replay, replay_files, ReplayEntry, ReplayReport};
pub use state::{Atom, AtomState, ClientState, Connection, Event};
pub use transport::{AtomData, ConnectionData, FetchError, MessagePage, Receipt, Transport};
