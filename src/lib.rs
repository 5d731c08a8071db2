//! `quiverdict` is a transparent, dictionary-aware compression core for an embedded key/value
//! cache: an atomically-swapped routing table maps namespace prefixes to trained `zstd`
//! dictionaries, a reference-counted pool shares compiled dictionaries across table generations,
//! and a background trainer builds new dictionaries from a reservoir of live traffic.
//!
//! The engine is the crate's single entry point for hosts:
//!
//! ```no_run
//! use quiverdict::{Config, Engine};
//!
//! let engine = Engine::new(Config::default());
//! let (frame, dict_id) = engine.encode(b"default:user:42", b"some value bytes");
//! let restored = engine.decode(&frame, dict_id).expect("decode");
//! assert_eq!(restored, b"some value bytes");
//! ```
//!
//! Dictionaries are loaded from `config.compression.dict_dir` via
//! [`Engine::reload_dictionaries`]; a host that runs a leader/follower topology calls
//! [`Engine::on_role_change`] when its role changes, which starts or stops the background trainer
//! and GC threads accordingly.

#![warn(clippy::all, clippy::cargo, clippy::nursery, clippy::pedantic, clippy::style)]
#![allow(clippy::multiple_crate_versions)]

pub mod codec;
pub mod config;
pub mod efficiency;
pub mod engine;
pub mod env;
pub mod error;
pub mod gc;
pub mod pool;
pub mod probe;
pub mod reservoir;
pub mod stats;
pub mod table;
pub mod trainer;
pub mod worker_pool;

pub use config::Config;
pub use engine::Engine;
pub use env::Role;
pub use error::{Error, Result};
pub use table::DictId;
