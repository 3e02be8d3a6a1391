//! # Kiroku Buffer
//!
//! Tag-partitioned, chunked event buffer sitting between an
//! event-producing application and a forward transporter.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Chunk Lifecycle                        │
//! │                                                              │
//! │  Producers ──► per-tag retention chunks ──► flush queue      │
//! │                 (pooled regions, grown       (bounded FIFO)  │
//! │                  by the expand ratio)             │          │
//! │                                                   ▼          │
//! │                                             transporter      │
//! │                                                   │ failure  │
//! │                                                   ▼          │
//! │                              re-enqueue, else backup queue   │
//! │                                                              │
//! │  On close: retention + queues ──► backup files on disk       │
//! │  On init:  backup files ──► retention (replayed for flush)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Memory for chunks comes from a [`BufferPool`] with a global ceiling;
//! when the ceiling is hit, appends fail fast with
//! [`Error::BufferFull`](kiroku_core::Error::BufferFull).

pub mod backup;
pub mod buffer;
pub mod chunk;
pub mod pool;
pub mod queue;
pub mod record;
pub mod transport;

pub use backup::{FileBackup, SavedBuffer};
pub use buffer::Buffer;
pub use chunk::{RetentionChunk, TaggedChunk};
pub use pool::{BufferPool, ChunkStorage};
pub use record::{EncoderModule, RecordEncoder, RecordMap};
pub use transport::Transporter;

pub use kiroku_core::{BufferConfig, Error, EventTime, Result, Timestamp};
