//! Repository review pipeline with live progress streaming.
//!
//! ## Overview
//!
//! A client submits a repository URL and gets back a job id. A worker task
//! clones the repository into an isolated execution context, then runs,
//! lints and (optionally) AI-critiques every source file, and ends with a
//! Markdown report. Every step is pushed as an event onto the job's private
//! channel, which the client drains over server-sent events.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (router, CORS, graceful shutdown)    │
//! │          │ <─────── │    └─ api.rs  (handlers, AppState, ApiError)     │
//! └──────────┘   SSE    │         │                                        │
//!                       │         │ ReviewService::submit / open_stream    │
//!                       │         v                                        │
//!                       │  service.rs ──> jobs.rs   (JobRegistry)          │
//!                       │         │         └─ stream.rs (JobStream, SSE)  │
//!                       │         │ tokio::spawn                           │
//!                       │         v                                        │
//!                       │  worker.rs  (ReviewWorker state machine)         │
//!                       │         │ events.rs (StepEmitter, sentinel)      │
//!                       │         v                                        │
//!                       │  sandbox/  (ExecutionContext: docker, local)     │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                           |
//! |-------------|----------------------------------------------------------|
//! | `language`  | Extension → language, run and lint commands              |
//! | `analysis`  | Source discovery, execution and linter classification    |
//! | `critique`  | `ModelClient` trait, Gemini client, critique parsing     |
//! | `report`    | Pure Markdown report rendering                           |
//! | `models`    | Verdicts, per-file reviews, summaries, persisted rows    |
//! | `db`        | SQLite access via `DbHandle`                             |
//!
//! ## Event Flow For One Job
//!
//! 1. `POST /review` → `ReviewService::submit()` validates the URL, registers
//!    the job's channel and spawns the worker.
//! 2. `GET /review/{job_id}` → `ReviewService::open_stream()` moves the
//!    channel's receiver into a `JobStream`; a second claim gets 409.
//! 3. The worker emits `step`/`file`/`execute`/`lint` events as it goes, then
//!    a `report` carrying the whole document, tears the sandbox down, emits
//!    `done` and finally the end-of-stream sentinel.
//! 4. The stream stops on the sentinel (or its wait timeout) and drops the
//!    job from the registry.

pub mod analysis;
pub mod api;
pub mod critique;
pub mod db;
pub mod events;
pub mod jobs;
pub mod language;
pub mod models;
pub mod report;
pub mod sandbox;
pub mod server;
pub mod service;
pub mod stream;
pub mod worker;

pub use events::{EventKind, ReviewEvent};
pub use service::{ReviewService, SubmittedJob};
