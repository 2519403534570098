// Copyright 2025 Snoindex Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Keeps a search index in sync with a content store.
//!
//! Transaction notifications name the records a write touched. The
//! invalidation services resolve them, plus every document embedding or
//! linking them, into invalidation notices. The indexing services consume
//! those notices and rewrite the documents under external versioning.

pub mod config;
pub mod domain;
pub mod error;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod runner;
pub mod search;
pub mod services;
pub mod telemetry;
pub mod test_utils;
pub mod web;

pub use config::{load_service_config, MergeOpts, ServiceConfig, ServiceKind};
pub use error::{Result, SnoindexError};
