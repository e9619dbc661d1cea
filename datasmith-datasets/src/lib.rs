// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Datasmith Datasets
//!
//! The dataset version graph with copy-on-branch storage, file status
//! tracking and the job driver that runs transformations over a branch.
//!
//! ```no_run
//! use datasmith_core::{DataKind, DataSource, DatasmithConfig, NewDataSet, NewFile};
//! use datasmith_datasets::Datasmith;
//!
//! let ds = Datasmith::open(DatasmithConfig::load(None)?)?;
//! let dataset = ds.graph().create_dataset(
//!     NewDataSet::new("faq", "alice", "acme", DataKind::Document, DataSource::Upload)
//!         .with_files(vec![NewFile::bytes("faq.jsonl", "{\"q\":\"hi\"}\n")]),
//! )?;
//! # Ok::<(), datasmith_core::DatasmithError>(())
//! ```

pub mod facade;
pub mod graph;
pub mod items;
pub mod service;
pub mod status;

pub use facade::Datasmith;
pub use graph::{VersionGraph, VersionView, ORIGINAL_VERSION_NAME};
pub use items::{encode_items, parse_items};
pub use service::{TransformRequest, TransformService};
pub use status::StatusTracker;
