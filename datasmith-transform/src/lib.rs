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

//! Datasmith Transform
//!
//! Pluggable per-item transforms and the bounded parallel engine that applies
//! them over a version's items.
//!
//! A unit is either an in-process script from the [`ScriptRegistry`] or a
//! remote agent ([`AgentTransformer`]), selected through
//! [`TransformUnitSpec`]. Never by path-based loading.

pub mod agent;
pub mod engine;
pub mod error;
pub mod script;
pub mod transformer;
pub mod unit;

pub use agent::{AgentEndpoint, AgentTransformer};
pub use engine::{preserves_shape, ItemProgress, TransformEngine, TransformReport};
pub use error::TransformError;
pub use script::{script_name, ScriptRegistry, ScriptTransformer};
pub use transformer::{normalize_output, Item, Transformer};
pub use unit::{TransformUnit, TransformUnitSpec, UnitResolver};

pub use tokio_util::sync::CancellationToken;
