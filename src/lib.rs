// Copyright (c) 2025 Evan Coleman
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

//! # mlflow-policy-gateway
//!
//! A policy enforcement point that sits in front of an MLflow-compatible
//! tracking/model-registry backend:
//! - JWT/JWKS authentication with kid-based key rotation
//! - RBAC authorization with multi-claim role aggregation
//! - Tenant-isolation request rewriting (tag injection, filter appending)
//! - Response/preflight ownership verification
//! - Structured audit logging, one JSON line per terminated request

pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;
pub mod rbac;
pub mod route;
pub mod tenant;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use proxy::AppState;
