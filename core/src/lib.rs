// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Flotilla core: a distributed container-provisioning coordinator.
//!
//! # Architecture
//!
//! - **domain**: manifests, capabilities, the filter DSL, the placement
//!   engine and external link resolution; pure logic, no I/O.
//! - **infrastructure**: the muxed TCP transport, the stream rendezvous
//!   registry, and the container engine seam.
//! - **application**: the agent service and the controller-side
//!   operations the CLI drives.

pub mod application;
pub mod domain;
pub mod infrastructure;
